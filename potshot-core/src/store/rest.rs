use super::{GameStore, StoreEvent};
use crate::config::GameConfig;
use crate::error::{CoreError, Result};
use crate::types::{
    address_hex, h256_hex, parse_address, parse_h256, parse_u256, Address, CommitmentHash,
    Discount, PendingCommitment, PlayerRecord, SponsorInfo, WagerOutcome, Winner,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Serialize, Deserialize)]
struct WinnerRow {
    address: String,
    amount: String,
    won_at: DateTime<Utc>,
    tx_hash: Option<String>,
}

impl WinnerRow {
    fn from_winner(winner: &Winner) -> Self {
        Self {
            address: address_hex(&winner.address),
            amount: winner.amount.to_string(),
            won_at: winner.won_at,
            tx_hash: winner.tx_hash.as_ref().map(h256_hex),
        }
    }

    fn into_winner(self) -> Result<Winner> {
        Ok(Winner {
            address: parse_address(&self.address)?,
            amount: parse_u256(&self.amount)?,
            won_at: self.won_at,
            tx_hash: self.tx_hash.as_deref().map(parse_h256).transpose()?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PlayerRow {
    address: String,
    total_shots: i64,
    total_spent: String,
    total_won: String,
    rank: Option<i64>,
    #[serde(default)]
    referral_discounts: i64,
    #[serde(default)]
    bonus_credits: i64,
}

impl PlayerRow {
    fn from_record(record: &PlayerRecord) -> Self {
        Self {
            address: address_hex(&record.address),
            total_shots: record.total_shots as i64,
            total_spent: record.total_spent.to_string(),
            total_won: record.total_won.to_string(),
            rank: record.rank.map(|r| r as i64),
            referral_discounts: record.referral_discounts as i64,
            bonus_credits: record.bonus_credits as i64,
        }
    }

    fn into_record(self) -> Result<PlayerRecord> {
        Ok(PlayerRecord {
            address: parse_address(&self.address)?,
            total_shots: self.total_shots.max(0) as u64,
            total_spent: parse_u256(&self.total_spent)?,
            total_won: parse_u256(&self.total_won)?,
            rank: self.rank.map(|r| r.max(0) as u32),
            referral_discounts: self.referral_discounts.max(0) as u32,
            bonus_credits: self.bonus_credits.max(0) as u32,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SponsorRow {
    sponsor: String,
    name: Option<String>,
    logo_url: Option<String>,
    amount: String,
    active: bool,
}

#[derive(Debug, Deserialize)]
struct DiscountRow {
    id: String,
    player: String,
    used: bool,
    used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct OutcomeRow {
    commitment_hash: String,
    player: String,
    amount: String,
    won: Option<bool>,
    payout: Option<String>,
    reveal_tx: Option<String>,
    revealed_at: Option<DateTime<Utc>>,
}

/// `GameStore` over a PostgREST-style HTTP API.
///
/// Change notifications are published for writes made through this client;
/// writes from other clients surface on the next periodic refresh.
pub struct RestGameStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    events: broadcast::Sender<StoreEvent>,
}

impl RestGameStore {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| CoreError::internal(format!("Failed to create HTTP client: {}", e)))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            events,
        })
    }

    pub fn from_config(config: &GameConfig) -> Result<Self> {
        Self::new(&config.store_url, config.store_api_key.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder
                .header("apikey", key)
                .header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = self.authed(builder).send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            return Err(CoreError::rate_limited("store returned 429"));
        }
        if status.is_server_error() {
            return Err(CoreError::unavailable(format!("store returned {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::store(format!("{}: {}", status, body)));
        }
        Ok(response)
    }

    /// PATCH on the discount row owned by `player`. Filter values come from
    /// user input and go through query encoding.
    fn discount_patch(
        &self,
        discount_id: &str,
        player: &Address,
        unused_only: bool,
    ) -> reqwest::RequestBuilder {
        let mut filter = vec![
            ("id", format!("eq.{}", discount_id)),
            ("player", format!("eq.{}", address_hex(player))),
        ];
        if unused_only {
            filter.push(("used", "eq.false".to_string()));
        }
        self.client.patch(self.url("discounts")).query(&filter)
    }

    fn publish(&self, event: StoreEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl GameStore for RestGameStore {
    async fn record_wager(&self, commitment: &PendingCommitment) -> Result<()> {
        let body = json!({
            "commitment_hash": h256_hex(&commitment.commitment_hash),
            "player": address_hex(&commitment.player),
            "contract": address_hex(&commitment.contract),
            "amount": commitment.amount_wagered.to_string(),
            "tx_hash": h256_hex(&commitment.tx_hash),
            "commit_block": commitment.commit_block,
            "discount_percent": commitment.discount_percent,
            "discount_id": commitment.discount_id,
            "used_bonus_credit": commitment.used_bonus_credit,
            "status": commitment.status.as_str(),
            "created_at": commitment.created_at,
        });
        self.send(self.client.post(self.url("wagers")).json(&body))
            .await?;

        self.publish(StoreEvent::WagerCommitted {
            player: commitment.player,
        });
        Ok(())
    }

    async fn record_outcome(&self, outcome: &WagerOutcome) -> Result<()> {
        let body = json!({
            "status": "revealed",
            "won": outcome.won,
            "payout": outcome.payout.to_string(),
            "reveal_tx": h256_hex(&outcome.reveal_tx),
            "revealed_at": outcome.revealed_at,
        });
        let url = format!(
            "{}?commitment_hash=eq.{}",
            self.url("wagers"),
            h256_hex(&outcome.commitment_hash)
        );
        self.send(self.client.patch(url).json(&body)).await?;

        self.publish(StoreEvent::WagerRevealed {
            player: outcome.player,
            won: outcome.won,
        });
        Ok(())
    }

    async fn record_winner(&self, winner: &Winner) -> Result<()> {
        self.send(
            self.client
                .post(self.url("winners"))
                .json(&WinnerRow::from_winner(winner)),
        )
        .await?;

        self.publish(StoreEvent::WinnerRecorded {
            winner: winner.address,
        });
        Ok(())
    }

    async fn upsert_player_stats(&self, record: &PlayerRecord) -> Result<()> {
        self.send(
            self.client
                .post(self.url("players"))
                .header("Prefer", "resolution=merge-duplicates")
                .json(&PlayerRow::from_record(record)),
        )
        .await?;
        Ok(())
    }

    async fn fetch_recent_winners(&self, limit: usize) -> Result<Vec<Winner>> {
        let url = format!("{}?order=won_at.desc&limit={}", self.url("winners"), limit);
        let rows: Vec<WinnerRow> = self.send(self.client.get(url)).await?.json().await?;
        rows.into_iter().map(WinnerRow::into_winner).collect()
    }

    async fn fetch_top_players(&self, limit: usize) -> Result<Vec<PlayerRecord>> {
        let url = format!("{}?order=total_won.desc&limit={}", self.url("players"), limit);
        let rows: Vec<PlayerRow> = self.send(self.client.get(url)).await?.json().await?;
        rows.into_iter().map(PlayerRow::into_record).collect()
    }

    async fn fetch_player_stats(&self, player: &Address) -> Result<Option<PlayerRecord>> {
        let url = format!(
            "{}?address=eq.{}&limit=1",
            self.url("players"),
            address_hex(player)
        );
        let rows: Vec<PlayerRow> = self.send(self.client.get(url)).await?.json().await?;
        rows.into_iter().next().map(PlayerRow::into_record).transpose()
    }

    async fn fetch_sponsor(&self) -> Result<Option<SponsorInfo>> {
        let url = format!("{}?active=eq.true&limit=1", self.url("sponsors"));
        let rows: Vec<SponsorRow> = self.send(self.client.get(url)).await?.json().await?;
        rows.into_iter()
            .next()
            .map(|row| {
                Ok(SponsorInfo {
                    sponsor: parse_address(&row.sponsor)?,
                    name: row.name,
                    logo_url: row.logo_url,
                    amount: parse_u256(&row.amount)?,
                    active: row.active,
                })
            })
            .transpose()
    }

    async fn consume_discount(&self, discount_id: &str, player: &Address) -> Result<Discount> {
        let rows: Vec<DiscountRow> = self
            .send(
                self.discount_patch(discount_id, player, true)
                    .header("Prefer", "return=representation")
                    .json(&json!({ "used": true, "used_at": Utc::now() })),
            )
            .await?
            .json()
            .await?;

        let row = rows.into_iter().next().ok_or_else(|| {
            CoreError::store(format!("discount {} is not available", discount_id))
        })?;
        Ok(Discount {
            id: row.id,
            player: parse_address(&row.player)?,
            used: row.used,
            used_at: row.used_at,
        })
    }

    async fn release_discount(&self, discount_id: &str, player: &Address) -> Result<()> {
        self.send(
            self.discount_patch(discount_id, player, false)
                .json(&json!({ "used": false, "used_at": null })),
        )
        .await?;
        Ok(())
    }

    async fn consume_bonus_credit(&self, player: &Address) -> Result<u32> {
        let remaining: Option<i64> = self
            .send(
                self.client
                    .post(self.url("rpc/consume_bonus_credit"))
                    .json(&json!({ "p_player": address_hex(player) })),
            )
            .await?
            .json()
            .await?;

        match remaining {
            Some(n) if n >= 0 => Ok(n as u32),
            _ => Err(CoreError::store("no bonus credit available")),
        }
    }

    async fn release_bonus_credit(&self, player: &Address) -> Result<()> {
        self.send(
            self.client
                .post(self.url("rpc/release_bonus_credit"))
                .json(&json!({ "p_player": address_hex(player) })),
        )
        .await?;
        Ok(())
    }

    async fn fetch_outcome(&self, commitment_hash: &CommitmentHash) -> Result<Option<WagerOutcome>> {
        let url = format!(
            "{}?commitment_hash=eq.{}&status=eq.revealed&limit=1",
            self.url("wagers"),
            h256_hex(commitment_hash)
        );
        let rows: Vec<OutcomeRow> = self.send(self.client.get(url)).await?.json().await?;
        let row = match rows.into_iter().next() {
            Some(row) => row,
            None => return Ok(None),
        };

        let reveal_tx = match row.reveal_tx.as_deref() {
            Some(tx) => parse_h256(tx)?,
            None => return Ok(None),
        };
        Ok(Some(WagerOutcome {
            player: parse_address(&row.player)?,
            commitment_hash: parse_h256(&row.commitment_hash)?,
            amount_wagered: parse_u256(&row.amount)?,
            won: row.won.unwrap_or(false),
            payout: row
                .payout
                .as_deref()
                .map(parse_u256)
                .transpose()?
                .unwrap_or_default(),
            reveal_tx,
            revealed_at: row.revealed_at.unwrap_or_else(Utc::now),
        }))
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;

    #[test]
    fn test_winner_row_round_trip() {
        let winner = Winner {
            address: Address::repeat_byte(0x10),
            amount: U256::exp10(18) * 3,
            won_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            tx_hash: Some(primitive_types::H256::repeat_byte(0x01)),
        };
        let row = WinnerRow::from_winner(&winner);
        assert_eq!(row.amount, "3000000000000000000");
        assert_eq!(row.into_winner().unwrap(), winner);
    }

    #[test]
    fn test_player_row_clamps_negative_counts() {
        let row = PlayerRow {
            address: address_hex(&Address::repeat_byte(0x10)),
            total_shots: -1,
            total_spent: "0".to_string(),
            total_won: "0".to_string(),
            rank: Some(3),
            referral_discounts: 2,
            bonus_credits: -5,
        };
        let record = row.into_record().unwrap();
        assert_eq!(record.total_shots, 0);
        assert_eq!(record.bonus_credits, 0);
        assert_eq!(record.rank, Some(3));
    }

    #[test]
    fn test_url_building() {
        let store = RestGameStore::new("https://db.example.com/", Some("key".into())).unwrap();
        assert_eq!(store.url("winners"), "https://db.example.com/rest/v1/winners");
    }

    #[test]
    fn test_discount_filter_is_encoded() {
        let store = RestGameStore::new("https://db.example.com", None).unwrap();
        let player = Address::repeat_byte(0x01);

        let request = store
            .discount_patch("ref-1&used=eq.true", &player, true)
            .build()
            .unwrap();
        let pairs: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert_eq!(
            pairs,
            vec![
                ("id".to_string(), "eq.ref-1&used=eq.true".to_string()),
                ("player".to_string(), format!("eq.{}", address_hex(&player))),
                ("used".to_string(), "eq.false".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let store = RestGameStore::new("http://localhost:1", None).unwrap();
        let mut rx = store.subscribe();
        store.publish(StoreEvent::SponsorChanged);
        assert_eq!(rx.recv().await.unwrap(), StoreEvent::SponsorChanged);
    }
}
