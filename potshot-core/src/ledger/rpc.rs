use super::abi::{self, sig, Decoder};
use super::{CommitReceipt, Ledger, RevealReceipt};
use crate::config::GameConfig;
use crate::error::{CoreError, Result};
use crate::types::{
    address_hex, h256_hex, parse_address, parse_h256, parse_u256, u256_hex, Address, BlockNumber,
    CommitmentHash, PlayerStats, Secret, SponsorInfo, TxHash, Winner,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use primitive_types::{H256, U256};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub status: Option<String>,
    pub block_number: Option<String>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogEntry {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
}

impl LogEntry {
    fn matches(&self, contract: &Address, topic0: &H256, indexed: Option<&Address>) -> bool {
        let from_contract = parse_address(&self.address).map_or(false, |a| &a == contract);
        let topic_ok = self
            .topics
            .first()
            .and_then(|t| parse_h256(t).ok())
            .map_or(false, |t| &t == topic0);
        let indexed_ok = match indexed {
            Some(player) => self
                .topics
                .get(1)
                .and_then(|t| parse_h256(t).ok())
                .map_or(false, |t| t.as_bytes() == abi::address_word(player)),
            None => true,
        };
        from_contract && topic_ok && indexed_ok
    }

    fn data_bytes(&self) -> Result<Vec<u8>> {
        decode_hex_data(&self.data)
    }
}

/// Map a JSON-RPC error body onto the error taxonomy.
pub fn classify_rpc_error(code: i64, message: &str) -> CoreError {
    let lower = message.to_ascii_lowercase();
    if code == 4001 || lower.contains("user rejected") || lower.contains("user denied") {
        CoreError::UserRejectedSignature
    } else if code == -32005
        || code == 429
        || lower.contains("rate limit")
        || lower.contains("too many requests")
    {
        CoreError::rate_limited(message.to_string())
    } else if lower.contains("insufficient funds") {
        CoreError::InsufficientFunds(message.to_string())
    } else if lower.contains("timeout") || lower.contains("unavailable") {
        CoreError::unavailable(message.to_string())
    } else {
        CoreError::Rpc {
            code,
            message: message.to_string(),
        }
    }
}

fn decode_hex_data(s: &str) -> Result<Vec<u8>> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| CoreError::decode(format!("bad hex data: {}", e)))
}

fn timestamp(secs: u64) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    DateTime::from_timestamp(secs as i64, 0)
}

fn receipt_block(receipt: &TransactionReceipt) -> Result<BlockNumber> {
    let raw = receipt
        .block_number
        .as_deref()
        .ok_or_else(|| CoreError::decode("receipt without block number"))?;
    Ok(parse_u256(raw)?.low_u64())
}

fn ensure_success(receipt: &TransactionReceipt) -> Result<()> {
    match receipt.status.as_deref() {
        Some("0x1") | None => Ok(()),
        Some(_) => Err(CoreError::Reverted {
            tx_hash: receipt.transaction_hash.clone(),
        }),
    }
}

/// Extract the canonical commit data from a confirmed commit receipt.
pub fn parse_commit_receipt(
    contract: &Address,
    player: &Address,
    receipt: &TransactionReceipt,
) -> Result<CommitReceipt> {
    ensure_success(receipt)?;
    let tx_hash = parse_h256(&receipt.transaction_hash)?;
    let topic = abi::event_topic(sig::EVENT_COMMITTED);

    match receipt
        .logs
        .iter()
        .find(|log| log.matches(contract, &topic, Some(player)))
    {
        Some(log) => {
            let data = log.data_bytes()?;
            let decoder = Decoder::new(&data);
            Ok(CommitReceipt {
                tx_hash,
                commitment_hash: decoder.h256(0)?,
                amount: decoder.u256(1)?,
                commit_block: decoder.u64(2)?,
            })
        }
        None => Err(CoreError::decode(format!(
            "Committed event missing from {}",
            receipt.transaction_hash
        ))),
    }
}

/// Extract the wager outcome from a confirmed reveal receipt.
pub fn parse_reveal_receipt(
    contract: &Address,
    player: &Address,
    receipt: &TransactionReceipt,
) -> Result<RevealReceipt> {
    ensure_success(receipt)?;
    let tx_hash = parse_h256(&receipt.transaction_hash)?;
    let block_number = receipt_block(receipt)?;

    let revealed_topic = abi::event_topic(sig::EVENT_REVEALED);
    let revealed = receipt
        .logs
        .iter()
        .find(|log| log.matches(contract, &revealed_topic, Some(player)))
        .ok_or_else(|| {
            CoreError::decode(format!(
                "Revealed event missing from {}",
                receipt.transaction_hash
            ))
        })?;
    let data = revealed.data_bytes()?;
    let won = Decoder::new(&data).bool(1)?;

    let jackpot_topic = abi::event_topic(sig::EVENT_JACKPOT_WON);
    let payout = match receipt
        .logs
        .iter()
        .find(|log| log.matches(contract, &jackpot_topic, Some(player)))
    {
        Some(log) => {
            let data = log.data_bytes()?;
            Decoder::new(&data).u256(0)?
        }
        None => U256::zero(),
    };

    Ok(RevealReceipt {
        tx_hash,
        block_number,
        won,
        payout: if won { payout } else { U256::zero() },
    })
}

/// Ethereum JSON-RPC client for the jackpot contract.
///
/// Transactions go out through `eth_sendTransaction`, so signing happens in
/// whatever wallet or node sits behind `rpc_url`.
pub struct JsonRpcLedger {
    client: reqwest::Client,
    rpc_url: String,
    contract: Address,
    next_id: AtomicU64,
    receipt_poll_interval: Duration,
    receipt_timeout: Duration,
}

impl JsonRpcLedger {
    pub fn new(rpc_url: &str, contract: Address) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CoreError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
            contract,
            next_id: AtomicU64::new(1),
            receipt_poll_interval: Duration::from_secs(2),
            receipt_timeout: Duration::from_secs(120),
        })
    }

    pub fn from_config(config: &GameConfig, contract: Address) -> Result<Self> {
        let mut ledger = Self::new(&config.rpc_url, contract)?;
        ledger.receipt_poll_interval = config.receipt_poll_interval;
        ledger.receipt_timeout = config.receipt_timeout;
        Ok(ledger)
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self.client.post(&self.rpc_url).json(&body).send().await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(CoreError::rate_limited(format!("{} returned 429", method)));
        }
        if status.is_server_error() {
            return Err(CoreError::unavailable(format!(
                "{} returned {}",
                method, status
            )));
        }
        if !status.is_success() {
            return Err(CoreError::Rpc {
                code: status.as_u16() as i64,
                message: format!("{} returned {}", method, status),
            });
        }

        let rpc: RpcResponse = response.json().await?;
        if let Some(err) = rpc.error {
            tracing::debug!("{} failed: {} ({})", method, err.message, err.code);
            return Err(classify_rpc_error(err.code, &err.message));
        }

        Ok(serde_json::from_value(rpc.result.unwrap_or(Value::Null))?)
    }

    async fn call(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        let result: String = self
            .request(
                "eth_call",
                json!([
                    {
                        "to": address_hex(&self.contract),
                        "data": format!("0x{}", hex::encode(data)),
                    },
                    "latest"
                ]),
            )
            .await?;
        decode_hex_data(&result)
    }

    async fn call_u256(&self, signature: &str, args: &[[u8; abi::WORD]]) -> Result<U256> {
        let data = self.call(abi::encode_call(signature, args)).await?;
        Decoder::new(&data).u256(0)
    }

    async fn send_transaction(&self, from: &Address, value: U256, data: Vec<u8>) -> Result<TxHash> {
        let tx_hash: String = self
            .request(
                "eth_sendTransaction",
                json!([{
                    "from": address_hex(from),
                    "to": address_hex(&self.contract),
                    "value": u256_hex(&value),
                    "data": format!("0x{}", hex::encode(data)),
                }]),
            )
            .await?;
        parse_h256(&tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: &TxHash) -> Result<TransactionReceipt> {
        let started = tokio::time::Instant::now();
        let hash = h256_hex(tx_hash);

        loop {
            match self
                .request::<Option<TransactionReceipt>>("eth_getTransactionReceipt", json!([hash]))
                .await
            {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                // Receipt polling is a read; a rate-limited poll just waits longer.
                Err(e) if e.is_retryable() => {
                    tracing::debug!("Receipt poll for {} failed: {}", hash, e);
                }
                Err(e) => return Err(e),
            }

            if started.elapsed() >= self.receipt_timeout {
                return Err(CoreError::ReceiptTimeout {
                    tx_hash: hash,
                    waited_secs: self.receipt_timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}

#[async_trait]
impl Ledger for JsonRpcLedger {
    fn contract_address(&self) -> Address {
        self.contract
    }

    async fn is_deployed(&self) -> Result<bool> {
        let code: String = self
            .request("eth_getCode", json!([address_hex(&self.contract), "latest"]))
            .await?;
        Ok(!matches!(code.as_str(), "" | "0x" | "0x0"))
    }

    async fn block_number(&self) -> Result<BlockNumber> {
        let raw: String = self.request("eth_blockNumber", json!([])).await?;
        Ok(parse_u256(&raw)?.low_u64())
    }

    async fn contract_balance(&self) -> Result<U256> {
        let raw: String = self
            .request("eth_getBalance", json!([address_hex(&self.contract), "latest"]))
            .await?;
        parse_u256(&raw)
    }

    async fn house_funds(&self) -> Result<U256> {
        self.call_u256(sig::HOUSE_FUNDS, &[]).await
    }

    async fn wager_cost(&self) -> Result<U256> {
        self.call_u256(sig::WAGER_COST, &[]).await
    }

    async fn sponsor_cost(&self) -> Result<U256> {
        self.call_u256(sig::SPONSOR_COST, &[]).await
    }

    async fn current_sponsor(&self) -> Result<Option<SponsorInfo>> {
        let data = self.call(abi::encode_call(sig::CURRENT_SPONSOR, &[])).await?;
        let decoder = Decoder::new(&data);
        let sponsor = decoder.address(0)?;
        let active = decoder.bool(3)?;
        if sponsor.is_zero() || !active {
            return Ok(None);
        }
        Ok(Some(SponsorInfo {
            sponsor,
            name: None,
            logo_url: None,
            amount: decoder.u256(1)?,
            active,
        }))
    }

    async fn recent_winners(&self) -> Result<Vec<Winner>> {
        let data = self.call(abi::encode_call(sig::RECENT_WINNERS, &[])).await?;
        let decoder = Decoder::new(&data);
        if decoder.word_count() == 0 {
            return Ok(Vec::new());
        }

        decoder
            .tuple_array(0, 3)?
            .into_iter()
            .map(|item| {
                Ok(Winner {
                    address: item.address(0)?,
                    amount: item.u256(1)?,
                    won_at: timestamp(item.u64(2)?).unwrap_or_else(Utc::now),
                    tx_hash: None,
                })
            })
            .collect()
    }

    async fn player_stats(&self, player: &Address) -> Result<PlayerStats> {
        let data = self
            .call(abi::encode_call(sig::PLAYER_STATS, &[abi::address_word(player)]))
            .await?;
        let decoder = Decoder::new(&data);
        Ok(PlayerStats {
            total_shots: decoder.u64(0)?,
            total_spent: decoder.u256(1)?,
            total_won: decoder.u256(2)?,
            last_shot_at: timestamp(decoder.u64(3)?),
        })
    }

    async fn cooldown_remaining(&self, player: &Address) -> Result<u64> {
        let value = self
            .call_u256(sig::COOLDOWN_REMAINING, &[abi::address_word(player)])
            .await?;
        Ok(value.low_u64())
    }

    async fn can_wager(&self, player: &Address) -> Result<bool> {
        let data = self
            .call(abi::encode_call(sig::CAN_COMMIT, &[abi::address_word(player)]))
            .await?;
        Decoder::new(&data).bool(0)
    }

    async fn reveal_delay(&self) -> Result<u64> {
        Ok(self.call_u256(sig::REVEAL_DELAY, &[]).await?.low_u64())
    }

    async fn max_reveal_delay(&self) -> Result<u64> {
        Ok(self.call_u256(sig::MAX_REVEAL_DELAY, &[]).await?.low_u64())
    }

    async fn submit_commit(
        &self,
        player: &Address,
        commitment_hash: CommitmentHash,
        value: U256,
    ) -> Result<TxHash> {
        let data = abi::encode_call(sig::COMMIT, &[commitment_hash.to_fixed_bytes()]);
        let tx_hash = self.send_transaction(player, value, data).await?;
        tracing::info!("Commit transaction submitted: {}", h256_hex(&tx_hash));
        Ok(tx_hash)
    }

    async fn confirm_commit(&self, player: &Address, tx_hash: &TxHash) -> Result<CommitReceipt> {
        let receipt = self.wait_for_receipt(tx_hash).await?;
        parse_commit_receipt(&self.contract, player, &receipt)
    }

    async fn reveal(&self, player: &Address, secret: &Secret) -> Result<RevealReceipt> {
        let data = abi::encode_call(sig::REVEAL, &[*secret.as_bytes()]);
        let tx_hash = self
            .send_transaction(player, U256::zero(), data)
            .await?;
        tracing::info!("Reveal transaction submitted: {}", h256_hex(&tx_hash));

        let receipt = self.wait_for_receipt(&tx_hash).await?;
        parse_reveal_receipt(&self.contract, player, &receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_hex(word: [u8; 32]) -> String {
        format!("0x{}", hex::encode(word))
    }

    fn log(contract: &Address, event: &str, player: &Address, data: Vec<[u8; 32]>) -> LogEntry {
        LogEntry {
            address: address_hex(contract),
            topics: vec![
                h256_hex(&abi::event_topic(event)),
                word_hex(abi::address_word(player)),
            ],
            data: format!("0x{}", hex::encode(data.concat())),
        }
    }

    #[test]
    fn test_classify_rpc_errors() {
        assert!(matches!(
            classify_rpc_error(4001, "User rejected the request."),
            CoreError::UserRejectedSignature
        ));
        assert!(classify_rpc_error(-32005, "limit exceeded").is_rate_limited());
        assert!(classify_rpc_error(-32000, "Too Many Requests").is_rate_limited());
        assert!(matches!(
            classify_rpc_error(-32000, "insufficient funds for gas * price + value"),
            CoreError::InsufficientFunds(_)
        ));
        assert!(matches!(
            classify_rpc_error(-32000, "execution reverted"),
            CoreError::Rpc { .. }
        ));
    }

    #[test]
    fn test_parse_commit_receipt_reads_event_block() {
        let contract = Address::repeat_byte(0xcc);
        let player = Address::repeat_byte(0x01);
        let hash = H256::repeat_byte(0x77);

        let receipt = TransactionReceipt {
            transaction_hash: h256_hex(&H256::repeat_byte(0x09)),
            status: Some("0x1".to_string()),
            block_number: Some("0x65".to_string()),
            logs: vec![log(
                &contract,
                sig::EVENT_COMMITTED,
                &player,
                vec![
                    hash.to_fixed_bytes(),
                    abi::u256_word(&U256::from(1000u64)),
                    abi::u256_word(&U256::from(100u64)),
                ],
            )],
        };

        let parsed = parse_commit_receipt(&contract, &player, &receipt).unwrap();
        assert_eq!(parsed.commit_block, 100);
        assert_eq!(parsed.commitment_hash, hash);
        assert_eq!(parsed.amount, U256::from(1000u64));
    }

    #[test]
    fn test_parse_commit_receipt_ignores_other_players() {
        let contract = Address::repeat_byte(0xcc);
        let player = Address::repeat_byte(0x01);
        let other = Address::repeat_byte(0x02);

        let receipt = TransactionReceipt {
            transaction_hash: h256_hex(&H256::repeat_byte(0x09)),
            status: Some("0x1".to_string()),
            block_number: Some("0x65".to_string()),
            logs: vec![log(
                &contract,
                sig::EVENT_COMMITTED,
                &other,
                vec![[0u8; 32], [0u8; 32], [0u8; 32]],
            )],
        };

        assert!(parse_commit_receipt(&contract, &player, &receipt).is_err());
    }

    #[test]
    fn test_parse_reveal_receipt_win() {
        let contract = Address::repeat_byte(0xcc);
        let player = Address::repeat_byte(0x01);
        let mut won = [0u8; 32];
        won[31] = 1;

        let receipt = TransactionReceipt {
            transaction_hash: h256_hex(&H256::repeat_byte(0x0a)),
            status: Some("0x1".to_string()),
            block_number: Some("0x66".to_string()),
            logs: vec![
                log(
                    &contract,
                    sig::EVENT_REVEALED,
                    &player,
                    vec![abi::u256_word(&U256::from(1000u64)), won],
                ),
                log(
                    &contract,
                    sig::EVENT_JACKPOT_WON,
                    &player,
                    vec![abi::u256_word(&U256::from(50_000u64))],
                ),
            ],
        };

        let parsed = parse_reveal_receipt(&contract, &player, &receipt).unwrap();
        assert!(parsed.won);
        assert_eq!(parsed.payout, U256::from(50_000u64));
        assert_eq!(parsed.block_number, 0x66);
    }

    #[test]
    fn test_reverted_receipt() {
        let contract = Address::repeat_byte(0xcc);
        let player = Address::repeat_byte(0x01);
        let receipt = TransactionReceipt {
            transaction_hash: h256_hex(&H256::repeat_byte(0x0b)),
            status: Some("0x0".to_string()),
            block_number: Some("0x66".to_string()),
            logs: Vec::new(),
        };

        assert!(matches!(
            parse_reveal_receipt(&contract, &player, &receipt),
            Err(CoreError::Reverted { .. })
        ));
    }
}
