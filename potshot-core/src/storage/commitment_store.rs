use crate::error::Result;
use crate::storage::{sealing, Storage};
use crate::types::{address_hex, h256_hex, parse_address, Address, PendingCommitment, Secret, WagerStatus};
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

/// Durable, per-player home of the pending commitment and its secret.
///
/// This is the only place a secret is written outside process memory.
#[async_trait]
pub trait CommitmentVault: Send + Sync {
    /// Insert or replace the player's record. A record whose `secret` is
    /// `None` is stored as a tombstone.
    async fn save(&self, commitment: &PendingCommitment) -> Result<()>;

    async fn load(&self, player: &Address) -> Result<Option<PendingCommitment>>;

    /// Every stored record, whichever player it belongs to.
    async fn list(&self) -> Result<Vec<PendingCommitment>>;

    /// Players with a stored record. Does not unseal anything.
    async fn players(&self) -> Result<Vec<Address>>;

    /// Drop the secret and mark the record expired, keeping the row. A
    /// no-op when nothing is stored for `player`.
    async fn erase_secret(&self, player: &Address) -> Result<()>;

    async fn clear(&self, player: &Address) -> Result<()>;
}

pub struct SqliteCommitmentVault {
    storage: Arc<Storage>,
    passphrase: String,
}

impl SqliteCommitmentVault {
    pub fn new(storage: Arc<Storage>, passphrase: impl Into<String>) -> Self {
        Self {
            storage,
            passphrase: passphrase.into(),
        }
    }

    fn restore(&self, record: &str, sealed: Option<String>) -> Result<PendingCommitment> {
        let mut commitment: PendingCommitment = serde_json::from_str(record)?;
        if let Some(sealed) = sealed {
            let bytes = sealing::unseal(&sealed, &self.passphrase)?;
            commitment.secret = Some(Secret::from_slice(&bytes)?);
        }
        Ok(commitment)
    }
}

#[async_trait]
impl CommitmentVault for SqliteCommitmentVault {
    async fn save(&self, commitment: &PendingCommitment) -> Result<()> {
        let record = serde_json::to_string(commitment)?;
        let sealed = commitment
            .secret
            .as_ref()
            .map(|secret| sealing::seal(secret.as_bytes(), &self.passphrase))
            .transpose()?;

        let conn = self.storage.get_connection().await;
        conn.execute(
            "INSERT OR REPLACE INTO pending_commitments
             (player, contract, commitment_hash, commit_block, status, sealed_secret, record, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                address_hex(&commitment.player),
                address_hex(&commitment.contract),
                h256_hex(&commitment.commitment_hash),
                commitment.commit_block as i64,
                commitment.status.as_str(),
                sealed,
                record,
                commitment.created_at.timestamp(),
            ],
        )?;

        tracing::info!(
            "Saved commitment {} for {}",
            h256_hex(&commitment.commitment_hash),
            address_hex(&commitment.player)
        );
        Ok(())
    }

    async fn load(&self, player: &Address) -> Result<Option<PendingCommitment>> {
        let row: Option<(String, Option<String>)> = {
            let conn = self.storage.get_connection().await;
            conn.query_row(
                "SELECT record, sealed_secret FROM pending_commitments WHERE player = ?1",
                params![address_hex(player)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        row.map(|(record, sealed)| self.restore(&record, sealed))
            .transpose()
    }

    async fn list(&self) -> Result<Vec<PendingCommitment>> {
        let rows: Vec<(String, Option<String>)> = {
            let conn = self.storage.get_connection().await;
            let mut stmt = conn.prepare(
                "SELECT record, sealed_secret FROM pending_commitments ORDER BY created_at",
            )?;
            let iter = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            iter.collect::<std::result::Result<_, _>>()?
        };

        rows.into_iter()
            .map(|(record, sealed)| self.restore(&record, sealed))
            .collect()
    }

    async fn players(&self) -> Result<Vec<Address>> {
        let rows: Vec<String> = {
            let conn = self.storage.get_connection().await;
            let mut stmt =
                conn.prepare("SELECT player FROM pending_commitments ORDER BY created_at")?;
            let iter = stmt.query_map([], |row| row.get(0))?;
            iter.collect::<std::result::Result<_, _>>()?
        };

        rows.iter().map(|p| parse_address(p)).collect()
    }

    async fn erase_secret(&self, player: &Address) -> Result<()> {
        let conn = self.storage.get_connection().await;

        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM pending_commitments WHERE player = ?1",
                params![address_hex(player)],
                |row| row.get(0),
            )
            .optional()?;
        let Some(record) = record else {
            tracing::debug!("No stored commitment to erase for {}", address_hex(player));
            return Ok(());
        };

        let mut commitment: PendingCommitment = serde_json::from_str(&record)?;
        commitment.status = WagerStatus::Expired;

        conn.execute(
            "UPDATE pending_commitments
             SET sealed_secret = NULL, status = ?2, record = ?3
             WHERE player = ?1",
            params![
                address_hex(player),
                WagerStatus::Expired.as_str(),
                serde_json::to_string(&commitment)?,
            ],
        )?;

        tracing::info!("Erased secret for expired commitment of {}", address_hex(player));
        Ok(())
    }

    async fn clear(&self, player: &Address) -> Result<()> {
        let conn = self.storage.get_connection().await;
        conn.execute(
            "DELETE FROM pending_commitments WHERE player = ?1",
            params![address_hex(player)],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use primitive_types::{H256, U256};
    use tempfile::tempdir;

    fn commitment(player: Address) -> PendingCommitment {
        PendingCommitment {
            player,
            contract: Address::repeat_byte(0xcc),
            secret: Some(Secret::from_bytes([3u8; 32])),
            commitment_hash: H256::repeat_byte(0xab),
            commit_block: 100,
            tx_hash: H256::repeat_byte(0x01),
            amount_wagered: U256::exp10(18),
            discount_percent: 0,
            discount_id: None,
            used_bonus_credit: false,
            status: WagerStatus::Committed,
            created_at: Utc::now(),
        }
    }

    async fn vault() -> SqliteCommitmentVault {
        let storage = Arc::new(Storage::open_in_memory().await.unwrap());
        SqliteCommitmentVault::new(storage, "test-pass")
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let vault = vault().await;
        let player = Address::repeat_byte(0x01);
        vault.save(&commitment(player)).await.unwrap();

        let loaded = vault.load(&player).await.unwrap().unwrap();
        assert_eq!(loaded.commit_block, 100);
        assert_eq!(loaded.secret, Some(Secret::from_bytes([3u8; 32])));
        assert!(vault.load(&Address::repeat_byte(0x02)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_secret_is_not_stored_in_clear() {
        let vault = vault().await;
        let player = Address::repeat_byte(0x01);
        vault.save(&commitment(player)).await.unwrap();

        let conn = vault.storage.get_connection().await;
        let (record, sealed): (String, String) = conn
            .query_row(
                "SELECT record, sealed_secret FROM pending_commitments",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        let raw_hex = hex::encode([3u8; 32]);
        assert!(!record.contains(&raw_hex));
        assert!(!sealed.contains(&raw_hex));
    }

    #[tokio::test]
    async fn test_erase_secret_keeps_tombstone() {
        let vault = vault().await;
        let player = Address::repeat_byte(0x01);
        vault.save(&commitment(player)).await.unwrap();
        vault.erase_secret(&player).await.unwrap();

        let tombstone = vault.load(&player).await.unwrap().unwrap();
        assert!(!tombstone.has_secret());
        assert_eq!(tombstone.status, WagerStatus::Expired);

        vault.clear(&player).await.unwrap();
        assert!(vault.load(&player).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_passphrase_fails_load() {
        let storage = Arc::new(Storage::open_in_memory().await.unwrap());
        let player = Address::repeat_byte(0x01);
        SqliteCommitmentVault::new(storage.clone(), "right")
            .save(&commitment(player))
            .await
            .unwrap();

        let other = SqliteCommitmentVault::new(storage, "wrong");
        assert!(other.load(&player).await.is_err());
        assert_eq!(other.players().await.unwrap(), vec![player]);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("potshot.db");
        let player = Address::repeat_byte(0x07);

        {
            let storage = Arc::new(Storage::open(&path).await.unwrap());
            SqliteCommitmentVault::new(storage, "pw")
                .save(&commitment(player))
                .await
                .unwrap();
        }

        let storage = Arc::new(Storage::open(&path).await.unwrap());
        let vault = SqliteCommitmentVault::new(storage, "pw");
        let all = vault.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].player, player);
        assert!(all[0].has_secret());
    }
}
