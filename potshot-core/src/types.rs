use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use primitive_types::{H160, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type Address = H160;
pub type TxHash = H256;
pub type CommitmentHash = H256;
pub type BlockNumber = u64;

const WEI_DECIMALS: usize = 18;

/// Parse a `0x`-prefixed (or bare) 20 byte hex address.
pub fn parse_address(s: &str) -> Result<Address> {
    let trimmed = s.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(digits).map_err(|e| CoreError::InvalidAddress(format!("{}: {}", s, e)))?;
    if bytes.len() != 20 {
        return Err(CoreError::InvalidAddress(format!(
            "{}: expected 20 bytes, got {}",
            s,
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

/// Full lower-case hex form, used as storage key.
pub fn address_hex(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

pub fn h256_hex(hash: &H256) -> String {
    format!("0x{}", hex::encode(hash.as_bytes()))
}

pub fn parse_h256(s: &str) -> Result<H256> {
    let trimmed = s.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(digits).map_err(|e| CoreError::decode(format!("bad hash {}: {}", s, e)))?;
    if bytes.len() != 32 {
        return Err(CoreError::decode(format!("bad hash length {}", bytes.len())));
    }
    Ok(H256::from_slice(&bytes))
}

pub fn u256_hex(value: &U256) -> String {
    format!("0x{:x}", value)
}

pub fn parse_u256(s: &str) -> Result<U256> {
    let trimmed = s.trim();
    match trimmed.strip_prefix("0x") {
        Some("") => Ok(U256::zero()),
        Some(digits) => U256::from_str_radix(digits, 16)
            .map_err(|e| CoreError::decode(format!("bad quantity {}: {:?}", s, e))),
        None => U256::from_dec_str(trimmed)
            .map_err(|e| CoreError::decode(format!("bad quantity {}: {:?}", s, e))),
    }
}

/// Render a wei amount as decimal ether, trimming trailing zeros.
pub fn format_ether(wei: U256) -> String {
    let unit = U256::exp10(WEI_DECIMALS);
    let whole = wei / unit;
    let frac = wei % unit;
    if frac.is_zero() {
        return whole.to_string();
    }
    let frac = format!("{:0>width$}", frac.to_string(), width = WEI_DECIMALS);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

/// 256-bit wager secret. Owned by the local session until reveal.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; 32]);

impl Secret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::decode(format!("secret must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Status of a durable commitment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WagerStatus {
    /// Transaction sent, commit block not yet confirmed.
    Submitted,
    Committed,
    RevealReady,
    Revealed,
    Expired,
}

impl WagerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WagerStatus::Revealed | WagerStatus::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WagerStatus::Submitted => "submitted",
            WagerStatus::Committed => "committed",
            WagerStatus::RevealReady => "reveal_ready",
            WagerStatus::Revealed => "revealed",
            WagerStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(WagerStatus::Submitted),
            "committed" => Some(WagerStatus::Committed),
            "reveal_ready" => Some(WagerStatus::RevealReady),
            "revealed" => Some(WagerStatus::Revealed),
            "expired" => Some(WagerStatus::Expired),
            _ => None,
        }
    }
}

/// A wager that has been committed on the ledger and not yet settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCommitment {
    pub player: Address,
    pub contract: Address,
    /// `None` once the secret has been erased (expired tombstone).
    #[serde(skip)]
    pub secret: Option<Secret>,
    pub commitment_hash: CommitmentHash,
    pub commit_block: BlockNumber,
    pub tx_hash: TxHash,
    pub amount_wagered: U256,
    pub discount_percent: u8,
    pub discount_id: Option<String>,
    pub used_bonus_credit: bool,
    pub status: WagerStatus,
    pub created_at: DateTime<Utc>,
}

impl PendingCommitment {
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Copy safe to hand to observers.
    pub fn without_secret(&self) -> Self {
        Self {
            secret: None,
            ..self.clone()
        }
    }
}

/// Settled result of a revealed wager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WagerOutcome {
    pub player: Address,
    pub commitment_hash: CommitmentHash,
    pub amount_wagered: U256,
    pub won: bool,
    /// Zero on a loss.
    pub payout: U256,
    pub reveal_tx: TxHash,
    pub revealed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Winner {
    pub address: Address,
    pub amount: U256,
    pub won_at: DateTime<Utc>,
    pub tx_hash: Option<TxHash>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SponsorInfo {
    pub sponsor: Address,
    pub name: Option<String>,
    pub logo_url: Option<String>,
    pub amount: U256,
    pub active: bool,
}

/// Per-player statistics as the ledger reports them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub total_shots: u64,
    pub total_spent: U256,
    pub total_won: U256,
    pub last_shot_at: Option<DateTime<Utc>>,
}

/// Per-player record held by the persistent store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub address: Address,
    pub total_shots: u64,
    pub total_spent: U256,
    pub total_won: U256,
    pub rank: Option<u32>,
    pub referral_discounts: u32,
    pub bonus_credits: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discount {
    pub id: String,
    pub player: Address,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
}
