//! Potshot core - shared infrastructure for the commit-reveal jackpot client
//!
//! This library provides the ledger and persistent-store ports with their
//! HTTP adapters, the TTL read cache, bounded retry for upstream reads and
//! sealed on-disk storage for pending commitments.

pub mod cache;
pub mod config;
pub mod error;
pub mod ledger;
pub mod retry;
pub mod storage;
pub mod store;
pub mod types;

pub use cache::{Clock, ManualClock, ReadCache, SystemClock};
pub use config::{GameConfig, Network, WagerContext};
pub use error::{CoreError, Result};
pub use ledger::{CommitReceipt, JsonRpcLedger, Ledger, RevealReceipt};
pub use retry::RetryPolicy;
pub use storage::{CommitmentVault, SqliteCommitmentVault, Storage};
pub use store::{GameStore, RestGameStore, StoreEvent};
pub use types::{
    Address, BlockNumber, CommitmentHash, Discount, PendingCommitment, PlayerRecord, PlayerStats,
    Secret, SponsorInfo, TxHash, WagerOutcome, WagerStatus, Winner,
};

pub use primitive_types::U256;
