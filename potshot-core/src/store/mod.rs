//! Off-ledger persistent store: history, leaderboards, discounts.

pub mod rest;

pub use rest::RestGameStore;

use crate::error::Result;
use crate::types::{
    Address, CommitmentHash, Discount, PendingCommitment, PlayerRecord, SponsorInfo, WagerOutcome,
    Winner,
};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Change notifications published by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    WinnerRecorded { winner: Address },
    WagerCommitted { player: Address },
    WagerRevealed { player: Address, won: bool },
    SponsorChanged,
}

impl StoreEvent {
    /// Player whose per-player data changed, if any.
    pub fn player(&self) -> Option<&Address> {
        match self {
            StoreEvent::WinnerRecorded { winner } => Some(winner),
            StoreEvent::WagerCommitted { player } => Some(player),
            StoreEvent::WagerRevealed { player, .. } => Some(player),
            StoreEvent::SponsorChanged => None,
        }
    }
}

#[async_trait]
pub trait GameStore: Send + Sync {
    async fn record_wager(&self, commitment: &PendingCommitment) -> Result<()>;
    async fn record_outcome(&self, outcome: &WagerOutcome) -> Result<()>;
    async fn record_winner(&self, winner: &Winner) -> Result<()>;
    async fn upsert_player_stats(&self, record: &PlayerRecord) -> Result<()>;

    async fn fetch_recent_winners(&self, limit: usize) -> Result<Vec<Winner>>;
    async fn fetch_top_players(&self, limit: usize) -> Result<Vec<PlayerRecord>>;
    async fn fetch_player_stats(&self, player: &Address) -> Result<Option<PlayerRecord>>;
    async fn fetch_sponsor(&self) -> Result<Option<SponsorInfo>>;

    /// Mark a single-use discount consumed. Fails if it does not belong to
    /// `player` or was already used.
    async fn consume_discount(&self, discount_id: &str, player: &Address) -> Result<Discount>;
    /// Undo `consume_discount` when the wager it paid for never reached the
    /// ledger.
    async fn release_discount(&self, discount_id: &str, player: &Address) -> Result<()>;
    /// Decrement the player's bonus credits; returns the remaining count.
    async fn consume_bonus_credit(&self, player: &Address) -> Result<u32>;
    async fn release_bonus_credit(&self, player: &Address) -> Result<()>;

    /// Look up the outcome recorded for a commitment, if settled.
    async fn fetch_outcome(&self, commitment_hash: &CommitmentHash) -> Result<Option<WagerOutcome>>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
