//! Ledger contract surface consumed by the wager engine.

pub mod abi;
pub mod rpc;

pub use rpc::JsonRpcLedger;

use crate::error::Result;
use crate::types::{
    Address, BlockNumber, CommitmentHash, PlayerStats, Secret, SponsorInfo, TxHash, Winner,
};
use async_trait::async_trait;
use primitive_types::U256;

/// Confirmed commit transaction, read back from the `Committed` event.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitReceipt {
    pub tx_hash: TxHash,
    pub commitment_hash: CommitmentHash,
    pub amount: U256,
    /// Canonical commit block as emitted by the contract.
    pub commit_block: BlockNumber,
}

/// Confirmed reveal transaction, read back from `Revealed`/`JackpotWon`.
#[derive(Debug, Clone, PartialEq)]
pub struct RevealReceipt {
    pub tx_hash: TxHash,
    pub block_number: BlockNumber,
    pub won: bool,
    /// Jackpot amount when won, zero otherwise.
    pub payout: U256,
}

/// Fixed read/write surface of the jackpot contract.
///
/// Reads are idempotent and may be retried. `submit_commit` and `reveal`
/// transfer value or settle a wager and are submitted exactly once per call.
/// A commit is split in two so the caller learns the transaction hash before
/// waiting on its receipt.
#[async_trait]
pub trait Ledger: Send + Sync {
    fn contract_address(&self) -> Address;

    async fn is_deployed(&self) -> Result<bool>;
    async fn block_number(&self) -> Result<BlockNumber>;

    async fn contract_balance(&self) -> Result<U256>;
    async fn house_funds(&self) -> Result<U256>;
    async fn wager_cost(&self) -> Result<U256>;
    async fn sponsor_cost(&self) -> Result<U256>;
    async fn current_sponsor(&self) -> Result<Option<SponsorInfo>>;
    async fn recent_winners(&self) -> Result<Vec<Winner>>;

    async fn player_stats(&self, player: &Address) -> Result<PlayerStats>;
    async fn cooldown_remaining(&self, player: &Address) -> Result<u64>;
    async fn can_wager(&self, player: &Address) -> Result<bool>;

    /// Minimum number of blocks that must pass before a reveal is valid.
    async fn reveal_delay(&self) -> Result<u64>;
    /// Blocks after the commit block beyond which a reveal is forfeited.
    async fn max_reveal_delay(&self) -> Result<u64>;

    /// Send the commit transaction. An error means nothing was submitted.
    async fn submit_commit(
        &self,
        player: &Address,
        commitment_hash: CommitmentHash,
        value: U256,
    ) -> Result<TxHash>;

    /// Wait for a submitted commit and read back its `Committed` event.
    /// Safe to call again for the same transaction.
    async fn confirm_commit(&self, player: &Address, tx_hash: &TxHash) -> Result<CommitReceipt>;

    async fn reveal(&self, player: &Address, secret: &Secret) -> Result<RevealReceipt>;
}
