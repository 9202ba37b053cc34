//! Commit-reveal wager lifecycle.
//!
//! `Idle -> Committing -> Committed -> RevealReady -> Revealing -> Revealed`,
//! or `-> Expired` once the reveal window passes. A reveal attempted before
//! the window opens leaves the commitment in `Committed`.

use crate::commitment::{self, RevealWindow, WindowPosition};
use crate::error::{Result, WagerError};
use crate::reads::{CachedLedger, ReadKey};
use chrono::Utc;
use parking_lot::Mutex;
use potshot_core::types::{address_hex, h256_hex};
use potshot_core::{
    Address, CommitmentVault, CoreError, GameConfig, GameStore, PendingCommitment, PlayerRecord,
    RevealReceipt, WagerOutcome, WagerStatus, Winner, U256,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum WagerState {
    Idle,
    Committing,
    Committed(PendingCommitment),
    RevealReady(PendingCommitment),
    Revealing(PendingCommitment),
    Revealed(WagerOutcome),
    Expired(PendingCommitment),
}

impl WagerState {
    pub fn name(&self) -> &'static str {
        match self {
            WagerState::Idle => "idle",
            WagerState::Committing => "committing",
            WagerState::Committed(_) => "committed",
            WagerState::RevealReady(_) => "reveal_ready",
            WagerState::Revealing(_) => "revealing",
            WagerState::Revealed(_) => "revealed",
            WagerState::Expired(_) => "expired",
        }
    }

    /// The commitment this state still holds the player to, if any.
    pub fn pending(&self) -> Option<&PendingCommitment> {
        match self {
            WagerState::Committed(c)
            | WagerState::RevealReady(c)
            | WagerState::Revealing(c)
            | WagerState::Expired(c) => Some(c),
            _ => None,
        }
    }
}

/// Payment options for a single commit.
#[derive(Debug, Clone, Default)]
pub struct CommitRequest {
    pub discount_id: Option<String>,
    pub use_bonus_credit: bool,
}

impl CommitRequest {
    pub fn full_price() -> Self {
        Self::default()
    }

    pub fn with_discount(discount_id: impl Into<String>) -> Self {
        Self {
            discount_id: Some(discount_id.into()),
            use_bonus_credit: false,
        }
    }

    pub fn with_bonus_credit() -> Self {
        Self {
            discount_id: None,
            use_bonus_credit: true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    NothingPending,
    /// Stored for a different wager context's contract; left untouched.
    ForeignContract { contract: Address },
    Waiting {
        commitment: PendingCommitment,
        blocks_remaining: u64,
    },
    Revealed(WagerOutcome),
    /// Already settled according to the persistent store; local record cleared.
    AlreadySettled(WagerOutcome),
    ExpiredNeedsCleanup(PendingCommitment),
    /// Submitted but the receipt is still missing; the record is kept.
    Unconfirmed(PendingCommitment),
}

enum Assessment {
    Done(RecoveryOutcome),
    Reveal,
}

enum Consumed {
    Nothing,
    Discount(String),
    BonusCredit,
}

impl Consumed {
    fn of(pending: &PendingCommitment) -> Self {
        match (&pending.discount_id, pending.used_bonus_credit) {
            (_, true) => Consumed::BonusCredit,
            (Some(id), false) => Consumed::Discount(id.clone()),
            (None, false) => Consumed::Nothing,
        }
    }
}

struct InFlight<'a> {
    player: Address,
    set: &'a Mutex<HashSet<Address>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.player);
    }
}

pub struct WagerMachine {
    reads: Arc<CachedLedger>,
    store: Arc<dyn GameStore>,
    vault: Arc<dyn CommitmentVault>,
    discount_percent: u8,
    states: Mutex<HashMap<Address, WagerState>>,
    in_flight: Mutex<HashSet<Address>>,
}

impl WagerMachine {
    pub fn new(
        config: &GameConfig,
        reads: Arc<CachedLedger>,
        store: Arc<dyn GameStore>,
        vault: Arc<dyn CommitmentVault>,
    ) -> Self {
        Self {
            reads,
            store,
            vault,
            discount_percent: config.discount_percent,
            states: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn state(&self, player: &Address) -> WagerState {
        self.states
            .lock()
            .get(player)
            .cloned()
            .unwrap_or(WagerState::Idle)
    }

    /// In-memory pending commitment, secret stripped.
    pub fn pending(&self, player: &Address) -> Option<PendingCommitment> {
        self.states
            .lock()
            .get(player)
            .and_then(|s| s.pending().map(PendingCommitment::without_secret))
    }

    /// The commitment `player` holds here or in durable storage, secret
    /// stripped.
    pub async fn outstanding(&self, player: &Address) -> Result<Option<PendingCommitment>> {
        Ok(self
            .load_commitment(player)
            .await?
            .map(|c| c.without_secret()))
    }

    pub async fn commit(
        &self,
        player: &Address,
        request: CommitRequest,
    ) -> Result<PendingCommitment> {
        let _guard = self.begin(player)?;

        if let Some(existing) = self.load_commitment(player).await? {
            return Err(WagerError::CommitmentOutstanding {
                status: existing.status,
            });
        }
        if request.discount_id.is_some() && request.use_bonus_credit {
            return Err(WagerError::invalid_request(
                "A discount and a bonus credit cannot be combined",
            ));
        }

        let ledger = self.reads.ledger().clone();
        if !self.reads.is_deployed().await? {
            return Err(CoreError::ContractNotDeployed {
                address: address_hex(&ledger.contract_address()),
            }
            .into());
        }
        if !self.reads.can_wager(player).await? {
            let cooldown_remaining = self.reads.cooldown_remaining(player).await.unwrap_or(0);
            return Err(WagerError::NotEligible { cooldown_remaining });
        }

        let cost = self.reads.wager_cost().await?;
        let (amount, discount_percent) = match (&request.discount_id, request.use_bonus_credit) {
            (_, true) => (U256::zero(), 0),
            (Some(_), false) => (
                cost * U256::from(100 - self.discount_percent) / U256::from(100u8),
                self.discount_percent,
            ),
            (None, false) => (cost, 0),
        };

        let consumed = self.consume(player, &request).await?;

        let secret = commitment::generate_secret();
        let commitment_hash = commitment::commitment_hash(&secret, player);
        self.set_state(player, WagerState::Committing);
        tracing::info!(
            "Committing {} wei for {} ({})",
            amount,
            address_hex(player),
            h256_hex(&commitment_hash)
        );

        let tx_hash = match ledger.submit_commit(player, commitment_hash, amount).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                self.release(player, consumed).await;
                self.set_state(player, WagerState::Idle);
                if matches!(e.root(), CoreError::UserRejectedSignature) {
                    tracing::info!("Commit cancelled by {}", address_hex(player));
                } else {
                    tracing::warn!("Commit for {} failed: {}", address_hex(player), e);
                }
                return Err(e.into());
            }
        };

        // From here the wager may be live: keep the discount and the secret.
        let submitted = PendingCommitment {
            player: *player,
            contract: ledger.contract_address(),
            secret: Some(secret),
            commitment_hash,
            commit_block: 0,
            tx_hash,
            amount_wagered: amount,
            discount_percent,
            discount_id: request.discount_id.clone(),
            used_bonus_credit: request.use_bonus_credit,
            status: WagerStatus::Submitted,
            created_at: Utc::now(),
        };
        let saved = self.vault.save(&submitted).await;
        self.set_state(player, WagerState::Committed(submitted.clone()));

        let confirmed = self.confirm(player, submitted).await;
        let pending = match (confirmed, saved) {
            (Ok(Some(pending)), _) => pending,
            (Ok(None), _) => {
                return Err(CoreError::Reverted {
                    tx_hash: h256_hex(&tx_hash),
                }
                .into())
            }
            (Err(WagerError::CommitUnconfirmed { .. }), Err(source)) => {
                tracing::error!(
                    "Commitment {} submitted in tx {} but neither confirmed nor persisted: {}",
                    h256_hex(&commitment_hash),
                    h256_hex(&tx_hash),
                    source
                );
                return Err(WagerError::DurableWriteFailed {
                    tx_hash: h256_hex(&tx_hash),
                    commitment_hash: h256_hex(&commitment_hash),
                    source,
                });
            }
            (Err(e), _) => return Err(e),
        };

        tracing::info!(
            "Committed {} at block {}",
            h256_hex(&pending.commitment_hash),
            pending.commit_block
        );
        Ok(pending.without_secret())
    }

    pub async fn reveal(&self, player: &Address) -> Result<WagerOutcome> {
        let _guard = self.begin(player)?;

        let mut pending = self
            .load_commitment(player)
            .await?
            .ok_or(WagerError::NoPendingCommitment)?;
        if pending.status == WagerStatus::Submitted {
            pending = self
                .confirm(player, pending)
                .await?
                .ok_or(WagerError::NoPendingCommitment)?;
        }
        let window = self.window_for(&pending).await?;
        let current = self.reads.block_number().await?;

        if pending.status == WagerStatus::Expired {
            return Err(violation(&window, current, true));
        }

        match window.position(current) {
            WindowPosition::TooEarly { blocks_remaining } => {
                tracing::info!(
                    "Reveal for {} is {} block(s) early",
                    address_hex(player),
                    blocks_remaining
                );
                self.set_state(player, WagerState::Committed(pending));
                return Err(violation(&window, current, false));
            }
            WindowPosition::Expired => {
                self.expire(player, pending).await?;
                return Err(violation(&window, current, true));
            }
            WindowPosition::Open { .. } => {}
        }

        if let Some(outcome) = self.prior_settlement(player, &pending).await? {
            return Ok(outcome);
        }

        let secret = pending.secret.clone().ok_or(WagerError::SecretUnavailable)?;
        pending.status = WagerStatus::RevealReady;
        self.set_state(player, WagerState::Revealing(pending.clone()));

        let receipt = match self.reads.ledger().reveal(player, &secret).await {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::warn!("Reveal for {} failed: {}", address_hex(player), e);
                self.set_state(player, WagerState::RevealReady(pending));
                return Err(e.into());
            }
        };

        Ok(self.settle(player, &pending, receipt).await)
    }

    /// Resume whatever commitment `player` left behind.
    ///
    /// Reveals automatically when the window is open; an expired commitment
    /// is reported for explicit cleanup instead.
    pub async fn recover_pending_commitment(&self, player: &Address) -> Result<RecoveryOutcome> {
        let assessment = {
            let _guard = self.begin(player)?;
            self.assess(player).await?
        };

        match assessment {
            Assessment::Done(outcome) => Ok(outcome),
            Assessment::Reveal => Ok(RecoveryOutcome::Revealed(self.reveal(player).await?)),
        }
    }

    /// Forget an expired commitment so a new one can be placed. No ledger
    /// transaction is involved.
    pub async fn cleanup_expired(&self, player: &Address) -> Result<()> {
        let _guard = self.begin(player)?;

        let mut pending = self
            .load_commitment(player)
            .await?
            .ok_or(WagerError::NoPendingCommitment)?;
        if pending.status == WagerStatus::Submitted {
            match self.confirm(player, pending).await? {
                Some(confirmed) => pending = confirmed,
                None => return Ok(()),
            }
        }

        if pending.status != WagerStatus::Expired && pending.has_secret() {
            let window = self.window_for(&pending).await?;
            let current = self.reads.block_number().await?;
            if window.position(current) != WindowPosition::Expired {
                return Err(WagerError::invalid_request(
                    "The pending wager can still be revealed",
                ));
            }
        }

        self.vault.clear(player).await?;
        self.set_state(player, WagerState::Idle);
        self.reads.invalidate(&ReadKey::player(*player));

        tracing::info!(
            "Cleared expired commitment {} for {}",
            h256_hex(&pending.commitment_hash),
            address_hex(player)
        );
        Ok(())
    }

    async fn assess(&self, player: &Address) -> Result<Assessment> {
        let Some(pending) = self.load_commitment(player).await? else {
            return Ok(Assessment::Done(RecoveryOutcome::NothingPending));
        };

        let contract = self.reads.ledger().contract_address();
        if pending.contract != contract {
            tracing::info!(
                "Stored commitment for {} belongs to contract {}",
                address_hex(player),
                address_hex(&pending.contract)
            );
            return Ok(Assessment::Done(RecoveryOutcome::ForeignContract {
                contract: pending.contract,
            }));
        }

        if pending.status == WagerStatus::Expired || !pending.has_secret() {
            self.set_state(player, WagerState::Expired(pending.clone()));
            return Ok(Assessment::Done(RecoveryOutcome::ExpiredNeedsCleanup(
                pending.without_secret(),
            )));
        }

        let pending = if pending.status == WagerStatus::Submitted {
            let submitted = pending.without_secret();
            match self.confirm(player, pending).await {
                Ok(Some(confirmed)) => confirmed,
                Ok(None) => return Ok(Assessment::Done(RecoveryOutcome::NothingPending)),
                Err(WagerError::CommitUnconfirmed { .. }) => {
                    return Ok(Assessment::Done(RecoveryOutcome::Unconfirmed(submitted)))
                }
                Err(e) => return Err(e),
            }
        } else {
            pending
        };

        if let Some(outcome) = self.prior_settlement(player, &pending).await? {
            return Ok(Assessment::Done(RecoveryOutcome::AlreadySettled(outcome)));
        }

        let window = self.window_for(&pending).await?;
        let current = self.reads.block_number().await?;

        match window.position(current) {
            WindowPosition::TooEarly { blocks_remaining } => {
                self.set_state(player, WagerState::Committed(pending.clone()));
                Ok(Assessment::Done(RecoveryOutcome::Waiting {
                    commitment: pending.without_secret(),
                    blocks_remaining,
                }))
            }
            WindowPosition::Expired => {
                let tombstone = self.expire(player, pending).await?;
                Ok(Assessment::Done(RecoveryOutcome::ExpiredNeedsCleanup(
                    tombstone,
                )))
            }
            WindowPosition::Open { blocks_left } => {
                tracing::info!(
                    "Resuming reveal for {} ({} block(s) left)",
                    address_hex(player),
                    blocks_left
                );
                let mut ready = pending;
                ready.status = WagerStatus::RevealReady;
                self.set_state(player, WagerState::RevealReady(ready));
                Ok(Assessment::Reveal)
            }
        }
    }

    /// Wait for a submitted commit and record its canonical block. `None` when
    /// the transaction reverted, in which case nothing was wagered and the
    /// record and any consumed discount are released.
    async fn confirm(
        &self,
        player: &Address,
        mut pending: PendingCommitment,
    ) -> Result<Option<PendingCommitment>> {
        let tx_hash = pending.tx_hash;
        let receipt = match self.reads.ledger().confirm_commit(player, &tx_hash).await {
            Ok(receipt) => receipt,
            Err(e) if matches!(e.root(), CoreError::Reverted { .. }) => {
                tracing::warn!("Commit {} reverted, nothing was wagered", h256_hex(&tx_hash));
                if let Err(e) = self.vault.clear(player).await {
                    tracing::error!("Failed to clear reverted commitment: {}", e);
                }
                self.release(player, Consumed::of(&pending)).await;
                self.set_state(player, WagerState::Idle);
                return Ok(None);
            }
            Err(source) => {
                tracing::error!(
                    "Commit {} for {} submitted but not confirmed: {}",
                    h256_hex(&tx_hash),
                    address_hex(player),
                    source
                );
                return Err(WagerError::CommitUnconfirmed {
                    tx_hash: h256_hex(&tx_hash),
                    commitment_hash: h256_hex(&pending.commitment_hash),
                    source,
                });
            }
        };
        if receipt.commitment_hash != pending.commitment_hash {
            tracing::warn!(
                "Committed event hash {} differs from submitted {}",
                h256_hex(&receipt.commitment_hash),
                h256_hex(&pending.commitment_hash)
            );
        }

        pending.commit_block = receipt.commit_block;
        pending.status = WagerStatus::Committed;
        let saved = self.vault.save(&pending).await;
        self.set_state(player, WagerState::Committed(pending.clone()));
        self.reads.invalidate(&ReadKey::settlement(*player));

        if let Err(e) = self.store.record_wager(&pending).await {
            tracing::warn!("Failed to record wager in store: {}", e);
        }

        if let Err(source) = saved {
            tracing::error!(
                "Commitment {} confirmed in tx {} but not persisted: {}",
                h256_hex(&pending.commitment_hash),
                h256_hex(&tx_hash),
                source
            );
            return Err(WagerError::DurableWriteFailed {
                tx_hash: h256_hex(&tx_hash),
                commitment_hash: h256_hex(&pending.commitment_hash),
                source,
            });
        }
        Ok(Some(pending))
    }

    /// Outcome the store already holds for `pending`, clearing the local record.
    async fn prior_settlement(
        &self,
        player: &Address,
        pending: &PendingCommitment,
    ) -> Result<Option<WagerOutcome>> {
        match self.store.fetch_outcome(&pending.commitment_hash).await {
            Ok(Some(outcome)) => {
                tracing::info!(
                    "Commitment {} already settled, clearing local record",
                    h256_hex(&pending.commitment_hash)
                );
                self.vault.clear(player).await?;
                self.reads.invalidate(&ReadKey::settlement(*player));
                self.set_state(player, WagerState::Revealed(outcome.clone()));
                Ok(Some(outcome))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!("Could not check store for prior settlement: {}", e);
                Ok(None)
            }
        }
    }

    async fn settle(
        &self,
        player: &Address,
        pending: &PendingCommitment,
        receipt: RevealReceipt,
    ) -> WagerOutcome {
        let outcome = WagerOutcome {
            player: *player,
            commitment_hash: pending.commitment_hash,
            amount_wagered: pending.amount_wagered,
            won: receipt.won,
            payout: receipt.payout,
            reveal_tx: receipt.tx_hash,
            revealed_at: Utc::now(),
        };

        if let Err(e) = self.vault.clear(player).await {
            tracing::error!(
                "Settled {} but failed to clear local record: {}",
                h256_hex(&pending.commitment_hash),
                e
            );
        }
        self.reads.invalidate(&ReadKey::settlement(*player));
        self.set_state(player, WagerState::Revealed(outcome.clone()));

        tracing::info!(
            "Revealed {} for {}: {}",
            h256_hex(&pending.commitment_hash),
            address_hex(player),
            if outcome.won { "won" } else { "lost" }
        );

        self.record_settlement(&outcome).await;
        outcome
    }

    async fn record_settlement(&self, outcome: &WagerOutcome) {
        if let Err(e) = self.store.record_outcome(outcome).await {
            tracing::warn!("Failed to record outcome in store: {}", e);
        }

        if outcome.won {
            let winner = Winner {
                address: outcome.player,
                amount: outcome.payout,
                won_at: outcome.revealed_at,
                tx_hash: Some(outcome.reveal_tx),
            };
            if let Err(e) = self.store.record_winner(&winner).await {
                tracing::warn!("Failed to record winner in store: {}", e);
            }
        }

        let mut record = match self.store.fetch_player_stats(&outcome.player).await {
            Ok(Some(record)) => record,
            Ok(None) => PlayerRecord {
                address: outcome.player,
                ..Default::default()
            },
            Err(e) => {
                tracing::warn!("Skipping player stats update: {}", e);
                return;
            }
        };
        record.total_shots += 1;
        record.total_spent = record.total_spent.saturating_add(outcome.amount_wagered);
        record.total_won = record.total_won.saturating_add(outcome.payout);
        if let Err(e) = self.store.upsert_player_stats(&record).await {
            tracing::warn!("Failed to update player stats in store: {}", e);
        }
    }

    /// Erase the secret and keep a tombstone until `cleanup_expired`.
    async fn expire(
        &self,
        player: &Address,
        pending: PendingCommitment,
    ) -> Result<PendingCommitment> {
        self.vault.erase_secret(player).await?;

        let mut tombstone = pending.without_secret();
        tombstone.status = WagerStatus::Expired;
        self.set_state(player, WagerState::Expired(tombstone.clone()));

        tracing::warn!(
            "Commitment {} for {} expired unrevealed",
            h256_hex(&tombstone.commitment_hash),
            address_hex(player)
        );
        Ok(tombstone)
    }

    async fn window_for(&self, pending: &PendingCommitment) -> Result<RevealWindow> {
        let reveal_delay = self.reads.reveal_delay().await?;
        let max_reveal_delay = self.reads.max_reveal_delay().await?;
        Ok(RevealWindow::new(
            pending.commit_block,
            reveal_delay,
            max_reveal_delay,
        ))
    }

    async fn load_commitment(&self, player: &Address) -> Result<Option<PendingCommitment>> {
        let settled = match self.states.lock().get(player) {
            Some(WagerState::Revealed(outcome)) => Some(outcome.commitment_hash),
            Some(state) => match state.pending() {
                Some(pending) => return Ok(Some(pending.clone())),
                None => None,
            },
            None => None,
        };

        let stored = self.vault.load(player).await?;
        match (stored, settled) {
            // A settled record whose clear failed earlier; never reveal it again.
            (Some(stored), Some(hash)) if stored.commitment_hash == hash => {
                match self.vault.clear(player).await {
                    Ok(()) => tracing::info!(
                        "Cleared settled commitment {} left in the vault",
                        h256_hex(&hash)
                    ),
                    Err(e) => tracing::error!(
                        "Settled commitment {} is still in the vault: {}",
                        h256_hex(&hash),
                        e
                    ),
                }
                Ok(None)
            }
            (stored, _) => Ok(stored),
        }
    }

    async fn consume(&self, player: &Address, request: &CommitRequest) -> Result<Consumed> {
        if let Some(id) = &request.discount_id {
            return match self.store.consume_discount(id, player).await {
                Ok(_) => Ok(Consumed::Discount(id.clone())),
                Err(e) => Err(WagerError::DiscountConsumptionFailed {
                    discount_id: id.clone(),
                    reason: e.to_string(),
                }),
            };
        }
        if request.use_bonus_credit {
            return match self.store.consume_bonus_credit(player).await {
                Ok(remaining) => {
                    tracing::debug!("Bonus credit used, {} remaining", remaining);
                    Ok(Consumed::BonusCredit)
                }
                Err(e) => Err(WagerError::BonusCreditUnavailable(e.to_string())),
            };
        }
        Ok(Consumed::Nothing)
    }

    async fn release(&self, player: &Address, consumed: Consumed) {
        let result = match &consumed {
            Consumed::Nothing => return,
            Consumed::Discount(id) => self.store.release_discount(id, player).await,
            Consumed::BonusCredit => self.store.release_bonus_credit(player).await,
        };
        if let Err(e) = result {
            tracing::error!(
                "Failed to release consumed discount for {}: {}",
                address_hex(player),
                e
            );
        }
    }

    fn begin(&self, player: &Address) -> Result<InFlight<'_>> {
        if !self.in_flight.lock().insert(*player) {
            return Err(WagerError::WagerInProgress);
        }
        Ok(InFlight {
            player: *player,
            set: &self.in_flight,
        })
    }

    fn set_state(&self, player: &Address, state: WagerState) {
        tracing::debug!("{} -> {}", address_hex(player), state.name());
        self.states.lock().insert(*player, state);
    }
}

fn violation(window: &RevealWindow, current: u64, expired: bool) -> WagerError {
    WagerError::ProtocolWindowViolation {
        current_block: current,
        opens_after: window.opens_after(),
        closes_at: window.closes_at(),
        expired,
    }
}
