//! In-memory ledger, store and vault doubles for the engine's tests.

use crate::machine::WagerMachine;
use crate::reads::{CachedLedger, LedgerCache};
use crate::reconcile::{GameEvent, GameView, Reconciler};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use potshot_core::{
    Address, BlockNumber, CommitReceipt, CommitmentHash, CommitmentVault, CoreError, Discount,
    GameConfig, GameStore, Ledger, ManualClock, PendingCommitment, PlayerRecord, PlayerStats,
    Result, RetryPolicy, RevealReceipt, Secret, SponsorInfo, SqliteCommitmentVault, Storage,
    StoreEvent, TxHash, WagerOutcome, Winner, U256,
};
use primitive_types::H256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

pub fn ether(n: u64) -> U256 {
    U256::exp10(18) * n
}

pub fn player() -> Address {
    Address::repeat_byte(0x01)
}

pub fn other_player() -> Address {
    Address::repeat_byte(0x02)
}

pub fn contract() -> Address {
    Address::repeat_byte(0xcc)
}

#[derive(Debug, Clone)]
pub struct LedgerState {
    pub block: BlockNumber,
    pub deployed: bool,
    pub balance: U256,
    pub house_funds: U256,
    pub wager_cost: U256,
    pub sponsor_cost: U256,
    pub sponsor: Option<SponsorInfo>,
    pub winners: Vec<Winner>,
    pub stats: HashMap<Address, PlayerStats>,
    pub cooldown: u64,
    pub can_wager: bool,
    pub reveal_delay: u64,
    pub max_reveal_delay: u64,
    pub win: bool,
    pub payout: U256,
    pub commitments: HashMap<Address, (CommitmentHash, BlockNumber)>,
    pub committed_values: Vec<U256>,
    pub receipts: HashMap<TxHash, CommitReceipt>,
    pub reveals: usize,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            block: 100,
            deployed: true,
            balance: ether(12),
            house_funds: ether(2),
            wager_cost: ether(1),
            sponsor_cost: ether(5),
            sponsor: None,
            winners: Vec::new(),
            stats: HashMap::new(),
            cooldown: 0,
            can_wager: true,
            reveal_delay: 1,
            max_reveal_delay: 256,
            win: false,
            payout: U256::zero(),
            commitments: HashMap::new(),
            committed_values: Vec::new(),
            receipts: HashMap::new(),
            reveals: 0,
        }
    }
}

/// Ledger double that enforces the contract's window and hash checks.
pub struct FakeLedger {
    contract: Address,
    state: Mutex<LedgerState>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, usize>>,
    commit_error: Mutex<Option<CoreError>>,
    confirm_error: Mutex<Option<CoreError>>,
    reveal_error: Mutex<Option<CoreError>>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::with_contract(contract())
    }

    pub fn with_contract(contract: Address) -> Self {
        Self {
            contract,
            state: Mutex::new(LedgerState::default()),
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            commit_error: Mutex::new(None),
            confirm_error: Mutex::new(None),
            reveal_error: Mutex::new(None),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut LedgerState)) {
        f(&mut *self.state.lock());
    }

    pub fn snapshot(&self) -> LedgerState {
        self.state.lock().clone()
    }

    pub fn set_block(&self, block: BlockNumber) {
        self.state.lock().block = block;
    }

    pub fn wager_cost_value(&self) -> U256 {
        self.state.lock().wager_cost
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().get(name).copied().unwrap_or(0)
    }

    pub fn total_calls(&self, names: &[&str]) -> usize {
        names.iter().map(|n| self.calls(n)).sum()
    }

    /// Make the next `times` calls to `name` fail as unavailable.
    pub fn fail_next(&self, name: &'static str, times: usize) {
        self.failures.lock().insert(name, times);
    }

    pub fn fail_commit(&self, err: CoreError) {
        *self.commit_error.lock() = Some(err);
    }

    /// The commit goes out, but its next confirmation fails with `err`.
    pub fn fail_confirm(&self, err: CoreError) {
        *self.confirm_error.lock() = Some(err);
    }

    pub fn fail_reveal(&self, err: CoreError) {
        *self.reveal_error.lock() = Some(err);
    }

    pub fn commit_count(&self) -> usize {
        self.state.lock().committed_values.len()
    }

    pub fn reveal_count(&self) -> usize {
        self.state.lock().reveals
    }

    fn hit(&self, name: &'static str) -> Result<()> {
        *self.calls.lock().entry(name).or_insert(0) += 1;
        let mut failures = self.failures.lock();
        if let Some(left) = failures.get_mut(name) {
            if *left > 0 {
                *left -= 1;
                return Err(CoreError::unavailable(format!("{} unavailable", name)));
            }
        }
        Ok(())
    }

    fn read<T>(&self, name: &'static str, f: impl FnOnce(&LedgerState) -> T) -> Result<T> {
        self.hit(name)?;
        Ok(f(&*self.state.lock()))
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    fn contract_address(&self) -> Address {
        self.contract
    }

    async fn is_deployed(&self) -> Result<bool> {
        self.read("is_deployed", |s| s.deployed)
    }

    async fn block_number(&self) -> Result<BlockNumber> {
        self.read("block_number", |s| s.block)
    }

    async fn contract_balance(&self) -> Result<U256> {
        self.read("contract_balance", |s| s.balance)
    }

    async fn house_funds(&self) -> Result<U256> {
        self.read("house_funds", |s| s.house_funds)
    }

    async fn wager_cost(&self) -> Result<U256> {
        self.read("wager_cost", |s| s.wager_cost)
    }

    async fn sponsor_cost(&self) -> Result<U256> {
        self.read("sponsor_cost", |s| s.sponsor_cost)
    }

    async fn current_sponsor(&self) -> Result<Option<SponsorInfo>> {
        self.read("current_sponsor", |s| s.sponsor.clone())
    }

    async fn recent_winners(&self) -> Result<Vec<Winner>> {
        self.read("recent_winners", |s| s.winners.clone())
    }

    async fn player_stats(&self, player: &Address) -> Result<PlayerStats> {
        self.read("player_stats", |s| {
            s.stats.get(player).cloned().unwrap_or_default()
        })
    }

    async fn cooldown_remaining(&self, _player: &Address) -> Result<u64> {
        self.read("cooldown_remaining", |s| s.cooldown)
    }

    async fn can_wager(&self, _player: &Address) -> Result<bool> {
        self.read("can_wager", |s| s.can_wager)
    }

    async fn reveal_delay(&self) -> Result<u64> {
        self.read("reveal_delay", |s| s.reveal_delay)
    }

    async fn max_reveal_delay(&self) -> Result<u64> {
        self.read("max_reveal_delay", |s| s.max_reveal_delay)
    }

    async fn submit_commit(
        &self,
        player: &Address,
        commitment_hash: CommitmentHash,
        value: U256,
    ) -> Result<TxHash> {
        self.hit("commit")?;
        if let Some(err) = self.commit_error.lock().take() {
            return Err(err);
        }

        let mut state = self.state.lock();
        if state.commitments.contains_key(player) {
            return Err(CoreError::Reverted {
                tx_hash: "0xcommit".to_string(),
            });
        }
        let block = state.block;
        state.commitments.insert(*player, (commitment_hash, block));
        state.committed_values.push(value);
        state.balance = state.balance + value;

        let tx_hash = H256::from_low_u64_be(state.committed_values.len() as u64);
        state.receipts.insert(
            tx_hash,
            CommitReceipt {
                tx_hash,
                commitment_hash,
                amount: value,
                commit_block: block,
            },
        );
        Ok(tx_hash)
    }

    async fn confirm_commit(&self, _player: &Address, tx_hash: &TxHash) -> Result<CommitReceipt> {
        self.hit("confirm_commit")?;
        if let Some(err) = self.confirm_error.lock().take() {
            return Err(err);
        }
        self.state
            .lock()
            .receipts
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| CoreError::ReceiptTimeout {
                tx_hash: format!("{:?}", tx_hash),
                waited_secs: 0,
            })
    }

    async fn reveal(&self, player: &Address, secret: &Secret) -> Result<RevealReceipt> {
        self.hit("reveal")?;
        if let Some(err) = self.reveal_error.lock().take() {
            return Err(err);
        }

        let mut state = self.state.lock();
        let reverted = || CoreError::Reverted {
            tx_hash: "0xreveal".to_string(),
        };
        let (hash, commit_block) = *state.commitments.get(player).ok_or_else(reverted)?;
        if !crate::commitment::verify(&hash, secret, player) {
            return Err(reverted());
        }
        let block = state.block;
        if block <= commit_block + state.reveal_delay
            || block > commit_block + state.max_reveal_delay
        {
            return Err(reverted());
        }

        state.commitments.remove(player);
        state.reveals += 1;
        let payout = if state.win { state.payout } else { U256::zero() };
        state.balance = state.balance.saturating_sub(payout);

        Ok(RevealReceipt {
            tx_hash: H256::from_low_u64_be(1000 + state.reveals as u64),
            block_number: block,
            won: state.win,
            payout,
        })
    }
}

#[derive(Debug, Default)]
pub struct StoreState {
    pub winners: Vec<Winner>,
    pub players: HashMap<Address, PlayerRecord>,
    pub sponsor: Option<SponsorInfo>,
    pub discounts: HashMap<String, Discount>,
    pub bonus_credits: HashMap<Address, u32>,
    pub outcomes: HashMap<CommitmentHash, WagerOutcome>,
    pub wagers: Vec<PendingCommitment>,
    pub discount_consumptions: usize,
    pub fail_reads: bool,
}

/// Persistent-store double publishing the same events `RestGameStore` does.
pub struct FakeStore {
    state: Mutex<StoreState>,
    calls: Mutex<HashMap<&'static str, usize>>,
    events: broadcast::Sender<StoreEvent>,
}

impl FakeStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(StoreState::default()),
            calls: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut StoreState)) {
        f(&mut *self.state.lock());
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&StoreState) -> T) -> T {
        f(&*self.state.lock())
    }

    pub fn add_discount(&self, id: &str, owner: Address) {
        self.state.lock().discounts.insert(
            id.to_string(),
            Discount {
                id: id.to_string(),
                player: owner,
                used: false,
                used_at: None,
            },
        );
    }

    pub fn discount(&self, id: &str) -> Option<Discount> {
        self.state.lock().discounts.get(id).cloned()
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().get(name).copied().unwrap_or(0)
    }

    pub fn emit(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }

    fn hit(&self, name: &'static str) {
        *self.calls.lock().entry(name).or_insert(0) += 1;
    }

    fn read<T>(&self, name: &'static str, f: impl FnOnce(&StoreState) -> T) -> Result<T> {
        self.hit(name);
        let state = self.state.lock();
        if state.fail_reads {
            return Err(CoreError::unavailable("store offline"));
        }
        Ok(f(&*state))
    }
}

#[async_trait]
impl GameStore for FakeStore {
    async fn record_wager(&self, commitment: &PendingCommitment) -> Result<()> {
        self.hit("record_wager");
        self.state.lock().wagers.push(commitment.without_secret());
        self.emit(StoreEvent::WagerCommitted {
            player: commitment.player,
        });
        Ok(())
    }

    async fn record_outcome(&self, outcome: &WagerOutcome) -> Result<()> {
        self.hit("record_outcome");
        self.state
            .lock()
            .outcomes
            .insert(outcome.commitment_hash, outcome.clone());
        self.emit(StoreEvent::WagerRevealed {
            player: outcome.player,
            won: outcome.won,
        });
        Ok(())
    }

    async fn record_winner(&self, winner: &Winner) -> Result<()> {
        self.hit("record_winner");
        self.state.lock().winners.insert(0, winner.clone());
        self.emit(StoreEvent::WinnerRecorded {
            winner: winner.address,
        });
        Ok(())
    }

    async fn upsert_player_stats(&self, record: &PlayerRecord) -> Result<()> {
        self.hit("upsert_player_stats");
        self.state
            .lock()
            .players
            .insert(record.address, record.clone());
        Ok(())
    }

    async fn fetch_recent_winners(&self, limit: usize) -> Result<Vec<Winner>> {
        self.read("fetch_recent_winners", |s| {
            s.winners.iter().take(limit).cloned().collect()
        })
    }

    async fn fetch_top_players(&self, limit: usize) -> Result<Vec<PlayerRecord>> {
        self.read("fetch_top_players", |s| {
            let mut players: Vec<_> = s.players.values().cloned().collect();
            players.sort_by(|a, b| b.total_won.cmp(&a.total_won));
            players.truncate(limit);
            players
        })
    }

    async fn fetch_player_stats(&self, player: &Address) -> Result<Option<PlayerRecord>> {
        self.read("fetch_player_stats", |s| s.players.get(player).cloned())
    }

    async fn fetch_sponsor(&self) -> Result<Option<SponsorInfo>> {
        self.read("fetch_sponsor", |s| s.sponsor.clone())
    }

    async fn consume_discount(&self, discount_id: &str, player: &Address) -> Result<Discount> {
        self.hit("consume_discount");
        let mut state = self.state.lock();
        let discount = state
            .discounts
            .get_mut(discount_id)
            .filter(|d| d.player == *player && !d.used)
            .ok_or_else(|| CoreError::store(format!("discount {} is not available", discount_id)))?;
        discount.used = true;
        discount.used_at = Some(Utc::now());
        let consumed = discount.clone();
        state.discount_consumptions += 1;
        Ok(consumed)
    }

    async fn release_discount(&self, discount_id: &str, _player: &Address) -> Result<()> {
        self.hit("release_discount");
        if let Some(discount) = self.state.lock().discounts.get_mut(discount_id) {
            discount.used = false;
            discount.used_at = None;
        }
        Ok(())
    }

    async fn consume_bonus_credit(&self, player: &Address) -> Result<u32> {
        self.hit("consume_bonus_credit");
        let mut state = self.state.lock();
        match state.bonus_credits.get_mut(player) {
            Some(credits) if *credits > 0 => {
                *credits -= 1;
                Ok(*credits)
            }
            _ => Err(CoreError::store("no bonus credit available")),
        }
    }

    async fn release_bonus_credit(&self, player: &Address) -> Result<()> {
        self.hit("release_bonus_credit");
        *self.state.lock().bonus_credits.entry(*player).or_insert(0) += 1;
        Ok(())
    }

    async fn fetch_outcome(&self, commitment_hash: &CommitmentHash) -> Result<Option<WagerOutcome>> {
        self.read("fetch_outcome", |s| s.outcomes.get(commitment_hash).cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

/// SQLite vault whose saves and clears can be made to fail.
pub struct FlakyVault {
    inner: SqliteCommitmentVault,
    fail_saves: AtomicBool,
    fail_clears: AtomicBool,
}

impl FlakyVault {
    pub async fn new() -> Self {
        let storage = Arc::new(Storage::open_in_memory().await.unwrap());
        Self {
            inner: SqliteCommitmentVault::new(storage, "test-passphrase"),
            fail_saves: AtomicBool::new(false),
            fail_clears: AtomicBool::new(false),
        }
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn fail_clears(&self, fail: bool) {
        self.fail_clears.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommitmentVault for FlakyVault {
    async fn save(&self, commitment: &PendingCommitment) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(CoreError::internal("disk unavailable"));
        }
        self.inner.save(commitment).await
    }

    async fn load(&self, player: &Address) -> Result<Option<PendingCommitment>> {
        self.inner.load(player).await
    }

    async fn list(&self) -> Result<Vec<PendingCommitment>> {
        self.inner.list().await
    }

    async fn players(&self) -> Result<Vec<Address>> {
        self.inner.players().await
    }

    async fn erase_secret(&self, player: &Address) -> Result<()> {
        self.inner.erase_secret(player).await
    }

    async fn clear(&self, player: &Address) -> Result<()> {
        if self.fail_clears.load(Ordering::SeqCst) {
            return Err(CoreError::internal("disk unavailable"));
        }
        self.inner.clear(player).await
    }
}

pub fn test_config() -> GameConfig {
    let mut config = GameConfig::default().with_context("eth", contract());
    config.read_retry = RetryPolicy::new(3, Duration::from_millis(10));
    config
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// One engine wired to fakes.
pub struct Harness {
    pub config: GameConfig,
    pub clock: ManualClock,
    pub ledger: Arc<FakeLedger>,
    pub store: Arc<FakeStore>,
    pub vault: Arc<FlakyVault>,
    pub reads: Arc<CachedLedger>,
    pub machine: Arc<WagerMachine>,
}

impl Harness {
    pub async fn new() -> Self {
        let config = test_config();
        let clock = ManualClock::new(start_time());
        let ledger = Arc::new(FakeLedger::new());
        let store = Arc::new(FakeStore::new());
        let vault = Arc::new(FlakyVault::new().await);
        let (reads, machine) = Self::engine(&config, &clock, &ledger, &store, &vault);

        Self {
            config,
            clock,
            ledger,
            store,
            vault,
            reads,
            machine,
        }
    }

    fn engine(
        config: &GameConfig,
        clock: &ManualClock,
        ledger: &Arc<FakeLedger>,
        store: &Arc<FakeStore>,
        vault: &Arc<FlakyVault>,
    ) -> (Arc<CachedLedger>, Arc<WagerMachine>) {
        let cache = Arc::new(LedgerCache::with_clock(
            config.cache_ttl,
            Arc::new(clock.clone()),
        ));
        let reads = Arc::new(CachedLedger::new(ledger.clone(), cache, config.read_retry));
        let machine = Arc::new(WagerMachine::new(
            config,
            reads.clone(),
            store.clone(),
            vault.clone(),
        ));
        (reads, machine)
    }

    /// Fresh in-memory state over the same ledger, store and vault, as
    /// after a process restart.
    pub fn restart(&self) -> Arc<WagerMachine> {
        Self::engine(&self.config, &self.clock, &self.ledger, &self.store, &self.vault).1
    }

    pub fn reconciler(
        &self,
    ) -> (
        Arc<Reconciler>,
        watch::Receiver<GameView>,
        broadcast::Receiver<GameEvent>,
    ) {
        let (view, view_rx) = watch::channel(GameView::for_context("eth"));
        let (events, events_rx) = broadcast::channel(16);
        let reconciler = Arc::new(Reconciler::new(
            &self.config,
            self.reads.clone(),
            self.store.clone(),
            self.machine.clone(),
            Arc::new(view),
            events,
        ));
        (reconciler, view_rx, events_rx)
    }
}
