use crate::error::{Result, WagerError};
use crate::machine::{CommitRequest, WagerMachine, WagerState};
use crate::reads::{CachedLedger, LedgerCache};
use crate::reconcile::{GameEvent, GameView, Reconciler, RefreshHandle};
use crate::recovery::{SessionRecovery, StartupReport};
use parking_lot::RwLock;
use potshot_core::types::address_hex;
use potshot_core::{
    Address, Clock, CommitmentVault, CoreError, GameConfig, GameStore, Ledger, PendingCommitment,
    SystemClock, WagerContext, WagerOutcome,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};

const EVENT_CAPACITY: usize = 64;

/// Everything bound to one wager context's contract.
struct ContextEngine {
    context: WagerContext,
    reads: Arc<CachedLedger>,
    machine: Arc<WagerMachine>,
    reconciler: Arc<Reconciler>,
}

struct Shared {
    config: GameConfig,
    ledgers: HashMap<String, Arc<dyn Ledger>>,
    store: Arc<dyn GameStore>,
    vault: Arc<dyn CommitmentVault>,
    clock: Arc<dyn Clock>,
    view: Arc<watch::Sender<GameView>>,
    events: broadcast::Sender<GameEvent>,
}

impl Shared {
    fn build_engine(&self, name: &str) -> Result<ContextEngine> {
        let context = self
            .config
            .context(name)
            .cloned()
            .ok_or_else(|| WagerError::UnknownContext(name.to_string()))?;
        let ledger = self
            .ledgers
            .get(name)
            .cloned()
            .ok_or_else(|| WagerError::UnknownContext(name.to_string()))?;

        let cache = Arc::new(LedgerCache::with_clock(
            self.config.cache_ttl,
            self.clock.clone(),
        ));
        let reads = Arc::new(CachedLedger::new(ledger, cache, self.config.read_retry));
        let machine = Arc::new(WagerMachine::new(
            &self.config,
            reads.clone(),
            self.store.clone(),
            self.vault.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            &self.config,
            reads.clone(),
            self.store.clone(),
            machine.clone(),
            self.view.clone(),
            self.events.clone(),
        ));

        Ok(ContextEngine {
            context,
            reads,
            machine,
            reconciler,
        })
    }
}

/// Observer-facing entry point: one active player and one active wager
/// context at a time.
pub struct GameSession {
    shared: Shared,
    recovery: SessionRecovery,
    engine: RwLock<Arc<ContextEngine>>,
    player: RwLock<Option<Address>>,
    updates: Mutex<Option<RefreshHandle>>,
}

impl GameSession {
    pub fn new(
        config: GameConfig,
        ledgers: HashMap<String, Arc<dyn Ledger>>,
        store: Arc<dyn GameStore>,
        vault: Arc<dyn CommitmentVault>,
    ) -> Result<Self> {
        Self::with_clock(config, ledgers, store, vault, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: GameConfig,
        ledgers: HashMap<String, Arc<dyn Ledger>>,
        store: Arc<dyn GameStore>,
        vault: Arc<dyn CommitmentVault>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let active = config.active_context.clone();
        let (view, _) = watch::channel(GameView::for_context(&active));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Shared {
            config,
            ledgers,
            store,
            vault: vault.clone(),
            clock,
            view: Arc::new(view),
            events,
        };
        let engine = shared.build_engine(&active)?;

        Ok(Self {
            shared,
            recovery: SessionRecovery::new(vault),
            engine: RwLock::new(Arc::new(engine)),
            player: RwLock::new(None),
            updates: Mutex::new(None),
        })
    }

    pub fn player(&self) -> Option<Address> {
        *self.player.read()
    }

    pub fn active_context(&self) -> String {
        self.engine().context.name.clone()
    }

    pub fn wager_state(&self) -> WagerState {
        match self.player() {
            Some(player) => self.engine().machine.state(&player),
            None => WagerState::Idle,
        }
    }

    /// Make `player` the active player and resume any wager it left behind.
    ///
    /// If the stored commitment was placed in another configured context,
    /// that context becomes active first.
    pub async fn connect(&self, player: Address) -> Result<StartupReport> {
        *self.player.write() = Some(player);
        tracing::info!("Connected {}", address_hex(&player));

        if let Some(stored) = self.shared.vault.load(&player).await? {
            let current = self.engine();
            if stored.contract != current.context.contract_address {
                let target = self
                    .shared
                    .config
                    .contexts
                    .iter()
                    .find(|c| c.contract_address == stored.contract)
                    .map(|c| c.name.clone());
                if let Some(name) = target {
                    tracing::info!("Switching to context '{}' holding the pending wager", name);
                    self.activate(&name).await?;
                }
            }
        }

        let engine = self.engine();
        match engine.reads.is_deployed().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(CoreError::ContractNotDeployed {
                    address: address_hex(&engine.context.contract_address),
                }
                .into())
            }
            Err(e) => tracing::warn!("Could not confirm contract deployment: {}", e),
        }

        let report = self.recovery.on_startup(&player, &engine.machine).await?;
        engine.reconciler.load_player_data(&player).await;

        // A running refresh loop still tracks the previous player.
        let running = self.updates.lock().await.is_some();
        if running {
            self.start_real_time_updates().await;
        }
        Ok(report)
    }

    pub async fn disconnect(&self) {
        self.stop_real_time_updates().await;
        if let Some(player) = self.player.write().take() {
            tracing::info!("Disconnected {}", address_hex(&player));
        }
        self.shared.view.send_modify(|view| view.player = None);
    }

    pub async fn commit(&self, request: CommitRequest) -> Result<PendingCommitment> {
        let player = self.require_player()?;
        let engine = self.engine();
        let result = engine.machine.commit(&player, request).await;
        engine.reconciler.load_player_data(&player).await;
        result
    }

    pub async fn reveal(&self) -> Result<WagerOutcome> {
        let player = self.require_player()?;
        let engine = self.engine();
        let result = engine.machine.reveal(&player).await;
        engine.reconciler.refresh(Some(player)).await;
        result
    }

    pub async fn cleanup_expired(&self) -> Result<()> {
        let player = self.require_player()?;
        let engine = self.engine();
        engine.machine.cleanup_expired(&player).await?;
        engine.reconciler.load_player_data(&player).await;
        Ok(())
    }

    /// Change the active wager denomination. Refused while the active
    /// player still holds a commitment.
    pub async fn switch_active_context(&self, name: &str) -> Result<()> {
        if self.shared.config.context(name).is_none() || !self.shared.ledgers.contains_key(name) {
            return Err(WagerError::UnknownContext(name.to_string()));
        }
        if self.active_context() == name {
            return Ok(());
        }
        if let Some(player) = self.player() {
            if let Some(pending) = self.engine().machine.outstanding(&player).await? {
                return Err(WagerError::CommitmentOutstanding {
                    status: pending.status,
                });
            }
        }

        self.activate(name).await
    }

    pub fn view(&self) -> GameView {
        self.shared.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<GameView> {
        self.shared.view.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<GameEvent> {
        self.shared.events.subscribe()
    }

    /// One-off refresh of everything the view shows.
    pub async fn refresh(&self) -> GameView {
        self.engine().reconciler.refresh(self.player()).await;
        self.view()
    }

    pub async fn start_real_time_updates(&self) {
        let mut updates = self.updates.lock().await;
        if let Some(previous) = updates.take() {
            previous.stop().await;
        }
        *updates = Some(
            self.engine()
                .reconciler
                .start_real_time_updates(self.player()),
        );
    }

    /// Returns whether updates were running.
    pub async fn stop_real_time_updates(&self) -> bool {
        match self.updates.lock().await.take() {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    async fn activate(&self, name: &str) -> Result<()> {
        let engine = Arc::new(self.shared.build_engine(name)?);
        let was_running = self.stop_real_time_updates().await;

        *self.engine.write() = engine;
        self.shared.view.send_replace(GameView::for_context(name));
        tracing::info!("Active wager context is now '{}'", name);

        if was_running {
            self.start_real_time_updates().await;
        }
        Ok(())
    }

    fn engine(&self) -> Arc<ContextEngine> {
        self.engine.read().clone()
    }

    fn require_player(&self) -> Result<Address> {
        self.player().ok_or(WagerError::WalletNotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::RecoveryOutcome;
    use crate::testing::{
        contract, ether, player, start_time, test_config, FakeLedger, FakeStore, FlakyVault,
    };
    use potshot_core::{ManualClock, StoreEvent};

    fn usdc_contract() -> Address {
        Address::repeat_byte(0xdd)
    }

    struct Fixture {
        eth: Arc<FakeLedger>,
        usdc: Arc<FakeLedger>,
        store: Arc<FakeStore>,
        vault: Arc<FlakyVault>,
    }

    impl Fixture {
        async fn new() -> Self {
            Self {
                eth: Arc::new(FakeLedger::with_contract(contract())),
                usdc: Arc::new(FakeLedger::with_contract(usdc_contract())),
                store: Arc::new(FakeStore::new()),
                vault: Arc::new(FlakyVault::new().await),
            }
        }

        fn session(&self) -> GameSession {
            let config = test_config().with_context("usdc", usdc_contract());
            let mut ledgers: HashMap<String, Arc<dyn Ledger>> = HashMap::new();
            ledgers.insert("eth".to_string(), self.eth.clone());
            ledgers.insert("usdc".to_string(), self.usdc.clone());

            GameSession::with_clock(
                config,
                ledgers,
                self.store.clone(),
                self.vault.clone(),
                Arc::new(ManualClock::new(start_time())),
            )
            .unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_actions_need_a_player() {
        let fixture = Fixture::new().await;
        let session = fixture.session();

        assert!(matches!(
            session.commit(CommitRequest::full_price()).await,
            Err(WagerError::WalletNotConnected)
        ));
        assert!(matches!(
            session.reveal().await,
            Err(WagerError::WalletNotConnected)
        ));
        assert!(matches!(session.wager_state(), WagerState::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_resumes_pending_wager() {
        let fixture = Fixture::new().await;
        let first = fixture.session();
        let report = first.connect(player()).await.unwrap();
        assert!(matches!(report.outcome, RecoveryOutcome::NothingPending));
        first.commit(CommitRequest::full_price()).await.unwrap();
        assert!(first.view().player.unwrap().pending_commitment.is_some());

        fixture.eth.set_block(110);
        let second = fixture.session();
        let report = second.connect(player()).await.unwrap();

        assert!(matches!(report.outcome, RecoveryOutcome::Revealed(_)));
        assert_eq!(fixture.eth.reveal_count(), 1);
        assert!(matches!(second.wager_state(), WagerState::Revealed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_refused_while_commitment_outstanding() {
        let fixture = Fixture::new().await;
        let session = fixture.session();
        session.connect(player()).await.unwrap();
        session.commit(CommitRequest::full_price()).await.unwrap();

        let err = session.switch_active_context("usdc").await.unwrap_err();
        assert!(matches!(err, WagerError::CommitmentOutstanding { .. }));
        assert_eq!(session.active_context(), "eth");

        fixture.eth.set_block(102);
        session.reveal().await.unwrap();

        session.switch_active_context("usdc").await.unwrap();
        assert_eq!(session.active_context(), "usdc");
        assert_eq!(session.view().context, "usdc");

        session.commit(CommitRequest::full_price()).await.unwrap();
        assert_eq!(fixture.usdc.commit_count(), 1);
        assert_eq!(fixture.eth.commit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_context() {
        let fixture = Fixture::new().await;
        let session = fixture.session();

        let err = session.switch_active_context("btc").await.unwrap_err();
        assert!(matches!(err, WagerError::UnknownContext(name) if name == "btc"));
        session.switch_active_context("eth").await.unwrap();
        assert_eq!(session.active_context(), "eth");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_follows_stored_commitment() {
        let fixture = Fixture::new().await;
        let first = fixture.session();
        first.connect(player()).await.unwrap();
        first.switch_active_context("usdc").await.unwrap();
        first.commit(CommitRequest::full_price()).await.unwrap();

        let second = fixture.session();
        assert_eq!(second.active_context(), "eth");
        let report = second.connect(player()).await.unwrap();

        assert_eq!(second.active_context(), "usdc");
        assert!(matches!(
            report.outcome,
            RecoveryOutcome::Waiting { blocks_remaining: 2, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_rejects_undeployed_contract() {
        let fixture = Fixture::new().await;
        fixture.eth.update(|s| s.deployed = false);
        let session = fixture.session();

        let err = session.connect(player()).await.unwrap_err();
        assert!(matches!(
            err,
            WagerError::Core(CoreError::ContractNotDeployed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_real_time_updates_lifecycle() {
        let fixture = Fixture::new().await;
        let session = fixture.session();
        session.connect(player()).await.unwrap();
        let mut view_rx = session.subscribe_view();

        session.start_real_time_updates().await;
        tokio::time::timeout(std::time::Duration::from_secs(5), view_rx.changed())
            .await
            .unwrap()
            .unwrap();

        assert!(session.stop_real_time_updates().await);
        assert!(!session.stop_real_time_updates().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_follow_player_connected_later() {
        let fixture = Fixture::new().await;
        let session = fixture.session();
        session.start_real_time_updates().await;
        session.connect(player()).await.unwrap();
        let mut view_rx = session.subscribe_view();

        fixture.eth.update(|s| s.cooldown = 7);
        fixture.store.emit(StoreEvent::WagerCommitted { player: player() });

        let waiting = async {
            loop {
                let cooldown = view_rx
                    .borrow()
                    .player
                    .as_ref()
                    .map(|p| p.cooldown_remaining);
                if cooldown == Some(7) {
                    break;
                }
                view_rx.changed().await.unwrap();
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(5), waiting)
            .await
            .unwrap();
        session.stop_real_time_updates().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_refresh_after_connect_emits_no_milestones() {
        let fixture = Fixture::new().await;
        let session = fixture.session();
        let mut events = session.events();

        session.connect(player()).await.unwrap();
        let view = session.refresh().await;

        assert_eq!(view.pot, ether(10));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_clears_player_view() {
        let fixture = Fixture::new().await;
        let session = fixture.session();
        session.connect(player()).await.unwrap();
        assert!(session.view().player.is_some());

        session.disconnect().await;
        assert!(session.player().is_none());
        assert!(session.view().player.is_none());
    }
}
