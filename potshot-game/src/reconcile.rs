//! Merges ledger reads, persistent-store reads and the read cache into the
//! view observers see, and keeps it fresh.

use crate::machine::WagerMachine;
use crate::reads::{CachedLedger, ReadKey};
use chrono::{DateTime, Utc};
use potshot_core::types::address_hex;
use potshot_core::{
    Address, GameConfig, GameStore, PendingCommitment, PlayerRecord, PlayerStats, SponsorInfo,
    StoreEvent, Winner, U256,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

const PLAYER_FIELDS: [&str; 4] = ["player_stats", "cooldown", "can_wager", "store_player"];

#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    /// The pot rose through `threshold` since the previous load.
    MilestoneCrossed { threshold: U256, pot: U256 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerView {
    pub address: Address,
    pub stats: PlayerStats,
    pub rank: Option<u32>,
    pub referral_discounts: u32,
    pub bonus_credits: u32,
    pub can_wager: bool,
    pub cooldown_remaining: u64,
    /// Secret stripped.
    pub pending_commitment: Option<PendingCommitment>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameView {
    pub context: String,
    /// Contract balance less house funds.
    pub pot: U256,
    pub contract_balance: U256,
    pub house_funds: U256,
    pub wager_cost: U256,
    pub sponsor_cost: U256,
    pub sponsor: Option<SponsorInfo>,
    pub recent_winners: Vec<Winner>,
    pub leaderboard: Vec<PlayerRecord>,
    pub player: Option<PlayerView>,
    /// Fields that fell back to an earlier value on the last load.
    pub degraded: Vec<&'static str>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl GameView {
    pub fn for_context(name: &str) -> Self {
        Self {
            context: name.to_string(),
            ..Default::default()
        }
    }
}

/// Stops the background refresh loop. Dropping the handle stops it too.
pub struct RefreshHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Refresh task ended abnormally: {}", e);
        }
    }
}

pub struct Reconciler {
    reads: Arc<CachedLedger>,
    store: Arc<dyn GameStore>,
    machine: Arc<WagerMachine>,
    view: Arc<watch::Sender<GameView>>,
    events: broadcast::Sender<GameEvent>,
    milestones: Vec<U256>,
    inter_call_delay: Duration,
    refresh_interval: Duration,
    winner_limit: usize,
    leaderboard_limit: usize,
    // One game-state load at a time; a waiting caller then finds the cache warm.
    // Holds the pot merged by the last load, the baseline for milestones.
    last_pot: Mutex<Option<U256>>,
}

impl Reconciler {
    pub fn new(
        config: &GameConfig,
        reads: Arc<CachedLedger>,
        store: Arc<dyn GameStore>,
        machine: Arc<WagerMachine>,
        view: Arc<watch::Sender<GameView>>,
        events: broadcast::Sender<GameEvent>,
    ) -> Self {
        let mut milestones = config.pot_milestones.clone();
        milestones.sort();

        Self {
            reads,
            store,
            machine,
            view,
            events,
            milestones,
            inter_call_delay: config.inter_call_delay,
            refresh_interval: config.refresh_interval,
            winner_limit: config.recent_winner_limit,
            leaderboard_limit: config.leaderboard_limit,
            last_pot: Mutex::new(None),
        }
    }

    pub fn view(&self) -> GameView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GameView> {
        self.view.subscribe()
    }

    /// Refresh the game-wide fields of the view.
    ///
    /// Only cold ledger fields are fetched, one at a time with the
    /// configured pause between calls. A failed field keeps its previous
    /// value; the call itself does not fail.
    pub async fn load_game_state(&self) -> GameView {
        let mut last_pot = self.last_pot.lock().await;
        let previous = self.view();
        let mut degraded: Vec<&'static str> = previous
            .degraded
            .iter()
            .copied()
            .filter(|f| PLAYER_FIELDS.contains(f))
            .collect();
        let mut issued = 0usize;

        self.pace(&ReadKey::ContractBalance, &mut issued).await;
        let contract_balance = or_previous(
            self.reads.contract_balance().await,
            previous.contract_balance,
            "contract_balance",
            &mut degraded,
        );

        self.pace(&ReadKey::HouseFunds, &mut issued).await;
        let house_funds = or_previous(
            self.reads.house_funds().await,
            previous.house_funds,
            "house_funds",
            &mut degraded,
        );

        self.pace(&ReadKey::WagerCost, &mut issued).await;
        let wager_cost = or_previous(
            self.reads.wager_cost().await,
            previous.wager_cost,
            "wager_cost",
            &mut degraded,
        );

        self.pace(&ReadKey::SponsorCost, &mut issued).await;
        let sponsor_cost = or_previous(
            self.reads.sponsor_cost().await,
            previous.sponsor_cost,
            "sponsor_cost",
            &mut degraded,
        );

        self.pace(&ReadKey::CurrentSponsor, &mut issued).await;
        let ledger_sponsor = or_previous(
            self.reads.current_sponsor().await,
            previous.sponsor.clone(),
            "sponsor",
            &mut degraded,
        );

        self.pace(&ReadKey::RecentWinners, &mut issued).await;
        let ledger_winners = or_previous(
            self.reads.recent_winners().await,
            previous.recent_winners.clone(),
            "recent_winners",
            &mut degraded,
        );

        let (store_winners, store_sponsor, leaderboard) = futures::join!(
            self.store.fetch_recent_winners(self.winner_limit),
            self.store.fetch_sponsor(),
            self.store.fetch_top_players(self.leaderboard_limit),
        );

        // Store values win over ledger values wherever the store has one.
        let recent_winners = match store_winners {
            Ok(winners) if !winners.is_empty() => winners,
            Ok(_) => ledger_winners,
            Err(e) => {
                tracing::warn!("Store winners unavailable, using ledger: {}", e);
                degraded.push("store_winners");
                ledger_winners
            }
        };
        let sponsor = match store_sponsor {
            Ok(Some(sponsor)) => Some(sponsor),
            Ok(None) => ledger_sponsor,
            Err(e) => {
                tracing::warn!("Store sponsor unavailable, using ledger: {}", e);
                degraded.push("store_sponsor");
                ledger_sponsor
            }
        };
        let leaderboard = or_previous(
            leaderboard,
            previous.leaderboard.clone(),
            "leaderboard",
            &mut degraded,
        );

        let pot = contract_balance.saturating_sub(house_funds);
        let pot_known = !degraded
            .iter()
            .any(|f| matches!(*f, "contract_balance" | "house_funds"));
        if pot_known {
            if let Some(last) = last_pot.replace(pot) {
                self.emit_milestones(last, pot);
            }
        }

        let view = GameView {
            context: previous.context,
            pot,
            contract_balance,
            house_funds,
            wager_cost,
            sponsor_cost,
            sponsor,
            recent_winners,
            leaderboard,
            player: previous.player,
            degraded,
            updated_at: Some(Utc::now()),
        };

        tracing::debug!("Game state loaded with {} ledger call(s)", issued);
        self.view.send_replace(view.clone());
        view
    }

    /// Refresh the per-player part of the view for `player`.
    pub async fn load_player_data(&self, player: &Address) -> PlayerView {
        let base = self
            .view()
            .player
            .filter(|p| p.address == *player)
            .unwrap_or_else(|| PlayerView {
                address: *player,
                ..Default::default()
            });
        let mut degraded = Vec::new();

        let mut stats = or_previous(
            self.reads.player_stats(player).await,
            base.stats.clone(),
            "player_stats",
            &mut degraded,
        );
        let cooldown_remaining = or_previous(
            self.reads.cooldown_remaining(player).await,
            base.cooldown_remaining,
            "cooldown",
            &mut degraded,
        );
        let can_wager = or_previous(
            self.reads.can_wager(player).await,
            base.can_wager,
            "can_wager",
            &mut degraded,
        );

        let mut rank = base.rank;
        let mut referral_discounts = base.referral_discounts;
        let mut bonus_credits = base.bonus_credits;
        match self.store.fetch_player_stats(player).await {
            Ok(Some(record)) => {
                stats.total_shots = record.total_shots;
                stats.total_spent = record.total_spent;
                stats.total_won = record.total_won;
                rank = record.rank;
                referral_discounts = record.referral_discounts;
                bonus_credits = record.bonus_credits;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    "Store stats for {} unavailable: {}",
                    address_hex(player),
                    e
                );
                degraded.push("store_player");
            }
        }

        let player_view = PlayerView {
            address: *player,
            stats,
            rank,
            referral_discounts,
            bonus_credits,
            can_wager,
            cooldown_remaining,
            pending_commitment: self.machine.pending(player),
        };

        self.view.send_modify(|view| {
            view.player = Some(player_view.clone());
            view.degraded.retain(|f| !PLAYER_FIELDS.contains(f));
            view.degraded.extend(degraded);
            view.updated_at = Some(Utc::now());
        });
        player_view
    }

    pub async fn refresh(&self, player: Option<Address>) {
        self.load_game_state().await;
        if let Some(player) = player {
            self.load_player_data(&player).await;
        }
    }

    /// Invalidate what `event` touched and reload it.
    pub async fn handle_store_event(&self, event: StoreEvent, player: Option<Address>) {
        match &event {
            StoreEvent::SponsorChanged => {
                self.reads
                    .invalidate(&[ReadKey::CurrentSponsor, ReadKey::SponsorCost]);
            }
            StoreEvent::WagerCommitted { player } => {
                let mut keys = vec![ReadKey::ContractBalance];
                keys.extend(ReadKey::player(*player));
                self.reads.invalidate(&keys);
            }
            StoreEvent::WinnerRecorded { winner: who } | StoreEvent::WagerRevealed { player: who, .. } => {
                self.reads.invalidate(&ReadKey::settlement(*who));
            }
        }

        self.load_game_state().await;
        if let (Some(tracked), Some(changed)) = (player, event.player()) {
            if tracked == *changed {
                self.load_player_data(&tracked).await;
            }
        }
    }

    /// Run the fallback timer and the store subscription until the returned
    /// handle is stopped or dropped.
    pub fn start_real_time_updates(self: &Arc<Self>, player: Option<Address>) -> RefreshHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let mut store_events = Some(self.store.subscribe());

        let task = tokio::spawn(async move {
            let mut ticker = interval(this.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => this.refresh(player).await,
                    event = next_event(&mut store_events) => match event {
                        Ok(event) => {
                            tracing::debug!("Store event: {:?}", event);
                            this.handle_store_event(event, player).await;
                        }
                        Err(RecvError::Lagged(missed)) => {
                            tracing::warn!("Missed {} store events, doing a full refresh", missed);
                            this.reads.cache().clear();
                            this.refresh(player).await;
                        }
                        Err(RecvError::Closed) => {
                            tracing::warn!("Store notifications closed, relying on periodic refresh");
                            store_events = None;
                        }
                    },
                }
            }
            tracing::debug!("Real-time updates stopped");
        });

        RefreshHandle { shutdown, task }
    }

    fn emit_milestones(&self, previous: U256, current: U256) {
        for threshold in &self.milestones {
            if previous < *threshold && *threshold <= current {
                tracing::info!("Pot crossed milestone {}", threshold);
                // Nobody listening is fine.
                let _ = self.events.send(GameEvent::MilestoneCrossed {
                    threshold: *threshold,
                    pot: current,
                });
            }
        }
    }

    async fn pace(&self, key: &ReadKey, issued: &mut usize) {
        if self.reads.is_warm(key) {
            return;
        }
        if *issued > 0 && !self.inter_call_delay.is_zero() {
            tokio::time::sleep(self.inter_call_delay).await;
        }
        *issued += 1;
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<StoreEvent>>,
) -> Result<StoreEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn or_previous<T>(
    result: potshot_core::Result<T>,
    previous: T,
    field: &'static str,
    degraded: &mut Vec<&'static str>,
) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Falling back to last known {}: {}", field, e);
            degraded.push(field);
            previous
        }
    }
}
