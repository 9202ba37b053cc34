//! Cached, retried ledger reads shared by the wager machine and the
//! reconciler.

use potshot_core::retry::{self, RetryPolicy};
use potshot_core::{
    Address, BlockNumber, Ledger, PlayerStats, ReadCache, Result, SponsorInfo, Winner, U256,
};
use std::future::Future;
use std::sync::Arc;

/// Logical ledger field held in the read cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReadKey {
    ContractBalance,
    HouseFunds,
    WagerCost,
    SponsorCost,
    CurrentSponsor,
    RecentWinners,
    RevealDelay,
    MaxRevealDelay,
    PlayerStats(Address),
    Cooldown(Address),
    CanWager(Address),
}

impl ReadKey {
    /// Fields fetched by a full game-state load, in fetch order.
    pub const GAME_STATE: [ReadKey; 6] = [
        ReadKey::ContractBalance,
        ReadKey::HouseFunds,
        ReadKey::WagerCost,
        ReadKey::SponsorCost,
        ReadKey::CurrentSponsor,
        ReadKey::RecentWinners,
    ];

    pub fn player(player: Address) -> [ReadKey; 3] {
        [
            ReadKey::PlayerStats(player),
            ReadKey::Cooldown(player),
            ReadKey::CanWager(player),
        ]
    }

    /// Everything a settled wager can change.
    pub fn settlement(player: Address) -> Vec<ReadKey> {
        let mut keys = vec![ReadKey::ContractBalance, ReadKey::RecentWinners];
        keys.extend(ReadKey::player(player));
        keys
    }
}

#[derive(Debug, Clone)]
pub enum LedgerRead {
    Amount(U256),
    Count(u64),
    Flag(bool),
    Sponsor(Option<SponsorInfo>),
    Winners(Vec<Winner>),
    Stats(PlayerStats),
}

impl LedgerRead {
    fn into_amount(self) -> Option<U256> {
        match self {
            LedgerRead::Amount(v) => Some(v),
            _ => None,
        }
    }

    fn into_count(self) -> Option<u64> {
        match self {
            LedgerRead::Count(v) => Some(v),
            _ => None,
        }
    }

    fn into_flag(self) -> Option<bool> {
        match self {
            LedgerRead::Flag(v) => Some(v),
            _ => None,
        }
    }

    fn into_sponsor(self) -> Option<Option<SponsorInfo>> {
        match self {
            LedgerRead::Sponsor(v) => Some(v),
            _ => None,
        }
    }

    fn into_winners(self) -> Option<Vec<Winner>> {
        match self {
            LedgerRead::Winners(v) => Some(v),
            _ => None,
        }
    }

    fn into_stats(self) -> Option<PlayerStats> {
        match self {
            LedgerRead::Stats(v) => Some(v),
            _ => None,
        }
    }
}

pub type LedgerCache = ReadCache<ReadKey, LedgerRead>;

/// A ledger whose idempotent reads go through the TTL cache and the retry
/// executor. Submissions are not exposed here.
pub struct CachedLedger {
    ledger: Arc<dyn Ledger>,
    cache: Arc<LedgerCache>,
    policy: RetryPolicy,
}

impl CachedLedger {
    pub fn new(ledger: Arc<dyn Ledger>, cache: Arc<LedgerCache>, policy: RetryPolicy) -> Self {
        Self {
            ledger,
            cache,
            policy,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn cache(&self) -> &LedgerCache {
        &self.cache
    }

    pub fn is_warm(&self, key: &ReadKey) -> bool {
        self.cache.get(key).is_some()
    }

    pub fn invalidate(&self, keys: &[ReadKey]) {
        self.cache.invalidate_many(keys);
    }

    async fn read<T, F, Fut>(
        &self,
        key: ReadKey,
        fetch: F,
        pack: fn(T) -> LedgerRead,
        unpack: fn(LedgerRead) -> Option<T>,
    ) -> Result<T>
    where
        T: Clone,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.cache.get(&key).and_then(unpack) {
            return Ok(value);
        }
        let value = retry::execute(self.policy, fetch).await?;
        self.cache.set(key, pack(value.clone()));
        Ok(value)
    }

    /// Always fresh; block height is never cached.
    pub async fn block_number(&self) -> Result<BlockNumber> {
        retry::execute(self.policy, || self.ledger.block_number()).await
    }

    pub async fn is_deployed(&self) -> Result<bool> {
        retry::execute(self.policy, || self.ledger.is_deployed()).await
    }

    pub async fn contract_balance(&self) -> Result<U256> {
        self.read(
            ReadKey::ContractBalance,
            || self.ledger.contract_balance(),
            LedgerRead::Amount,
            LedgerRead::into_amount,
        )
        .await
    }

    pub async fn house_funds(&self) -> Result<U256> {
        self.read(
            ReadKey::HouseFunds,
            || self.ledger.house_funds(),
            LedgerRead::Amount,
            LedgerRead::into_amount,
        )
        .await
    }

    pub async fn wager_cost(&self) -> Result<U256> {
        self.read(
            ReadKey::WagerCost,
            || self.ledger.wager_cost(),
            LedgerRead::Amount,
            LedgerRead::into_amount,
        )
        .await
    }

    pub async fn sponsor_cost(&self) -> Result<U256> {
        self.read(
            ReadKey::SponsorCost,
            || self.ledger.sponsor_cost(),
            LedgerRead::Amount,
            LedgerRead::into_amount,
        )
        .await
    }

    pub async fn current_sponsor(&self) -> Result<Option<SponsorInfo>> {
        self.read(
            ReadKey::CurrentSponsor,
            || self.ledger.current_sponsor(),
            LedgerRead::Sponsor,
            LedgerRead::into_sponsor,
        )
        .await
    }

    pub async fn recent_winners(&self) -> Result<Vec<Winner>> {
        self.read(
            ReadKey::RecentWinners,
            || self.ledger.recent_winners(),
            LedgerRead::Winners,
            LedgerRead::into_winners,
        )
        .await
    }

    pub async fn reveal_delay(&self) -> Result<u64> {
        self.read(
            ReadKey::RevealDelay,
            || self.ledger.reveal_delay(),
            LedgerRead::Count,
            LedgerRead::into_count,
        )
        .await
    }

    pub async fn max_reveal_delay(&self) -> Result<u64> {
        self.read(
            ReadKey::MaxRevealDelay,
            || self.ledger.max_reveal_delay(),
            LedgerRead::Count,
            LedgerRead::into_count,
        )
        .await
    }

    pub async fn player_stats(&self, player: &Address) -> Result<PlayerStats> {
        self.read(
            ReadKey::PlayerStats(*player),
            || self.ledger.player_stats(player),
            LedgerRead::Stats,
            LedgerRead::into_stats,
        )
        .await
    }

    pub async fn cooldown_remaining(&self, player: &Address) -> Result<u64> {
        self.read(
            ReadKey::Cooldown(*player),
            || self.ledger.cooldown_remaining(player),
            LedgerRead::Count,
            LedgerRead::into_count,
        )
        .await
    }

    pub async fn can_wager(&self, player: &Address) -> Result<bool> {
        self.read(
            ReadKey::CanWager(*player),
            || self.ledger.can_wager(player),
            LedgerRead::Flag,
            LedgerRead::into_flag,
        )
        .await
    }
}
