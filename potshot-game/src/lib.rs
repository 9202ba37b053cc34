//! Commit-reveal wager engine for Potshot
//!
//! Drives a single-player jackpot wager through commit, the reveal window
//! and settlement against a ledger contract, keeps a merged view of ledger
//! and store state for observers, and resumes unfinished wagers after a
//! restart from the locally sealed secret.

pub mod commitment;
pub mod error;
pub mod machine;
pub mod reads;
pub mod reconcile;
pub mod recovery;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use commitment::{RevealWindow, WindowPosition};
pub use error::{Result, WagerError};
pub use machine::{CommitRequest, RecoveryOutcome, WagerMachine, WagerState};
pub use reads::{CachedLedger, LedgerCache, ReadKey};
pub use reconcile::{GameEvent, GameView, PlayerView, Reconciler, RefreshHandle};
pub use recovery::{SessionRecovery, StartupReport};
pub use session::GameSession;
