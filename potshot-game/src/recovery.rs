use crate::error::Result;
use crate::machine::{RecoveryOutcome, WagerMachine};
use potshot_core::types::address_hex;
use potshot_core::{Address, CommitmentVault};
use std::sync::Arc;

/// Startup hook that resumes the connecting player's unfinished wager.
pub struct SessionRecovery {
    vault: Arc<dyn CommitmentVault>,
}

#[derive(Debug, Clone)]
pub struct StartupReport {
    pub outcome: RecoveryOutcome,
    /// Stored commitments belonging to other players. Left in place.
    pub other_players: Vec<Address>,
}

impl SessionRecovery {
    pub fn new(vault: Arc<dyn CommitmentVault>) -> Self {
        Self { vault }
    }

    pub async fn on_startup(
        &self,
        player: &Address,
        machine: &WagerMachine,
    ) -> Result<StartupReport> {
        let other_players: Vec<Address> = self
            .vault
            .players()
            .await?
            .into_iter()
            .filter(|p| p != player)
            .collect();

        for other in &other_players {
            tracing::info!(
                "Ignoring stored commitment for other player {}",
                address_hex(other)
            );
        }

        let outcome = machine.recover_pending_commitment(player).await?;
        tracing::info!("Recovery for {}: {}", address_hex(player), outcome_name(&outcome));

        Ok(StartupReport {
            outcome,
            other_players,
        })
    }
}

fn outcome_name(outcome: &RecoveryOutcome) -> &'static str {
    match outcome {
        RecoveryOutcome::NothingPending => "nothing pending",
        RecoveryOutcome::ForeignContract { .. } => "other context",
        RecoveryOutcome::Waiting { .. } => "waiting for reveal window",
        RecoveryOutcome::Revealed(_) => "revealed",
        RecoveryOutcome::AlreadySettled(_) => "already settled",
        RecoveryOutcome::ExpiredNeedsCleanup(_) => "expired",
        RecoveryOutcome::Unconfirmed(_) => "awaiting commit receipt",
    }
}
