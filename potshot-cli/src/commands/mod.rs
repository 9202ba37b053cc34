pub mod game;
pub mod wager;

use clap::Subcommand;
use potshot_game::{GameSession, RecoveryOutcome, Result, StartupReport};
use potshot_core::types::{address_hex, format_ether, h256_hex};
use std::path::Path;

#[derive(Subcommand)]
pub enum Commands {
    /// Show the pot, prices, sponsor and recent winners
    Status,
    /// Show the connected player's stats and pending wager
    Player,
    /// Place a wager
    Commit {
        /// Referral discount to apply
        #[arg(long, conflicts_with = "bonus")]
        discount: Option<String>,
        /// Spend a bonus credit instead of paying
        #[arg(long)]
        bonus: bool,
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Reveal the pending wager
    Reveal,
    /// Resume a wager left behind by an earlier run
    Recover,
    /// Clear an expired wager so a new one can be placed
    Cleanup,
    /// Change the active wager context and remember it in config.json
    Switch {
        /// Context name from config.json
        context: String,
    },
    /// Follow live updates until interrupted
    Watch,
}

pub async fn handle_command(cmd: Commands, session: &GameSession, data_dir: &Path) -> Result<()> {
    match cmd {
        Commands::Status => game::show_status(session).await,
        Commands::Player => game::show_player(session).await,
        Commands::Commit {
            discount,
            bonus,
            yes,
        } => wager::commit(session, discount, bonus, yes).await,
        Commands::Reveal => wager::reveal(session).await,
        // Recovery already ran when the player connected.
        Commands::Recover => wager::require_player(session),
        Commands::Cleanup => wager::cleanup(session).await,
        Commands::Switch { context } => game::switch(session, &context, data_dir).await,
        Commands::Watch => game::watch(session).await,
    }
}

pub fn print_startup_report(report: &StartupReport) {
    match &report.outcome {
        RecoveryOutcome::NothingPending => {}
        RecoveryOutcome::ForeignContract { contract } => {
            println!(
                "A pending wager exists on contract {}; switch to its context to resume it.",
                address_hex(contract)
            );
        }
        RecoveryOutcome::Waiting {
            commitment,
            blocks_remaining,
        } => {
            println!(
                "Pending wager of {} committed at block {}: reveal opens in {} block(s).",
                format_ether(commitment.amount_wagered),
                commitment.commit_block,
                blocks_remaining
            );
        }
        RecoveryOutcome::Revealed(outcome) => {
            println!("Revealed the wager left from a previous session.");
            wager::print_outcome(outcome);
        }
        RecoveryOutcome::AlreadySettled(outcome) => {
            println!("The wager from a previous session was already settled.");
            wager::print_outcome(outcome);
        }
        RecoveryOutcome::ExpiredNeedsCleanup(tombstone) => {
            println!(
                "The wager committed at block {} expired unrevealed. Run 'potshot cleanup' to clear it.",
                tombstone.commit_block
            );
        }
        RecoveryOutcome::Unconfirmed(submitted) => {
            println!(
                "The wager sent in tx {} is not confirmed yet. Run 'potshot recover' again later.",
                h256_hex(&submitted.tx_hash)
            );
        }
    }

    if !report.other_players.is_empty() {
        println!(
            "{} pending wager(s) stored for other players were left untouched.",
            report.other_players.len()
        );
    }
}
