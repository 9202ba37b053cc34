mod commands;
mod config;

use clap::Parser;
use potshot_core::types::parse_address;
use potshot_core::{
    CommitmentVault, CoreError, GameStore, JsonRpcLedger, Ledger, RestGameStore,
    SqliteCommitmentVault, Storage,
};
use potshot_game::{GameSession, WagerError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PASSPHRASE_ENV: &str = "POTSHOT_VAULT_PASSPHRASE";

#[derive(Parser)]
#[command(name = "potshot")]
#[command(about = "Potshot - commit-reveal jackpot client")]
#[command(version)]
struct Cli {
    /// Data directory for config and pending wagers
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Player address (0x-prefixed)
    #[arg(short, long, global = true)]
    player: Option<String>,

    /// Wager context to use instead of the configured one
    #[arg(short, long, global = true)]
    context: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "potshot={},potshot_core={},potshot_game={}",
            log_level, log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let data_dir = cli.data_dir.unwrap_or_else(config::default_data_dir);
    tokio::fs::create_dir_all(&data_dir).await?;
    tracing::debug!("Data directory: {}", data_dir.display());

    let mut game_config = config::load_or_init(&data_dir).await?;
    if let Some(context) = cli.context {
        game_config.active_context = context;
    }

    let passphrase = match std::env::var(PASSPHRASE_ENV) {
        Ok(passphrase) => passphrase,
        Err(_) => dialoguer::Password::new()
            .with_prompt("Vault passphrase")
            .interact()?,
    };

    let storage = Arc::new(Storage::open(&data_dir.join("potshot.db")).await?);
    let vault: Arc<dyn CommitmentVault> = Arc::new(SqliteCommitmentVault::new(storage, passphrase));
    let store: Arc<dyn GameStore> = Arc::new(RestGameStore::from_config(&game_config)?);

    let mut ledgers: HashMap<String, Arc<dyn Ledger>> = HashMap::new();
    for context in &game_config.contexts {
        let ledger = JsonRpcLedger::from_config(&game_config, context.contract_address)?;
        ledgers.insert(context.name.clone(), Arc::new(ledger));
    }

    let session = GameSession::new(game_config, ledgers, store, vault)?;

    let result: potshot_game::Result<()> = async {
        if let Some(player) = &cli.player {
            let player = parse_address(player)?;
            let report = session.connect(player).await?;
            commands::print_startup_report(&report);
        }
        commands::handle_command(cli.command, &session, &data_dir).await
    }
    .await;

    if let Err(e) = result {
        match &e {
            WagerError::WalletNotConnected => {
                eprintln!("Error: {}", e.user_message());
                eprintln!("Pass --player <address> to choose the player");
            }
            WagerError::Core(CoreError::Config(msg)) => {
                eprintln!("Error: Invalid configuration: {}", msg);
            }
            WagerError::DurableWriteFailed { .. } | WagerError::CommitUnconfirmed { .. } => {
                eprintln!("Error: {}", e.user_message());
                eprintln!("Details: {}", e);
            }
            _ if e.is_cancelled() => {
                eprintln!("Cancelled.");
            }
            _ => {
                eprintln!("Error: {}", e.user_message());
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
