use potshot_core::types::{format_ether, h256_hex};
use potshot_core::{CoreError, WagerOutcome};
use potshot_game::{CommitRequest, GameSession, Result, WagerError};
use dialoguer::Confirm;

pub fn require_player(session: &GameSession) -> Result<()> {
    session
        .player()
        .map(|_| ())
        .ok_or(WagerError::WalletNotConnected)
}

pub async fn commit(
    session: &GameSession,
    discount: Option<String>,
    bonus: bool,
    yes: bool,
) -> Result<()> {
    require_player(session)?;
    let view = session.refresh().await;

    let price = if bonus {
        "a bonus credit".to_string()
    } else if discount.is_some() {
        format!("{} ETH before discount", format_ether(view.wager_cost))
    } else {
        format!("{} ETH", format_ether(view.wager_cost))
    };

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Take a shot at the {} ETH pot for {}?",
                format_ether(view.pot),
                price
            ))
            .default(false)
            .interact()
            .map_err(|e| CoreError::internal(e.to_string()))?;
        if !confirmed {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let request = match (discount, bonus) {
        (_, true) => CommitRequest::with_bonus_credit(),
        (Some(id), false) => CommitRequest::with_discount(id),
        (None, false) => CommitRequest::full_price(),
    };

    println!("Submitting commitment...");
    let pending = session.commit(request).await?;

    println!("Wager placed!");
    println!("  Amount: {} ETH", format_ether(pending.amount_wagered));
    if pending.discount_percent > 0 {
        println!("  Discount: {}%", pending.discount_percent);
    }
    println!("  Commitment: {}", h256_hex(&pending.commitment_hash));
    println!("  Transaction: {}", h256_hex(&pending.tx_hash));
    println!("  Block: {}", pending.commit_block);
    println!();
    println!("Run 'potshot reveal' once the reveal window opens.");
    Ok(())
}

pub async fn reveal(session: &GameSession) -> Result<()> {
    println!("Revealing...");
    let outcome = session.reveal().await?;
    print_outcome(&outcome);
    Ok(())
}

pub async fn cleanup(session: &GameSession) -> Result<()> {
    session.cleanup_expired().await?;
    println!("Expired wager cleared. You can place a new one.");
    Ok(())
}

pub fn print_outcome(outcome: &WagerOutcome) {
    if outcome.won {
        println!("You won {} ETH!", format_ether(outcome.payout));
    } else {
        println!("No luck this time.");
    }
    println!("  Wagered: {} ETH", format_ether(outcome.amount_wagered));
    println!("  Reveal tx: {}", h256_hex(&outcome.reveal_tx));
}
