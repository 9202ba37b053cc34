use crate::config;
use comfy_table::{presets::UTF8_FULL, Table};
use potshot_core::types::{address_hex, format_ether, h256_hex};
use potshot_core::{CoreError, WagerStatus};
use potshot_game::{GameEvent, GameSession, GameView, Result, WagerError};
use std::path::Path;
use tokio::sync::broadcast::error::RecvError;

pub async fn show_status(session: &GameSession) -> Result<()> {
    let view = session.refresh().await;
    print_game(&view);
    Ok(())
}

pub async fn show_player(session: &GameSession) -> Result<()> {
    if session.player().is_none() {
        return Err(WagerError::WalletNotConnected);
    }
    let view = session.refresh().await;
    let Some(player) = view.player else {
        println!("No player data available.");
        return Ok(());
    };

    println!("Player: {}", address_hex(&player.address));
    println!("  Shots: {}", player.stats.total_shots);
    println!("  Spent: {} ETH", format_ether(player.stats.total_spent));
    println!("  Won: {} ETH", format_ether(player.stats.total_won));
    if let Some(rank) = player.rank {
        println!("  Rank: #{}", rank);
    }
    println!("  Referral discounts: {}", player.referral_discounts);
    println!("  Bonus credits: {}", player.bonus_credits);
    if player.can_wager {
        println!("  Can wager: yes");
    } else {
        println!(
            "  Can wager: no ({} second(s) of cooldown left)",
            player.cooldown_remaining
        );
    }

    match player.pending_commitment {
        Some(pending) => {
            println!();
            println!("Pending wager ({}):", session.wager_state().name());
            println!("  Amount: {} ETH", format_ether(pending.amount_wagered));
            if pending.status == WagerStatus::Submitted {
                println!("  Awaiting confirmation of tx {}", h256_hex(&pending.tx_hash));
            } else {
                println!("  Committed at block: {}", pending.commit_block);
            }
        }
        None => println!("  No pending wager"),
    }
    Ok(())
}

pub async fn switch(session: &GameSession, context: &str, data_dir: &Path) -> Result<()> {
    session.switch_active_context(context).await?;
    config::save_active_context(data_dir, &session.active_context()).await?;
    println!("Active wager context is now '{}'", session.active_context());
    Ok(())
}

pub async fn watch(session: &GameSession) -> Result<()> {
    let mut views = session.subscribe_view();
    let mut events = session.events();
    session.start_real_time_updates().await;
    println!("Watching '{}' (Ctrl-C to stop)...", session.active_context());

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(CoreError::from)?;
                break;
            }
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                print_summary(&view);
            }
            event = events.recv() => match event {
                Ok(GameEvent::MilestoneCrossed { threshold, pot }) => {
                    println!(
                        "Milestone! The pot passed {} ETH and now holds {} ETH",
                        format_ether(threshold),
                        format_ether(pot)
                    );
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.stop_real_time_updates().await;
    Ok(())
}

fn print_summary(view: &GameView) {
    let mut line = format!("[{}] pot {} ETH", view.context, format_ether(view.pot));
    if let Some(player) = &view.player {
        line.push_str(&format!(", {} shot(s)", player.stats.total_shots));
    }
    if !view.degraded.is_empty() {
        line.push_str(&format!(" (stale: {})", view.degraded.join(", ")));
    }
    println!("{}", line);
}

fn print_game(view: &GameView) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec!["Context".to_string(), view.context.clone()]);
    table.add_row(vec!["Pot".to_string(), format!("{} ETH", format_ether(view.pot))]);
    table.add_row(vec![
        "Wager cost".to_string(),
        format!("{} ETH", format_ether(view.wager_cost)),
    ]);
    table.add_row(vec![
        "Sponsor cost".to_string(),
        format!("{} ETH", format_ether(view.sponsor_cost)),
    ]);
    let sponsor = match &view.sponsor {
        Some(s) if s.active => s.name.clone().unwrap_or_else(|| address_hex(&s.sponsor)),
        _ => "none".to_string(),
    };
    table.add_row(vec!["Sponsor".to_string(), sponsor]);
    println!("{}", table);

    if !view.degraded.is_empty() {
        println!("Some values could not be refreshed: {}", view.degraded.join(", "));
    }

    if view.recent_winners.is_empty() {
        println!("No winners yet.");
    } else {
        let mut winners = Table::new();
        winners.load_preset(UTF8_FULL);
        winners.set_header(vec!["Winner", "Amount", "When"]);
        for winner in &view.recent_winners {
            winners.add_row(vec![
                address_hex(&winner.address),
                format!("{} ETH", format_ether(winner.amount)),
                winner.won_at.format("%Y-%m-%d %H:%M").to_string(),
            ]);
        }
        println!("{}", winners);
    }

    if !view.leaderboard.is_empty() {
        let mut leaders = Table::new();
        leaders.load_preset(UTF8_FULL);
        leaders.set_header(vec!["#", "Player", "Won", "Shots"]);
        for (i, record) in view.leaderboard.iter().enumerate() {
            leaders.add_row(vec![
                (i + 1).to_string(),
                address_hex(&record.address),
                format!("{} ETH", format_ether(record.total_won)),
                record.total_shots.to_string(),
            ]);
        }
        println!("{}", leaders);
    }
}
