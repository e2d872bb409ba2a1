//! Telegram alerts.
//!
//! `notify` only pushes the event onto an unbounded channel; a background
//! task formats HTML messages and posts them to the Bot API. Delivery
//! failures are logged and dropped. State transitions and discarded
//! triggers are log-only and never sent.
//!
//! API docs: https://core.telegram.org/bots/api#sendmessage

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{BotEvent, Notifier};
use crate::types::{TradeOutcome, TradeResult, TradeState};

const API_URL: &str = "https://api.telegram.org";
const SOLSCAN_TX: &str = "https://solscan.io/tx";

/// Pools listed in the startup message.
const STARTUP_POOL_LIMIT: usize = 5;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

pub struct TelegramNotifier {
    tx: mpsc::UnboundedSender<BotEvent>,
}

impl TelegramNotifier {
    /// Build the HTTP client and start the delivery task.
    /// Must be called inside a tokio runtime.
    pub fn spawn(token: SecretString, chat_id: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client for Telegram")?;

        let (tx, mut rx) = mpsc::unbounded_channel::<BotEvent>();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(text) = format_message(&event) else {
                    continue;
                };
                if let Err(e) = send(&http, &token, &chat_id, &text).await {
                    warn!(error = %e, "Telegram delivery failed");
                }
            }
            debug!("Telegram delivery task finished");
        });

        Ok(Self { tx })
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, event: BotEvent) {
        if self.tx.send(event).is_err() {
            warn!("Telegram delivery task is gone, event dropped");
        }
    }
}

async fn send(http: &Client, token: &SecretString, chat_id: &str, text: &str) -> Result<()> {
    let url = format!("{API_URL}/bot{}/sendMessage", token.expose_secret());
    let body = SendMessage {
        chat_id,
        text,
        parse_mode: "HTML",
        disable_web_page_preview: true,
    };

    let resp = http
        .post(&url)
        .json(&body)
        .send()
        .await
        .context("Telegram request failed")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Telegram API error {status}: {body}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Minimal HTML escaping for text inserted into messages.
fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn tx_link(tx_id: &str) -> String {
    format!("<a href='{SOLSCAN_TX}/{tx_id}'>View transaction</a>")
}

fn elapsed(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    format!("{}m {:02}s", total / 60, total % 60)
}

/// Render an event as a Telegram HTML message. `None` for log-only events.
pub fn format_message(event: &BotEvent) -> Option<String> {
    let now = Utc::now().format("%d/%m/%Y %H:%M:%S");

    let text = match event {
        BotEvent::Started {
            pools,
            price_drop_percentage,
            max_price_drop_percentage,
            profit_target_percentage,
            trade_amount,
            slippage,
            dry_run,
        } => {
            let mut msg = format!(
                "🚀 <b>DIP BOT STARTED</b> 🚀\n\n\
                 • <b>Time:</b> {now}\n\
                 • <b>Pools monitored:</b> {}\n\
                 • <b>Mode:</b> {}\n\n\
                 ⚙️ <b>TRADING SETTINGS</b>\n\
                 • <b>Min drop:</b> {price_drop_percentage:.2}%\n\
                 • <b>Max drop:</b> {max_price_drop_percentage:.2}%\n\
                 • <b>Profit target:</b> {profit_target_percentage:.2}%\n\
                 • <b>Per trade:</b> {trade_amount:.4} SOL\n\
                 • <b>Slippage:</b> {slippage:.2}%",
                pools.len(),
                if *dry_run { "paper" } else { "live" },
            );
            if !pools.is_empty() {
                msg.push_str(&format!("\n\n💦 <b>POOLS (first {})</b>", pools.len().min(STARTUP_POOL_LIMIT)));
                for (i, pool) in pools.iter().take(STARTUP_POOL_LIMIT).enumerate() {
                    msg.push_str(&format!(
                        "\n{}. {} (min reserve {:.2} SOL)",
                        i + 1,
                        escape(&pool.name),
                        pool.min_sol_reserve
                    ));
                }
            }
            msg
        }
        BotEvent::TriggerAdmitted { trigger, .. } => format!(
            "⚠️ <b>PRICE DROP DETECTED</b> ⚠️\n\n\
             • <b>Token:</b> {}\n\
             • <b>Drop:</b> 📉 {:.2}%\n\
             • <b>Price:</b> {:.10} SOL\n\
             • <b>Baseline:</b> {:.10} SOL\n\
             • <b>SOL reserve:</b> {:.2} SOL\n\n\
             🚀 <i>Preparing buy...</i>",
            escape(&trigger.pool.name),
            trigger.drop_percentage,
            trigger.price,
            trigger.baseline,
            trigger.quote_reserve,
        ),
        BotEvent::BuyConfirmed { pool, sol_spent, tokens, entry_price, tx_id, .. } => format!(
            "🟢 <b>BUY EXECUTED</b>\n\n\
             • <b>Pool:</b> {}\n\
             • <b>Spent:</b> {sol_spent} SOL\n\
             • <b>Received:</b> {tokens} {}\n\
             • <b>Entry price:</b> {entry_price:.10} SOL\n\n\
             🔍 {}",
            escape(&pool.name),
            escape(pool.token_symbol()),
            tx_link(tx_id),
        ),
        BotEvent::SellConfirmed { pool, tokens, sol_received, exit_price, reason, tx_id, .. } => format!(
            "🔴 <b>SELL EXECUTED</b>\n\n\
             • <b>Pool:</b> {}\n\
             • <b>Sold:</b> {tokens} {}\n\
             • <b>Received:</b> {sol_received} SOL\n\
             • <b>Exit price:</b> {exit_price:.10} SOL\n\
             • <b>Reason:</b> {reason}\n\n\
             🔍 {}",
            escape(&pool.name),
            escape(pool.token_symbol()),
            tx_link(tx_id),
        ),
        BotEvent::TradeFinished(result) => match result.outcome {
            TradeOutcome::Completed => format_result(result),
            TradeOutcome::Failed => format_failure(result),
        },
        BotEvent::PoolExcluded { pool, reason } => format!(
            "📡 <b>POOL EXCLUDED</b>\n\n\
             • <b>Pool:</b> {}\n\
             • <b>Reason:</b> {}\n\
             • <b>Time:</b> {now}",
            escape(&pool.name),
            escape(reason),
        ),
        BotEvent::PositionAbandoned { cycle_id, pool, state } => format!(
            "🚨 <b>POSITION ABANDONED</b>\n\n\
             • <b>Pool:</b> {}\n\
             • <b>State:</b> {state}\n\
             • <b>Cycle:</b> {cycle_id}\n\n\
             ⚠️ <i>Check the wallet and close the position manually</i>",
            escape(&pool.name),
        ),
        BotEvent::DailySummary(stats) => format!(
            "📅 <b>DAILY SUMMARY - {}</b>\n\n\
             • <b>Trades:</b> {}\n\
             • <b>Wins:</b> {}\n\
             • <b>Losses:</b> {}\n\
             • <b>Failed:</b> {}\n\
             • <b>P/L:</b> {:.6} SOL",
            stats.date.format("%d/%m/%Y"),
            stats.trades,
            stats.wins,
            stats.losses,
            stats.failed,
            stats.pnl_sol,
        ),
        BotEvent::Stopped { reason, .. } => format!(
            "🛑 <b>DIP BOT STOPPED</b> 🛑\n\n\
             • <b>Time:</b> {now}\n\
             • <b>Reason:</b> {}",
            escape(reason),
        ),
        BotEvent::StateChanged { .. } | BotEvent::TriggerDiscarded { .. } => return None,
    };

    Some(text)
}

fn format_result(result: &TradeResult) -> String {
    let (emoji, label) = if result.is_win() {
        ("💰", "PROFIT")
    } else {
        ("📉", "LOSS")
    };
    let reason = result
        .exit_reason
        .map(|r| r.to_string())
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{emoji} <b>{label} REALISED</b> {emoji}\n\n\
         • <b>Pool:</b> {}\n\
         • <b>P/L:</b> {:.6} SOL ({:+.2}%)\n\
         • <b>Entry:</b> {:.10} SOL\n\
         • <b>Exit:</b> {:.10} SOL\n\
         • <b>Exit reason:</b> {reason}\n\
         • <b>Duration:</b> {}",
        escape(&result.pool.name),
        result.pnl_sol,
        result.pnl_percentage,
        result.entry_price.unwrap_or_default(),
        result.exit_price.unwrap_or_default(),
        elapsed(result.elapsed_secs()),
    )
}

fn format_failure(result: &TradeResult) -> String {
    let mut msg = format!(
        "💸 <b>TRADE FAILED</b>\n\n\
         • <b>Pool:</b> {}\n\
         • <b>Failed in:</b> {}\n\
         • <b>Error:</b> {}",
        escape(&result.pool.name),
        result.final_state,
        escape(result.failure_reason.as_deref().unwrap_or("unknown")),
    );

    let fixes = suggestions(result);
    if !fixes.is_empty() {
        msg.push_str("\n\n<b>🔧 POSSIBLE FIXES:</b>");
        for (i, s) in fixes.iter().enumerate() {
            msg.push_str(&format!("\n{}. {s}", i + 1));
        }
    }
    msg
}

fn suggestions(result: &TradeResult) -> Vec<&'static str> {
    let mut out = Vec::new();
    if result.needs_reconciliation {
        out.push("Check the wallet: the buy may have landed without confirmation");
    }
    if result.position_held {
        out.push("Tokens are still held: sell them manually");
    }
    match result.final_state {
        TradeState::Buying => {
            out.push("Check the SOL balance covers trade amount and fees");
            out.push("Consider a higher slippage or priority fee");
        }
        TradeState::Selling => out.push("Consider a higher sell priority fee"),
        _ => {}
    }
    out
}
