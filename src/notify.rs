// =============================================================================
// Telegram Notifier — fire-and-forget agent notifications
// =============================================================================
//
// A single `send_message` primitive with trade/status/alert helpers layered on
// top. Sends never block a caller's control flow: failures are logged and
// swallowed, and the request timeout is short. Missing credentials silence
// the notifier entirely.
// =============================================================================

use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use crate::indicators::SignalBundle;
use crate::types::{Bias, Direction, ExitReason, Regime};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Telegram Bot API notifier (HTML parse mode).
#[derive(Clone)]
pub struct Notifier {
    bot_token: Option<String>,
    chat_id: Option<String>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(bot_token: Option<String>, chat_id: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .expect("failed to build notifier http client");

        if bot_token.is_none() || chat_id.is_none() {
            debug!("notifier credentials missing — notifications disabled");
        }

        Self {
            bot_token,
            chat_id,
            client,
        }
    }

    /// Disabled notifier for tests and dry runs.
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// Send a raw HTML message. Fire-and-forget: failures are logged, never
    /// propagated.
    pub async fn send_message(&self, text: &str) {
        let (Some(token), Some(chat_id)) = (&self.bot_token, &self.chat_id) else {
            return;
        };

        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        match self.client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!(status = %resp.status(), "telegram send rejected"),
            Err(e) => warn!(error = %e, "telegram send failed"),
        }
    }

    // -------------------------------------------------------------------------
    // Trading helpers
    // -------------------------------------------------------------------------

    /// Notify a new entry, listing the signals that fired.
    pub async fn trade_opened(
        &self,
        asset: &str,
        direction: Direction,
        size: f64,
        entry_price: f64,
        leverage: u32,
        score: i32,
        signals: Option<&SignalBundle>,
        ai_bias: Bias,
    ) {
        let arrow = match direction {
            Direction::Long => "\u{1f7e2}",
            Direction::Short => "\u{1f534}",
        };

        let mut sig_lines = Vec::new();
        if let Some(s) = signals {
            for (active, label) in [
                (s.below_lower_bb, "BB Low"),
                (s.above_upper_bb, "BB High"),
                (s.rsi_oversold, "RSI Oversold"),
                (s.rsi_overbought, "RSI Overbought"),
                (s.trending, "Trend ADX"),
                (s.momentum_bullish, "Momentum \u{2191}"),
                (s.momentum_bearish, "Momentum \u{2193}"),
            ] {
                if active {
                    sig_lines.push(format!("  \u{2705} {label}"));
                }
            }
            if s.volume_confirmed {
                sig_lines.push("  \u{1f4a5} Volume OK".to_string());
            }
        }
        if ai_bias != Bias::Neutral {
            sig_lines.push(format!("  \u{1f916} AI: {ai_bias}"));
        }
        let sig_str = if sig_lines.is_empty() {
            "  \u{2014}".to_string()
        } else {
            sig_lines.join("\n")
        };

        let text = format!(
            "{arrow} <b>NEW {direction} {asset}</b>\n\n\
             \u{1f4b2} Entry: <b>${entry_price:.4}</b>\n\
             \u{2696} Leverage: {leverage}x\n\
             \u{1f4e6} Size: {size}\n\
             \u{1f3af} Score: {score}/8\n\n\
             \u{1f9e0} <b>Signals:</b>\n{sig_str}"
        );
        self.send_message(&text).await;
    }

    /// Notify a close with win/loss framing and a reason label.
    pub async fn trade_closed(
        &self,
        asset: &str,
        direction: Direction,
        entry_price: f64,
        exit_price: f64,
        pnl: f64,
        pnl_pct: f64,
        reason: ExitReason,
    ) {
        let header = if pnl >= 0.0 {
            "\u{1f389} <b>WIN</b>"
        } else {
            "\u{1f614} <b>LOSS</b>"
        };
        let sign = if pnl >= 0.0 { "+" } else { "" };

        let reason_text = match reason {
            ExitReason::TrailingStop => {
                "\u{1f6e1} Trailing stop kicked in \u{2014} profit secured after retracement"
            }
            ExitReason::TakeProfit => "\u{1f3c6} Target reached \u{2014} take profit hit",
            ExitReason::StopLoss => "\u{1f6d1} Stop loss triggered \u{2014} risk contained",
            ExitReason::Unknown => "\u{1f504} closed",
        };

        let move_pct = if entry_price > 0.0 {
            (exit_price - entry_price) / entry_price * 100.0
        } else {
            0.0
        };

        let text = format!(
            "{header} \u{2014} CLOSE {direction} {asset}\n\n\
             \u{1f4cd} Entry: ${entry_price:.4}\n\
             \u{1f3c1} Exit: ${exit_price:.4} ({move_pct:+.2}%)\n\n\
             \u{1f4b0} <b>PnL: {sign}${pnl:.2} ({sign}{pnl_pct:.1}%)</b>\n\n\
             {reason_text}"
        );
        self.send_message(&text).await;
    }

    /// Periodic status summary.
    pub async fn status(&self, balance: f64, positions: usize, regime: Regime, win_rate: Option<f64>) {
        let regime_str = match regime {
            Regime::StrongBull => "\u{1f680} Strong Bull",
            Regime::MildBull => "\u{1f4c8} Mild Bull",
            Regime::Ranging => "\u{2194} Ranging",
            Regime::MildBear => "\u{1f4c9} Mild Bear",
            Regime::StrongBear => "\u{2744} Strong Bear",
        };

        let mut text = format!(
            "\u{1f4ca} <b>BOT STATUS</b>\n\n\
             \u{1f4b0} Balance: <b>${balance:.2}</b>\n\
             \u{1f4c1} Positions: {positions}\n\
             \u{1f30d} Regime: {regime_str}\n"
        );
        if let Some(wr) = win_rate {
            text.push_str(&format!("\u{2705} Win rate: {wr:.0}%\n"));
        }
        self.send_message(&text).await;
    }

    /// Critical alert.
    pub async fn alert(&self, message: &str) {
        let text = format!("\u{1f6a8} <b>ALERT</b>\n\n{message}");
        self.send_message(&text).await;
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("enabled", &(self.bot_token.is_some() && self.chat_id.is_some()))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_notifier_is_silent() {
        // No credentials: sends are no-ops and never error.
        let n = Notifier::disabled();
        n.send_message("hello").await;
        n.alert("problem").await;
        n.status(100.0, 2, Regime::Ranging, Some(55.0)).await;
    }
}
