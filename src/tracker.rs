// =============================================================================
// Trade Tracker — append-only journal + performance analytics
// =============================================================================
//
// Every entry is journaled with the full signal snapshot at fill time; every
// close stores the exit and its computed PnL, so the statistics can always be
// replayed from the file. Closes that happen between ticks (SL/TP triggers
// firing on the venue) are inferred by diffing open journal entries against
// the venue's open positions and resolved through the fills history.
//
// PnL identities (pinned):
//   pnl     = (exit_px - entry_px) * size * dir_sign
//   pnl_pct = pnl / (entry_px * size / leverage) * 100
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::indicators::SignalBundle;
use crate::state;
use crate::types::{Bias, Direction, ExitReason};
use crate::venue::{Fill, InfoClient};

/// Exit-price tolerance when classifying tp/sl, as a fraction of entry.
const CLASSIFY_TOLERANCE: f64 = 0.005;

// ---------------------------------------------------------------------------
// Journal records
// ---------------------------------------------------------------------------

/// The full signal context at entry time, journaled for attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSnapshot {
    #[serde(flatten)]
    pub bundle: SignalBundle,
    #[serde(default)]
    pub ai_bias: Bias,
    #[serde(default)]
    pub ob_ratio: Option<f64>,
    #[serde(default)]
    pub long_score: i32,
    #[serde(default)]
    pub short_score: i32,
}

/// One journaled trade. JSON field names are the state-file contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub asset: String,
    pub direction: Direction,
    pub size: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub signals: SignalSnapshot,
    pub leverage: u32,
    pub status: String,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_reason: Option<ExitReason>,
    #[serde(default)]
    pub pnl: Option<f64>,
    #[serde(default)]
    pub pnl_pct: Option<f64>,
}

impl TradeRecord {
    pub fn is_open(&self) -> bool {
        self.status == "open"
    }

    pub fn is_closed(&self) -> bool {
        self.status == "closed"
    }

    pub fn is_win(&self) -> bool {
        self.pnl.map(|p| p > 0.0).unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct AssetStats {
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub pnl: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SignalStats {
    pub times_active: usize,
    pub wins: usize,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TradeSummary {
    pub asset: String,
    pub direction: Option<Direction>,
    pub pnl: f64,
    pub pnl_pct: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TradeStats {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub best_trade: Option<TradeSummary>,
    pub worst_trade: Option<TradeSummary>,
    pub per_asset: HashMap<String, AssetStats>,
    pub per_signal: HashMap<String, SignalStats>,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Thread-safe persistent trade journal.
pub struct TradeTracker {
    path: PathBuf,
    trades: RwLock<Vec<TradeRecord>>,
}

impl TradeTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let trades: Vec<TradeRecord> = state::load_json_or_default(&path);
        if !trades.is_empty() {
            info!(count = trades.len(), path = %path.display(), "trade journal loaded");
        }
        Self {
            path,
            trades: RwLock::new(trades),
        }
    }

    fn save(&self) {
        if let Err(e) = state::save_json(&self.path, &*self.trades.read()) {
            warn!(error = %e, "trade journal save failed");
        }
    }

    // -------------------------------------------------------------------------
    // Journal writes
    // -------------------------------------------------------------------------

    /// Journal a fill. Returns the trade id.
    pub fn log_entry(
        &self,
        asset: &str,
        direction: Direction,
        size: f64,
        entry_price: f64,
        signals: SignalSnapshot,
        leverage: u32,
    ) -> String {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let id = format!("{asset}_{now_ms}");

        let trade = TradeRecord {
            id: id.clone(),
            asset: asset.to_string(),
            direction,
            size,
            entry_price,
            entry_time: Utc::now(),
            signals,
            leverage,
            status: "open".to_string(),
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            pnl: None,
            pnl_pct: None,
        };

        info!(
            id = %id,
            asset,
            %direction,
            size,
            entry_price,
            leverage,
            "journal entry"
        );

        self.trades.write().push(trade);
        self.save();
        id
    }

    /// Close the most recent open trade on `asset` and compute its PnL.
    pub fn log_exit(&self, asset: &str, exit_price: f64, reason: ExitReason) -> Option<TradeRecord> {
        let mut trades = self.trades.write();
        let trade = trades
            .iter_mut()
            .rev()
            .find(|t| t.asset == asset && t.is_open())?;

        let pnl = (exit_price - trade.entry_price) * trade.size * trade.direction.sign();
        let margin = trade.entry_price * trade.size / trade.leverage as f64;
        let pnl_pct = if margin > 0.0 { pnl / margin * 100.0 } else { 0.0 };

        trade.exit_price = Some(exit_price);
        trade.exit_time = Some(Utc::now());
        trade.exit_reason = Some(reason);
        trade.pnl = Some(pnl);
        trade.pnl_pct = Some(pnl_pct);
        trade.status = "closed".to_string();

        let closed = trade.clone();
        drop(trades);
        self.save();

        info!(
            asset,
            exit_price,
            pnl = closed.pnl.unwrap_or(0.0),
            pnl_pct = closed.pnl_pct.unwrap_or(0.0),
            reason = %reason,
            "journal exit"
        );
        Some(closed)
    }

    // -------------------------------------------------------------------------
    // Close detection
    // -------------------------------------------------------------------------

    /// Detect trades that closed between ticks: open journal entries whose
    /// symbol is no longer among the venue's open coins. The last fill on the
    /// symbol is taken as the exit; the reason is classified by comparing the
    /// exit price to the expected SL/TP bands for the trade's bracket.
    ///
    /// Returns the trades closed by this sweep.
    pub async fn detect_closed_trades(
        &self,
        info: &InfoClient,
        account: &str,
        open_coins: &[String],
        sl_pct: f64,
        tp_pct: f64,
    ) -> Vec<TradeRecord> {
        let stale: Vec<TradeRecord> = {
            let trades = self.trades.read();
            trades
                .iter()
                .filter(|t| t.is_open() && !open_coins.contains(&t.asset))
                .cloned()
                .collect()
        };

        let mut closed = Vec::new();
        for trade in stale {
            let start_ms = trade.entry_time.timestamp_millis();
            let end_ms = Utc::now().timestamp_millis();

            let exit = match info.user_fills_by_time(account, start_ms, end_ms).await {
                Ok(fills) => last_fill_price(&fills, &trade.asset),
                Err(e) => {
                    warn!(asset = %trade.asset, error = %e, "fills lookup failed");
                    None
                }
            };

            let record = match exit {
                Some(exit_px) => {
                    let reason = classify_exit(&trade, exit_px, sl_pct, tp_pct);
                    self.log_exit(&trade.asset, exit_px, reason)
                }
                None => {
                    warn!(asset = %trade.asset, "could not resolve exit — closing as unknown");
                    self.log_exit(&trade.asset, trade.entry_price, ExitReason::Unknown)
                }
            };
            if let Some(r) = record {
                closed.push(r);
            }
        }
        closed
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn open_trades(&self) -> Vec<TradeRecord> {
        self.trades.read().iter().filter(|t| t.is_open()).cloned().collect()
    }

    pub fn closed_count(&self) -> usize {
        self.trades.read().iter().filter(|t| t.is_closed()).count()
    }

    /// Performance statistics over the last `last_n` closed trades (or all).
    pub fn get_stats(&self, last_n: Option<usize>) -> TradeStats {
        let trades = self.trades.read();
        let mut closed: Vec<&TradeRecord> = trades.iter().filter(|t| t.is_closed()).collect();
        if let Some(n) = last_n {
            if closed.len() > n {
                closed = closed.split_off(closed.len() - n);
            }
        }

        if closed.is_empty() {
            return TradeStats::default();
        }

        let wins: Vec<&&TradeRecord> = closed.iter().filter(|t| t.is_win()).collect();
        let losses_count = closed.len() - wins.len();

        let total_pnl: f64 = closed.iter().filter_map(|t| t.pnl).sum();
        let win_pnl: f64 = wins.iter().filter_map(|t| t.pnl).sum();
        let loss_pnl: f64 = closed
            .iter()
            .filter(|t| !t.is_win())
            .filter_map(|t| t.pnl)
            .sum::<f64>()
            .abs();

        let win_rate = wins.len() as f64 / closed.len() as f64 * 100.0;
        let avg_win = if wins.is_empty() { 0.0 } else { win_pnl / wins.len() as f64 };
        let avg_loss = if losses_count == 0 { 0.0 } else { loss_pnl / losses_count as f64 };
        let profit_factor = if loss_pnl > 0.0 { win_pnl / loss_pnl } else { f64::INFINITY };

        let summary = |t: &TradeRecord| TradeSummary {
            asset: t.asset.clone(),
            direction: Some(t.direction),
            pnl: t.pnl.unwrap_or(0.0),
            pnl_pct: t.pnl_pct.unwrap_or(0.0),
        };
        let best = closed
            .iter()
            .max_by(|a, b| cmp_pnl(a.pnl, b.pnl))
            .map(|t| summary(t));
        let worst = closed
            .iter()
            .min_by(|a, b| cmp_pnl(a.pnl, b.pnl))
            .map(|t| summary(t));

        // Per-asset aggregates.
        let mut per_asset: HashMap<String, AssetStats> = HashMap::new();
        for t in &closed {
            let entry = per_asset.entry(t.asset.clone()).or_default();
            entry.trades += 1;
            if t.is_win() {
                entry.wins += 1;
            }
            entry.pnl += t.pnl.unwrap_or(0.0);
        }
        for stats in per_asset.values_mut() {
            stats.win_rate = stats.wins as f64 / stats.trades as f64 * 100.0;
        }

        TradeStats {
            total_trades: closed.len(),
            wins: wins.len(),
            losses: losses_count,
            win_rate,
            total_pnl,
            avg_win,
            avg_loss,
            profit_factor,
            best_trade: best,
            worst_trade: worst,
            per_asset,
            per_signal: analyze_signals(&closed),
        }
    }
}

impl std::fmt::Debug for TradeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let trades = self.trades.read();
        f.debug_struct("TradeTracker")
            .field("total", &trades.len())
            .field("open", &trades.iter().filter(|t| t.is_open()).count())
            .finish()
    }
}

fn cmp_pnl(a: Option<f64>, b: Option<f64>) -> std::cmp::Ordering {
    a.unwrap_or(0.0)
        .partial_cmp(&b.unwrap_or(0.0))
        .unwrap_or(std::cmp::Ordering::Equal)
}

fn last_fill_price(fills: &[Fill], asset: &str) -> Option<f64> {
    fills
        .iter()
        .filter(|f| f.coin == asset)
        .max_by_key(|f| f.time)
        .map(|f| f.px)
}

/// Classify an inferred close as tp / sl by comparing the exit against the
/// expected bracket bands, with a 0.5%-of-entry tolerance; ambiguous exits on
/// the losing side of entry fall back to sl, the winning side to tp.
fn classify_exit(trade: &TradeRecord, exit_px: f64, sl_pct: f64, tp_pct: f64) -> ExitReason {
    let entry = trade.entry_price;
    if entry <= 0.0 {
        return ExitReason::Unknown;
    }

    let (expected_sl, expected_tp) = match trade.direction {
        Direction::Long => (entry * (1.0 - sl_pct), entry * (1.0 + tp_pct)),
        Direction::Short => (entry * (1.0 + sl_pct), entry * (1.0 - tp_pct)),
    };

    if (exit_px - expected_tp).abs() / entry < CLASSIFY_TOLERANCE {
        ExitReason::TakeProfit
    } else if (exit_px - expected_sl).abs() / entry < CLASSIFY_TOLERANCE {
        ExitReason::StopLoss
    } else if trade.direction == Direction::Long && exit_px < entry {
        ExitReason::StopLoss
    } else if trade.direction == Direction::Short && exit_px > entry {
        ExitReason::StopLoss
    } else {
        ExitReason::TakeProfit
    }
}

/// Per-signal win-rate table: how often each journaled boolean signal was
/// active on a closed trade that won.
fn analyze_signals(closed: &[&TradeRecord]) -> HashMap<String, SignalStats> {
    let mut result: HashMap<String, SignalStats> = HashMap::new();

    let keys: [(&str, fn(&SignalSnapshot) -> bool); 5] = [
        ("below_lower_bb", |s| s.bundle.below_lower_bb),
        ("above_upper_bb", |s| s.bundle.above_upper_bb),
        ("rsi_oversold", |s| s.bundle.rsi_oversold),
        ("rsi_overbought", |s| s.bundle.rsi_overbought),
        ("trending", |s| s.bundle.trending),
    ];

    for (key, active) in keys {
        let active_trades: Vec<&&TradeRecord> =
            closed.iter().filter(|t| active(&t.signals)).collect();
        if active_trades.is_empty() {
            continue;
        }
        let wins = active_trades.iter().filter(|t| t.is_win()).count();
        result.insert(
            key.to_string(),
            SignalStats {
                times_active: active_trades.len(),
                wins,
                win_rate: wins as f64 / active_trades.len() as f64 * 100.0,
            },
        );
    }

    // Oracle bias counts when it agreed with the trade direction.
    let aligned: Vec<&&TradeRecord> = closed
        .iter()
        .filter(|t| match t.signals.ai_bias {
            Bias::Long => t.direction == Direction::Long,
            Bias::Short => t.direction == Direction::Short,
            Bias::Neutral => false,
        })
        .collect();
    if !aligned.is_empty() {
        let wins = aligned.iter().filter(|t| t.is_win()).count();
        result.insert(
            "ai_bias_aligned".to_string(),
            SignalStats {
                times_active: aligned.len(),
                wins,
                win_rate: wins as f64 / aligned.len() as f64 * 100.0,
            },
        );
    }

    result
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{compute_signals, Candle, SignalParams};

    fn snapshot(ai_bias: Bias) -> SignalSnapshot {
        let candles: Vec<Candle> = (0..60)
            .map(|i| Candle::new(i as i64, 100.0 + i as f64, 100.5 + i as f64, 99.5 + i as f64, 100.0 + i as f64, 10.0))
            .collect();
        let bundle = compute_signals(&candles, &SignalParams::default()).unwrap();
        SignalSnapshot {
            bundle,
            ai_bias,
            ob_ratio: None,
            long_score: 3,
            short_score: 0,
        }
    }

    fn tracker() -> (TradeTracker, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let t = TradeTracker::new(dir.path().join("trades_history.json"));
        (t, dir)
    }

    #[test]
    fn pnl_identity_long_and_short() {
        let (t, _dir) = tracker();

        t.log_entry("BTC", Direction::Long, 0.5, 100.0, snapshot(Bias::Neutral), 5);
        let closed = t.log_exit("BTC", 110.0, ExitReason::TakeProfit).unwrap();
        let expected = (110.0 - 100.0) * 0.5;
        assert!((closed.pnl.unwrap() - expected).abs() < 1e-6);
        // pnl_pct vs margin = 100 * 0.5 / 5 = 10 → 5 / 10 = 50%.
        assert!((closed.pnl_pct.unwrap() - 50.0).abs() < 1e-6);

        t.log_entry("ETH", Direction::Short, 2.0, 50.0, snapshot(Bias::Neutral), 5);
        let closed = t.log_exit("ETH", 55.0, ExitReason::StopLoss).unwrap();
        let expected = (55.0 - 50.0) * 2.0 * -1.0;
        assert!((closed.pnl.unwrap() - expected).abs() < 1e-6);
        assert!(closed.pnl.unwrap() < 0.0);
    }

    #[test]
    fn exit_without_open_trade_is_none() {
        let (t, _dir) = tracker();
        assert!(t.log_exit("BTC", 100.0, ExitReason::Unknown).is_none());
    }

    #[test]
    fn stats_replay_from_disk_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades_history.json");
        {
            let t = TradeTracker::new(&path);
            t.log_entry("BTC", Direction::Long, 1.0, 100.0, snapshot(Bias::Long), 3);
            t.log_exit("BTC", 103.0, ExitReason::TakeProfit);
            t.log_entry("ETH", Direction::Long, 1.0, 100.0, snapshot(Bias::Neutral), 3);
            t.log_exit("ETH", 98.0, ExitReason::StopLoss);
        }

        // Crash-then-reload: recomputed statistics equal the live ones.
        let reloaded = TradeTracker::new(&path);
        let stats = reloaded.get_stats(None);
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 1);
        assert!((stats.win_rate - 50.0).abs() < 1e-9);
        assert!((stats.total_pnl - 1.0).abs() < 1e-9);
        assert_eq!(stats.per_asset.len(), 2);
    }

    #[test]
    fn per_signal_table_counts_active_wins() {
        let (t, _dir) = tracker();
        // Rising-series snapshot has trending=true.
        t.log_entry("BTC", Direction::Long, 1.0, 100.0, snapshot(Bias::Long), 3);
        t.log_exit("BTC", 105.0, ExitReason::TakeProfit);
        t.log_entry("BTC", Direction::Long, 1.0, 100.0, snapshot(Bias::Long), 3);
        t.log_exit("BTC", 95.0, ExitReason::StopLoss);

        let stats = t.get_stats(None);
        let trending = stats.per_signal.get("trending").unwrap();
        assert_eq!(trending.times_active, 2);
        assert_eq!(trending.wins, 1);
        assert!((trending.win_rate - 50.0).abs() < 1e-9);

        let aligned = stats.per_signal.get("ai_bias_aligned").unwrap();
        assert_eq!(aligned.times_active, 2);
    }

    #[test]
    fn classify_exit_bands() {
        let (t, _dir) = tracker();
        t.log_entry("SOL", Direction::Long, 1.0, 100.0, snapshot(Bias::Neutral), 3);
        let trade = t.open_trades().pop().unwrap();

        // 1.5% SL, 3% TP.
        assert_eq!(classify_exit(&trade, 103.0, 0.015, 0.03), ExitReason::TakeProfit);
        assert_eq!(classify_exit(&trade, 98.5, 0.015, 0.03), ExitReason::StopLoss);
        // Ambiguous below entry → sl; ambiguous above → tp.
        assert_eq!(classify_exit(&trade, 97.0, 0.015, 0.03), ExitReason::StopLoss);
        assert_eq!(classify_exit(&trade, 101.2, 0.015, 0.03), ExitReason::TakeProfit);
    }

    #[test]
    fn stats_last_n_window() {
        let (t, _dir) = tracker();
        for i in 0..5 {
            t.log_entry("BTC", Direction::Long, 1.0, 100.0, snapshot(Bias::Neutral), 3);
            let exit = if i < 4 { 95.0 } else { 105.0 };
            t.log_exit("BTC", exit, ExitReason::Unknown);
        }
        let all = t.get_stats(None);
        assert_eq!(all.total_trades, 5);
        assert_eq!(all.wins, 1);

        let last_one = t.get_stats(Some(1));
        assert_eq!(last_one.total_trades, 1);
        assert_eq!(last_one.wins, 1);
        assert!(last_one.profit_factor.is_infinite());
    }
}
