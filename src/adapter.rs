// =============================================================================
// Micro Adapter — fast self-tuning from recent trade statistics
// =============================================================================
//
// Runs when 20+ trades closed since the last adaptation, or 6+ hours elapsed
// with at least one new trade. Over the last 20 closed trades it:
//
//   1. Moves the integer score threshold (2..=4) with the global win rate.
//   2. Multiplies per-signal weights by 0.7 / 1.3, clamped to [0.5, 2.0].
//      The weights are advisory: journaled for attribution, never applied to
//      the integer vote ladder.
//   3. Blocks assets with 5+ trades under a 30% win rate for 24 h; expired
//      blocks are pruned on the next run.
//
// Every run appends a bounded adaptation-log entry and persists the state.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::state;
use crate::tracker::TradeStats;

const MIN_TRADES_FOR_ADAPT: usize = 20;
const ADAPT_INTERVAL_HOURS: i64 = 6;
const MIN_WEIGHT: f64 = 0.5;
const MAX_WEIGHT: f64 = 2.0;
const MIN_TRADES_FOR_BLOCK: usize = 5;
const BLOCK_WIN_RATE_THRESHOLD: f64 = 30.0;
const BLOCK_COOLDOWN_HOURS: i64 = 24;
const MIN_THRESHOLD: i32 = 2;
const MAX_THRESHOLD: i32 = 4;
const ADAPTATION_LOG_LIMIT: usize = 10;

fn default_weights() -> HashMap<String, f64> {
    [
        "bb", "rsi", "adx", "ai_bias", "funding", "volume",
        "orderbook", "multi_tf_1h", "multi_tf_4h",
    ]
    .iter()
    .map(|k| (k.to_string(), 1.0))
    .collect()
}

fn default_threshold() -> i32 {
    MIN_THRESHOLD
}

/// Signal keys in the stats table → weight keys.
fn weight_key(signal: &str) -> Option<&'static str> {
    match signal {
        "below_lower_bb" | "above_upper_bb" => Some("bb"),
        "rsi_oversold" | "rsi_overbought" => Some("rsi"),
        "trending" => Some("adx"),
        "ai_bias_aligned" => Some("ai_bias"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Persistent state (strategy_state.json)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedAsset {
    pub asset: String,
    pub blocked_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationEntry {
    pub timestamp: DateTime<Utc>,
    pub trades_analyzed: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub changes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterState {
    #[serde(default = "default_weights")]
    pub signal_weights: HashMap<String, f64>,
    #[serde(default = "default_threshold")]
    pub min_score_threshold: i32,
    #[serde(default)]
    pub blocked_assets: Vec<BlockedAsset>,
    #[serde(default)]
    pub last_adaptation: Option<DateTime<Utc>>,
    #[serde(default)]
    pub adaptation_count: u32,
    #[serde(default)]
    pub trades_at_last_adapt: usize,
    #[serde(default)]
    pub adaptation_log: Vec<AdaptationEntry>,
}

impl Default for AdapterState {
    fn default() -> Self {
        Self {
            signal_weights: default_weights(),
            min_score_threshold: default_threshold(),
            blocked_assets: Vec::new(),
            last_adaptation: None,
            adaptation_count: 0,
            trades_at_last_adapt: 0,
            adaptation_log: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct StrategyAdapter {
    path: PathBuf,
    state: RwLock<AdapterState>,
}

impl StrategyAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut loaded: AdapterState = state::load_json_or_default(&path);
        // Merge newly-introduced weight keys into older state files.
        for (key, w) in default_weights() {
            loaded.signal_weights.entry(key).or_insert(w);
        }
        info!(
            threshold = loaded.min_score_threshold,
            adaptations = loaded.adaptation_count,
            "adapter state ready"
        );
        Self {
            path,
            state: RwLock::new(loaded),
        }
    }

    fn save(&self) {
        if let Err(e) = state::save_json(&self.path, &*self.state.read()) {
            tracing::warn!(error = %e, "adapter state save failed");
        }
    }

    // -------------------------------------------------------------------------
    // Queries consulted by the trading loop
    // -------------------------------------------------------------------------

    /// Current dynamic score threshold (2..=4).
    pub fn score_threshold(&self) -> i32 {
        self.state.read().min_score_threshold
    }

    /// Advisory weight for a signal (0.5..=2.0).
    pub fn signal_weight(&self, name: &str) -> f64 {
        self.state
            .read()
            .signal_weights
            .get(name)
            .copied()
            .unwrap_or(1.0)
    }

    /// True while the asset sits in the blocked list.
    pub fn is_asset_blocked(&self, asset: &str) -> bool {
        self.state
            .read()
            .blocked_assets
            .iter()
            .any(|b| b.asset == asset)
    }

    // -------------------------------------------------------------------------
    // Adaptation
    // -------------------------------------------------------------------------

    /// Whether an adaptation run is due, given the total closed-trade count.
    pub fn should_adapt(&self, total_closed: usize) -> bool {
        if total_closed < MIN_TRADES_FOR_BLOCK {
            return false;
        }

        let state = self.state.read();
        let trades_since = total_closed.saturating_sub(state.trades_at_last_adapt);
        if trades_since >= MIN_TRADES_FOR_ADAPT {
            return true;
        }

        match state.last_adaptation {
            Some(last) => {
                Utc::now() - last > Duration::hours(ADAPT_INTERVAL_HOURS) && trades_since > 0
            }
            // Never adapted: wait for a first meaningful batch.
            None => total_closed >= MIN_TRADES_FOR_BLOCK,
        }
    }

    /// Run one adaptation over `stats` (computed from the last 20 closed
    /// trades) and persist. Returns the change descriptions.
    pub fn adapt(&self, stats: &TradeStats, total_closed: usize) -> Vec<String> {
        if stats.total_trades < MIN_TRADES_FOR_BLOCK {
            info!("adapter: not enough trades for adaptation");
            return Vec::new();
        }

        let mut state = self.state.write();
        let mut changes = Vec::new();

        // 1. Score threshold from the global win rate.
        let old_threshold = state.min_score_threshold;
        if stats.win_rate < 40.0 {
            state.min_score_threshold = (old_threshold + 1).min(MAX_THRESHOLD);
            if state.min_score_threshold != old_threshold {
                changes.push(format!(
                    "Score threshold {} -> {} (win rate {:.1}% too low)",
                    old_threshold, state.min_score_threshold, stats.win_rate
                ));
            }
        } else if stats.win_rate > 65.0 {
            state.min_score_threshold = (old_threshold - 1).max(MIN_THRESHOLD);
            if state.min_score_threshold != old_threshold {
                changes.push(format!(
                    "Score threshold {} -> {} (win rate {:.1}% strong)",
                    old_threshold, state.min_score_threshold, stats.win_rate
                ));
            }
        }

        // 2. Advisory signal weights from per-signal win rates.
        for (signal, sig_stats) in &stats.per_signal {
            let Some(key) = weight_key(signal) else { continue };
            if sig_stats.times_active < 3 {
                continue;
            }

            let old_weight = state.signal_weights.get(key).copied().unwrap_or(1.0);
            let new_weight = if sig_stats.win_rate < 35.0 {
                (old_weight * 0.7).max(MIN_WEIGHT)
            } else if sig_stats.win_rate > 65.0 {
                (old_weight * 1.3).min(MAX_WEIGHT)
            } else {
                old_weight
            };

            if (new_weight - old_weight).abs() > f64::EPSILON {
                let rounded = (new_weight * 100.0).round() / 100.0;
                state.signal_weights.insert(key.to_string(), rounded);
                changes.push(format!(
                    "Weight '{key}': {old_weight:.2} -> {rounded:.2} (signal WR={:.1}%)",
                    sig_stats.win_rate
                ));
            }
        }

        // 3. Block chronically losing assets.
        for (asset, asset_stats) in &stats.per_asset {
            if asset_stats.trades >= MIN_TRADES_FOR_BLOCK
                && asset_stats.win_rate < BLOCK_WIN_RATE_THRESHOLD
                && !state.blocked_assets.iter().any(|b| &b.asset == asset)
            {
                state.blocked_assets.push(BlockedAsset {
                    asset: asset.clone(),
                    blocked_at: Utc::now(),
                    reason: format!(
                        "WR={:.1}% on {} trades",
                        asset_stats.win_rate, asset_stats.trades
                    ),
                });
                changes.push(format!(
                    "BLOCKED {asset} (WR={:.1}% on {} trades)",
                    asset_stats.win_rate, asset_stats.trades
                ));
            }
        }

        // 4. Unblock after the cooldown.
        let now = Utc::now();
        state.blocked_assets.retain(|b| {
            let expired = now - b.blocked_at > Duration::hours(BLOCK_COOLDOWN_HOURS);
            if expired {
                changes.push(format!("UNBLOCKED {} (cooldown expired)", b.asset));
            }
            !expired
        });

        // 5. Record the adaptation.
        state.last_adaptation = Some(now);
        state.adaptation_count += 1;
        state.trades_at_last_adapt = total_closed;
        state.adaptation_log.push(AdaptationEntry {
            timestamp: now,
            trades_analyzed: stats.total_trades,
            win_rate: stats.win_rate,
            total_pnl: stats.total_pnl,
            changes: changes.clone(),
        });
        let overflow = state.adaptation_log.len().saturating_sub(ADAPTATION_LOG_LIMIT);
        if overflow > 0 {
            state.adaptation_log.drain(..overflow);
        }

        let count = state.adaptation_count;
        drop(state);
        self.save();

        if changes.is_empty() {
            info!(adaptation = count, win_rate = stats.win_rate, "adapter: no changes needed");
        } else {
            info!(adaptation = count, ?changes, "adapter: parameters adjusted");
        }
        changes
    }

    // -------------------------------------------------------------------------
    // Report
    // -------------------------------------------------------------------------

    /// Formatted multi-line report logged after each adaptation.
    pub fn report(&self, stats: &TradeStats) -> String {
        let state = self.state.read();
        let mut lines = vec![
            "=".repeat(50),
            "STRATEGY ADAPTER REPORT".to_string(),
            "=".repeat(50),
            format!(
                "Total trades: {} | Wins: {} | Losses: {}",
                stats.total_trades, stats.wins, stats.losses
            ),
            format!(
                "Win rate: {:.1}% | Total PnL: ${:+.4}",
                stats.win_rate, stats.total_pnl
            ),
            format!("Profit factor: {:.2}", stats.profit_factor),
            format!(
                "Avg win: ${:+.4} | Avg loss: ${:.4}",
                stats.avg_win, stats.avg_loss
            ),
            String::new(),
            format!("Score threshold: {}", state.min_score_threshold),
            "Signal weights:".to_string(),
        ];

        let mut weights: Vec<(&String, &f64)> = state.signal_weights.iter().collect();
        weights.sort_by(|a, b| a.0.cmp(b.0));
        for (signal, weight) in weights {
            let marker = if *weight < 0.8 {
                " (weakened)"
            } else if *weight > 1.2 {
                " (boosted)"
            } else {
                ""
            };
            lines.push(format!("  {signal}: {weight:.2}{marker}"));
        }

        lines.push(String::new());
        if state.blocked_assets.is_empty() {
            lines.push("No blocked assets".to_string());
        } else {
            lines.push("Blocked assets:".to_string());
            for b in &state.blocked_assets {
                lines.push(format!(
                    "  {} — {} (since {})",
                    b.asset,
                    b.reason,
                    b.blocked_at.format("%Y-%m-%d %H:%M")
                ));
            }
        }

        lines.push(String::new());
        lines.push(format!("Adaptations: {}", state.adaptation_count));

        if let Some(last) = state.adaptation_log.last() {
            if !last.changes.is_empty() {
                lines.push(format!(
                    "Last changes ({}):",
                    last.timestamp.format("%Y-%m-%d %H:%M")
                ));
                for c in &last.changes {
                    lines.push(format!("  -> {c}"));
                }
            }
        }

        if let (Some(best), Some(worst)) = (&stats.best_trade, &stats.worst_trade) {
            lines.push(String::new());
            lines.push(format!(
                "Best trade: {} {} ${:+.4} ({:+.1}%)",
                best.direction.map(|d| d.to_string()).unwrap_or_default(),
                best.asset,
                best.pnl,
                best.pnl_pct
            ));
            lines.push(format!(
                "Worst trade: {} {} ${:+.4} ({:+.1}%)",
                worst.direction.map(|d| d.to_string()).unwrap_or_default(),
                worst.asset,
                worst.pnl,
                worst.pnl_pct
            ));
        }

        if !stats.per_asset.is_empty() {
            lines.push(String::new());
            lines.push("Per-asset performance:".to_string());
            let mut assets: Vec<_> = stats.per_asset.iter().collect();
            assets.sort_by(|a, b| a.0.cmp(b.0));
            for (asset, a) in assets {
                lines.push(format!(
                    "  {asset}: {} trades, WR={:.0}%, PnL=${:+.4}",
                    a.trades, a.win_rate, a.pnl
                ));
            }
        }

        lines.push("=".repeat(50));
        lines.join("\n")
    }
}

impl std::fmt::Debug for StrategyAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("StrategyAdapter")
            .field("threshold", &state.min_score_threshold)
            .field("adaptations", &state.adaptation_count)
            .field("blocked", &state.blocked_assets.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{AssetStats, SignalStats};

    fn adapter() -> (StrategyAdapter, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let a = StrategyAdapter::new(dir.path().join("strategy_state.json"));
        (a, dir)
    }

    fn stats(total: usize, win_rate: f64) -> TradeStats {
        TradeStats {
            total_trades: total,
            wins: (total as f64 * win_rate / 100.0) as usize,
            losses: total - (total as f64 * win_rate / 100.0) as usize,
            win_rate,
            total_pnl: -1.0,
            ..TradeStats::default()
        }
    }

    #[test]
    fn low_win_rate_raises_threshold_capped() {
        let (a, _d) = adapter();
        assert_eq!(a.score_threshold(), 2);

        // 30% win rate over 20 trades: 2 -> 3.
        let changes = a.adapt(&stats(20, 30.0), 20);
        assert_eq!(a.score_threshold(), 3);
        assert!(changes.iter().any(|c| c.contains("Score threshold 2 -> 3")));

        a.adapt(&stats(20, 30.0), 40);
        assert_eq!(a.score_threshold(), 4);
        // Capped at 4.
        a.adapt(&stats(20, 30.0), 60);
        assert_eq!(a.score_threshold(), 4);
    }

    #[test]
    fn high_win_rate_lowers_threshold_floored() {
        let (a, _d) = adapter();
        a.adapt(&stats(20, 30.0), 20);
        assert_eq!(a.score_threshold(), 3);

        a.adapt(&stats(20, 70.0), 40);
        assert_eq!(a.score_threshold(), 2);
        // Floored at 2.
        a.adapt(&stats(20, 70.0), 60);
        assert_eq!(a.score_threshold(), 2);
    }

    #[test]
    fn weights_multiply_and_clamp() {
        let (a, _d) = adapter();
        let mut s = stats(20, 50.0);
        s.per_signal.insert(
            "trending".to_string(),
            SignalStats { times_active: 10, wins: 1, win_rate: 10.0 },
        );

        // 1.0 * 0.7 repeatedly, floored at 0.5.
        a.adapt(&s, 20);
        assert!((a.signal_weight("adx") - 0.7).abs() < 1e-9);
        a.adapt(&s, 40);
        assert!((a.signal_weight("adx") - 0.49_f64.max(MIN_WEIGHT)).abs() < 1e-9);

        // Booster path, capped at 2.0.
        let mut s = stats(20, 50.0);
        s.per_signal.insert(
            "rsi_oversold".to_string(),
            SignalStats { times_active: 5, wins: 5, win_rate: 100.0 },
        );
        for i in 0..5 {
            a.adapt(&s, 60 + i * 20);
        }
        assert!(a.signal_weight("rsi") <= MAX_WEIGHT + 1e-9);
    }

    #[test]
    fn weight_ignored_below_three_activations() {
        let (a, _d) = adapter();
        let mut s = stats(20, 50.0);
        s.per_signal.insert(
            "trending".to_string(),
            SignalStats { times_active: 2, wins: 0, win_rate: 0.0 },
        );
        a.adapt(&s, 20);
        assert!((a.signal_weight("adx") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn losing_asset_blocked_then_unblocked_after_cooldown() {
        let (a, _d) = adapter();
        let mut s = stats(20, 50.0);
        s.per_asset.insert(
            "DYDX".to_string(),
            AssetStats { trades: 6, wins: 1, win_rate: 16.7, pnl: -2.0 },
        );

        a.adapt(&s, 20);
        assert!(a.is_asset_blocked("DYDX"));
        assert!(!a.is_asset_blocked("BTC"));

        // Age the block past the cooldown, then adapt again.
        {
            let mut st = a.state.write();
            st.blocked_assets[0].blocked_at = Utc::now() - Duration::hours(25);
        }
        let changes = a.adapt(&stats(20, 50.0), 40);
        assert!(!a.is_asset_blocked("DYDX"));
        assert!(changes.iter().any(|c| c.contains("UNBLOCKED DYDX")));
    }

    #[test]
    fn should_adapt_triggers() {
        let (a, _d) = adapter();
        // Too few trades overall.
        assert!(!a.should_adapt(4));
        // Never adapted + enough trades.
        assert!(a.should_adapt(5));

        a.adapt(&stats(20, 50.0), 20);
        // Just adapted — not due again without 20 new trades.
        assert!(!a.should_adapt(25));
        assert!(a.should_adapt(40));

        // Time trigger: push last_adaptation back 7 h; needs >= 1 new trade.
        {
            let mut st = a.state.write();
            st.last_adaptation = Some(Utc::now() - Duration::hours(7));
        }
        assert!(!a.should_adapt(20));
        assert!(a.should_adapt(21));
    }

    #[test]
    fn adaptation_log_bounded_to_ten() {
        let (a, _d) = adapter();
        for i in 0..15 {
            a.adapt(&stats(20, 30.0), 20 * (i + 1));
        }
        assert_eq!(a.state.read().adaptation_log.len(), ADAPTATION_LOG_LIMIT);
    }

    #[test]
    fn state_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strategy_state.json");
        {
            let a = StrategyAdapter::new(&path);
            a.adapt(&stats(20, 30.0), 20);
        }
        let reloaded = StrategyAdapter::new(&path);
        assert_eq!(reloaded.score_threshold(), 3);
        assert_eq!(reloaded.state.read().adaptation_count, 1);
    }

    #[test]
    fn invariants_hold_after_any_adaptation() {
        let (a, _d) = adapter();
        for wr in [0.0, 20.0, 40.0, 50.0, 65.0, 90.0, 100.0] {
            a.adapt(&stats(20, wr), 20);
            let t = a.score_threshold();
            assert!((MIN_THRESHOLD..=MAX_THRESHOLD).contains(&t));
            for w in a.state.read().signal_weights.values() {
                assert!((MIN_WEIGHT..=MAX_WEIGHT).contains(w));
            }
        }
    }

    #[test]
    fn report_renders() {
        let (a, _d) = adapter();
        let mut s = stats(20, 55.0);
        s.per_asset.insert(
            "BTC".to_string(),
            AssetStats { trades: 10, wins: 6, win_rate: 60.0, pnl: 3.2 },
        );
        let report = a.report(&s);
        assert!(report.contains("STRATEGY ADAPTER REPORT"));
        assert!(report.contains("Score threshold: 2"));
        assert!(report.contains("BTC"));
    }
}
