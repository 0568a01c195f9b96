// =============================================================================
// Macro Optimizer — slow regime-driven parameter skew
// =============================================================================
//
// Every ~5 hours the trading loop feeds the oracle's regime verdict through
// here. The regime maps onto an adjustments record (SL/TP multipliers and
// per-side integer thresholds) that overlays the active tier and the micro
// adapter's threshold. A chronically losing asset (5+ closed trades,
// cumulative PnL under -$1) is nominated for removal.
//
// The optimizer keeps its own entry/exit journal so its performance view is
// independent of the tracker's.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::oracle::RegimeVerdict;
use crate::state;
use crate::types::{Direction, Regime};

const SNAPSHOT_LIMIT: usize = 50;
const PRUNE_MIN_TRADES: usize = 5;
const PRUNE_PNL_FLOOR: f64 = -1.0;

// ---------------------------------------------------------------------------
// Adjustments
// ---------------------------------------------------------------------------

/// Parameter overlay produced by an optimization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adjustments {
    pub bias: String,
    pub sl_adjust: f64,
    pub tp_adjust: f64,
    pub long_threshold: i32,
    pub short_threshold: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_asset: Option<String>,
}

impl Default for Adjustments {
    fn default() -> Self {
        Self {
            bias: "neutral".to_string(),
            sl_adjust: 1.0,
            tp_adjust: 1.0,
            long_threshold: 2,
            short_threshold: 2,
            remove_asset: None,
        }
    }
}

impl Adjustments {
    /// The per-regime skew table.
    fn for_regime(regime: Regime) -> Self {
        match regime {
            Regime::StrongBear => Self {
                bias: "Favor shorts, tighten long SL".to_string(),
                sl_adjust: 0.8,
                tp_adjust: 1.2,
                long_threshold: 3,
                short_threshold: 2,
                remove_asset: None,
            },
            Regime::StrongBull => Self {
                bias: "Favor longs, tighten short SL".to_string(),
                sl_adjust: 1.2,
                tp_adjust: 0.8,
                long_threshold: 2,
                short_threshold: 3,
                remove_asset: None,
            },
            Regime::Ranging => Self {
                bias: "Mean-reversion, tighter SL/TP".to_string(),
                sl_adjust: 0.8,
                tp_adjust: 0.8,
                long_threshold: 2,
                short_threshold: 2,
                remove_asset: None,
            },
            Regime::MildBull => Self {
                bias: "Slight bull bias".to_string(),
                ..Self::default()
            },
            Regime::MildBear => Self {
                bias: "Slight bear bias".to_string(),
                ..Self::default()
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Journal (trade_history.json)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerTrade {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub asset: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub size: f64,
    pub notional: f64,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub pnl: Option<f64>,
    pub status: String,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Persistent state (optimizer_state.json)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub regime: Regime,
    pub bias: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizerState {
    #[serde(default)]
    pub last_optimization: Option<DateTime<Utc>>,
    #[serde(default)]
    pub optimization_count: u32,
    #[serde(default)]
    pub current_regime: Regime,
    #[serde(default)]
    pub performance_snapshots: Vec<PerformanceSnapshot>,
}

/// Condensed performance view over the optimizer's own journal.
#[derive(Debug, Clone, Default)]
pub struct OptimizerStats {
    pub trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub worst_asset: Option<(String, f64, usize)>,
}

// ---------------------------------------------------------------------------
// Optimizer
// ---------------------------------------------------------------------------

pub struct StrategyOptimizer {
    state_path: PathBuf,
    journal_path: PathBuf,
    state: RwLock<OptimizerState>,
    journal: RwLock<Vec<OptimizerTrade>>,
}

impl StrategyOptimizer {
    pub fn new(state_path: impl Into<PathBuf>, journal_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let journal_path = journal_path.into();
        Self {
            state: RwLock::new(state::load_json_or_default(&state_path)),
            journal: RwLock::new(state::load_json_or_default(&journal_path)),
            state_path,
            journal_path,
        }
    }

    fn save_state(&self) {
        if let Err(e) = state::save_json(&self.state_path, &*self.state.read()) {
            tracing::warn!(error = %e, "optimizer state save failed");
        }
    }

    fn save_journal(&self) {
        if let Err(e) = state::save_json(&self.journal_path, &*self.journal.read()) {
            tracing::warn!(error = %e, "optimizer journal save failed");
        }
    }

    // -------------------------------------------------------------------------
    // Journal
    // -------------------------------------------------------------------------

    /// Record an entry. Returns the journal id.
    pub fn log_trade(
        &self,
        asset: &str,
        direction: Direction,
        entry_price: f64,
        size: f64,
        notional: f64,
    ) -> u64 {
        let mut journal = self.journal.write();
        let id = journal.len() as u64 + 1;
        journal.push(OptimizerTrade {
            id,
            timestamp: Utc::now(),
            asset: asset.to_string(),
            direction,
            entry_price,
            size,
            notional,
            exit_price: None,
            pnl: None,
            status: "open".to_string(),
            closed_at: None,
        });
        drop(journal);
        self.save_journal();
        id
    }

    /// Record an exit against the most recent open journal entry for `asset`.
    pub fn close_trade(&self, asset: &str, exit_price: f64, pnl: f64) {
        let mut journal = self.journal.write();
        if let Some(trade) = journal
            .iter_mut()
            .rev()
            .find(|t| t.asset == asset && t.status == "open")
        {
            trade.exit_price = Some(exit_price);
            trade.pnl = Some(pnl);
            trade.status = "closed".to_string();
            trade.closed_at = Some(Utc::now());
        }
        drop(journal);
        self.save_journal();
    }

    /// Performance over the optimizer journal's closed trades.
    pub fn performance_stats(&self) -> OptimizerStats {
        let journal = self.journal.read();
        let closed: Vec<&OptimizerTrade> = journal
            .iter()
            .filter(|t| t.status == "closed" && t.pnl.is_some())
            .collect();

        if closed.is_empty() {
            return OptimizerStats::default();
        }

        let wins = closed.iter().filter(|t| t.pnl.unwrap_or(0.0) > 0.0).count();
        let total_pnl: f64 = closed.iter().filter_map(|t| t.pnl).sum();

        let mut per_asset: HashMap<String, (f64, usize)> = HashMap::new();
        for t in &closed {
            let entry = per_asset.entry(t.asset.clone()).or_default();
            entry.0 += t.pnl.unwrap_or(0.0);
            entry.1 += 1;
        }
        let worst_asset = per_asset
            .into_iter()
            .min_by(|a, b| a.1 .0.partial_cmp(&b.1 .0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(asset, (pnl, trades))| (asset, pnl, trades));

        OptimizerStats {
            trades: closed.len(),
            win_rate: wins as f64 / closed.len() as f64 * 100.0,
            total_pnl,
            worst_asset,
        }
    }

    // -------------------------------------------------------------------------
    // Optimization
    // -------------------------------------------------------------------------

    pub fn current_regime(&self) -> Regime {
        self.state.read().current_regime
    }

    /// Whether an optimization run is due.
    pub fn should_optimize(&self, interval_hours: f64) -> bool {
        match self.state.read().last_optimization {
            Some(last) => {
                Utc::now() - last > Duration::seconds((interval_hours * 3600.0) as i64)
            }
            None => true,
        }
    }

    /// Apply one optimization cycle with the oracle's verdict (if the oracle
    /// answered). Returns the adjustments overlay, or `None` when no verdict
    /// and no pruning applies.
    pub fn optimize(&self, verdict: Option<&RegimeVerdict>) -> Option<Adjustments> {
        let stats = self.performance_stats();
        let mut adjustments: Option<Adjustments> = None;

        if let Some(v) = verdict {
            let mut state = self.state.write();
            let old_regime = state.current_regime;
            state.current_regime = v.regime;
            if old_regime != v.regime {
                info!(from = %old_regime, to = %v.regime, "regime change");
            }
            adjustments = Some(Adjustments::for_regime(v.regime));
        }

        // Worst-asset pruning rides on whatever adjustments exist.
        if stats.trades >= PRUNE_MIN_TRADES {
            if let Some((asset, pnl, trades)) = &stats.worst_asset {
                if *pnl < PRUNE_PNL_FLOOR && *trades >= PRUNE_MIN_TRADES {
                    let adj = adjustments.get_or_insert_with(Adjustments::default);
                    adj.remove_asset = Some(asset.clone());
                    info!(asset = %asset, pnl, "nominating underperforming asset for removal");
                }
            }
        }

        // Record the run.
        let mut state = self.state.write();
        let regime = state.current_regime;
        state.performance_snapshots.push(PerformanceSnapshot {
            timestamp: Utc::now(),
            trades: stats.trades,
            win_rate: stats.win_rate,
            total_pnl: stats.total_pnl,
            regime,
            bias: adjustments
                .as_ref()
                .map(|a| a.bias.clone())
                .unwrap_or_else(|| "none".to_string()),
        });
        let overflow = state.performance_snapshots.len().saturating_sub(SNAPSHOT_LIMIT);
        if overflow > 0 {
            state.performance_snapshots.drain(..overflow);
        }
        state.last_optimization = Some(Utc::now());
        state.optimization_count += 1;
        let count = state.optimization_count;
        drop(state);
        self.save_state();

        info!(optimization = count, regime = %regime, "optimization complete");
        adjustments
    }
}

impl std::fmt::Debug for StrategyOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("StrategyOptimizer")
            .field("regime", &state.current_regime)
            .field("optimizations", &state.optimization_count)
            .field("journal_len", &self.journal.read().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn optimizer() -> (StrategyOptimizer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let o = StrategyOptimizer::new(
            dir.path().join("optimizer_state.json"),
            dir.path().join("trade_history.json"),
        );
        (o, dir)
    }

    fn verdict(score: f64) -> RegimeVerdict {
        RegimeVerdict {
            regime: Regime::from_score(score),
            score,
            commentary: String::new(),
        }
    }

    #[test]
    fn strong_bear_skews_thresholds_asymmetrically() {
        let (o, _d) = optimizer();
        let adj = o.optimize(Some(&verdict(-0.7))).unwrap();
        assert_eq!(o.current_regime(), Regime::StrongBear);
        assert_eq!(adj.long_threshold, 3);
        assert_eq!(adj.short_threshold, 2);
        assert!((adj.sl_adjust - 0.8).abs() < 1e-9);
        assert!((adj.tp_adjust - 1.2).abs() < 1e-9);
    }

    #[test]
    fn strong_bull_mirrors_the_skew() {
        let (o, _d) = optimizer();
        let adj = o.optimize(Some(&verdict(0.8))).unwrap();
        assert_eq!(adj.long_threshold, 2);
        assert_eq!(adj.short_threshold, 3);
        assert!((adj.sl_adjust - 1.2).abs() < 1e-9);
    }

    #[test]
    fn mild_regimes_leave_parameters_flat() {
        let (o, _d) = optimizer();
        let adj = o.optimize(Some(&verdict(0.3))).unwrap();
        assert_eq!(adj.long_threshold, 2);
        assert_eq!(adj.short_threshold, 2);
        assert!((adj.sl_adjust - 1.0).abs() < 1e-9);
        assert!((adj.tp_adjust - 1.0).abs() < 1e-9);
    }

    #[test]
    fn no_verdict_no_pruning_returns_none() {
        let (o, _d) = optimizer();
        assert!(o.optimize(None).is_none());
        // The run itself is still recorded.
        assert_eq!(o.state.read().optimization_count, 1);
    }

    #[test]
    fn worst_asset_pruned_after_enough_losses() {
        let (o, _d) = optimizer();
        for _ in 0..5 {
            o.log_trade("ZRO", Direction::Long, 2.0, 10.0, 20.0);
            o.close_trade("ZRO", 1.9, -0.5);
        }
        // Cumulative -2.5 on 5 trades: nominated even without a verdict.
        let adj = o.optimize(None).unwrap();
        assert_eq!(adj.remove_asset.as_deref(), Some("ZRO"));
    }

    #[test]
    fn pruning_needs_five_trades_on_the_asset() {
        let (o, _d) = optimizer();
        for _ in 0..3 {
            o.log_trade("ZRO", Direction::Long, 2.0, 10.0, 20.0);
            o.close_trade("ZRO", 1.0, -2.0);
        }
        for _ in 0..2 {
            o.log_trade("BTC", Direction::Long, 100.0, 0.1, 10.0);
            o.close_trade("BTC", 101.0, 0.1);
        }
        // 5 closed total, but ZRO itself has only 3.
        assert!(o.optimize(None).is_none());
    }

    #[test]
    fn should_optimize_respects_cadence() {
        let (o, _d) = optimizer();
        assert!(o.should_optimize(5.0));
        o.optimize(Some(&verdict(0.0)));
        assert!(!o.should_optimize(5.0));
        {
            let mut st = o.state.write();
            st.last_optimization = Some(Utc::now() - Duration::hours(6));
        }
        assert!(o.should_optimize(5.0));
    }

    #[test]
    fn snapshots_bounded_to_fifty() {
        let (o, _d) = optimizer();
        for _ in 0..60 {
            o.optimize(Some(&verdict(0.0)));
        }
        assert_eq!(o.state.read().performance_snapshots.len(), SNAPSHOT_LIMIT);
    }

    #[test]
    fn journal_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("optimizer_state.json");
        let journal_path = dir.path().join("trade_history.json");
        {
            let o = StrategyOptimizer::new(&state_path, &journal_path);
            let id = o.log_trade("BTC", Direction::Short, 100.0, 1.0, 100.0);
            assert_eq!(id, 1);
            o.close_trade("BTC", 90.0, 10.0);
            o.optimize(Some(&verdict(-0.6)));
        }
        let o = StrategyOptimizer::new(&state_path, &journal_path);
        assert_eq!(o.current_regime(), Regime::StrongBear);
        let stats = o.performance_stats();
        assert_eq!(stats.trades, 1);
        assert!((stats.total_pnl - 10.0).abs() < 1e-9);
    }
}
