// =============================================================================
// Position Manager — trailing stop, partial take-profit, drawdown breaker
// =============================================================================
//
// Runs every tick before new entries, over the venue-reported open positions.
// It only *decides*; the trading engine executes the reduce-only closes and
// reports back, which keeps the decision rules pure and testable.
//
// Per position:
//   1. Partial take-profit — the first time pnl% reaches the threshold, close
//      a fixed fraction of the open size; at most once per position.
//   2. Trailing stop — once peak pnl% reaches the activation level, a trail
//      is armed; a retrace of the trail distance closes the remainder.
//
// Account-wide:
//   3. Drawdown circuit-breaker — drawdown from peak equity beyond the limit
//      pauses entries; trading resumes when drawdown recovers below half the
//      limit.
// =============================================================================

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::venue::VenuePosition;

/// A reduce-only close the engine should execute.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionAction {
    /// First-touch partial close of `size` at the current profit level.
    PartialClose {
        asset: String,
        /// Positive close size (fraction of the open size).
        size: f64,
        /// Closing a long sells; closing a short buys.
        close_is_buy: bool,
        pnl_pct: f64,
    },
    /// Trail retrace — close the full remaining size.
    TrailingClose {
        asset: String,
        size: f64,
        close_is_buy: bool,
        peak_pnl_pct: f64,
        pnl_pct: f64,
    },
}

/// Tunable knobs, taken from the bot config at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionRules {
    pub partial_tp_threshold: f64,
    pub partial_tp_fraction: f64,
    pub trailing_activation: f64,
    pub trailing_distance: f64,
    pub max_drawdown_pct: f64,
}

impl Default for PositionRules {
    fn default() -> Self {
        Self {
            partial_tp_threshold: 0.025,
            partial_tp_fraction: 0.5,
            trailing_activation: 0.02,
            trailing_distance: 0.01,
            max_drawdown_pct: 0.25,
        }
    }
}

/// Thread-safe per-asset exit state plus the account drawdown breaker.
pub struct PositionManager {
    rules: PositionRules,
    peak_pnl: RwLock<HashMap<String, f64>>,
    partial_closed: RwLock<HashSet<String>>,
    peak_equity: RwLock<f64>,
    paused: RwLock<bool>,
}

impl PositionManager {
    pub fn new(rules: PositionRules, initial_equity: f64) -> Self {
        Self {
            rules,
            peak_pnl: RwLock::new(HashMap::new()),
            partial_closed: RwLock::new(HashSet::new()),
            peak_equity: RwLock::new(initial_equity.max(0.0)),
            paused: RwLock::new(false),
        }
    }

    // -------------------------------------------------------------------------
    // Per-tick decision pass
    // -------------------------------------------------------------------------

    /// Evaluate every open position and return the closes to execute.
    /// Also prunes per-asset state for symbols that are no longer open.
    pub fn observe(&self, positions: &[VenuePosition]) -> Vec<PositionAction> {
        let mut actions = Vec::new();

        for pos in positions {
            let size = pos.szi.abs();
            let position_value = size * pos.entry_px;
            if pos.entry_px <= 0.0 || size <= 0.0 || position_value <= 0.0 {
                continue;
            }

            let is_long = pos.szi > 0.0;
            let pnl_pct = pos.unrealized_pnl / position_value;

            // 1. Partial take-profit, once per position.
            if pnl_pct >= self.rules.partial_tp_threshold
                && !self.partial_closed.read().contains(&pos.coin)
            {
                actions.push(PositionAction::PartialClose {
                    asset: pos.coin.clone(),
                    size: size * self.rules.partial_tp_fraction,
                    close_is_buy: !is_long,
                    pnl_pct,
                });
            }

            // 2. Peak tracking + trailing stop.
            let prev_peak = self.peak_pnl.read().get(&pos.coin).copied().unwrap_or(0.0);
            if pnl_pct > prev_peak {
                self.peak_pnl.write().insert(pos.coin.clone(), pnl_pct);
                if pnl_pct >= self.rules.trailing_activation
                    && prev_peak < self.rules.trailing_activation
                {
                    info!(
                        asset = %pos.coin,
                        pnl_pct = pnl_pct * 100.0,
                        "trailing stop armed"
                    );
                }
            }

            let peak = self.peak_pnl.read().get(&pos.coin).copied().unwrap_or(0.0);
            if peak >= self.rules.trailing_activation {
                let retrace = peak - pnl_pct;
                if retrace >= self.rules.trailing_distance {
                    info!(
                        asset = %pos.coin,
                        peak = peak * 100.0,
                        current = pnl_pct * 100.0,
                        "trailing stop triggered"
                    );
                    actions.push(PositionAction::TrailingClose {
                        asset: pos.coin.clone(),
                        size,
                        close_is_buy: !is_long,
                        peak_pnl_pct: peak,
                        pnl_pct,
                    });
                }
            }
        }

        // Prune state for assets no longer open.
        let open: HashSet<&str> = positions.iter().map(|p| p.coin.as_str()).collect();
        self.peak_pnl.write().retain(|asset, _| open.contains(asset.as_str()));
        self.partial_closed
            .write()
            .retain(|asset| open.contains(asset.as_str()));

        actions
    }

    /// Record that a partial close executed, so it never re-fires.
    pub fn mark_partial_closed(&self, asset: &str) {
        self.partial_closed.write().insert(asset.to_string());
    }

    /// Clear peak tracking after a trailing close attempt.
    pub fn clear_peak(&self, asset: &str) {
        self.peak_pnl.write().remove(asset);
    }

    pub fn peak_pnl(&self, asset: &str) -> Option<f64> {
        self.peak_pnl.read().get(asset).copied()
    }

    // -------------------------------------------------------------------------
    // Drawdown circuit-breaker
    // -------------------------------------------------------------------------

    /// Update the breaker with the current account value. Returns the paused
    /// flag after the update.
    pub fn check_drawdown(&self, equity: f64) -> bool {
        {
            let mut peak = self.peak_equity.write();
            if equity > *peak {
                *peak = equity;
            }
        }

        let peak = *self.peak_equity.read();
        if peak <= 0.0 {
            return *self.paused.read();
        }

        let drawdown = (peak - equity) / peak;
        let mut paused = self.paused.write();

        if drawdown > self.rules.max_drawdown_pct {
            if !*paused {
                warn!(
                    drawdown = drawdown * 100.0,
                    peak,
                    equity,
                    "max drawdown breached — pausing entries"
                );
                *paused = true;
            }
        } else if *paused && drawdown < self.rules.max_drawdown_pct * 0.5 {
            info!(drawdown = drawdown * 100.0, "drawdown recovered — resuming");
            *paused = false;
        }

        *paused
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.read()
    }
}

impl std::fmt::Debug for PositionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionManager")
            .field("tracked_peaks", &self.peak_pnl.read().len())
            .field("paused", &*self.paused.read())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn long(coin: &str, entry: f64, size: f64, current: f64) -> VenuePosition {
        VenuePosition {
            coin: coin.to_string(),
            szi: size,
            entry_px: entry,
            unrealized_pnl: (current - entry) * size,
        }
    }

    fn manager() -> PositionManager {
        PositionManager::new(PositionRules::default(), 100.0)
    }

    #[test]
    fn partial_then_trail_lifecycle() {
        let m = manager();

        // Price 102.5: +2.5% → partial close of 50%.
        let actions = m.observe(&[long("BTC", 100.0, 1.0, 102.5)]);
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            PositionAction::PartialClose { asset, size, close_is_buy, pnl_pct } => {
                assert_eq!(asset, "BTC");
                assert!((size - 0.5).abs() < 1e-9);
                assert!(!close_is_buy);
                assert!((pnl_pct - 0.025).abs() < 1e-9);
            }
            other => panic!("expected partial close, got {other:?}"),
        }
        m.mark_partial_closed("BTC");

        // Price 103 (peak +3%): nothing fires, trail armed.
        let actions = m.observe(&[long("BTC", 100.0, 0.5, 103.0)]);
        assert!(actions.is_empty());
        assert!((m.peak_pnl("BTC").unwrap() - 0.03).abs() < 1e-9);

        // Price 102: retrace 1% from peak → full close of remainder.
        let actions = m.observe(&[long("BTC", 100.0, 0.5, 102.0)]);
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            PositionAction::TrailingClose { asset, size, peak_pnl_pct, .. } => {
                assert_eq!(asset, "BTC");
                assert!((size - 0.5).abs() < 1e-9);
                assert!((peak_pnl_pct - 0.03).abs() < 1e-9);
            }
            other => panic!("expected trailing close, got {other:?}"),
        }

        m.clear_peak("BTC");
        assert!(m.peak_pnl("BTC").is_none());
    }

    #[test]
    fn partial_fires_at_most_once() {
        let m = manager();
        let pos = [long("ETH", 100.0, 2.0, 103.0)];

        let first = m.observe(&pos);
        assert!(matches!(first[0], PositionAction::PartialClose { .. }));
        m.mark_partial_closed("ETH");

        let again = m.observe(&pos);
        assert!(!again
            .iter()
            .any(|a| matches!(a, PositionAction::PartialClose { .. })));
    }

    #[test]
    fn trail_needs_activation_before_retrace() {
        let m = manager();
        // Peak +1.5% (below 2% activation), retrace to 0.4%.
        m.observe(&[long("SOL", 100.0, 1.0, 101.5)]);
        let actions = m.observe(&[long("SOL", 100.0, 1.0, 100.4)]);
        assert!(actions.is_empty());
    }

    #[test]
    fn short_positions_close_with_buys() {
        let m = manager();
        // Short 1 @ 100, price drops to 97: +3% on position value.
        let pos = VenuePosition {
            coin: "BTC".to_string(),
            szi: -1.0,
            entry_px: 100.0,
            unrealized_pnl: 3.0,
        };
        let actions = m.observe(&[pos]);
        match &actions[0] {
            PositionAction::PartialClose { close_is_buy, .. } => assert!(close_is_buy),
            other => panic!("expected partial close, got {other:?}"),
        }
    }

    #[test]
    fn state_pruned_when_position_disappears() {
        let m = manager();
        m.observe(&[long("BTC", 100.0, 1.0, 103.0)]);
        m.mark_partial_closed("BTC");
        assert!(m.peak_pnl("BTC").is_some());

        // Position gone: tracking is dropped.
        m.observe(&[]);
        assert!(m.peak_pnl("BTC").is_none());
        // A re-opened position may partial again.
        let actions = m.observe(&[long("BTC", 100.0, 1.0, 103.0)]);
        assert!(matches!(actions[0], PositionAction::PartialClose { .. }));
    }

    #[test]
    fn drawdown_pauses_and_recovers_at_half() {
        let m = manager();
        assert!(!m.check_drawdown(100.0));
        // 26% drawdown: paused.
        assert!(m.check_drawdown(74.0));
        assert!(m.is_paused());
        // 20% drawdown: still paused (recovery needs < 12.5%).
        assert!(m.check_drawdown(80.0));
        // 10% drawdown: resumed.
        assert!(!m.check_drawdown(90.0));
        assert!(!m.is_paused());
    }

    #[test]
    fn peak_equity_ratchets_up() {
        let m = manager();
        m.check_drawdown(200.0);
        // 25% off the new 200 peak trips the breaker.
        assert!(m.check_drawdown(148.0));
    }
}
