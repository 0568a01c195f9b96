// =============================================================================
// Liquidity-Zone Engine
// =============================================================================
//
// Identifies the price levels where resting interest clusters:
//   - swing highs/lows from price action (local extrema over a ±N bar window)
//   - volume-profile bins (where most trading happened)
//   - psychological round numbers (step scaled to price magnitude)
//   - liquidation clusters for common leverage levels
//
// The merged map drives a distance-based directional bias: price much closer
// to support than resistance leans LONG, and symmetrically SHORT. The bias is
// a pure function of the distance ratio and never consults indicators.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::Candle;
use crate::types::Bias;

/// Bars on each side of a swing extremum.
const SWING_LOOKBACK: usize = 5;
/// Volume-profile histogram resolution.
const VOLUME_BINS: usize = 20;
/// Top volume bins merged into the level sets.
const VOLUME_LEVELS: usize = 3;
/// Kept levels per side after merging.
const MAX_LEVELS: usize = 5;
/// Minimum window for any analysis.
const MIN_BARS: usize = 30;

/// Estimated liquidation price bands around the current price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationClusters {
    /// Below price — where longs opened here get stopped out.
    pub long_liquidations: Vec<f64>,
    /// Above price — where shorts opened here get stopped out.
    pub short_liquidations: Vec<f64>,
}

/// Full liquidity snapshot for one symbol at one price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityMap {
    /// Supports below price, nearest first (descending).
    pub key_supports: Vec<f64>,
    /// Resistances above price, nearest first (ascending).
    pub key_resistances: Vec<f64>,
    pub nearest_support: f64,
    pub nearest_resistance: f64,
    pub liquidity_bias: Bias,
    pub dist_to_support_pct: f64,
    pub dist_to_resistance_pct: f64,
    pub liquidation_clusters: LiquidationClusters,
}

/// Swing highs and lows: bars that are the extremum of their ±`lookback`
/// neighbourhood.
fn find_swing_levels(highs: &[f64], lows: &[f64], lookback: usize) -> (Vec<f64>, Vec<f64>) {
    let mut supports = Vec::new();
    let mut resistances = Vec::new();

    if highs.len() <= 2 * lookback {
        return (supports, resistances);
    }

    for i in lookback..highs.len() - lookback {
        let window_high = highs[i - lookback..=i + lookback]
            .iter()
            .fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        if highs[i] == window_high {
            resistances.push(highs[i]);
        }

        let window_low = lows[i - lookback..=i + lookback]
            .iter()
            .fold(f64::INFINITY, |a, &b| a.min(b));
        if lows[i] == window_low {
            supports.push(lows[i]);
        }
    }

    (supports, resistances)
}

/// Top-volume price levels from a fixed-bin histogram over the close range.
fn find_volume_levels(closes: &[f64], volumes: &[f64], num_levels: usize) -> Vec<f64> {
    let total: f64 = volumes.iter().sum();
    if closes.is_empty() || total == 0.0 {
        return Vec::new();
    }

    let price_min = closes.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let price_max = closes.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    if price_max <= price_min {
        return Vec::new();
    }

    let bin_width = (price_max - price_min) / VOLUME_BINS as f64;
    let mut bins = vec![0.0_f64; VOLUME_BINS];

    for (close, volume) in closes.iter().zip(volumes) {
        let mut idx = ((close - price_min) / bin_width) as usize;
        if idx >= VOLUME_BINS {
            idx = VOLUME_BINS - 1;
        }
        bins[idx] += volume;
    }

    let mut profile: Vec<(f64, f64)> = bins
        .iter()
        .enumerate()
        .map(|(i, &vol)| {
            let mid = price_min + bin_width * (i as f64 + 0.5);
            (mid, vol)
        })
        .collect();

    profile.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    profile.into_iter().take(num_levels).map(|(p, _)| p).collect()
}

/// Nearby psychological levels: two steps either side of the price, with the
/// step scaled to the price magnitude.
fn find_round_numbers(price: f64) -> (Vec<f64>, Vec<f64>) {
    let step = if price > 10_000.0 {
        1000.0
    } else if price > 1000.0 {
        100.0
    } else if price > 100.0 {
        10.0
    } else if price > 10.0 {
        5.0
    } else if price > 1.0 {
        0.5
    } else {
        0.05
    };

    let base = (price / step).floor() * step;
    let nearby = [
        base - step * 2.0,
        base - step,
        base,
        base + step,
        base + step * 2.0,
    ];

    let supports = nearby.iter().copied().filter(|&l| l < price).collect();
    let resistances = nearby.iter().copied().filter(|&l| l > price).collect();
    (supports, resistances)
}

/// Liquidation bands: `entry * (1 ± 1/leverage)` for leverage 3..20 step 2.
fn find_liquidation_clusters(price: f64) -> LiquidationClusters {
    let mut long_liquidations = Vec::new();
    let mut short_liquidations = Vec::new();

    for lev in (3..=20).step_by(2) {
        let lev = lev as f64;
        long_liquidations.push(round2(price * (1.0 - 1.0 / lev)));
        short_liquidations.push(round2(price * (1.0 + 1.0 / lev)));
    }

    LiquidationClusters {
        long_liquidations,
        short_liquidations,
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Full liquidity analysis for one symbol.
///
/// `candles` should be a longer window on a coarse bucket (≈100 one-hour
/// bars). Returns `None` below 30 bars. When the raw volume column is absent
/// (zero), `(high - low) * close` stands in as a proxy.
pub fn analyze_liquidity_zones(candles: &[Candle], current_price: f64) -> Option<LiquidityMap> {
    if candles.len() < MIN_BARS || current_price <= 0.0 {
        return None;
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let volumes: Vec<f64> = candles
        .iter()
        .map(|c| {
            if c.volume > 0.0 {
                c.volume
            } else {
                (c.high - c.low) * c.close
            }
        })
        .collect();

    let (swing_supports, swing_resistances) = find_swing_levels(&highs, &lows, SWING_LOOKBACK);
    let volume_levels = find_volume_levels(&closes, &volumes, VOLUME_LEVELS);
    let (round_supports, round_resistances) = find_round_numbers(current_price);
    let liquidation_clusters = find_liquidation_clusters(current_price);

    // Merge everything into two dedupe-by-price sets, split around the price.
    let mut support_keys: Vec<i64> = Vec::new();
    let mut resistance_keys: Vec<i64> = Vec::new();

    let mut push_level = |level: f64, keys: &mut Vec<i64>| {
        let key = (round4(level) * 10_000.0).round() as i64;
        if !keys.contains(&key) {
            keys.push(key);
        }
    };

    for &s in swing_supports.iter().filter(|&&s| s < current_price) {
        push_level(s, &mut support_keys);
    }
    for &r in swing_resistances.iter().filter(|&&r| r > current_price) {
        push_level(r, &mut resistance_keys);
    }
    for &lvl in &volume_levels {
        if lvl < current_price {
            push_level(lvl, &mut support_keys);
        } else if lvl > current_price {
            push_level(lvl, &mut resistance_keys);
        }
    }
    for &s in &round_supports {
        push_level(s, &mut support_keys);
    }
    for &r in &round_resistances {
        push_level(r, &mut resistance_keys);
    }

    let mut supports: Vec<f64> = support_keys.iter().map(|&k| k as f64 / 10_000.0).collect();
    let mut resistances: Vec<f64> = resistance_keys.iter().map(|&k| k as f64 / 10_000.0).collect();

    // Supports descending (nearest first), resistances ascending.
    supports.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    resistances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    supports.truncate(MAX_LEVELS);
    resistances.truncate(MAX_LEVELS);

    let nearest_support = supports.first().copied().unwrap_or(current_price * 0.97);
    let nearest_resistance = resistances.first().copied().unwrap_or(current_price * 1.03);

    let dist_to_support = (current_price - nearest_support) / current_price;
    let dist_to_resistance = (nearest_resistance - current_price) / current_price;

    // Closer to one side by at least 2x leans that way.
    let liquidity_bias = if dist_to_support < dist_to_resistance * 0.5 {
        Bias::Long
    } else if dist_to_resistance < dist_to_support * 0.5 {
        Bias::Short
    } else {
        Bias::Neutral
    };

    Some(LiquidityMap {
        key_supports: supports,
        key_resistances: resistances,
        nearest_support,
        nearest_resistance,
        liquidity_bias,
        dist_to_support_pct: round2(dist_to_support * 100.0),
        dist_to_resistance_pct: round2(dist_to_resistance * 100.0),
        liquidation_clusters,
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(i: usize, close: f64, high: f64, low: f64, volume: f64) -> Candle {
        Candle::new(i as i64 * 3_600_000, close, high, low, close, volume)
    }

    fn wave(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.4).sin() * 8.0;
                candle(i, base, base + 1.0, base - 1.0, 50.0)
            })
            .collect()
    }

    #[test]
    fn too_few_bars_returns_none() {
        assert!(analyze_liquidity_zones(&wave(29), 100.0).is_none());
        assert!(analyze_liquidity_zones(&wave(30), 100.0).is_some());
    }

    #[test]
    fn supports_below_resistances_above() {
        let map = analyze_liquidity_zones(&wave(100), 100.0).unwrap();
        assert!(!map.key_supports.is_empty());
        assert!(!map.key_resistances.is_empty());
        for &s in &map.key_supports {
            assert!(s < 100.0, "support {s} not below price");
        }
        for &r in &map.key_resistances {
            assert!(r > 100.0, "resistance {r} not above price");
        }
    }

    #[test]
    fn levels_bounded_and_unique() {
        let map = analyze_liquidity_zones(&wave(100), 100.0).unwrap();
        assert!(map.key_supports.len() <= 5);
        assert!(map.key_resistances.len() <= 5);

        let mut s = map.key_supports.clone();
        s.dedup();
        assert_eq!(s.len(), map.key_supports.len());
        let mut r = map.key_resistances.clone();
        r.dedup();
        assert_eq!(r.len(), map.key_resistances.len());
    }

    #[test]
    fn supports_sorted_descending_resistances_ascending() {
        let map = analyze_liquidity_zones(&wave(100), 100.0).unwrap();
        for pair in map.key_supports.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
        for pair in map.key_resistances.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn bias_long_when_hugging_support() {
        // Price sits just above a strong support cluster built well below the
        // round-number lattice, so support distance << resistance distance.
        let candles: Vec<Candle> = (0..100)
            .map(|i| candle(i, 99.9, 107.0, 99.8, 50.0))
            .collect();
        let map = analyze_liquidity_zones(&candles, 100.0).unwrap();
        assert!(map.dist_to_support_pct < map.dist_to_resistance_pct);
        assert_eq!(map.liquidity_bias, Bias::Long);
    }

    #[test]
    fn liquidation_clusters_bracket_price() {
        let map = analyze_liquidity_zones(&wave(100), 100.0).unwrap();
        let clusters = &map.liquidation_clusters;
        assert_eq!(clusters.long_liquidations.len(), 9);
        assert_eq!(clusters.short_liquidations.len(), 9);
        for &l in &clusters.long_liquidations {
            assert!(l < 100.0);
        }
        for &s in &clusters.short_liquidations {
            assert!(s > 100.0);
        }
        // 3x leverage bands: 100 * (1 ∓ 1/3).
        assert!((clusters.long_liquidations[0] - 66.67).abs() < 0.01);
        assert!((clusters.short_liquidations[0] - 133.33).abs() < 0.01);
    }

    #[test]
    fn synthesizes_volume_from_range_when_absent() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.4).sin() * 8.0;
                candle(i, base, base + 1.0, base - 1.0, 0.0)
            })
            .collect();
        // Zero raw volume must not erase the volume-profile source entirely.
        let map = analyze_liquidity_zones(&candles, 100.0).unwrap();
        assert!(!map.key_supports.is_empty());
    }

    #[test]
    fn round_number_step_scales_with_magnitude() {
        let (s, r) = find_round_numbers(25_000.0);
        assert!(s.iter().all(|&x| x % 1000.0 == 0.0));
        assert!(r.iter().all(|&x| x % 1000.0 == 0.0));
        let (s, _) = find_round_numbers(3.2);
        assert!(s.contains(&3.0));
    }
}
