// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators used by the trading
// engine, plus the derived signal bundle computed per symbol per tick.
// =============================================================================

pub mod adx;
pub mod bollinger;
pub mod rsi;

use serde::{Deserialize, Serialize};

use crate::indicators::adx::calculate_adx;
use crate::indicators::bollinger::calculate_bollinger;
use crate::indicators::rsi::calculate_rsi;

// ---------------------------------------------------------------------------
// Candle
// ---------------------------------------------------------------------------

/// A single OHLCV candle from the venue's candle snapshot API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    /// Open time, milliseconds since epoch.
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

// ---------------------------------------------------------------------------
// Signal bundle
// ---------------------------------------------------------------------------

/// RSI above this is overbought, below `RSI_OVERSOLD` is oversold.
const RSI_OVERBOUGHT: f64 = 65.0;
const RSI_OVERSOLD: f64 = 35.0;
/// Minimum ADX to call the market trending.
const ADX_TRENDING: f64 = 20.0;
/// Bars in the rolling volume baseline.
const VOLUME_BASELINE_BARS: usize = 20;

/// Full indicator snapshot for one symbol on one timeframe.
///
/// Serialised into the trade journal at entry time, so the JSON field names
/// are pinned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalBundle {
    pub price: f64,
    pub rsi: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub bb_width: f64,
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub sma5: f64,
    pub volume_ratio: f64,

    // Derived booleans.
    pub above_upper_bb: bool,
    pub below_lower_bb: bool,
    pub rsi_overbought: bool,
    pub rsi_oversold: bool,
    pub trending: bool,
    pub trend_bullish: bool,
    pub trend_bearish: bool,
    pub momentum_bullish: bool,
    pub momentum_bearish: bool,
    pub volume_confirmed: bool,
}

/// Parameters for the bundle computation.
#[derive(Debug, Clone, Copy)]
pub struct SignalParams {
    pub bb_period: usize,
    pub bb_std: f64,
    pub rsi_period: usize,
    pub adx_period: usize,
    /// Last-bar volume over the rolling mean must reach this.
    pub volume_ratio_threshold: f64,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            bb_period: 20,
            bb_std: 2.0,
            rsi_period: 14,
            adx_period: 14,
            volume_ratio_threshold: 1.2,
        }
    }
}

/// Compute the full signal bundle for a candle window.
///
/// Returns `None` when fewer than `max(period) + 5` candles are available —
/// the scorer treats that as "no data this cycle".
pub fn compute_signals(candles: &[Candle], params: &SignalParams) -> Option<SignalBundle> {
    let min_len = params
        .bb_period
        .max(params.rsi_period)
        .max(params.adx_period)
        + 5;
    if candles.len() < min_len {
        return None;
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    let price = *closes.last()?;
    let rsi = calculate_rsi(&closes, params.rsi_period)?;
    let bb = calculate_bollinger(&closes, params.bb_period, params.bb_std)?;
    let adx = calculate_adx(&highs, &lows, &closes, params.adx_period);

    let sma5 = if closes.len() >= 5 {
        closes[closes.len() - 5..].iter().sum::<f64>() / 5.0
    } else {
        price
    };

    // Volume confirmation: last bar vs rolling mean. A zero-mean baseline
    // never confirms.
    let window = volumes.len().min(VOLUME_BASELINE_BARS);
    let baseline = volumes[volumes.len() - window..].iter().sum::<f64>() / window as f64;
    let last_volume = *volumes.last()?;
    let volume_ratio = if baseline > 0.0 {
        last_volume / baseline
    } else {
        0.0
    };
    let volume_confirmed = baseline > 0.0 && volume_ratio >= params.volume_ratio_threshold;

    Some(SignalBundle {
        price,
        rsi,
        bb_upper: bb.upper,
        bb_middle: bb.middle,
        bb_lower: bb.lower,
        bb_width: bb.width,
        adx: adx.adx,
        plus_di: adx.plus_di,
        minus_di: adx.minus_di,
        sma5,
        volume_ratio,

        above_upper_bb: price > bb.upper,
        below_lower_bb: price < bb.lower,
        rsi_overbought: rsi > RSI_OVERBOUGHT,
        rsi_oversold: rsi < RSI_OVERSOLD,
        trending: adx.adx > ADX_TRENDING,
        trend_bullish: adx.plus_di > adx.minus_di,
        trend_bearish: adx.minus_di > adx.plus_di,
        momentum_bullish: price > sma5,
        momentum_bearish: price < sma5,
        volume_confirmed,
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(i: usize, close: f64, volume: f64) -> Candle {
        Candle::new(i as i64 * 900_000, close, close + 0.5, close - 0.5, close, volume)
    }

    fn rising(n: usize) -> Vec<Candle> {
        (0..n).map(|i| candle(i, 100.0 + i as f64, 10.0)).collect()
    }

    #[test]
    fn bundle_requires_minimum_window() {
        let params = SignalParams::default();
        // max(period) + 5 = 25 candles required.
        assert!(compute_signals(&rising(24), &params).is_none());
        assert!(compute_signals(&rising(25), &params).is_some());
    }

    #[test]
    fn rising_series_is_bullish_everywhere() {
        let params = SignalParams::default();
        let bundle = compute_signals(&rising(60), &params).unwrap();
        assert!((bundle.rsi - 100.0).abs() < 1e-9);
        assert!(bundle.trending);
        assert!(bundle.trend_bullish);
        assert!(bundle.momentum_bullish);
        assert!(!bundle.momentum_bearish);
        assert!(bundle.plus_di > bundle.minus_di);
    }

    #[test]
    fn zero_volume_baseline_never_confirms() {
        let params = SignalParams::default();
        let candles: Vec<Candle> = (0..60).map(|i| candle(i, 100.0 + i as f64, 0.0)).collect();
        let bundle = compute_signals(&candles, &params).unwrap();
        assert!(!bundle.volume_confirmed);
        assert_eq!(bundle.volume_ratio, 0.0);
    }

    #[test]
    fn volume_spike_confirms() {
        let params = SignalParams::default();
        let mut candles: Vec<Candle> = (0..59).map(|i| candle(i, 100.0 + i as f64, 10.0)).collect();
        candles.push(candle(59, 160.0, 100.0));
        let bundle = compute_signals(&candles, &params).unwrap();
        assert!(bundle.volume_confirmed);
        assert!(bundle.volume_ratio > params.volume_ratio_threshold);
    }

    #[test]
    fn flat_series_is_neutral() {
        let params = SignalParams::default();
        let candles: Vec<Candle> = (0..60).map(|i| candle(i, 100.0, 10.0)).collect();
        let bundle = compute_signals(&candles, &params).unwrap();
        assert!(!bundle.trending);
        assert!(!bundle.above_upper_bb);
        assert!(!bundle.below_lower_bb);
        assert!(!bundle.momentum_bullish);
        assert!(!bundle.momentum_bearish);
    }

    #[test]
    fn snapshot_serde_field_names_pinned() {
        let params = SignalParams::default();
        let bundle = compute_signals(&rising(60), &params).unwrap();
        let json = serde_json::to_value(&bundle).unwrap();
        assert!(json.get("below_lower_bb").is_some());
        assert!(json.get("rsi_oversold").is_some());
        assert!(json.get("plus_di").is_some());
        assert!(json.get("volume_confirmed").is_some());
        let back: SignalBundle = serde_json::from_value(json).unwrap();
        assert_eq!(back.price, bundle.price);
    }
}
