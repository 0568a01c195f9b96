// =============================================================================
// Average Directional Index (ADX) with +DI / -DI
// =============================================================================
//
// Calculation pipeline:
//   1. Compute +DM / -DM per bar, masked to positive moves that dominate the
//      opposite direction.
//   2. Compute True Range (TR) per bar.
//   3. Wilder-smooth +DM, -DM, and TR (SMA seed over the first `period`
//      values, then (prev*(period-1) + x) / period).
//   4. +DI = 100 * smoothed(+DM) / smoothed(TR), -DI likewise.
//   5. DX  = 100 * |+DI - -DI| / (+DI + -DI)
//   6. ADX = mean of the trailing `period` DX values.
//
// Bars where the smoothed TR or the DI sum is zero contribute no DX value
// (the DI output for that bar is neutral zero).
// =============================================================================

/// ADX output with the final directional index values.
#[derive(Debug, Clone, Default)]
pub struct AdxResult {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// Compute ADX and ±DI from high/low/close series.
///
/// Returns a neutral all-zero result when fewer than `period + 1` closes are
/// available or `period` is zero, matching the scorer's "no trend signal"
/// interpretation.
pub fn calculate_adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> AdxResult {
    let n = closes.len();
    if period == 0 || n < period + 1 || highs.len() != n || lows.len() != n {
        return AdxResult::default();
    }

    let bars = n - 1;
    let mut tr = Vec::with_capacity(bars);
    let mut plus_dm = Vec::with_capacity(bars);
    let mut minus_dm = Vec::with_capacity(bars);

    for i in 1..n {
        let range = (highs[i] - lows[i])
            .max((highs[i] - closes[i - 1]).abs())
            .max((lows[i] - closes[i - 1]).abs());
        tr.push(range);

        let up_move = highs[i] - highs[i - 1];
        let down_move = lows[i - 1] - lows[i];

        plus_dm.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dm.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
    }

    let period_f = period as f64;
    let mut atr = tr[..period].iter().sum::<f64>() / period_f;
    let mut plus_smooth = plus_dm[..period].iter().sum::<f64>() / period_f;
    let mut minus_smooth = minus_dm[..period].iter().sum::<f64>() / period_f;

    let mut dx_values: Vec<f64> = Vec::with_capacity(bars.saturating_sub(period));
    let mut last_plus_di = 0.0;
    let mut last_minus_di = 0.0;

    for i in period..bars {
        atr = (atr * (period_f - 1.0) + tr[i]) / period_f;
        plus_smooth = (plus_smooth * (period_f - 1.0) + plus_dm[i]) / period_f;
        minus_smooth = (minus_smooth * (period_f - 1.0) + minus_dm[i]) / period_f;

        if atr == 0.0 {
            continue;
        }

        last_plus_di = 100.0 * plus_smooth / atr;
        last_minus_di = 100.0 * minus_smooth / atr;

        let di_sum = last_plus_di + last_minus_di;
        if di_sum == 0.0 {
            continue;
        }

        dx_values.push(100.0 * (last_plus_di - last_minus_di).abs() / di_sum);
    }

    if dx_values.is_empty() {
        return AdxResult::default();
    }

    let tail = if dx_values.len() >= period {
        &dx_values[dx_values.len() - period..]
    } else {
        &dx_values[..]
    };
    let adx = tail.iter().sum::<f64>() / tail.len() as f64;

    AdxResult {
        adx,
        plus_di: last_plus_di,
        minus_di: last_minus_di,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn series(n: usize, f: impl Fn(usize) -> (f64, f64, f64)) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let mut highs = Vec::with_capacity(n);
        let mut lows = Vec::with_capacity(n);
        let mut closes = Vec::with_capacity(n);
        for i in 0..n {
            let (h, l, c) = f(i);
            highs.push(h);
            lows.push(l);
            closes.push(c);
        }
        (highs, lows, closes)
    }

    #[test]
    fn adx_period_zero_is_neutral() {
        let (h, l, c) = series(50, |i| (i as f64 + 1.0, i as f64, i as f64 + 0.5));
        let r = calculate_adx(&h, &l, &c, 0);
        assert_eq!(r.adx, 0.0);
    }

    #[test]
    fn adx_insufficient_data_is_neutral() {
        let (h, l, c) = series(10, |i| (i as f64 + 1.0, i as f64, i as f64 + 0.5));
        let r = calculate_adx(&h, &l, &c, 14);
        assert_eq!(r.adx, 0.0);
        assert_eq!(r.plus_di, 0.0);
        assert_eq!(r.minus_di, 0.0);
    }

    #[test]
    fn adx_constantly_rising_series_is_bullish_and_trending() {
        // Higher highs and higher lows every bar.
        let (h, l, c) = series(60, |i| {
            let base = 100.0 + i as f64 * 2.0;
            (base + 1.5, base - 0.5, base + 1.0)
        });
        let r = calculate_adx(&h, &l, &c, 14);
        assert!(r.plus_di > r.minus_di, "+DI {} should exceed -DI {}", r.plus_di, r.minus_di);
        assert!(r.adx > 20.0, "expected trending ADX, got {}", r.adx);
    }

    #[test]
    fn adx_falling_series_is_bearish() {
        let (h, l, c) = series(60, |i| {
            let base = 500.0 - i as f64 * 2.0;
            (base + 0.5, base - 1.5, base - 1.0)
        });
        let r = calculate_adx(&h, &l, &c, 14);
        assert!(r.minus_di > r.plus_di);
    }

    #[test]
    fn adx_flat_market_is_neutral() {
        // Identical candles: no directional movement, no DX values.
        let (h, l, c) = series(60, |_| (101.0, 99.0, 100.0));
        let r = calculate_adx(&h, &l, &c, 14);
        assert!(r.adx < 1.0, "expected ADX near 0 for flat market, got {}", r.adx);
    }

    #[test]
    fn adx_result_range() {
        let (h, l, c) = series(100, |i| {
            let base = 50.0 + (i as f64 * 0.3).sin() * 10.0;
            (base + 1.0, base - 1.0, base + 0.5)
        });
        let r = calculate_adx(&h, &l, &c, 14);
        assert!((0.0..=100.0).contains(&r.adx), "ADX {} out of [0,100]", r.adx);
    }
}
