// =============================================================================
// Shared types used across the Meridian trading and farming agents
// =============================================================================

use serde::{Deserialize, Serialize};

/// Side of a perpetual position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    Short,
}

impl Direction {
    /// +1.0 for longs, -1.0 for shorts. Used in every PnL identity.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    pub fn is_buy(self) -> bool {
        matches!(self, Self::Long)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Directional verdict from the sentiment oracle or the liquidity map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    #[serde(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    Short,
    #[serde(rename = "NEUTRAL")]
    Neutral,
}

impl Default for Bias {
    fn default() -> Self {
        Self::Neutral
    }
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Coarse market regime from the macro optimizer.
///
/// Mapped from the oracle's regime score with thresholds at ±0.2 and ±0.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    #[serde(rename = "STRONG_BULL")]
    StrongBull,
    #[serde(rename = "MILD_BULL")]
    MildBull,
    #[serde(rename = "RANGING")]
    Ranging,
    #[serde(rename = "MILD_BEAR")]
    MildBear,
    #[serde(rename = "STRONG_BEAR")]
    StrongBear,
}

impl Regime {
    /// Classify a regime score in [-1, 1].
    pub fn from_score(score: f64) -> Self {
        if score <= -0.5 {
            Self::StrongBear
        } else if score <= -0.2 {
            Self::MildBear
        } else if score >= 0.5 {
            Self::StrongBull
        } else if score >= 0.2 {
            Self::MildBull
        } else {
            Self::Ranging
        }
    }
}

impl Default for Regime {
    fn default() -> Self {
        Self::Ranging
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrongBull => write!(f, "STRONG_BULL"),
            Self::MildBull => write!(f, "MILD_BULL"),
            Self::Ranging => write!(f, "RANGING"),
            Self::MildBear => write!(f, "MILD_BEAR"),
            Self::StrongBear => write!(f, "STRONG_BEAR"),
        }
    }
}

/// Why a trade left the book. Serialized into the trade journal, so the wire
/// names are pinned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "tp")]
    TakeProfit,
    #[serde(rename = "sl")]
    StopLoss,
    #[serde(rename = "trailing_stop")]
    TrailingStop,
    #[serde(rename = "unknown")]
    Unknown,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TakeProfit => write!(f, "tp"),
            Self::StopLoss => write!(f, "sl"),
            Self::TrailingStop => write!(f, "trailing_stop"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_sign() {
        assert_eq!(Direction::Long.sign(), 1.0);
        assert_eq!(Direction::Short.sign(), -1.0);
        assert!(Direction::Long.is_buy());
        assert!(!Direction::Short.is_buy());
    }

    #[test]
    fn regime_from_score_thresholds() {
        assert_eq!(Regime::from_score(-0.7), Regime::StrongBear);
        assert_eq!(Regime::from_score(-0.5), Regime::StrongBear);
        assert_eq!(Regime::from_score(-0.3), Regime::MildBear);
        assert_eq!(Regime::from_score(0.0), Regime::Ranging);
        assert_eq!(Regime::from_score(0.2), Regime::MildBull);
        assert_eq!(Regime::from_score(0.6), Regime::StrongBull);
    }

    #[test]
    fn serde_wire_names_pinned() {
        assert_eq!(serde_json::to_string(&Direction::Long).unwrap(), "\"LONG\"");
        assert_eq!(
            serde_json::to_string(&Regime::StrongBear).unwrap(),
            "\"STRONG_BEAR\""
        );
        assert_eq!(
            serde_json::to_string(&ExitReason::TrailingStop).unwrap(),
            "\"trailing_stop\""
        );
        let d: Direction = serde_json::from_str("\"SHORT\"").unwrap();
        assert_eq!(d, Direction::Short);
    }

    #[test]
    fn display_matches_wire() {
        assert_eq!(Direction::Short.to_string(), "SHORT");
        assert_eq!(Bias::Neutral.to_string(), "NEUTRAL");
        assert_eq!(ExitReason::StopLoss.to_string(), "sl");
    }
}
