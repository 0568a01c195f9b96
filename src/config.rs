// =============================================================================
// Configuration — credentials + tunable engine settings with atomic save
// =============================================================================
//
// Credentials are loaded once at startup from environment variables, with a
// line-oriented `KEY=VALUE` file fallback (leading `export ` and surrounding
// quotes are stripped). Components receive the typed values; nothing reads
// the environment at request time.
//
// Engine settings live in a serde struct where every field carries a default,
// so a settings file written by an older build still deserialises.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Credentials
// =============================================================================

/// Path of the fallback credential file (under $HOME).
const CREDENTIAL_FILE: &str = ".meridian-env";

/// Typed credential bundle, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Master account address (0x…) queried on the venue info API.
    pub account_address: String,
    /// Signing key for venue exchange actions.
    pub api_secret: String,
    /// Sentiment/regime oracle key. Missing key degrades the oracle to
    /// cached/neutral verdicts.
    pub perplexity_api_key: Option<String>,
    /// Telegram notifier credentials. Missing keys silence notifications.
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    /// Single-wallet fallback for the farming agent when no wallets file
    /// exists.
    pub farming_wallet_key: Option<String>,
}

impl Credentials {
    /// Load credentials for the trading agent. The venue keys are required.
    pub fn load() -> Result<Self> {
        let file = parse_credential_file(&credential_file_path());

        let get = |name: &str| -> Option<String> {
            std::env::var(name).ok().or_else(|| file.get(name).cloned())
        };

        let account_address = match get("HL_ACCOUNT_ADDRESS") {
            Some(v) => v,
            None => bail!(
                "missing credential HL_ACCOUNT_ADDRESS (set env var or add to ~/{})",
                CREDENTIAL_FILE
            ),
        };
        let api_secret = match get("HL_API_SECRET") {
            Some(v) => v,
            None => bail!(
                "missing credential HL_API_SECRET (set env var or add to ~/{})",
                CREDENTIAL_FILE
            ),
        };

        Ok(Self {
            account_address,
            api_secret,
            perplexity_api_key: get("PERPLEXITY_API_KEY"),
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: get("TELEGRAM_CHAT_ID"),
            farming_wallet_key: get("FARMING_WALLET_KEY"),
        })
    }

    /// Load credentials for the farming agent. Venue keys are not needed
    /// there, so nothing is required.
    pub fn load_for_farming() -> Self {
        let file = parse_credential_file(&credential_file_path());
        let get = |name: &str| -> Option<String> {
            std::env::var(name).ok().or_else(|| file.get(name).cloned())
        };

        Self {
            account_address: get("HL_ACCOUNT_ADDRESS").unwrap_or_default(),
            api_secret: get("HL_API_SECRET").unwrap_or_default(),
            perplexity_api_key: get("PERPLEXITY_API_KEY"),
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: get("TELEGRAM_CHAT_ID"),
            farming_wallet_key: get("FARMING_WALLET_KEY"),
        }
    }
}

fn credential_file_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(CREDENTIAL_FILE)
}

/// Parse a `KEY=VALUE` credential file. Lines may carry an `export ` prefix
/// and values may be quoted; comments and blank lines are skipped.
pub fn parse_credential_file(path: &Path) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(content) = std::fs::read_to_string(path) else {
        return map;
    };

    for line in content.lines() {
        let mut line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("export ") {
            line = rest;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_string();
        let value = value
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .to_string();
        map.insert(key, value);
    }

    map
}

impl std::fmt::Display for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credentials(account={}…)", &self.account_address.chars().take(10).collect::<String>())
    }
}

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_assets() -> Vec<String> {
    vec![
        "BTC".to_string(),
        "ETH".to_string(),
        "SOL".to_string(),
        "HYPE".to_string(),
        "CRV".to_string(),
        "DYDX".to_string(),
        "ZRO".to_string(),
        "xyz:GOLD".to_string(),
        "xyz:SILVER".to_string(),
    ]
}

fn default_tiers() -> Vec<Tier> {
    vec![
        Tier { min_equity: 0.0, max_equity: 30.0, leverage: 3, risk_pct: 0.30, tp_pct: 0.03, sl_pct: 0.015 },
        Tier { min_equity: 30.0, max_equity: 70.0, leverage: 5, risk_pct: 0.40, tp_pct: 0.035, sl_pct: 0.018 },
        Tier { min_equity: 70.0, max_equity: f64::INFINITY, leverage: 5, risk_pct: 0.50, tp_pct: 0.04, sl_pct: 0.02 },
    ]
}

fn default_bb_period() -> usize {
    20
}

fn default_bb_std() -> f64 {
    2.0
}

fn default_rsi_period() -> usize {
    14
}

fn default_adx_period() -> usize {
    14
}

fn default_extreme_rsi() -> f64 {
    25.0
}

fn default_candle_interval() -> String {
    "15m".to_string()
}

fn default_lookback_candles() -> usize {
    100
}

fn default_check_interval_secs() -> u64 {
    45
}

fn default_sentiment_ttl_mins() -> i64 {
    60
}

fn default_max_drawdown_pct() -> f64 {
    0.25
}

fn default_max_open_positions() -> usize {
    3
}

fn default_trailing_activation() -> f64 {
    0.02
}

fn default_trailing_distance() -> f64 {
    0.01
}

fn default_partial_tp_threshold() -> f64 {
    0.025
}

fn default_partial_tp_fraction() -> f64 {
    0.5
}

fn default_min_notional() -> f64 {
    10.0
}

fn default_optimize_interval_hours() -> f64 {
    5.0
}

fn default_volume_ratio_threshold() -> f64 {
    1.2
}

// =============================================================================
// Tier table
// =============================================================================

/// One equity bucket: leverage, risk fraction, and bracket percentages for
/// accounts whose value falls in `[min_equity, max_equity)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tier {
    pub min_equity: f64,
    pub max_equity: f64,
    pub leverage: u32,
    pub risk_pct: f64,
    pub tp_pct: f64,
    pub sl_pct: f64,
}

// =============================================================================
// BotConfig
// =============================================================================

/// Tunable settings for the trading agent. Every field has a serde default so
/// older settings files deserialise cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Markets the engine scans. Symbols carrying a `xyz:` prefix live on the
    /// secondary (commodities) namespace and are isolated-margin only.
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,

    /// Equity-bucket parameter rows; contiguous intervals covering [0, ∞).
    #[serde(default = "default_tiers")]
    pub tiers: Vec<Tier>,

    // --- Indicator periods ---------------------------------------------------
    #[serde(default = "default_bb_period")]
    pub bb_period: usize,
    #[serde(default = "default_bb_std")]
    pub bb_std: f64,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_adx_period")]
    pub adx_period: usize,

    /// RSI below this on 1h or primary timeframe short-circuits to LONG.
    #[serde(default = "default_extreme_rsi")]
    pub extreme_rsi_threshold: f64,

    /// Last-bar volume divided by the rolling mean must meet this for the
    /// mean-reversion signals to count.
    #[serde(default = "default_volume_ratio_threshold")]
    pub volume_ratio_threshold: f64,

    // --- Timeframes & cadence ------------------------------------------------
    #[serde(default = "default_candle_interval")]
    pub candle_interval: String,
    #[serde(default = "default_lookback_candles")]
    pub lookback_candles: usize,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_sentiment_ttl_mins")]
    pub sentiment_ttl_mins: i64,
    #[serde(default = "default_optimize_interval_hours")]
    pub optimize_interval_hours: f64,

    // --- Risk limits ---------------------------------------------------------
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    #[serde(default = "default_trailing_activation")]
    pub trailing_stop_activation: f64,
    #[serde(default = "default_trailing_distance")]
    pub trailing_stop_distance: f64,
    #[serde(default = "default_partial_tp_threshold")]
    pub partial_tp_threshold: f64,
    #[serde(default = "default_partial_tp_fraction")]
    pub partial_tp_fraction: f64,
    #[serde(default = "default_min_notional")]
    pub min_notional_usd: f64,
}

impl Default for BotConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("BotConfig defaults")
    }
}

impl BotConfig {
    /// Load settings from a JSON file at `path`, falling back to defaults
    /// when the file is absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(path = %path.display(), assets = ?config.assets, "config loaded");
        Ok(config)
    }

    /// The active tier is the first row whose half-open equity interval
    /// contains `equity`; the last row is used past the table's end.
    pub fn tier_for(&self, equity: f64) -> &Tier {
        self.tiers
            .iter()
            .find(|t| equity >= t.min_equity && equity < t.max_equity)
            .unwrap_or_else(|| self.tiers.last().expect("tier table non-empty"))
    }

    /// Candle interval duration in milliseconds.
    pub fn interval_ms(interval: &str) -> i64 {
        match interval {
            "1m" => 60_000,
            "5m" => 300_000,
            "15m" => 900_000,
            "1h" => 3_600_000,
            "4h" => 14_400_000,
            _ => 900_000,
        }
    }
}

// =============================================================================
// Namespace helpers
// =============================================================================

/// Secondary (commodities) venue namespace.
pub const SECONDARY_NAMESPACE: &str = "xyz";

/// True when the symbol lives on the secondary namespace.
pub fn is_secondary_asset(asset: &str) -> bool {
    asset.starts_with("xyz:")
}

/// Namespace of a symbol: "" for the default perps namespace.
pub fn namespace_of(asset: &str) -> &str {
    match asset.split_once(':') {
        Some((ns, _)) => ns,
        None => "",
    }
}

/// Symbol without its namespace prefix.
pub fn base_symbol(asset: &str) -> &str {
    match asset.split_once(':') {
        Some((_, base)) => base,
        None => asset,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = BotConfig::default();
        assert_eq!(cfg.assets.len(), 9);
        assert_eq!(cfg.assets[0], "BTC");
        assert_eq!(cfg.tiers.len(), 3);
        assert_eq!(cfg.check_interval_secs, 45);
        assert_eq!(cfg.max_open_positions, 3);
        assert!((cfg.max_drawdown_pct - 0.25).abs() < f64::EPSILON);
        assert!((cfg.partial_tp_threshold - 0.025).abs() < f64::EPSILON);
    }

    #[test]
    fn tier_intervals_cover_all_equity() {
        let cfg = BotConfig::default();
        let t0 = cfg.tier_for(0.0);
        assert_eq!(t0.leverage, 3);
        let t1 = cfg.tier_for(30.0);
        assert_eq!(t1.leverage, 5);
        assert!((t1.risk_pct - 0.40).abs() < f64::EPSILON);
        let t2 = cfg.tier_for(1_000_000.0);
        assert!((t2.risk_pct - 0.50).abs() < f64::EPSILON);
    }

    #[test]
    fn tier_boundaries_are_half_open() {
        let cfg = BotConfig::default();
        // 29.999 belongs to tier 0, 30.0 exactly to tier 1.
        assert_eq!(cfg.tier_for(29.999).leverage, 3);
        assert_eq!(cfg.tier_for(30.0).leverage, 5);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "assets": ["ETH"], "max_open_positions": 1 }"#;
        let cfg: BotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.assets, vec!["ETH"]);
        assert_eq!(cfg.max_open_positions, 1);
        assert_eq!(cfg.rsi_period, 14);
        assert_eq!(cfg.tiers.len(), 3);
    }

    #[test]
    fn namespace_helpers() {
        assert!(is_secondary_asset("xyz:GOLD"));
        assert!(!is_secondary_asset("BTC"));
        assert_eq!(namespace_of("xyz:GOLD"), "xyz");
        assert_eq!(namespace_of("ETH"), "");
        assert_eq!(base_symbol("xyz:SILVER"), "SILVER");
        assert_eq!(base_symbol("SOL"), "SOL");
    }

    #[test]
    fn interval_ms_mapping() {
        assert_eq!(BotConfig::interval_ms("15m"), 900_000);
        assert_eq!(BotConfig::interval_ms("1h"), 3_600_000);
        assert_eq!(BotConfig::interval_ms("4h"), 14_400_000);
        // Unknown intervals fall back to the primary timeframe.
        assert_eq!(BotConfig::interval_ms("2d"), 900_000);
    }

    #[test]
    fn credential_file_parsing_strips_export_and_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "# comment").unwrap();
        writeln!(f, "export FOO=\"bar\"").unwrap();
        writeln!(f, "BAZ='qux'").unwrap();
        writeln!(f, "PLAIN=value").unwrap();
        writeln!(f, "not a pair").unwrap();

        let map = parse_credential_file(&path);
        assert_eq!(map.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(map.get("BAZ").map(String::as_str), Some("qux"));
        assert_eq!(map.get("PLAIN").map(String::as_str), Some("value"));
        assert_eq!(map.len(), 3);
    }
}
