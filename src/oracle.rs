// =============================================================================
// Sentiment / Regime Oracle — external text-scoring interface
// =============================================================================
//
// Two calls feed the engine:
//   - `macro_bias(symbol)`  → {LONG|SHORT|NEUTRAL, score ∈ [-1, 1]}
//   - `regime_verdict()`    → {regime, score, commentary}
//
// The oracle is allowed to fail. Bias results are cached per symbol with a
// TTL; on failure the cached value (if any) is reused, otherwise NEUTRAL.
//
// Score extraction runs three methods in order:
//   1. an explicit `SCORE: <number>` line (last matching line wins),
//   2. the last standalone signed decimal in the prose,
//   3. a polarity keyword count mapped onto {±0.2, ±0.4, ±0.6}.
// =============================================================================

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::types::{Bias, Regime};

const API_URL: &str = "https://api.perplexity.ai/chat/completions";
const BIAS_TIMEOUT: Duration = Duration::from_secs(45);
const REGIME_TIMEOUT: Duration = Duration::from_secs(60);

const BULLISH_WORDS: &[&str] = &[
    "bullish", "recovery", "bounce", "support holding", "accumulation",
    "buying", "upside", "breakout", "rally", "momentum up",
];
const BEARISH_WORDS: &[&str] = &[
    "bearish", "breakdown", "crash", "capitulation", "sell-off",
    "declining", "downside", "dump", "lower", "weak",
];

/// Directional verdict for one symbol.
#[derive(Debug, Clone, Copy)]
pub struct BiasVerdict {
    pub bias: Bias,
    pub score: f64,
}

impl Default for BiasVerdict {
    fn default() -> Self {
        Self {
            bias: Bias::Neutral,
            score: 0.0,
        }
    }
}

/// Market-regime verdict for the macro optimizer.
#[derive(Debug, Clone)]
pub struct RegimeVerdict {
    pub regime: Regime,
    pub score: f64,
    pub commentary: String,
}

#[derive(Debug, Clone)]
struct CachedBias {
    verdict: BiasVerdict,
    fetched_at: DateTime<Utc>,
}

/// Text-scoring oracle over the Perplexity chat API, with a per-symbol cache.
pub struct SentimentOracle {
    api_key: Option<String>,
    client: reqwest::Client,
    cache: RwLock<HashMap<String, CachedBias>>,
    ttl_mins: i64,
}

impl SentimentOracle {
    pub fn new(api_key: Option<String>, ttl_mins: i64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REGIME_TIMEOUT)
            .build()
            .expect("failed to build oracle http client");

        Self {
            api_key,
            client,
            cache: RwLock::new(HashMap::new()),
            ttl_mins,
        }
    }

    // -------------------------------------------------------------------------
    // Directional bias per symbol
    // -------------------------------------------------------------------------

    /// Directional bias for a symbol, served from the cache when fresh.
    ///
    /// Never fails: oracle errors fall back to the cached verdict (any age),
    /// then to NEUTRAL.
    pub async fn macro_bias(&self, symbol: &str) -> BiasVerdict {
        if let Some(cached) = self.cache.read().get(symbol) {
            let age_mins = (Utc::now() - cached.fetched_at).num_minutes();
            if age_mins < self.ttl_mins {
                return cached.verdict;
            }
        }

        match self.fetch_bias(symbol).await {
            Ok(verdict) => {
                self.cache.write().insert(
                    symbol.to_string(),
                    CachedBias {
                        verdict,
                        fetched_at: Utc::now(),
                    },
                );
                verdict
            }
            Err(e) => {
                warn!(symbol, error = %e, "oracle bias failed — using cached/neutral");
                self.cache
                    .read()
                    .get(symbol)
                    .map(|c| c.verdict)
                    .unwrap_or_default()
            }
        }
    }

    async fn fetch_bias(&self, symbol: &str) -> Result<BiasVerdict> {
        let Some(key) = &self.api_key else {
            anyhow::bail!("no oracle api key configured");
        };

        let today = Utc::now().format("%Y-%m-%d %H:%M UTC");
        let prompt = format!(
            "You are a crypto trading analyst. Analyze {symbol} market conditions right now ({today}). \
             Cover: price action, key support/resistance levels, recent news catalysts, \
             funding rates, whale activity, and macro factors. \
             Then give a directional score from -1.0 (very bearish) to +1.0 (very bullish). \
             Format your last line EXACTLY as: SCORE: [number]"
        );

        let text = self.chat(key, &prompt, 400, BIAS_TIMEOUT).await?;
        let preview: String = text.chars().take(200).collect();
        debug!(symbol, preview, "oracle bias response");

        let score = extract_score(&text);
        let bias = if score <= -0.25 {
            Bias::Short
        } else if score >= 0.25 {
            Bias::Long
        } else {
            Bias::Neutral
        };

        info!(symbol, %bias, score, "oracle bias");
        Ok(BiasVerdict { bias, score })
    }

    // -------------------------------------------------------------------------
    // Market regime
    // -------------------------------------------------------------------------

    /// Query the market-regime verdict. Returns `None` on any failure; the
    /// optimizer keeps its previous regime in that case.
    pub async fn regime_verdict(&self) -> Option<RegimeVerdict> {
        let Some(key) = self.api_key.clone() else {
            return None;
        };

        let today = Utc::now().format("%Y-%m-%d %H:%M UTC");
        let prompt = format!(
            "Date: {today}. Analyze the CURRENT crypto market regime. \
             Is it: trending (bull/bear), ranging, or volatile/choppy? \
             Key factors: BTC dominance trend, total market cap direction, \
             Fear & Greed Index, funding rates, major upcoming catalysts (CPI, FOMC, etc). \
             What is the OPTIMAL trading strategy right now? \
             Should a bot focus on: trend-following shorts, mean-reversion longs, \
             or stay flat? Give specific actionable advice. \
             SCORE the market from -1.0 (extreme bear, short everything) to +1.0 (extreme bull, long everything). \
             Format last line as: REGIME_SCORE: [number]"
        );

        match self.chat(&key, &prompt, 600, REGIME_TIMEOUT).await {
            Ok(text) => {
                let score = extract_score(&text);
                let regime = Regime::from_score(score);
                info!(%regime, score, "oracle regime verdict");
                Some(RegimeVerdict {
                    regime,
                    score,
                    commentary: text,
                })
            }
            Err(e) => {
                warn!(error = %e, "oracle regime query failed");
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    async fn chat(
        &self,
        key: &str,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String> {
        let body = json!({
            "model": "sonar-pro",
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.2,
            "max_tokens": max_tokens,
        });

        let resp = self
            .client
            .post(API_URL)
            .bearer_auth(key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .context("oracle request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("oracle API returned {status}");
        }

        let value: serde_json::Value = resp.json().await.context("oracle response not JSON")?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .context("oracle response missing content")?;

        Ok(content.to_string())
    }
}

impl std::fmt::Debug for SentimentOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentimentOracle")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("ttl_mins", &self.ttl_mins)
            .field("cached_symbols", &self.cache.read().len())
            .finish()
    }
}

// =============================================================================
// Score extraction
// =============================================================================

/// Extract a sentiment score in [-1, 1] from oracle prose.
pub fn extract_score(text: &str) -> f64 {
    // Method 1: explicit `SCORE:` / `REGIME_SCORE:` line — last match wins.
    let mut explicit = None;
    for line in text.lines() {
        if let Some(score) = parse_score_line(line) {
            explicit = Some(score);
        }
    }
    if let Some(score) = explicit {
        return score.clamp(-1.0, 1.0);
    }

    // Method 2: last standalone signed decimal like "-0.6" or "+0.7".
    let mut decimal = None;
    for token in text.split_whitespace() {
        let trimmed = token.trim_matches(|c: char| !c.is_ascii_digit() && c != '+' && c != '-' && c != '.');
        if trimmed.contains("0.") {
            if let Ok(v) = trimmed.parse::<f64>() {
                if v.abs() <= 1.0 && v != 0.0 {
                    decimal = Some(v);
                }
            }
        }
    }
    if let Some(score) = decimal {
        return score.clamp(-1.0, 1.0);
    }

    // Method 3: polarity keyword count mapped to discrete ladders.
    let lower = text.to_lowercase();
    let bull = BULLISH_WORDS.iter().filter(|w| lower.contains(*w)).count();
    let bear = BEARISH_WORDS.iter().filter(|w| lower.contains(*w)).count();

    if bear > bull {
        if bear >= 4 {
            -0.6
        } else if bear >= 2 {
            -0.4
        } else {
            -0.2
        }
    } else if bull > bear {
        if bull >= 4 {
            0.6
        } else if bull >= 2 {
            0.4
        } else {
            0.2
        }
    } else {
        0.0
    }
}

/// Parse one line of the form `... score: <number> ...` (case-insensitive).
fn parse_score_line(line: &str) -> Option<f64> {
    let lower = line.to_lowercase();
    let idx = lower.find("score")?;
    let rest = &line[idx + "score".len()..];

    // Skip separators up to the number.
    let rest = rest.trim_start_matches(|c: char| {
        c == ':' || c == '=' || c.is_whitespace() || c == '[' || c == '*'
    });

    let number: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '+' || *c == '-' || *c == '.')
        .collect();

    number.parse::<f64>().ok()
}
