// =============================================================================
// Airdrop Scan — pluggable source aggregation, filtering, and diff reporting
// =============================================================================
//
// Sources implement `AirdropSource` and return structured records; the core
// filters them (no KYC, no capital requirement, supported chain, deduped by
// case-insensitive name), persists the report, and notifies only the
// *difference* against the previous snapshot.
// =============================================================================

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::notify::Notifier;
use crate::state;

/// EVM-compatible chains the farmer can actually interact with.
pub const SUPPORTED_CHAINS: &[&str] = &[
    "ethereum", "arbitrum", "base", "optimism", "polygon", "zksync",
    "linea", "scroll", "blast", "manta", "mantle", "mode", "zora",
    "avalanche", "bsc", "gnosis", "fantom", "celo", "moonbeam",
    "hyperliquid", "berachain", "monad", "megaeth",
];

/// Minimum TVL for the no-token heuristic.
const MIN_TVL_USD: f64 = 1_000_000.0;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirdropRecord {
    pub name: String,
    pub chain: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub requirements: Vec<String>,
    pub deadline: String,
    pub estimated_value: String,
    pub kyc_required: bool,
    pub cost: String,
    pub source: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    #[serde(default)]
    pub last_scan: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_found: usize,
    #[serde(default)]
    pub airdrops: Vec<AirdropRecord>,
}

// ---------------------------------------------------------------------------
// Source trait + DeFiLlama source
// ---------------------------------------------------------------------------

/// A pluggable airdrop discovery source.
#[async_trait]
pub trait AirdropSource: Send + Sync {
    fn name(&self) -> &str;
    async fn scan(&self) -> anyhow::Result<Vec<AirdropRecord>>;
}

/// DeFiLlama protocol sweep: high-TVL protocols without a token on a
/// supported chain are treated as potential airdrops.
pub struct DefiLlamaSource {
    client: reqwest::Client,
}

impl DefiLlamaSource {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("meridian-farmer/1.0")
            .build()
            .expect("failed to build scan http client");
        Self { client }
    }
}

impl Default for DefiLlamaSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AirdropSource for DefiLlamaSource {
    fn name(&self) -> &str {
        "defillama"
    }

    async fn scan(&self) -> anyhow::Result<Vec<AirdropRecord>> {
        let protocols: serde_json::Value = self
            .client
            .get("https://api.llama.fi/protocols")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(entries) = protocols.as_array() else {
            anyhow::bail!("protocols response is not an array");
        };

        let mut airdrops = Vec::new();
        for proto in entries {
            let name = proto["name"].as_str().unwrap_or_default();
            if name.is_empty() {
                continue;
            }
            let tvl = proto["tvl"].as_f64().unwrap_or(0.0);
            let has_token = proto["symbol"].as_str().map(|s| !s.is_empty() && s != "-").unwrap_or(false)
                && proto["gecko_id"].as_str().map(|s| !s.is_empty()).unwrap_or(false);

            let chains: Vec<String> = proto["chains"]
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|c| c.as_str())
                        .map(|c| c.to_lowercase())
                        .collect()
                })
                .unwrap_or_default();
            let matched: Vec<&String> = chains
                .iter()
                .filter(|c| SUPPORTED_CHAINS.contains(&c.as_str()))
                .collect();

            if matched.is_empty() || has_token || tvl < MIN_TVL_USD {
                continue;
            }

            airdrops.push(AirdropRecord {
                name: name.to_string(),
                chain: matched
                    .first()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "multi".to_string()),
                kind: "potential_airdrop".to_string(),
                requirements: vec![
                    format!("Use {name} protocol"),
                    "Generate on-chain activity (swaps, LPs, bridges)".to_string(),
                ],
                deadline: "unknown".to_string(),
                estimated_value: "unknown".to_string(),
                kyc_required: false,
                cost: "gas only".to_string(),
                source: self.name().to_string(),
                url: proto["url"].as_str().unwrap_or_default().to_string(),
            });
        }

        info!(count = airdrops.len(), "defillama: potential airdrop protocols");
        Ok(airdrops)
    }
}

// ---------------------------------------------------------------------------
// Filtering + reporting
// ---------------------------------------------------------------------------

/// Keep only records matching the farmer's criteria, deduped by
/// case-insensitive name.
pub fn filter_airdrops(records: Vec<AirdropRecord>) -> Vec<AirdropRecord> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept = Vec::new();

    for record in records {
        let key = record.name.to_lowercase();
        if seen.contains(&key) {
            continue;
        }

        if record.kyc_required {
            continue;
        }
        if record.cost.eq_ignore_ascii_case("capital needed") {
            continue;
        }

        let chain = record.chain.to_lowercase();
        if !chain.is_empty()
            && chain != "unknown"
            && chain != "multi"
            && !SUPPORTED_CHAINS.contains(&chain.as_str())
        {
            continue;
        }

        seen.insert(key);
        kept.push(record);
    }

    kept
}

/// Run one scan cycle over `sources`: aggregate, filter, persist, and notify
/// the difference against the previous report.
pub async fn run_scan(
    sources: &[Box<dyn AirdropSource>],
    report_path: impl AsRef<Path>,
    notifier: &Notifier,
) -> ScanReport {
    let report_path = report_path.as_ref();
    let previous: ScanReport = state::load_json_or_default(report_path);

    let mut all = Vec::new();
    for source in sources {
        match source.scan().await {
            Ok(records) => all.extend(records),
            Err(e) => warn!(source = source.name(), error = %e, "airdrop source failed"),
        }
    }

    let filtered = filter_airdrops(all);
    let report = ScanReport {
        last_scan: Some(Utc::now()),
        total_found: filtered.len(),
        airdrops: filtered,
    };

    if let Err(e) = state::save_json(report_path, &report) {
        warn!(error = %e, "airdrop report save failed");
    }

    notify_new_airdrops(&report, &previous, notifier).await;
    info!(total = report.total_found, "airdrop scan complete");
    report
}

/// Notify only airdrops that were absent from the previous snapshot.
async fn notify_new_airdrops(report: &ScanReport, previous: &ScanReport, notifier: &Notifier) {
    let prev_names: HashSet<String> = previous
        .airdrops
        .iter()
        .map(|a| a.name.to_lowercase())
        .collect();
    let fresh: Vec<&AirdropRecord> = report
        .airdrops
        .iter()
        .filter(|a| !prev_names.contains(&a.name.to_lowercase()))
        .collect();

    if fresh.is_empty() {
        info!("no new airdrops since last scan");
        return;
    }

    let mut lines = vec![format!("<b>AIRDROP MONITOR — {} new</b>\n", fresh.len())];
    for a in fresh.iter().take(10) {
        lines.push(format!(
            "<b>{}</b> ({})\n  Type: {} | Cost: {}\n  Deadline: {}\n  Value: {}",
            a.name, a.chain, a.kind, a.cost, a.deadline, a.estimated_value
        ));
    }
    lines.push(format!("\nTotal tracked: {}", report.total_found));

    notifier.send_message(&lines.join("\n")).await;
}
