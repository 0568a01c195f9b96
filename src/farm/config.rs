// =============================================================================
// Farmer configuration — chains, tokens, routers, budget and timing
// =============================================================================

use alloy::primitives::Address;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Chain table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Mainnet,
    Testnet,
}

/// One chain: ordered RPC fallback list, id, and the flat per-tx gas cost
/// used by the budget tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub rpcs: Vec<String>,
    pub chain_id: u64,
    pub avg_gas_cost_usd: f64,
    pub eip1559: bool,
    pub kind: ChainKind,
}

fn chain(
    name: &str,
    rpcs: &[&str],
    chain_id: u64,
    avg_gas_cost_usd: f64,
    eip1559: bool,
    kind: ChainKind,
) -> ChainConfig {
    ChainConfig {
        name: name.to_string(),
        rpcs: rpcs.iter().map(|s| s.to_string()).collect(),
        chain_id,
        avg_gas_cost_usd,
        eip1559,
        kind,
    }
}

// ---------------------------------------------------------------------------
// FarmerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FarmerConfig {
    pub chains: Vec<ChainConfig>,

    // Budget.
    pub total_gas_budget_usd: f64,
    pub reserve_pct: f64,
    pub farming_duration_days: i64,
    pub campaign_start: DateTime<Utc>,

    // Timing.
    pub min_delay_hours: f64,
    pub max_delay_hours: f64,
    /// UTC hours within which mainnet actions are scheduled.
    pub day_start_hour: u32,
    pub day_end_hour: u32,
    pub weekend_reduction: f64,
    pub daily_max_actions: usize,

    // Amounts.
    pub min_action_usd: f64,
    pub max_action_usd: f64,
    /// Conservative fixed price for micro-amount conversions.
    pub eth_price_usd: f64,

    // Files.
    pub wallets_file: String,
    pub farm_state_file: String,
    pub farm_schedule_file: String,
    pub airdrop_report_file: String,
}

impl Default for FarmerConfig {
    fn default() -> Self {
        Self {
            chains: vec![
                chain(
                    "base",
                    &[
                        "https://mainnet.base.org",
                        "https://base.llamarpc.com",
                        "https://rpc.ankr.com/base",
                    ],
                    8453,
                    0.15,
                    true,
                    ChainKind::Mainnet,
                ),
                chain(
                    "arbitrum",
                    &["https://arb1.arbitrum.io/rpc", "https://rpc.ankr.com/arbitrum"],
                    42161,
                    0.25,
                    true,
                    ChainKind::Mainnet,
                ),
                chain(
                    "optimism",
                    &["https://mainnet.optimism.io", "https://rpc.ankr.com/optimism"],
                    10,
                    0.15,
                    true,
                    ChainKind::Mainnet,
                ),
                chain(
                    "monad_testnet",
                    &[
                        "https://testnet-rpc.monad.xyz",
                        "https://rpc.ankr.com/monad_testnet",
                    ],
                    10143,
                    0.0,
                    false,
                    ChainKind::Testnet,
                ),
                chain(
                    "berachain_testnet",
                    &["https://bartio.rpc.berachain.com"],
                    80084,
                    0.0,
                    false,
                    ChainKind::Testnet,
                ),
                chain(
                    "linea_sepolia",
                    &["https://rpc.sepolia.linea.build"],
                    59141,
                    0.0,
                    true,
                    ChainKind::Testnet,
                ),
            ],

            total_gas_budget_usd: 2.0,
            reserve_pct: 0.25,
            farming_duration_days: 60,
            campaign_start: Utc.with_ymd_and_hms(2026, 2, 15, 0, 0, 0).unwrap(),

            min_delay_hours: 2.0,
            max_delay_hours: 8.0,
            day_start_hour: 8,
            day_end_hour: 23,
            weekend_reduction: 0.5,
            daily_max_actions: 5,

            min_action_usd: 0.10,
            max_action_usd: 0.50,
            eth_price_usd: 2700.0,

            wallets_file: "farming_wallets.json".to_string(),
            farm_state_file: "farm_state.json".to_string(),
            farm_schedule_file: "farm_schedule.json".to_string(),
            airdrop_report_file: "airdrop_report.json".to_string(),
        }
    }
}

impl FarmerConfig {
    pub fn chain(&self, name: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.name == name)
    }

    pub fn testnets(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.iter().filter(|c| c.kind == ChainKind::Testnet)
    }
}

// ---------------------------------------------------------------------------
// DEX + token registry (Base)
// ---------------------------------------------------------------------------

pub const UNISWAP_V3_ROUTER: &str = "0x2626664c2603336E57B271c5C0b26F421741e481";
pub const AERODROME_ROUTER: &str = "0xcF77a3Ba9A5CA399B7c97c74d54e5b1Beb874E43";

/// Tokens the swap actions rotate through.
pub const SWAP_TOKENS: &[&str] = &["USDC", "DAI"];

/// Token address for a (chain, symbol) pair.
pub fn token_address(chain: &str, symbol: &str) -> Option<Address> {
    let addr = match (chain, symbol.to_uppercase().as_str()) {
        ("base", "WETH") => "0x4200000000000000000000000000000000000006",
        ("base", "USDC") => "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
        ("base", "USDBC") => "0xd9aAEc86B65D86f6A7B5B1b0c42FFA531710b6B1",
        ("base", "DAI") => "0x50c5725949A6F0c72E6C4a641F24049A917DB0Cb",
        _ => return None,
    };
    addr.parse().ok()
}

pub fn uniswap_router() -> Address {
    UNISWAP_V3_ROUTER.parse().expect("router address")
}

pub fn aerodrome_router() -> Address {
    AERODROME_ROUTER.parse().expect("router address")
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chain_table() {
        let cfg = FarmerConfig::default();
        assert!(cfg.chain("base").is_some());
        assert_eq!(cfg.chain("base").unwrap().chain_id, 8453);
        assert!(cfg.chain("base").unwrap().eip1559);
        assert_eq!(cfg.testnets().count(), 3);
        assert!(cfg.chain("unknown").is_none());
    }

    #[test]
    fn budget_defaults() {
        let cfg = FarmerConfig::default();
        assert!((cfg.total_gas_budget_usd - 2.0).abs() < f64::EPSILON);
        assert!((cfg.reserve_pct - 0.25).abs() < f64::EPSILON);
        assert_eq!(cfg.farming_duration_days, 60);
    }

    #[test]
    fn token_registry_resolves() {
        assert!(token_address("base", "USDC").is_some());
        assert!(token_address("base", "usdc").is_some());
        assert!(token_address("base", "PEPE").is_none());
        assert!(token_address("arbitrum", "USDC").is_none());
    }

    #[test]
    fn router_addresses_parse() {
        let _ = uniswap_router();
        let _ = aerodrome_router();
    }
}
