// =============================================================================
// Chain Manager — RPC failover, gas estimation, budget tracking
// =============================================================================
//
// Each chain has an ordered RPC fallback list; the first endpoint that
// answers a liveness probe is cached until it fails, then purged and retried.
// Gas estimation honours EIP-1559 (base fee + priority fee) or legacy gas
// price. Every mainnet submission records the chain's flat average cost
// against the USD budget — a soft guard, not an accountant.
// =============================================================================

use std::collections::HashMap;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::farm::config::{ChainConfig, FarmerConfig};
use crate::state;

const GWEI: f64 = 1e9;
const WEI_PER_ETH: f64 = 1e18;
/// Fallback priority fee when the node's oracle is unavailable.
const DEFAULT_PRIORITY_FEE_WEI: u128 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Wallets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub name: String,
    pub address: String,
    pub private_key: String,
}

/// Load wallets from the wallets file, falling back to a single wallet from
/// the environment key.
pub fn load_wallets(config: &FarmerConfig, env_key: Option<&str>) -> Vec<Wallet> {
    let from_file: Vec<Wallet> = state::load_json_or_default(&config.wallets_file);
    if !from_file.is_empty() {
        info!(count = from_file.len(), "wallets loaded from file");
        return from_file;
    }

    if let Some(key) = env_key {
        if let Ok(signer) = key.trim().trim_start_matches("0x").parse::<PrivateKeySigner>() {
            info!("wallet loaded from environment key");
            return vec![Wallet {
                name: "env_wallet".to_string(),
                address: format!("{:#x}", signer.address()),
                private_key: key.to_string(),
            }];
        }
        warn!("environment wallet key did not parse");
    }

    warn!("no wallets configured — create farming_wallets.json or set FARMING_WALLET_KEY");
    Vec::new()
}

// ---------------------------------------------------------------------------
// Budget tracker
// ---------------------------------------------------------------------------

/// USD gas authorisation across chains.
///
/// Invariant: `remaining = max(0, budget × (1 - reserve) - total_spent)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetTracker {
    pub budget_usd: f64,
    pub reserve_pct: f64,
    #[serde(default)]
    pub spent_by_chain: HashMap<String, f64>,
    #[serde(default)]
    pub total_spent: f64,
}

impl BudgetTracker {
    pub fn new(budget_usd: f64, reserve_pct: f64) -> Self {
        Self {
            budget_usd,
            reserve_pct,
            spent_by_chain: HashMap::new(),
            total_spent: 0.0,
        }
    }

    pub fn record_spend(&mut self, chain: &str, amount_usd: f64) {
        *self.spent_by_chain.entry(chain.to_string()).or_insert(0.0) += amount_usd;
        self.total_spent += amount_usd;

        let remaining = self.remaining();
        if remaining < self.budget_usd * 0.20 {
            warn!(remaining, spent = self.total_spent, "gas budget running low");
        }
    }

    pub fn remaining(&self) -> f64 {
        let usable = self.budget_usd * (1.0 - self.reserve_pct);
        (usable - self.total_spent).max(0.0)
    }

    pub fn can_afford(&self, avg_gas_cost_usd: f64) -> bool {
        self.remaining() >= avg_gas_cost_usd
    }
}

// ---------------------------------------------------------------------------
// Chain manager
// ---------------------------------------------------------------------------

pub struct ChainManager {
    config: FarmerConfig,
    wallets: Vec<Wallet>,
    providers: RwLock<HashMap<String, DynProvider>>,
    budget: RwLock<BudgetTracker>,
}

impl ChainManager {
    pub fn new(config: FarmerConfig, wallets: Vec<Wallet>) -> Self {
        let budget = BudgetTracker::new(config.total_gas_budget_usd, config.reserve_pct);
        info!(
            wallets = wallets.len(),
            chains = config.chains.len(),
            "chain manager initialised"
        );
        Self {
            config,
            wallets,
            providers: RwLock::new(HashMap::new()),
            budget: RwLock::new(budget),
        }
    }

    pub fn wallets(&self) -> &[Wallet] {
        &self.wallets
    }

    pub fn primary_wallet(&self) -> Option<&Wallet> {
        self.wallets.first()
    }

    pub fn chain_config(&self, chain: &str) -> Option<&ChainConfig> {
        self.config.chain(chain)
    }

    pub fn testnet_chain_names(&self) -> Vec<String> {
        self.config.testnets().map(|c| c.name.clone()).collect()
    }

    // -------------------------------------------------------------------------
    // Budget
    // -------------------------------------------------------------------------

    pub fn budget_remaining(&self) -> f64 {
        self.budget.read().remaining()
    }

    pub fn can_afford(&self, chain: &str) -> bool {
        match self.config.chain(chain) {
            Some(cfg) => self.budget.read().can_afford(cfg.avg_gas_cost_usd),
            None => false,
        }
    }

    /// Record the chain's flat average cost against the budget.
    pub fn record_spend(&self, chain: &str) {
        let cost = self
            .config
            .chain(chain)
            .map(|c| c.avg_gas_cost_usd)
            .unwrap_or(0.0);
        self.budget.write().record_spend(chain, cost);
    }

    pub fn budget_snapshot(&self) -> BudgetTracker {
        self.budget.read().clone()
    }

    /// Restore the budget from a persisted snapshot.
    pub fn restore_budget(&self, tracker: BudgetTracker) {
        *self.budget.write() = tracker;
    }

    // -------------------------------------------------------------------------
    // Providers
    // -------------------------------------------------------------------------

    /// Read provider for a chain: the first RPC that answers a block-number
    /// probe, cached until it stops answering.
    pub async fn provider(&self, chain: &str) -> Result<DynProvider> {
        let cached = self.providers.read().get(chain).cloned();
        if let Some(provider) = cached {
            if provider.get_block_number().await.is_ok() {
                return Ok(provider);
            }
            self.providers.write().remove(chain);
        }

        let cfg = self
            .config
            .chain(chain)
            .with_context(|| format!("unknown chain: {chain}"))?;

        for rpc in &cfg.rpcs {
            let url = match rpc.parse() {
                Ok(url) => url,
                Err(e) => {
                    warn!(chain, rpc, error = %e, "bad RPC url");
                    continue;
                }
            };
            let provider = ProviderBuilder::new().connect_http(url).erased();
            match provider.get_block_number().await {
                Ok(_) => {
                    info!(chain, rpc, "connected");
                    self.providers
                        .write()
                        .insert(chain.to_string(), provider.clone());
                    return Ok(provider);
                }
                Err(e) => warn!(chain, rpc, error = %e, "RPC probe failed"),
            }
        }

        anyhow::bail!("all RPCs failed for {chain}")
    }

    /// Signing provider bound to a wallet key, on the chain's healthy RPC.
    pub async fn wallet_provider(&self, chain: &str, private_key: &str) -> Result<DynProvider> {
        let rpc = self.healthy_rpc(chain).await?;

        let signer: PrivateKeySigner = private_key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .context("invalid wallet key")?;
        let wallet = EthereumWallet::from(signer);

        Ok(ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(rpc.parse().context("bad RPC url")?)
            .erased())
    }

    async fn healthy_rpc(&self, chain: &str) -> Result<String> {
        let cfg = self
            .config
            .chain(chain)
            .with_context(|| format!("unknown chain: {chain}"))?;

        for rpc in &cfg.rpcs {
            let Ok(url) = rpc.parse() else { continue };
            let provider = ProviderBuilder::new().connect_http(url).erased();
            if provider.get_block_number().await.is_ok() {
                return Ok(rpc.clone());
            }
        }
        anyhow::bail!("all RPCs failed for {chain}")
    }

    // -------------------------------------------------------------------------
    // Gas
    // -------------------------------------------------------------------------

    /// Current gas price in gwei, honouring EIP-1559 where supported.
    pub async fn estimate_gas_gwei(&self, chain: &str) -> Result<f64> {
        let cfg = self
            .config
            .chain(chain)
            .with_context(|| format!("unknown chain: {chain}"))?;
        let provider = self.provider(chain).await?;

        let total_wei: u128 = if cfg.eip1559 {
            let base_fee = provider
                .get_block_by_number(alloy::eips::BlockNumberOrTag::Latest)
                .await
                .context("latest block fetch failed")?
                .and_then(|b| b.header.base_fee_per_gas)
                .unwrap_or(0) as u128;
            let priority = provider
                .get_max_priority_fee_per_gas()
                .await
                .unwrap_or(DEFAULT_PRIORITY_FEE_WEI);
            base_fee + priority
        } else {
            provider.get_gas_price().await.context("gas price fetch failed")?
        };

        Ok(total_wei as f64 / GWEI)
    }

    /// Poll until gas drops to `max_gwei` or the timeout elapses. Returns
    /// whether the gas target was reached.
    pub async fn wait_for_low_gas(
        &self,
        chain: &str,
        max_gwei: f64,
        poll_secs: u64,
        timeout_secs: u64,
    ) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed().as_secs() < timeout_secs {
            match self.estimate_gas_gwei(chain).await {
                Ok(gas) if gas <= max_gwei => {
                    info!(chain, gas, max_gwei, "gas target reached");
                    return true;
                }
                Ok(gas) => info!(chain, gas, max_gwei, "gas too high — waiting"),
                Err(e) => warn!(chain, error = %e, "gas estimate failed"),
            }
            tokio::time::sleep(std::time::Duration::from_secs(poll_secs)).await;
        }
        warn!(chain, timeout_secs, "gas wait timed out");
        false
    }

    // -------------------------------------------------------------------------
    // Balance & sends
    // -------------------------------------------------------------------------

    /// Native balance in ETH units.
    pub async fn native_balance(&self, chain: &str, address: &str) -> Result<f64> {
        let provider = self.provider(chain).await?;
        let addr: Address = address.parse().context("bad address")?;
        let balance = provider.get_balance(addr).await.context("balance fetch failed")?;
        Ok(u256_to_eth(balance))
    }

    /// Sign and broadcast a native value transfer; gas, nonce, and chain id
    /// are filled by the wallet provider. Records the flat budget cost.
    pub async fn send_native(
        &self,
        chain: &str,
        private_key: &str,
        to: Address,
        value_eth: f64,
    ) -> Result<String> {
        let provider = self.wallet_provider(chain, private_key).await?;

        let tx = TransactionRequest::default()
            .with_to(to)
            .with_value(eth_to_u256(value_eth));

        let pending = provider
            .send_transaction(tx)
            .await
            .context("transaction broadcast failed")?;
        let hash = *pending.tx_hash();

        self.record_spend(chain);
        let hash_hex = format!("{hash:#x}");
        info!(
            chain,
            tx = %hash_hex,
            remaining = self.budget_remaining(),
            "native transfer sent"
        );
        Ok(hash_hex)
    }
}

impl std::fmt::Debug for ChainManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainManager")
            .field("chains", &self.config.chains.len())
            .field("wallets", &self.wallets.len())
            .field("budget_remaining", &self.budget_remaining())
            .finish()
    }
}

/// Convert ETH units to wei.
pub fn eth_to_u256(eth: f64) -> U256 {
    U256::from((eth * WEI_PER_ETH) as u128)
}

/// Convert wei to ETH units.
pub fn u256_to_eth(wei: U256) -> f64 {
    wei.to::<u128>() as f64 / WEI_PER_ETH
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_remaining_honours_reserve() {
        let mut b = BudgetTracker::new(2.0, 0.25);
        // usable = 1.5
        assert!((b.remaining() - 1.5).abs() < 1e-9);

        b.record_spend("base", 0.15);
        assert!((b.remaining() - 1.35).abs() < 1e-9);
        assert!((b.spent_by_chain["base"] - 0.15).abs() < 1e-9);
    }

    #[test]
    fn budget_never_goes_negative() {
        let mut b = BudgetTracker::new(1.0, 0.25);
        for _ in 0..20 {
            b.record_spend("base", 0.15);
        }
        assert_eq!(b.remaining(), 0.0);
        assert!(!b.can_afford(0.15));
        // Invariant: total spent is still tracked faithfully.
        assert!((b.total_spent - 3.0).abs() < 1e-9);
    }

    #[test]
    fn can_afford_is_exact_at_the_boundary() {
        let mut b = BudgetTracker::new(2.0, 0.25);
        b.record_spend("base", 1.35);
        // remaining = 0.15 exactly.
        assert!(b.can_afford(0.15));
        assert!(!b.can_afford(0.1501));
    }

    #[test]
    fn budget_roundtrip_serde() {
        let mut b = BudgetTracker::new(2.0, 0.25);
        b.record_spend("base", 0.3);
        let json = serde_json::to_string(&b).unwrap();
        let back: BudgetTracker = serde_json::from_str(&json).unwrap();
        assert!((back.remaining() - b.remaining()).abs() < 1e-9);
        assert_eq!(back.spent_by_chain.len(), 1);
    }

    #[test]
    fn eth_wei_conversions() {
        let one = eth_to_u256(1.0);
        assert!((u256_to_eth(one) - 1.0).abs() < 1e-12);
        let micro = eth_to_u256(0.00005);
        assert!((u256_to_eth(micro) - 0.00005).abs() < 1e-12);
    }

    #[test]
    fn wallet_from_env_key_derives_address() {
        let cfg = FarmerConfig {
            wallets_file: "/nonexistent/wallets.json".to_string(),
            ..FarmerConfig::default()
        };
        let wallets = load_wallets(
            &cfg,
            Some("e908f86dbb4d55ac876378565aafeabc187f6690f046459397b17d9b9a19688e"),
        );
        assert_eq!(wallets.len(), 1);
        assert!(wallets[0].address.starts_with("0x"));

        let none = load_wallets(&cfg, None);
        assert!(none.is_empty());
    }
}
