// =============================================================================
// Testnet Farmer — organic transaction history on funded testnets
// =============================================================================
//
// Builds on-chain history for airdrop qualification: per cycle it sweeps
// balances across the configured testnets, then generates small batches of
// organic-looking transactions (self-transfers, inter-wallet transfers,
// zero-value pings) on the funded ones, with randomized spacing.
//
// Faucet claims are manual (most have captchas); unfunded chains are
// reported so the operator knows where to claim.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{info, warn};

use crate::farm::chain::{ChainManager, Wallet};

/// Keep at least this many standard transfers' worth of gas in reserve.
const GAS_HEADROOM_TRANSFERS: f64 = 10.0;
/// Rough native cost of one 21k-gas transfer used for the headroom check.
const TRANSFER_COST_ETH: f64 = 21_000.0 * 50e-9;

/// Outcome of one farming cycle, merged into the farmer's state by the
/// orchestrator.
#[derive(Debug, Clone, Default)]
pub struct TestnetReport {
    pub txns_by_chain: HashMap<String, u32>,
    pub total_txns: u32,
    pub funded_chains: Vec<String>,
    pub unfunded_chains: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TrafficKind {
    SelfTransfer,
    InterWallet,
    ZeroValue,
}

pub struct TestnetFarmer {
    chain_mgr: Arc<ChainManager>,
}

impl TestnetFarmer {
    pub fn new(chain_mgr: Arc<ChainManager>) -> Self {
        Self { chain_mgr }
    }

    /// One full cycle: balance sweep, then traffic on funded chains.
    pub async fn run_cycle(&self) -> TestnetReport {
        let wallets = self.chain_mgr.wallets().to_vec();
        if wallets.is_empty() {
            warn!("testnet farmer: no wallets configured");
            return TestnetReport::default();
        }

        let mut report = TestnetReport::default();

        // --- Balance sweep ---------------------------------------------------
        for chain in self.chain_mgr.testnet_chain_names() {
            let mut funded = false;
            for wallet in &wallets {
                match self.chain_mgr.native_balance(&chain, &wallet.address).await {
                    Ok(balance) if balance > 0.0 => {
                        info!(chain = %chain, wallet = %wallet.name, balance, "testnet funded");
                        funded = true;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(chain = %chain, error = %e, "balance check failed"),
                }
            }
            if funded {
                report.funded_chains.push(chain);
            } else {
                report.unfunded_chains.push(chain);
            }
        }

        if !report.unfunded_chains.is_empty() {
            info!(
                chains = ?report.unfunded_chains,
                wallets = ?wallets.iter().map(|w| w.address.clone()).collect::<Vec<_>>(),
                "unfunded testnets — claim faucets manually"
            );
        }

        // --- Traffic on funded chains ----------------------------------------
        let mut chains = report.funded_chains.clone();
        chains.shuffle(&mut rand::thread_rng());

        for chain in chains {
            for wallet in &wallets {
                let pause = rand::thread_rng().gen_range(5.0..20.0);
                tokio::time::sleep(std::time::Duration::from_secs_f64(pause)).await;

                let sent = self.generate_traffic(&chain, wallet, &wallets).await;
                if sent > 0 {
                    *report.txns_by_chain.entry(chain.clone()).or_insert(0) += sent;
                    report.total_txns += sent;
                }
            }
        }

        info!(total = report.total_txns, "testnet cycle complete");
        report
    }

    /// Send 1-3 organic transactions from one wallet on one chain.
    async fn generate_traffic(&self, chain: &str, wallet: &Wallet, all: &[Wallet]) -> u32 {
        let balance = match self.chain_mgr.native_balance(chain, &wallet.address).await {
            Ok(b) => b,
            Err(e) => {
                warn!(chain, error = %e, "balance fetch failed");
                return 0;
            }
        };
        if balance <= 0.0 {
            return 0;
        }
        if balance < TRANSFER_COST_ETH * GAS_HEADROOM_TRANSFERS {
            info!(chain, balance, "low testnet balance — saving gas");
            return 0;
        }

        let num_actions = rand::thread_rng().gen_range(1..=3);
        let mut sent = 0;

        for _ in 0..num_actions {
            // Draw every random value before awaiting.
            let (kind, value_eth, target, delay) = {
                let mut rng = rand::thread_rng();
                let kind = *[
                    TrafficKind::SelfTransfer,
                    TrafficKind::InterWallet,
                    TrafficKind::ZeroValue,
                ]
                .choose(&mut rng)
                .expect("non-empty traffic kinds");

                let others: Vec<&Wallet> =
                    all.iter().filter(|w| w.address != wallet.address).collect();
                let target = match kind {
                    TrafficKind::InterWallet => {
                        others.choose(&mut rng).map(|w| w.address.clone())
                    }
                    _ => Some(wallet.address.clone()),
                };

                let value_eth = match kind {
                    // Tiny wei-scale amounts.
                    TrafficKind::SelfTransfer => rng.gen_range(1u64..1000) as f64 / 1e18,
                    TrafficKind::InterWallet => balance / rng.gen_range(50u64..200) as f64,
                    TrafficKind::ZeroValue => 0.0,
                };

                let delay = rng.gen_range(3.0..15.0);
                (kind, value_eth, target, delay)
            };

            let Some(target) = target else { continue };
            let to: Address = match target.parse() {
                Ok(addr) => addr,
                Err(_) => {
                    warn!(chain, target, "bad wallet address");
                    continue;
                }
            };

            match self
                .chain_mgr
                .send_native(chain, &wallet.private_key, to, value_eth)
                .await
            {
                Ok(tx) => {
                    info!(chain, kind = ?kind, tx = %tx, "testnet tx sent");
                    sent += 1;
                }
                Err(e) => warn!(chain, kind = ?kind, error = %e, "testnet tx failed"),
            }

            tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
        }

        sent
    }
}

impl std::fmt::Debug for TestnetFarmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestnetFarmer").finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::farm::config::FarmerConfig;

    #[tokio::test]
    async fn empty_wallets_short_circuits() {
        let cfg = FarmerConfig {
            wallets_file: "/nonexistent/wallets.json".to_string(),
            ..FarmerConfig::default()
        };
        let mgr = Arc::new(ChainManager::new(cfg, Vec::new()));
        let farmer = TestnetFarmer::new(mgr);
        let report = farmer.run_cycle().await;
        assert_eq!(report.total_txns, 0);
        assert!(report.funded_chains.is_empty());
    }

    #[test]
    fn headroom_constant_is_sane() {
        // 10 transfers at 50 gwei each ≈ 0.0105 ETH.
        let headroom = TRANSFER_COST_ETH * GAS_HEADROOM_TRANSFERS;
        assert!(headroom > 0.001 && headroom < 0.1);
    }
}
