// =============================================================================
// Airdrop Farmer — autonomous orchestrator for on-chain activity
// =============================================================================
//
// One cycle: refresh the daily plan → execute any now-due actions (with an
// organic pre-delay) → testnet traffic when due → airdrop scan every 12 h →
// daily summary every 24 h. In loop mode the sleep between cycles is the
// minimum of the next action's ETA and 30 minutes, plus jitter.
//
// All mutable farmer state lives in `farm_state.json` (including the restored
// budget tracker and testnet counters) and is written atomically after every
// transition.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use tracing::{error, info, warn};

use crate::farm::chain::{load_wallets, BudgetTracker, ChainManager, Wallet};
use crate::farm::config::{token_address, ChainKind, FarmerConfig};
use crate::farm::dex::DexSwapper;
use crate::farm::planner::{ActionType, ActivityPlanner, PlanEntry};
use crate::farm::scan::{run_scan, AirdropSource, DefiLlamaSource};
use crate::farm::testnet::TestnetFarmer;
use crate::notify::Notifier;
use crate::state;
use serde::{Deserialize, Serialize};

/// Cadences.
const SCAN_INTERVAL_HOURS: f64 = 12.0;
const DAILY_REPORT_HOURS: f64 = 24.0;
/// Loop sleep cap and jitter band.
const MAX_SLEEP_SECS: f64 = 1800.0;
const JITTER_LOW_SECS: f64 = -60.0;
const JITTER_HIGH_SECS: f64 = 300.0;
const MIN_SLEEP_SECS: f64 = 60.0;
/// Back-off after an orchestration error.
const ERROR_BACKOFF_SECS: u64 = 600;
/// Organic pre-action delay band.
const ACTION_DELAY_LOW: f64 = 10.0;
const ACTION_DELAY_HIGH: f64 = 120.0;
/// Degraded self-transfer amount.
const FALLBACK_TRANSFER_ETH: f64 = 0.00005;
/// Rolling action-log bound.
const ACTION_LOG_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Persistent state (farm_state.json)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub chain: String,
    pub tx_hash: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LpPosition {
    pub chain: String,
    pub token: String,
    pub token_name: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmState {
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub total_actions: u32,
    #[serde(default)]
    pub actions_log: Vec<ActionLogEntry>,
    #[serde(default)]
    pub last_scan: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_testnet_cycle: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_daily_report: Option<DateTime<Utc>>,
    #[serde(default)]
    pub token_holdings: HashMap<String, bool>,
    #[serde(default)]
    pub lp_positions: Vec<LpPosition>,
    #[serde(default)]
    pub budget: Option<BudgetTracker>,
    #[serde(default)]
    pub testnet_txns_by_chain: HashMap<String, u32>,
    #[serde(default)]
    pub testnet_total_txns: u32,
    #[serde(default)]
    pub funded_testnets: Vec<String>,
}

impl Default for FarmState {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            total_actions: 0,
            actions_log: Vec::new(),
            last_scan: None,
            last_testnet_cycle: None,
            last_daily_report: None,
            token_holdings: HashMap::new(),
            lp_positions: Vec::new(),
            budget: None,
            testnet_txns_by_chain: HashMap::new(),
            testnet_total_txns: 0,
            funded_testnets: Vec::new(),
        }
    }
}

fn hours_since(ts: Option<DateTime<Utc>>) -> f64 {
    match ts {
        Some(t) => (Utc::now() - t).num_seconds() as f64 / 3600.0,
        None => f64::INFINITY,
    }
}

// ---------------------------------------------------------------------------
// Farmer
// ---------------------------------------------------------------------------

pub struct AirdropFarmer {
    config: FarmerConfig,
    dry_run: bool,
    chain_mgr: Arc<ChainManager>,
    dex: DexSwapper,
    planner: ActivityPlanner,
    testnet: TestnetFarmer,
    notifier: Notifier,
    sources: Vec<Box<dyn AirdropSource>>,
    state_path: PathBuf,
    state: RwLock<FarmState>,
}

impl AirdropFarmer {
    pub fn new(
        config: FarmerConfig,
        farming_wallet_key: Option<&str>,
        notifier: Notifier,
        dry_run: bool,
    ) -> Self {
        let state_path = PathBuf::from(&config.farm_state_file);
        let farm_state: FarmState = state::load_json_or_default(&state_path);

        let wallets = load_wallets(&config, farming_wallet_key);
        let chain_mgr = Arc::new(ChainManager::new(config.clone(), wallets));
        if let Some(budget) = farm_state.budget.clone() {
            chain_mgr.restore_budget(budget);
        }

        let dex = DexSwapper::new(chain_mgr.clone());
        let planner = ActivityPlanner::new(config.clone());
        let testnet = TestnetFarmer::new(chain_mgr.clone());

        let mode = if dry_run { "DRY RUN" } else { "LIVE" };
        info!(
            mode,
            budget_remaining = chain_mgr.budget_remaining(),
            wallet = ?chain_mgr.primary_wallet().map(|w| &w.address[..12.min(w.address.len())]),
            "airdrop farmer initialised"
        );

        Self {
            config,
            dry_run,
            chain_mgr,
            dex,
            planner,
            testnet,
            notifier,
            sources: vec![Box::new(DefiLlamaSource::new())],
            state_path,
            state: RwLock::new(farm_state),
        }
    }

    fn save_state(&self) {
        {
            let mut farm_state = self.state.write();
            farm_state.budget = Some(self.chain_mgr.budget_snapshot());
        }
        if let Err(e) = state::save_json(&self.state_path, &*self.state.read()) {
            warn!(error = %e, "farm state save failed");
        }
    }

    fn primary_wallet(&self) -> Option<Wallet> {
        self.chain_mgr.primary_wallet().cloned()
    }

    // -------------------------------------------------------------------------
    // Action execution
    // -------------------------------------------------------------------------

    /// Execute one plan entry. `Ok(None)` means the action was skipped
    /// (budget or wallet); an `Err` marks it failed.
    pub async fn execute_action(&self, action: &PlanEntry) -> Result<Option<String>> {
        let Some(wallet) = self.primary_wallet() else {
            anyhow::bail!("no wallet configured");
        };
        let chain = action.chain.as_str();

        info!(
            id = %action.id,
            action = %action.action_type,
            chain,
            "executing action"
        );

        if self.dry_run {
            info!(id = %action.id, "[dry run] skipping submission");
            return Ok(Some(format!("dry_run_{}", uuid::Uuid::new_v4())));
        }

        // Budget guard precedes every mainnet submission.
        let is_mainnet = self
            .chain_mgr
            .chain_config(chain)
            .map(|c| c.kind == ChainKind::Mainnet)
            .unwrap_or(false);
        if is_mainnet && !self.chain_mgr.can_afford(chain) {
            warn!(chain, "budget exhausted — skipping action");
            return Ok(None);
        }

        let tx = match action.action_type {
            ActionType::SwapEthToToken => self.exec_swap_eth_to_token(chain, action, &wallet).await?,
            ActionType::SwapTokenToEth => self.exec_swap_token_to_eth(chain, action, &wallet).await?,
            ActionType::SelfTransfer => self.exec_self_transfer(chain, action, &wallet).await?,
            ActionType::LpAdd => self.exec_lp_add(chain, action, &wallet).await?,
            // LP-token accounting is out of scope; degrade to a transfer.
            ActionType::LpRemove => self.exec_fallback_transfer(chain, &wallet).await?,
        };

        Ok(Some(tx))
    }

    fn action_token(&self, action: &PlanEntry) -> Result<Address> {
        match &action.params.token {
            Some(token) => token.parse().context("bad token address in plan"),
            None => token_address(&action.chain, "USDC").context("no default token"),
        }
    }

    async fn exec_swap_eth_to_token(
        &self,
        chain: &str,
        action: &PlanEntry,
        wallet: &Wallet,
    ) -> Result<String> {
        let token = self.action_token(action)?;
        let amount_eth = action.params.amount_eth.unwrap_or(FALLBACK_TRANSFER_ETH);

        let tx = self
            .dex
            .swap_exact_eth_for_tokens(chain, amount_eth, token, &wallet.private_key)
            .await?;

        if let Some(name) = &action.params.token_name {
            self.state.write().token_holdings.insert(name.clone(), true);
        }
        Ok(tx)
    }

    async fn exec_swap_token_to_eth(
        &self,
        chain: &str,
        action: &PlanEntry,
        wallet: &Wallet,
    ) -> Result<String> {
        let token = self.action_token(action)?;
        let balance = self.dex.token_balance(chain, token, &wallet.address).await?;

        if balance.is_zero() {
            info!(chain, "no token balance — degrading to self-transfer");
            return self.exec_fallback_transfer(chain, wallet).await;
        }

        let tx = self
            .dex
            .swap_tokens_for_eth(chain, token, balance, &wallet.private_key)
            .await?;

        if let Some(name) = &action.params.token_name {
            self.state.write().token_holdings.remove(name);
        }
        Ok(tx)
    }

    async fn exec_self_transfer(
        &self,
        chain: &str,
        action: &PlanEntry,
        wallet: &Wallet,
    ) -> Result<String> {
        let amount_eth = action.params.amount_eth.unwrap_or(FALLBACK_TRANSFER_ETH);
        let to: Address = wallet.address.parse().context("bad wallet address")?;
        self.chain_mgr
            .send_native(chain, &wallet.private_key, to, amount_eth)
            .await
    }

    async fn exec_fallback_transfer(&self, chain: &str, wallet: &Wallet) -> Result<String> {
        let to: Address = wallet.address.parse().context("bad wallet address")?;
        self.chain_mgr
            .send_native(chain, &wallet.private_key, to, FALLBACK_TRANSFER_ETH)
            .await
    }

    async fn exec_lp_add(
        &self,
        chain: &str,
        action: &PlanEntry,
        wallet: &Wallet,
    ) -> Result<String> {
        let token = self.action_token(action)?;
        let amount_eth = action.params.amount_eth.unwrap_or(FALLBACK_TRANSFER_ETH);
        let balance = self.dex.token_balance(chain, token, &wallet.address).await?;

        if balance.is_zero() {
            info!(chain, "no token for LP — degrading to a preceding swap");
            return self
                .dex
                .swap_exact_eth_for_tokens(chain, amount_eth, token, &wallet.private_key)
                .await;
        }

        let tx = self
            .dex
            .add_liquidity_eth(chain, token, balance, amount_eth, &wallet.private_key)
            .await?;

        self.state.write().lp_positions.push(LpPosition {
            chain: chain.to_string(),
            token: format!("{token:#x}"),
            token_name: action.params.token_name.clone().unwrap_or_default(),
            added_at: Utc::now(),
        });
        Ok(tx)
    }

    // -------------------------------------------------------------------------
    // Orchestration cycles
    // -------------------------------------------------------------------------

    /// Execute every pending action that is past its scheduled time.
    pub async fn run_pending_actions(&self) -> usize {
        let pending = self.planner.pending_actions(Utc::now());
        if pending.is_empty() {
            return 0;
        }
        info!(count = pending.len(), "pending actions due");

        let mut executed = 0;
        for action in pending {
            // Organic micro-delay before each submission.
            if !self.dry_run {
                let delay = rand::thread_rng().gen_range(ACTION_DELAY_LOW..ACTION_DELAY_HIGH);
                info!(delay_secs = delay as u64, action = %action.action_type, "organic delay");
                tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
            }

            match self.execute_action(&action).await {
                Ok(Some(tx_hash)) => {
                    self.planner
                        .mark_action_done(&action.id, Some(tx_hash.clone()), None);
                    {
                        let mut farm_state = self.state.write();
                        farm_state.total_actions += 1;
                        farm_state.actions_log.push(ActionLogEntry {
                            id: action.id.clone(),
                            action_type: action.action_type,
                            chain: action.chain.clone(),
                            tx_hash: tx_hash.clone(),
                            time: Utc::now(),
                        });
                        let overflow =
                            farm_state.actions_log.len().saturating_sub(ACTION_LOG_LIMIT);
                        if overflow > 0 {
                            farm_state.actions_log.drain(..overflow);
                        }
                    }

                    self.notifier
                        .send_message(&format!(
                            "\u{1f331} <b>FARM ACTION</b>\n\
                             Type: {}\n\
                             Chain: {}\n\
                             TX: <code>{}</code>\n\
                             Budget: ${:.4} left",
                            action.action_type,
                            action.chain,
                            &tx_hash[..tx_hash.len().min(20)],
                            self.chain_mgr.budget_remaining(),
                        ))
                        .await;
                    executed += 1;
                }
                Ok(None) => {
                    // Skipped (budget): leave pending for a later cycle.
                }
                Err(e) => {
                    error!(id = %action.id, error = %e, "action failed");
                    self.planner
                        .mark_action_done(&action.id, None, Some(e.to_string()));
                }
            }
        }

        self.save_state();
        executed
    }

    /// Run a testnet traffic cycle when the randomized delay has elapsed.
    pub async fn run_testnet_cycle(&self) {
        let hours = hours_since(self.state.read().last_testnet_cycle);
        let threshold = rand::thread_rng()
            .gen_range(self.config.min_delay_hours..=self.config.max_delay_hours);
        if hours < threshold {
            return;
        }

        info!("running testnet farming cycle");
        if self.dry_run {
            info!("[dry run] skipping testnet traffic");
        } else {
            let report = self.testnet.run_cycle().await;
            let mut farm_state = self.state.write();
            for (chain, count) in report.txns_by_chain {
                *farm_state.testnet_txns_by_chain.entry(chain).or_insert(0) += count;
            }
            farm_state.testnet_total_txns += report.total_txns;
            farm_state.funded_testnets = report.funded_chains;
        }

        self.state.write().last_testnet_cycle = Some(Utc::now());
        self.save_state();
    }

    /// Refresh the airdrop opportunity list every 12 h.
    pub async fn run_airdrop_scan(&self) {
        if hours_since(self.state.read().last_scan) < SCAN_INTERVAL_HOURS {
            return;
        }

        info!("running airdrop scan");
        if self.dry_run {
            info!("[dry run] skipping airdrop scan");
        } else {
            let report = run_scan(
                &self.sources,
                &self.config.airdrop_report_file,
                &self.notifier,
            )
            .await;
            self.notifier
                .send_message(&format!(
                    "\u{1f50d} <b>AIRDROP SCAN</b>\nFound {} opportunities",
                    report.total_found
                ))
                .await;
        }

        self.state.write().last_scan = Some(Utc::now());
        self.save_state();
    }

    /// Send the daily summary every 24 h.
    pub async fn send_daily_report(&self) {
        if hours_since(self.state.read().last_daily_report) < DAILY_REPORT_HOURS {
            return;
        }

        let stats = self.planner.stats();
        let budget = self.chain_mgr.budget_snapshot();
        let today = Utc::now().format("%Y-%m-%d").to_string();

        let (total_actions, today_actions, gas_lines) = {
            let farm_state = self.state.read();
            let today_actions = farm_state
                .actions_log
                .iter()
                .filter(|a| a.time.format("%Y-%m-%d").to_string() == today)
                .count();
            let mut gas_lines: Vec<String> = budget
                .spent_by_chain
                .iter()
                .map(|(chain, spent)| format!("  {chain}: ${spent:.4}"))
                .collect();
            gas_lines.sort();
            (farm_state.total_actions, today_actions, gas_lines)
        };
        let gas_text = if gas_lines.is_empty() {
            "  (none yet)".to_string()
        } else {
            gas_lines.join("\n")
        };

        let report = format!(
            "\u{1f4ca} <b>DAILY FARM REPORT</b>\n\n\
             \u{1f4c5} Date: {today}\n\
             \u{2705} Actions today: {today_actions}\n\
             \u{1f4c8} Total actions: {total_actions}\n\n\
             \u{1f4b0} <b>Budget</b>\n\
             \x20 Spent: ${:.4}\n\
             \x20 Remaining: ${:.4}\n\n\
             \u{1f5d3} <b>Schedule</b>\n\
             \x20 Planned: {}\n\
             \x20 Done: {}\n\
             \x20 Pending: {}\n\
             \x20 Failed: {}\n\n\
             \u{26fd} Gas by chain:\n{gas_text}",
            budget.total_spent,
            budget.remaining(),
            stats.total,
            stats.done,
            stats.pending,
            stats.failed,
        );

        self.notifier.send_message(&report).await;
        self.state.write().last_daily_report = Some(Utc::now());
        self.save_state();
    }

    // -------------------------------------------------------------------------
    // Entry points
    // -------------------------------------------------------------------------

    /// One full cycle: plan → execute → testnet → scan → report.
    pub async fn run_once(&self) -> Result<()> {
        info!(
            mode = if self.dry_run { "DRY RUN" } else { "LIVE" },
            budget_remaining = self.chain_mgr.budget_remaining(),
            "farm cycle starting"
        );

        self.planner
            .get_daily_plan(Utc::now(), self.chain_mgr.budget_remaining());
        let stats = self.planner.stats();
        info!(total = stats.total, pending = stats.pending, "today's plan");

        let executed = self.run_pending_actions().await;
        info!(executed, "mainnet actions executed");

        self.run_testnet_cycle().await;
        self.run_airdrop_scan().await;
        self.send_daily_report().await;

        info!("farm cycle complete");
        Ok(())
    }

    /// 24/7 loop. Sleeps until the next action (capped at 30 minutes) with
    /// jitter; a cycle error backs off ten minutes. Ctrl+C exits cleanly.
    pub async fn run_loop(&self) -> Result<()> {
        self.notifier
            .send_message(&format!(
                "\u{1f680} <b>AIRDROP FARMER STARTED</b>\n\
                 Mode: {}\n\
                 Budget: ${:.4}",
                if self.dry_run { "DRY RUN" } else { "LIVE" },
                self.chain_mgr.budget_remaining(),
            ))
            .await;

        if let Err(e) = self.run_once().await {
            error!(error = %e, "initial cycle failed");
        }

        loop {
            let sleep_secs = self.next_sleep_secs();
            info!(minutes = sleep_secs / 60.0, "sleeping until next cycle");

            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs_f64(sleep_secs)) => {}
                _ = tokio::signal::ctrl_c() => {
                    warn!("farmer stopped by operator");
                    self.notifier
                        .send_message("\u{1f6d1} <b>AIRDROP FARMER STOPPED</b> (manual)")
                        .await;
                    return Ok(());
                }
            }

            if let Err(e) = self.run_once().await {
                error!(error = %e, "cycle failed — backing off");
                tokio::time::sleep(std::time::Duration::from_secs(ERROR_BACKOFF_SECS)).await;
            }
        }
    }

    fn next_sleep_secs(&self) -> f64 {
        let now = Utc::now();
        let until_next = self
            .planner
            .next_action_time()
            .filter(|t| *t > now)
            .map(|t| (t - now).num_seconds() as f64)
            .unwrap_or(MAX_SLEEP_SECS);

        let jitter = rand::thread_rng().gen_range(JITTER_LOW_SECS..=JITTER_HIGH_SECS);
        (until_next.min(MAX_SLEEP_SECS) + jitter).max(MIN_SLEEP_SECS)
    }

    /// Human-readable status block for `--status`.
    pub fn show_status(&self) {
        let farm_state = self.state.read();
        let stats = self.planner.stats();
        let budget = self.chain_mgr.budget_snapshot();

        println!("{}", "=".repeat(50));
        println!("AIRDROP FARMER STATUS");
        println!("{}", "=".repeat(50));
        println!("Started:    {}", farm_state.started_at.format("%Y-%m-%d %H:%M UTC"));
        println!("Total acts: {}", farm_state.total_actions);
        println!("Gas spent:  ${:.4}", budget.total_spent);
        println!("Gas left:   ${:.4}", budget.remaining());
        println!(
            "Wallet:     {}",
            self.chain_mgr
                .primary_wallet()
                .map(|w| w.address.clone())
                .unwrap_or_else(|| "NONE".to_string())
        );
        println!();
        println!("Schedule ({}):", stats.date.as_deref().unwrap_or("?"));
        println!("  Total:   {}", stats.total);
        println!("  Pending: {}", stats.pending);
        println!("  Done:    {}", stats.done);
        println!("  Failed:  {}", stats.failed);
        println!();
        println!("Gas by chain:");
        for (chain, spent) in &budget.spent_by_chain {
            println!("  {chain}: ${spent:.4}");
        }
        println!();
        println!("Testnet txns: {}", farm_state.testnet_total_txns);
        println!();
        println!("Last 5 actions:");
        for a in farm_state.actions_log.iter().rev().take(5) {
            println!(
                "  {} | {:20} | {}",
                a.time.format("%Y-%m-%d %H:%M:%S"),
                a.action_type.to_string(),
                &a.tx_hash[..a.tx_hash.len().min(20)]
            );
        }
        println!("{}", "=".repeat(50));
    }
}

impl std::fmt::Debug for AirdropFarmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AirdropFarmer")
            .field("dry_run", &self.dry_run)
            .field("budget_remaining", &self.chain_mgr.budget_remaining())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn farmer(dir: &tempfile::TempDir, dry_run: bool) -> AirdropFarmer {
        let config = FarmerConfig {
            wallets_file: dir.path().join("farming_wallets.json").to_string_lossy().into_owned(),
            farm_state_file: dir.path().join("farm_state.json").to_string_lossy().into_owned(),
            farm_schedule_file: dir.path().join("farm_schedule.json").to_string_lossy().into_owned(),
            airdrop_report_file: dir.path().join("airdrop_report.json").to_string_lossy().into_owned(),
            ..FarmerConfig::default()
        };
        AirdropFarmer::new(
            config,
            Some("e908f86dbb4d55ac876378565aafeabc187f6690f046459397b17d9b9a19688e"),
            Notifier::disabled(),
            dry_run,
        )
    }

    #[tokio::test]
    async fn dry_run_actions_complete_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let f = farmer(&dir, true);

        let plan = f.planner.get_daily_plan(Utc::now(), 1.5);
        assert!(!plan.is_empty());

        let tx = f.execute_action(&plan[0]).await.unwrap();
        assert!(tx.unwrap().starts_with("dry_run_"));
    }

    #[test]
    fn farm_state_roundtrip_keeps_budget() {
        let dir = tempfile::tempdir().unwrap();
        {
            let f = farmer(&dir, true);
            f.chain_mgr.record_spend("base");
            f.save_state();
        }
        let f = farmer(&dir, true);
        // Restored budget reflects the recorded spend (base ≈ $0.15).
        assert!(f.chain_mgr.budget_remaining() < 1.5);
    }

    #[test]
    fn hours_since_none_is_infinite() {
        assert!(hours_since(None).is_infinite());
        let recent = Some(Utc::now() - chrono::Duration::minutes(30));
        let h = hours_since(recent);
        assert!(h > 0.4 && h < 0.6);
    }

    #[test]
    fn sleep_is_bounded_and_jittered() {
        let dir = tempfile::tempdir().unwrap();
        let f = farmer(&dir, true);
        for _ in 0..50 {
            let s = f.next_sleep_secs();
            assert!(s >= MIN_SLEEP_SECS);
            assert!(s <= MAX_SLEEP_SECS + JITTER_HIGH_SECS);
        }
    }

    #[test]
    fn action_log_entry_uses_type_wire_name() {
        let entry = ActionLogEntry {
            id: "a1_0304".to_string(),
            action_type: ActionType::SelfTransfer,
            chain: "base".to_string(),
            tx_hash: "0xdead".to_string(),
            time: Utc::now(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "self_transfer");
    }
}
