// =============================================================================
// Trading Engine — scan, score, size, and place bracketed entries
// =============================================================================
//
// One tick:
//   drawdown check → position management → (if due) macro optimization →
//   close detection → (if due) micro adaptation → per-asset entry evaluation
//   with the open-position cap.
//
// The ensemble scorer is deliberately redundant and shallow: eight ±1 votes,
// none of which can force a trade alone. Mean-reversion votes (Bollinger,
// RSI) are gated on volume confirmation. The only short-circuit is the
// extreme-oversold bounce, which goes LONG immediately.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::adapter::StrategyAdapter;
use crate::config::{base_symbol, is_secondary_asset, BotConfig, Credentials, Tier, SECONDARY_NAMESPACE};
use crate::indicators::{compute_signals, SignalBundle, SignalParams};
use crate::liquidity::{analyze_liquidity_zones, LiquidityMap};
use crate::notify::Notifier;
use crate::optimizer::{Adjustments, StrategyOptimizer};
use crate::oracle::{BiasVerdict, SentimentOracle};
use crate::position::{PositionAction, PositionManager, PositionRules};
use crate::tracker::{SignalSnapshot, TradeTracker};
use crate::types::{Bias, Direction, ExitReason};
use crate::venue::{ExchangeClient, InfoClient, VenuePosition};

/// Margin headroom added on top of the required margin when pre-funding the
/// secondary namespace.
const MARGIN_BUFFER: f64 = 1.0;
const TRANSFER_BUFFER: f64 = 0.5;
/// Settlement spacing between dependent venue actions.
const SETTLE_DELAY: Duration = Duration::from_secs(2);
const ORDER_DELAY: Duration = Duration::from_secs(1);
/// Order-book imbalance gates (top-5 bid/ask size ratio).
const OB_LONG_RATIO: f64 = 1.5;
const OB_SHORT_RATIO: f64 = 0.67;

// ---------------------------------------------------------------------------
// Pure scoring
// ---------------------------------------------------------------------------

/// Everything the scorer looks at for one symbol on one tick.
#[derive(Debug, Clone)]
pub struct ScoreInputs {
    pub primary: SignalBundle,
    pub h1: Option<SignalBundle>,
    pub h4: Option<SignalBundle>,
    pub liquidity_bias: Option<Bias>,
    pub ai: BiasVerdict,
    pub ob_ratio: Option<f64>,
}

/// Count the ±1 votes for each side.
pub fn score_entry(inputs: &ScoreInputs) -> (i32, i32) {
    let s = &inputs.primary;
    let mut long = 0;
    let mut short = 0;

    // 1+2. Mean-reversion votes only count on confirmed volume.
    if s.volume_confirmed {
        if s.below_lower_bb {
            long += 1;
        }
        if s.above_upper_bb {
            short += 1;
        }
        if s.rsi_oversold {
            long += 1;
        }
        if s.rsi_overbought {
            short += 1;
        }
    }

    // 3. Directional movement, gated on a trending ADX.
    if s.trending {
        if s.trend_bullish {
            long += 1;
        } else if s.trend_bearish {
            short += 1;
        }
    }

    // 4. Oracle bias.
    match inputs.ai.bias {
        Bias::Long => long += 1,
        Bias::Short => short += 1,
        Bias::Neutral => {}
    }

    // 5. Momentum vs SMA-5.
    if s.momentum_bullish {
        long += 1;
    } else if s.momentum_bearish {
        short += 1;
    }

    // 6. Liquidity-map bias.
    match inputs.liquidity_bias {
        Some(Bias::Long) => long += 1,
        Some(Bias::Short) => short += 1,
        _ => {}
    }

    // 7. Order-book imbalance.
    if let Some(ratio) = inputs.ob_ratio {
        if ratio > OB_LONG_RATIO {
            long += 1;
        } else if ratio < OB_SHORT_RATIO {
            short += 1;
        }
    }

    // 8. Multi-timeframe RSI, each timeframe votes separately.
    for htf in [&inputs.h1, &inputs.h4].into_iter().flatten() {
        if htf.rsi < 50.0 {
            long += 1;
        } else if htf.rsi > 50.0 {
            short += 1;
        }
    }

    (long, short)
}

/// Entry decision: short-circuit on extreme oversold, otherwise a side wins
/// by meeting its threshold and strictly beating the other side.
pub fn decide_entry(
    inputs: &ScoreInputs,
    long_threshold: i32,
    short_threshold: i32,
    extreme_rsi: f64,
) -> Option<(Direction, i32, i32)> {
    let oversold_1h = inputs.h1.as_ref().map(|h| h.rsi < extreme_rsi).unwrap_or(false);
    if oversold_1h || inputs.primary.rsi < extreme_rsi {
        return Some((Direction::Long, 0, 0));
    }

    let (long, short) = score_entry(inputs);
    if long >= long_threshold && long > short {
        Some((Direction::Long, long, short))
    } else if short >= short_threshold && short > long {
        Some((Direction::Short, long, short))
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Sizing & rounding
// ---------------------------------------------------------------------------

/// Magnitude-scaled price rounding.
pub fn round_price(price: f64) -> f64 {
    if price > 1000.0 {
        price.trunc()
    } else if price > 10.0 {
        (price * 100.0).round() / 100.0
    } else if price > 1.0 {
        (price * 1000.0).round() / 1000.0
    } else {
        (price * 10_000.0).round() / 10_000.0
    }
}

/// Round an order quantity to the asset's size decimals.
pub fn round_size(size: f64, sz_decimals: u32) -> f64 {
    let factor = 10f64.powi(sz_decimals as i32);
    (size * factor).round() / factor
}

/// Position size from the active tier.
///
/// notional = equity × riskPct × leverage, capped at 0.6 × equity × leverage;
/// rejected (0.0) below the venue minimum notional.
pub fn position_size(
    equity: f64,
    price: f64,
    tier: &Tier,
    leverage: u32,
    sz_decimals: u32,
    min_notional: f64,
) -> f64 {
    if price <= 0.0 || equity <= 0.0 {
        return 0.0;
    }

    let lev = leverage as f64;
    let mut notional = equity * tier.risk_pct * lev;
    notional = notional.min(equity * lev * 0.6);

    if notional < min_notional {
        return 0.0;
    }

    let size = round_size(notional / price, sz_decimals);
    if size * price < min_notional {
        return 0.0;
    }
    size
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct TradingEngine {
    config: BotConfig,
    account: String,
    info: InfoClient,
    exchange: ExchangeClient,
    oracle: SentimentOracle,
    notifier: Notifier,
    pub tracker: TradeTracker,
    pub adapter: StrategyAdapter,
    pub optimizer: StrategyOptimizer,
    pub positions: PositionManager,

    sz_decimals: HashMap<String, u32>,
    max_leverage: HashMap<String, u32>,
    initial_balance: f64,

    regime_adjustments: RwLock<Option<Adjustments>>,
    removed_assets: RwLock<HashSet<String>>,
    last_known_positions: RwLock<HashSet<String>>,
}

impl TradingEngine {
    /// Build the engine: clients, universe metadata, state files, and the
    /// startup order sweep.
    pub async fn new(credentials: &Credentials, config: BotConfig) -> Result<Self> {
        let info = InfoClient::new();
        let exchange = ExchangeClient::new(&credentials.api_secret)?;
        let oracle = SentimentOracle::new(
            credentials.perplexity_api_key.clone(),
            config.sentiment_ttl_mins,
        );
        let notifier = Notifier::new(
            credentials.telegram_bot_token.clone(),
            credentials.telegram_chat_id.clone(),
        );

        // Universe metadata for both namespaces: size decimals, leverage
        // caps, and the exchange's asset-id registry.
        let mut sz_decimals = HashMap::new();
        let mut max_leverage = HashMap::new();
        for (dex_index, namespace) in ["", SECONDARY_NAMESPACE].iter().enumerate() {
            match info.meta(namespace).await {
                Ok(universe) => {
                    exchange.register_assets(namespace, dex_index, &universe);
                    for meta in &universe {
                        let key = if namespace.is_empty() {
                            meta.name.clone()
                        } else {
                            format!("{namespace}:{}", meta.name)
                        };
                        sz_decimals.insert(key.clone(), meta.sz_decimals);
                        max_leverage.insert(key, meta.max_leverage);
                    }
                }
                Err(e) => error!(namespace, error = %e, "failed to load universe metadata"),
            }
        }
        info!(assets = sz_decimals.len(), "universe metadata loaded");

        let account = credentials.account_address.clone();
        let initial_balance = Self::total_account_value(&info, &account).await;

        let tracker = TradeTracker::new("trades_history.json");
        let adapter = StrategyAdapter::new("strategy_state.json");
        let optimizer = StrategyOptimizer::new("optimizer_state.json", "trade_history.json");
        let positions = PositionManager::new(
            PositionRules {
                partial_tp_threshold: config.partial_tp_threshold,
                partial_tp_fraction: config.partial_tp_fraction,
                trailing_activation: config.trailing_stop_activation,
                trailing_distance: config.trailing_stop_distance,
                max_drawdown_pct: config.max_drawdown_pct,
            },
            initial_balance,
        );

        let engine = Self {
            config,
            account,
            info,
            exchange,
            oracle,
            notifier,
            tracker,
            adapter,
            optimizer,
            positions,
            sz_decimals,
            max_leverage,
            initial_balance,
            regime_adjustments: RwLock::new(None),
            removed_assets: RwLock::new(HashSet::new()),
            last_known_positions: RwLock::new(HashSet::new()),
        };

        engine.cancel_all_orders().await;
        Ok(engine)
    }

    // -------------------------------------------------------------------------
    // Account helpers
    // -------------------------------------------------------------------------

    async fn total_account_value(info: &InfoClient, account: &str) -> f64 {
        let mut total = 0.0;
        for namespace in ["", SECONDARY_NAMESPACE] {
            match info.user_state(account, namespace).await {
                Ok(state) => total += state.account_value,
                Err(e) => error!(namespace, error = %e, "account value fetch failed"),
            }
        }
        total
    }

    pub async fn account_value(&self) -> f64 {
        Self::total_account_value(&self.info, &self.account).await
    }

    /// Open positions across every namespace.
    pub async fn open_positions(&self) -> Vec<VenuePosition> {
        let mut positions = Vec::new();
        for namespace in ["", SECONDARY_NAMESPACE] {
            match self.info.user_state(&self.account, namespace).await {
                Ok(state) => positions.extend(state.positions),
                Err(e) => error!(namespace, error = %e, "positions fetch failed"),
            }
        }
        positions
    }

    async fn candles(&self, asset: &str, count: usize, interval: &str) -> Option<Vec<crate::indicators::Candle>> {
        let dur_ms = BotConfig::interval_ms(interval);
        let now_ms = Utc::now().timestamp_millis();
        match self
            .info
            .candles_snapshot(asset, interval, now_ms - count as i64 * dur_ms, now_ms)
            .await
        {
            Ok(candles) if !candles.is_empty() => Some(candles),
            Ok(_) => None,
            Err(e) => {
                error!(asset, interval, error = %e, "candle fetch failed");
                None
            }
        }
    }

    fn signal_params(&self) -> SignalParams {
        SignalParams {
            bb_period: self.config.bb_period,
            bb_std: self.config.bb_std,
            rsi_period: self.config.rsi_period,
            adx_period: self.config.adx_period,
            volume_ratio_threshold: self.config.volume_ratio_threshold,
        }
    }

    fn asset_leverage(&self, asset: &str, tier: &Tier) -> u32 {
        tier.leverage.min(self.max_leverage.get(asset).copied().unwrap_or(5))
    }

    /// Effective bracket percentages: tier values scaled by any active regime
    /// adjustment.
    fn bracket_pcts(&self, tier: &Tier) -> (f64, f64) {
        match self.regime_adjustments.read().as_ref() {
            Some(adj) => (tier.sl_pct * adj.sl_adjust, tier.tp_pct * adj.tp_adjust),
            None => (tier.sl_pct, tier.tp_pct),
        }
    }

    /// Per-side score thresholds: the adapter's value unless a regime skew is
    /// active.
    fn thresholds(&self) -> (i32, i32) {
        let base = self.adapter.score_threshold();
        match self.regime_adjustments.read().as_ref() {
            Some(adj) => (adj.long_threshold, adj.short_threshold),
            None => (base, base),
        }
    }

    // -------------------------------------------------------------------------
    // Startup
    // -------------------------------------------------------------------------

    /// Cancel all resting orders on both namespaces for a clean start.
    async fn cancel_all_orders(&self) {
        for namespace in ["", SECONDARY_NAMESPACE] {
            let orders = match self.info.open_orders(&self.account, namespace).await {
                Ok(orders) => orders,
                Err(e) => {
                    warn!(namespace, error = %e, "order sweep: listing failed");
                    continue;
                }
            };
            if orders.is_empty() {
                continue;
            }

            let mut by_coin: HashMap<String, Vec<u64>> = HashMap::new();
            for order in &orders {
                by_coin.entry(order.coin.clone()).or_default().push(order.oid);
            }
            for (coin, oids) in by_coin {
                if let Err(e) = self.exchange.bulk_cancel(&coin, &oids).await {
                    warn!(coin, error = %e, "order sweep: cancel failed");
                }
            }
            info!(namespace, count = orders.len(), "orphaned orders cancelled");
        }
    }

    /// Set per-asset leverage (cross on the primary namespace, isolated on
    /// the secondary).
    pub async fn setup_leverage(&self) {
        let equity = self.account_value().await;
        let tier = self.config.tier_for(equity).clone();

        for asset in &self.config.assets {
            let lev = self.asset_leverage(asset, &tier);
            let is_cross = !is_secondary_asset(asset);
            match self.exchange.update_leverage(asset, is_cross, lev).await {
                Ok(_) => info!(asset, lev, is_cross, "leverage set"),
                Err(e) => warn!(asset, error = %e, "leverage set failed"),
            }
        }
    }

    pub fn startup_banner(&self) {
        let tier = self.config.tier_for(self.initial_balance);
        info!("{}", "=".repeat(60));
        info!("MERIDIAN TRADING WORKER");
        info!("{}", "=".repeat(60));
        info!(balance = self.initial_balance, "starting balance");
        info!(
            leverage = tier.leverage,
            risk_pct = tier.risk_pct,
            sl_pct = tier.sl_pct,
            tp_pct = tier.tp_pct,
            "active tier"
        );
        info!(assets = ?self.config.assets, "scanning universe");
        info!(
            check_interval_secs = self.config.check_interval_secs,
            optimize_interval_hours = self.config.optimize_interval_hours,
            max_open_positions = self.config.max_open_positions,
            "cadence"
        );
        info!("{}", "=".repeat(60));
    }

    // -------------------------------------------------------------------------
    // Namespace transfers
    // -------------------------------------------------------------------------

    /// Move `amount` USDC from the primary namespace to the secondary one.
    async fn transfer_to_secondary(&self, amount: f64) -> bool {
        let primary = match self.info.user_state(&self.account, "").await {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "primary balance fetch failed");
                return false;
            }
        };
        if primary.withdrawable < amount {
            warn!(
                need = amount,
                have = primary.withdrawable,
                "not enough withdrawable for namespace transfer"
            );
            return false;
        }

        match self
            .exchange
            .send_asset(&self.account, "", SECONDARY_NAMESPACE, "USDC", amount)
            .await
        {
            Ok(resp) if resp.all_ok() => {
                info!(amount, "transferred to secondary namespace");
                tokio::time::sleep(SETTLE_DELAY).await;
                true
            }
            Ok(resp) => {
                error!(error = ?resp.first_error(), "secondary transfer rejected");
                false
            }
            Err(e) => {
                error!(error = %e, "secondary transfer failed");
                false
            }
        }
    }

    /// Sweep the secondary namespace's withdrawable balance back to primary.
    async fn transfer_from_secondary(&self) -> bool {
        let secondary = match self.info.user_state(&self.account, SECONDARY_NAMESPACE).await {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "secondary balance fetch failed");
                return false;
            }
        };
        if secondary.withdrawable < 0.01 {
            return false;
        }

        match self
            .exchange
            .send_asset(
                &self.account,
                SECONDARY_NAMESPACE,
                "",
                "USDC",
                secondary.withdrawable,
            )
            .await
        {
            Ok(resp) if resp.all_ok() => {
                info!(amount = secondary.withdrawable, "secondary balance reclaimed");
                tokio::time::sleep(SETTLE_DELAY).await;
                true
            }
            Ok(resp) => {
                error!(error = ?resp.first_error(), "reclaim rejected");
                false
            }
            Err(e) => {
                error!(error = %e, "reclaim failed");
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Entry evaluation
    // -------------------------------------------------------------------------

    /// Gather indicator inputs and decide an entry for one symbol.
    pub async fn check_entry(&self, asset: &str) -> Option<(Direction, SignalSnapshot)> {
        let params = self.signal_params();

        let candles = self.candles(asset, self.config.lookback_candles, &self.config.candle_interval).await?;
        let primary = compute_signals(&candles, &params)?;

        // Liquidity zones on the broader 1h picture.
        let candles_1h = self.candles(asset, 100, "1h").await;
        let liq: Option<LiquidityMap> = candles_1h
            .as_ref()
            .and_then(|c| analyze_liquidity_zones(c, primary.price));
        let h1 = candles_1h.as_ref().and_then(|c| compute_signals(c, &params));

        if let Some(map) = &liq {
            info!(
                asset,
                price = primary.price,
                rsi = primary.rsi,
                adx = primary.adx,
                support = map.nearest_support,
                resistance = map.nearest_resistance,
                bias = %map.liquidity_bias,
                vol_ratio = primary.volume_ratio,
                "scan"
            );
        } else {
            info!(asset, price = primary.price, rsi = primary.rsi, adx = primary.adx, "scan");
        }

        let h4 = match self.candles(asset, 50, "4h").await {
            Some(c) => compute_signals(&c, &params),
            None => None,
        };

        // Oracle bias strips the namespace prefix.
        let ai = self.oracle.macro_bias(base_symbol(asset)).await;

        let ob_ratio = match self.info.l2_snapshot(asset, 5).await {
            Ok(book) => {
                let bid_vol: f64 = book.bids.iter().map(|l| l.sz).sum();
                let ask_vol: f64 = book.asks.iter().map(|l| l.sz).sum();
                if ask_vol > 0.0 {
                    Some(bid_vol / ask_vol)
                } else {
                    None
                }
            }
            Err(e) => {
                error!(asset, error = %e, "orderbook fetch failed");
                None
            }
        };

        let inputs = ScoreInputs {
            primary: primary.clone(),
            h1,
            h4,
            liquidity_bias: liq.as_ref().map(|m| m.liquidity_bias),
            ai,
            ob_ratio,
        };

        let (long_threshold, short_threshold) = self.thresholds();
        let (direction, long_score, short_score) = decide_entry(
            &inputs,
            long_threshold,
            short_threshold,
            self.config.extreme_rsi_threshold,
        )?;

        if long_score == 0 && short_score == 0 {
            info!(asset, rsi = primary.rsi, "extreme oversold — bounce long");
        } else {
            info!(
                asset,
                %direction,
                long_score,
                short_score,
                long_threshold,
                short_threshold,
                ai = %inputs.ai.bias,
                "entry signal"
            );
        }

        Some((
            direction,
            SignalSnapshot {
                bundle: primary,
                ai_bias: inputs.ai.bias,
                ob_ratio: inputs.ob_ratio,
                long_score,
                short_score,
            },
        ))
    }

    // -------------------------------------------------------------------------
    // Order placement
    // -------------------------------------------------------------------------

    /// Open a position with bracketed exits. Transactional at the design
    /// level: a rejected entry rolls back any namespace pre-transfer and
    /// journals nothing.
    pub async fn place_trade(&self, asset: &str, direction: Direction, signals: SignalSnapshot) {
        let equity = self.account_value().await;
        let tier = self.config.tier_for(equity).clone();

        let Some(candles) = self.candles(asset, 5, &self.config.candle_interval).await else {
            return;
        };
        let Some(price) = candles.last().map(|c| c.close) else {
            return;
        };

        let leverage = self.asset_leverage(asset, &tier);
        let sz_decimals = self.sz_decimals.get(asset).copied().unwrap_or(2);
        let size = position_size(
            equity,
            price,
            &tier,
            leverage,
            sz_decimals,
            self.config.min_notional_usd,
        );
        if size <= 0.0 {
            warn!(asset, equity, price, "position too small — skipping");
            return;
        }
        let notional = size * price;

        // Secondary-namespace symbols are margined in their own sub-account;
        // pre-fund it and remember to roll back on rejection.
        let mut transferred = false;
        if is_secondary_asset(asset) {
            let margin_needed = notional / leverage as f64 + MARGIN_BUFFER;
            let secondary = match self.info.user_state(&self.account, SECONDARY_NAMESPACE).await {
                Ok(state) => state,
                Err(e) => {
                    error!(asset, error = %e, "secondary state fetch failed");
                    return;
                }
            };
            if secondary.withdrawable < margin_needed {
                let amount = margin_needed - secondary.account_value + TRANSFER_BUFFER;
                info!(asset, margin_needed, amount, "pre-funding secondary namespace");
                if !self.transfer_to_secondary(amount).await {
                    warn!(asset, "cannot trade: secondary transfer failed");
                    return;
                }
                transferred = true;
            }
        }

        let is_buy = direction.is_buy();
        let (sl_pct, tp_pct) = self.bracket_pcts(&tier);
        let (sl_price, tp_price) = match direction {
            Direction::Long => (
                round_price(price * (1.0 - sl_pct)),
                round_price(price * (1.0 + tp_pct)),
            ),
            Direction::Short => (
                round_price(price * (1.0 + sl_pct)),
                round_price(price * (1.0 - tp_pct)),
            ),
        };

        info!(
            asset,
            %direction,
            size,
            price,
            notional,
            leverage,
            sl_price,
            tp_price,
            "submitting entry"
        );

        // Entry.
        let result = match self.exchange.market_open(asset, is_buy, size, price).await {
            Ok(result) => result,
            Err(e) => {
                error!(asset, error = %e, "entry submission failed");
                self.notifier
                    .alert(&format!("ORDER FAILED {direction} {size} {asset}: {e}"))
                    .await;
                if transferred {
                    self.transfer_from_secondary().await;
                }
                return;
            }
        };

        if !result.all_ok() {
            let reason = result.first_error().unwrap_or_else(|| "unfilled".to_string());
            error!(asset, reason, "entry rejected — no brackets placed");
            self.notifier
                .alert(&format!("ORDER REJECTED {direction} {size} {asset}: {reason}"))
                .await;
            if transferred {
                self.transfer_from_secondary().await;
            }
            return;
        }

        info!(asset, "entry filled — placing brackets");

        // Journal before notifying; the journal is the contract.
        self.optimizer.log_trade(asset, direction, price, size, notional);
        let score = signals.long_score.max(signals.short_score);
        let bundle = signals.bundle.clone();
        let ai_bias = signals.ai_bias;
        self.tracker.log_entry(asset, direction, size, price, signals, leverage);

        self.notifier
            .trade_opened(asset, direction, size, price, leverage, score, Some(&bundle), ai_bias)
            .await;

        tokio::time::sleep(ORDER_DELAY).await;

        // Brackets are reduce-only triggers on the opposite side. A failure
        // here is alerted but never retried in-tick; the next cycle's manager
        // observes the naked position.
        match self.exchange.place_trigger(asset, !is_buy, size, sl_price, "sl").await {
            Ok(resp) if resp.all_ok() => info!(asset, sl_price, "stop-loss placed"),
            Ok(resp) => {
                error!(asset, error = ?resp.first_error(), "stop-loss rejected");
                self.notifier.alert(&format!("SL placement failed on {asset}")).await;
            }
            Err(e) => {
                error!(asset, error = %e, "stop-loss placement failed");
                self.notifier.alert(&format!("SL placement failed on {asset}")).await;
            }
        }

        tokio::time::sleep(ORDER_DELAY).await;

        match self.exchange.place_trigger(asset, !is_buy, size, tp_price, "tp").await {
            Ok(resp) if resp.all_ok() => info!(asset, tp_price, "take-profit placed"),
            Ok(resp) => {
                error!(asset, error = ?resp.first_error(), "take-profit rejected");
                self.notifier.alert(&format!("TP placement failed on {asset}")).await;
            }
            Err(e) => {
                error!(asset, error = %e, "take-profit placement failed");
                self.notifier.alert(&format!("TP placement failed on {asset}")).await;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Position management
    // -------------------------------------------------------------------------

    /// Execute the position manager's decisions for this tick.
    async fn manage_positions(&self, positions: &[VenuePosition]) {
        for action in self.positions.observe(positions) {
            match action {
                PositionAction::PartialClose { asset, size, close_is_buy, pnl_pct } => {
                    let sz_decimals = self.sz_decimals.get(&asset).copied().unwrap_or(2);
                    let close_size = round_size(size, sz_decimals);
                    let Some(price) = self.last_price(&asset).await else { continue };

                    match self
                        .exchange
                        .market_close(&asset, close_is_buy, close_size, price)
                        .await
                    {
                        Ok(resp) if resp.all_ok() => {
                            info!(
                                asset,
                                close_size,
                                pnl_pct = pnl_pct * 100.0,
                                "partial take-profit executed"
                            );
                            self.positions.mark_partial_closed(&asset);
                        }
                        Ok(resp) => {
                            error!(asset, error = ?resp.first_error(), "partial close rejected")
                        }
                        Err(e) => error!(asset, error = %e, "partial close failed"),
                    }
                }
                PositionAction::TrailingClose { asset, size, close_is_buy, peak_pnl_pct, pnl_pct } => {
                    let Some(price) = self.last_price(&asset).await else { continue };
                    let pos = positions.iter().find(|p| p.coin == asset);

                    match self.exchange.market_close(&asset, close_is_buy, size, price).await {
                        Ok(resp) if resp.all_ok() => {
                            info!(
                                asset,
                                peak = peak_pnl_pct * 100.0,
                                exit = pnl_pct * 100.0,
                                "trailing stop closed"
                            );
                            if let Some(closed) =
                                self.tracker.log_exit(&asset, price, ExitReason::TrailingStop)
                            {
                                let pnl = pos.map(|p| p.unrealized_pnl).unwrap_or(0.0);
                                self.optimizer.close_trade(&asset, price, pnl);
                                self.notifier
                                    .trade_closed(
                                        &asset,
                                        closed.direction,
                                        closed.entry_price,
                                        price,
                                        closed.pnl.unwrap_or(0.0),
                                        closed.pnl_pct.unwrap_or(0.0),
                                        ExitReason::TrailingStop,
                                    )
                                    .await;
                            }
                        }
                        Ok(resp) => {
                            error!(asset, error = ?resp.first_error(), "trailing close rejected")
                        }
                        Err(e) => error!(asset, error = %e, "trailing close failed"),
                    }
                    self.positions.clear_peak(&asset);
                }
            }
        }
    }

    async fn last_price(&self, asset: &str) -> Option<f64> {
        self.candles(asset, 2, &self.config.candle_interval)
            .await
            .and_then(|c| c.last().map(|c| c.close))
    }

    // -------------------------------------------------------------------------
    // Close detection & reconciliation
    // -------------------------------------------------------------------------

    /// Diff the open-coin set against the previous tick; journal closes and
    /// reclaim secondary-namespace funds when its last position is gone.
    async fn track_closed_positions(&self, positions: &[VenuePosition]) {
        let current: HashSet<String> = positions.iter().map(|p| p.coin.clone()).collect();
        let previous = self.last_known_positions.read().clone();

        for coin in previous.difference(&current) {
            info!(coin, "position closed externally");

            if is_secondary_asset(coin) {
                let secondary_open = current.iter().any(|c| is_secondary_asset(c));
                if !secondary_open {
                    info!("no secondary-namespace positions left — reclaiming funds");
                    self.transfer_from_secondary().await;
                }
            }
        }

        *self.last_known_positions.write() = current;

        // Resolve the journal side of any inferred closes via fills history.
        let equity = self.account_value().await;
        let tier = self.config.tier_for(equity);
        let (sl_pct, tp_pct) = self.bracket_pcts(tier);
        let open_coins: Vec<String> = positions.iter().map(|p| p.coin.clone()).collect();

        let closed = self
            .tracker
            .detect_closed_trades(&self.info, &self.account, &open_coins, sl_pct, tp_pct)
            .await;
        for trade in closed {
            let exit_px = trade.exit_price.unwrap_or(trade.entry_price);
            self.optimizer
                .close_trade(&trade.asset, exit_px, trade.pnl.unwrap_or(0.0));
            self.notifier
                .trade_closed(
                    &trade.asset,
                    trade.direction,
                    trade.entry_price,
                    exit_px,
                    trade.pnl.unwrap_or(0.0),
                    trade.pnl_pct.unwrap_or(0.0),
                    trade.exit_reason.unwrap_or(ExitReason::Unknown),
                )
                .await;
        }
    }

    // -------------------------------------------------------------------------
    // Macro optimization
    // -------------------------------------------------------------------------

    pub async fn run_optimization(&self) {
        if !self.optimizer.should_optimize(self.config.optimize_interval_hours) {
            return;
        }

        info!("running macro optimization");
        let verdict = self.oracle.regime_verdict().await;
        if let Some(adjustments) = self.optimizer.optimize(verdict.as_ref()) {
            if let Some(asset) = &adjustments.remove_asset {
                warn!(asset, "optimizer removed underperforming asset");
                self.removed_assets.write().insert(asset.clone());
            }
            info!(
                regime = %self.optimizer.current_regime(),
                bias = %adjustments.bias,
                long_threshold = adjustments.long_threshold,
                short_threshold = adjustments.short_threshold,
                "regime adjustments applied"
            );
            *self.regime_adjustments.write() = Some(adjustments);
        }
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    /// One full trading cycle.
    pub async fn tick(&self) -> Result<()> {
        let equity = self.account_value().await;
        let paused = self.positions.check_drawdown(equity);

        let positions = self.open_positions().await;
        self.manage_positions(&positions).await;

        if paused {
            info!("paused on drawdown — skipping entries");
            return Ok(());
        }

        self.run_optimization().await;

        // Re-read positions after management may have closed some.
        let positions = self.open_positions().await;
        self.track_closed_positions(&positions).await;

        // Micro adaptation when due.
        let total_closed = self.tracker.closed_count();
        if self.adapter.should_adapt(total_closed) {
            let stats = self.tracker.get_stats(Some(20));
            self.adapter.adapt(&stats, total_closed);
            info!("\n{}", self.adapter.report(&self.tracker.get_stats(None)));
        }

        let mut open_coins: HashSet<String> = positions.iter().map(|p| p.coin.clone()).collect();
        let mut open_count = positions.len();

        if open_count >= self.config.max_open_positions {
            info!(open = open_count, "position cap reached");
            return Ok(());
        }

        for asset in &self.config.assets {
            if open_count >= self.config.max_open_positions {
                break;
            }
            if open_coins.contains(asset) {
                continue;
            }
            if self.adapter.is_asset_blocked(asset) || self.removed_assets.read().contains(asset) {
                continue;
            }

            if let Some((direction, snapshot)) = self.check_entry(asset).await {
                self.place_trade(asset, direction, snapshot).await;
                open_coins.insert(asset.clone());
                open_count += 1;
            }
        }

        let balance = self.account_value().await;
        info!(
            balance,
            pnl = balance - self.initial_balance,
            positions = open_count,
            "cycle complete"
        );
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.config.check_interval_secs)
    }

    pub async fn notify_stopped(&self) {
        self.notifier.send_message("\u{1f6d1} <b>TRADING WORKER STOPPED</b>").await;
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{compute_signals, Candle, SignalParams};

    fn bundle_from(closes: &[f64], volume: f64) -> SignalBundle {
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::new(i as i64, c, c + 0.5, c - 0.5, c, volume))
            .collect();
        compute_signals(&candles, &SignalParams::default()).unwrap()
    }

    fn neutral_inputs() -> ScoreInputs {
        // Flat series: no votes anywhere.
        let flat: Vec<f64> = vec![100.0; 60];
        ScoreInputs {
            primary: bundle_from(&flat, 10.0),
            h1: None,
            h4: None,
            liquidity_bias: None,
            ai: BiasVerdict::default(),
            ob_ratio: None,
        }
    }

    #[test]
    fn neutral_market_produces_no_entry() {
        let inputs = neutral_inputs();
        let (l, s) = score_entry(&inputs);
        assert_eq!((l, s), (0, 0));
        assert!(decide_entry(&inputs, 2, 2, 25.0).is_none());
    }

    #[test]
    fn extreme_oversold_short_circuits_long() {
        // 1h RSI deep under the extreme threshold forces LONG regardless of
        // all other votes.
        let mut inputs = neutral_inputs();
        let falling: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        inputs.h1 = Some(bundle_from(&falling, 10.0));
        assert!(inputs.h1.as_ref().unwrap().rsi < 25.0);

        // Even with a short-leaning book the decision is LONG.
        inputs.ob_ratio = Some(0.2);
        let (direction, l, s) = decide_entry(&inputs, 4, 2, 25.0).unwrap();
        assert_eq!(direction, Direction::Long);
        assert_eq!((l, s), (0, 0));
    }

    #[test]
    fn primary_timeframe_oversold_also_short_circuits() {
        let falling: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        let inputs = ScoreInputs {
            primary: bundle_from(&falling, 10.0),
            h1: None,
            h4: None,
            liquidity_bias: None,
            ai: BiasVerdict::default(),
            ob_ratio: None,
        };
        let (direction, ..) = decide_entry(&inputs, 4, 4, 25.0).unwrap();
        assert_eq!(direction, Direction::Long);
    }

    #[test]
    fn volume_gate_suppresses_mean_reversion_votes() {
        // Downward spike below the lower band with oversold RSI, but the
        // last bar's volume matches the baseline — no confirmation.
        let mut closes: Vec<f64> = vec![100.0; 55];
        closes.extend([97.0, 94.0, 91.0, 88.0, 85.0]);

        let quiet = bundle_from(&closes, 10.0);
        assert!(quiet.below_lower_bb);
        assert!(!quiet.volume_confirmed);

        let inputs = ScoreInputs {
            primary: quiet,
            h1: None,
            h4: None,
            liquidity_bias: None,
            ai: BiasVerdict::default(),
            ob_ratio: None,
        };
        let (long, _) = score_entry(&inputs);
        // Momentum-bearish may vote short, but no BB/RSI long votes fire.
        assert_eq!(long, 0);
    }

    #[test]
    fn vote_accumulation_and_strict_majority() {
        let mut inputs = neutral_inputs();
        inputs.ai = BiasVerdict { bias: Bias::Long, score: 0.6 };
        inputs.liquidity_bias = Some(Bias::Long);
        inputs.ob_ratio = Some(2.0);

        let (l, s) = score_entry(&inputs);
        assert_eq!((l, s), (3, 0));

        // Meets threshold 3 and strictly beats short.
        let (direction, ..) = decide_entry(&inputs, 3, 3, 25.0).unwrap();
        assert_eq!(direction, Direction::Long);
        // Threshold 4 rejects it.
        assert!(decide_entry(&inputs, 4, 4, 25.0).is_none());
    }

    #[test]
    fn regime_skew_rejects_weak_longs_but_accepts_shorts() {
        // longScore=2: liquidity + orderbook.
        let mut long_leaning = neutral_inputs();
        long_leaning.liquidity_bias = Some(Bias::Long);
        long_leaning.ob_ratio = Some(2.0);
        let (l, s) = score_entry(&long_leaning);
        assert_eq!((l, s), (2, 0));
        // STRONG_BEAR skew: long_threshold=3, short_threshold=2.
        assert!(decide_entry(&long_leaning, 3, 2, 25.0).is_none());

        // shortScore=2: liquidity + orderbook lean short.
        let mut short_leaning = neutral_inputs();
        short_leaning.liquidity_bias = Some(Bias::Short);
        short_leaning.ob_ratio = Some(0.5);
        let (direction, _, s) = decide_entry(&short_leaning, 3, 2, 25.0).unwrap();
        assert_eq!(direction, Direction::Short);
        assert_eq!(s, 2);
    }

    #[test]
    fn tie_scores_never_trade() {
        let mut inputs = neutral_inputs();
        // One vote each way: liquidity long, orderbook short.
        inputs.liquidity_bias = Some(Bias::Long);
        inputs.ob_ratio = Some(0.5);
        let (l, s) = score_entry(&inputs);
        assert_eq!((l, s), (1, 1));
        assert!(decide_entry(&inputs, 1, 1, 25.0).is_none());
    }

    #[test]
    fn multi_timeframe_rsi_votes_both_frames() {
        let rising: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let falling: Vec<f64> = (0..60).map(|i| 260.0 - i as f64 * 0.4).collect();
        let mut inputs = neutral_inputs();
        inputs.h1 = Some(bundle_from(&falling, 10.0));
        inputs.h4 = Some(bundle_from(&rising, 10.0));

        assert!(inputs.h1.as_ref().unwrap().rsi < 50.0);
        assert!(inputs.h4.as_ref().unwrap().rsi > 50.0);
        let (l, s) = score_entry(&inputs);
        // h1 votes long (rsi < 50), h4 votes short (rsi > 50).
        assert_eq!((l, s), (1, 1));
    }

    // -- Sizing ------------------------------------------------------------

    fn tier1() -> Tier {
        Tier {
            min_equity: 0.0,
            max_equity: 30.0,
            leverage: 3,
            risk_pct: 0.30,
            tp_pct: 0.03,
            sl_pct: 0.015,
        }
    }

    #[test]
    fn size_formula_and_cap() {
        // equity 20, risk 30%, lev 3 → notional 18; cap 0.6*20*3=36 inactive.
        let size = position_size(20.0, 2.0, &tier1(), 3, 1, 10.0);
        assert!((size - 9.0).abs() < 1e-9);

        // risk_pct pushed high: cap engages.
        let mut greedy = tier1();
        greedy.risk_pct = 0.9;
        let size = position_size(20.0, 2.0, &greedy, 3, 1, 10.0);
        // cap = 0.6 * 20 * 3 = 36 → size 18.
        assert!((size - 18.0).abs() < 1e-9);
    }

    #[test]
    fn size_rejected_below_min_notional() {
        // equity 10, risk 30%, lev 3 → notional 9 < $10.
        assert_eq!(position_size(10.0, 2.0, &tier1(), 3, 1, 10.0), 0.0);
        assert_eq!(position_size(0.0, 2.0, &tier1(), 3, 1, 10.0), 0.0);
        assert_eq!(position_size(20.0, 0.0, &tier1(), 3, 1, 10.0), 0.0);
    }

    #[test]
    fn size_rounding_respects_decimals() {
        let size = position_size(100.0, 7.0, &tier1(), 3, 0, 10.0);
        assert_eq!(size, size.round());
    }

    #[test]
    fn price_rounding_scales_with_magnitude() {
        assert_eq!(round_price(25_123.67), 25_123.0);
        assert_eq!(round_price(123.456), 123.46);
        assert_eq!(round_price(5.4321), 5.432);
        assert_eq!(round_price(0.123456), 0.1235);
    }

    #[test]
    fn bracket_prices_mirror_direction() {
        let tier = tier1();
        let entry = 100.0;
        let long_sl = round_price(entry * (1.0 - tier.sl_pct));
        let long_tp = round_price(entry * (1.0 + tier.tp_pct));
        assert!((long_sl - 98.5).abs() < 1e-9);
        assert!((long_tp - 103.0).abs() < 1e-9);

        let short_sl = round_price(entry * (1.0 + tier.sl_pct));
        let short_tp = round_price(entry * (1.0 - tier.tp_pct));
        assert!((short_sl - 101.5).abs() < 1e-9);
        assert!((short_tp - 97.0).abs() < 1e-9);
    }
}
