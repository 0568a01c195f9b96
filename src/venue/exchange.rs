// =============================================================================
// Venue Exchange Client — signed trading actions
// =============================================================================
//
// SECURITY: the signing key never leaves the process and is never logged.
// Every action is signed with the EIP-712 agent scheme from `sign.rs` and
// POSTed to the exchange endpoint as `{action, signature, nonce}`.
//
// Market orders are expressed as aggressive immediate-or-cancel limit orders
// (the venue has no native market order); protective exits are reduce-only
// market-on-trigger orders tagged "tp" / "sl".
// =============================================================================

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::venue::sign::{action_hash, sign_l1_action, SendAsset};
use crate::venue::types::{
    format_wire_float, AssetMeta, CancelRequest, ExchangeResponseStatus, OrderRequest,
};
use crate::venue::EXCHANGE_ENDPOINT;

/// Aggressive-limit slippage applied to "market" orders.
const MARKET_SLIPPAGE: f64 = 0.03;
/// Agent source tag for mainnet signing.
const AGENT_SOURCE: &str = "a";
/// Signature chain id for user-signed actions (Arbitrum One).
const SIGNATURE_CHAIN_ID: u64 = 42161;
/// Builder-dex asset ids are offset blocks above the primary universe.
const BUILDER_DEX_BASE: u32 = 100_000;
const BUILDER_DEX_STRIDE: u32 = 10_000;

/// L1 actions, serialized with the `type` tag first — both the JSON payload
/// and the msgpack action hash depend on this shape.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "camelCase")]
enum L1Action {
    #[serde(rename_all = "camelCase")]
    Order {
        orders: Vec<OrderRequest>,
        grouping: String,
    },
    #[serde(rename_all = "camelCase")]
    Cancel { cancels: Vec<CancelRequest> },
    #[serde(rename_all = "camelCase")]
    UpdateLeverage {
        asset: u32,
        is_cross: bool,
        leverage: u32,
    },
}

/// Signed venue client.
pub struct ExchangeClient {
    client: reqwest::Client,
    endpoint: String,
    signer: PrivateKeySigner,
    /// Engine-facing symbol (with namespace prefix) → wire asset id.
    asset_ids: RwLock<HashMap<String, u32>>,
}

impl ExchangeClient {
    pub fn new(signing_key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = signing_key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .context("invalid venue signing key")?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("failed to build exchange http client")?;

        Ok(Self {
            client,
            endpoint: EXCHANGE_ENDPOINT.to_string(),
            signer,
            asset_ids: RwLock::new(HashMap::new()),
        })
    }

    /// Register a namespace's universe so symbols resolve to wire asset ids.
    ///
    /// The primary namespace (`dex_index == 0`) uses the raw universe index;
    /// builder dexs occupy offset blocks above `BUILDER_DEX_BASE`.
    pub fn register_assets(&self, namespace: &str, dex_index: usize, universe: &[AssetMeta]) {
        let mut ids = self.asset_ids.write();
        for (i, meta) in universe.iter().enumerate() {
            let id = if dex_index == 0 {
                i as u32
            } else {
                BUILDER_DEX_BASE + BUILDER_DEX_STRIDE * (dex_index as u32 - 1) + i as u32
            };
            let key = if namespace.is_empty() {
                meta.name.clone()
            } else {
                format!("{namespace}:{}", meta.name)
            };
            ids.insert(key, id);
        }
        debug!(namespace, count = universe.len(), "universe registered");
    }

    fn asset_id(&self, symbol: &str) -> Result<u32> {
        self.asset_ids
            .read()
            .get(symbol)
            .copied()
            .with_context(|| format!("unknown asset '{symbol}' — universe not registered"))
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    async fn post_l1(&self, action: &L1Action) -> Result<ExchangeResponseStatus> {
        let nonce = Self::now_ms();
        let connection_id = action_hash(action, nonce, None)?;
        let signature = sign_l1_action(&self.signer, connection_id, AGENT_SOURCE).await?;

        let payload = json!({
            "action": serde_json::to_value(action)?,
            "signature": signature.to_json(),
            "nonce": nonce,
            "vaultAddress": null,
        });

        self.post(payload).await
    }

    async fn post(&self, payload: serde_json::Value) -> Result<ExchangeResponseStatus> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .context("exchange request failed")?;

        let status = resp.status();
        let body = resp.text().await.context("exchange response read failed")?;

        // The API answers in the ExchangeResponseStatus shape even on error
        // status codes.
        serde_json::from_str(&body).with_context(|| {
            format!("unparseable exchange response (http {status}): {body}")
        })
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// Market entry: aggressive IOC limit at `ref_px` padded by the slippage
    /// allowance.
    #[instrument(skip(self), name = "venue::market_open")]
    pub async fn market_open(
        &self,
        symbol: &str,
        is_buy: bool,
        size: f64,
        ref_px: f64,
    ) -> Result<ExchangeResponseStatus> {
        let asset = self.asset_id(symbol)?;
        let px = slippage_price(ref_px, is_buy);
        let order = OrderRequest::ioc(asset, is_buy, format_wire_float(px), format_wire_float(size));

        info!(symbol, is_buy, size, px, "submitting market open");
        self.post_l1(&L1Action::Order {
            orders: vec![order],
            grouping: "na".to_string(),
        })
        .await
    }

    /// Reduce-only protective trigger ("tp" or "sl") at `trigger_px`.
    #[instrument(skip(self), name = "venue::place_trigger")]
    pub async fn place_trigger(
        &self,
        symbol: &str,
        is_buy: bool,
        size: f64,
        trigger_px: f64,
        tpsl: &str,
    ) -> Result<ExchangeResponseStatus> {
        let asset = self.asset_id(symbol)?;
        let order = OrderRequest::trigger(
            asset,
            is_buy,
            format_wire_float(trigger_px),
            format_wire_float(size),
            tpsl,
        )
        .reduce_only(true);

        debug!(symbol, is_buy, size, trigger_px, tpsl, "placing trigger");
        self.post_l1(&L1Action::Order {
            orders: vec![order],
            grouping: "na".to_string(),
        })
        .await
    }

    /// Reduce-only market close of `size` (aggressive IOC at `ref_px`).
    #[instrument(skip(self), name = "venue::market_close")]
    pub async fn market_close(
        &self,
        symbol: &str,
        close_is_buy: bool,
        size: f64,
        ref_px: f64,
    ) -> Result<ExchangeResponseStatus> {
        let asset = self.asset_id(symbol)?;
        let px = slippage_price(ref_px, close_is_buy);
        let order = OrderRequest::ioc(
            asset,
            close_is_buy,
            format_wire_float(px),
            format_wire_float(size),
        )
        .reduce_only(true);

        info!(symbol, close_is_buy, size, "submitting market close");
        self.post_l1(&L1Action::Order {
            orders: vec![order],
            grouping: "na".to_string(),
        })
        .await
    }

    /// Cancel a batch of resting orders on one symbol.
    #[instrument(skip(self, oids), name = "venue::bulk_cancel")]
    pub async fn bulk_cancel(&self, symbol: &str, oids: &[u64]) -> Result<ExchangeResponseStatus> {
        let asset = self.asset_id(symbol)?;
        let cancels = oids
            .iter()
            .map(|&oid| CancelRequest { asset, oid })
            .collect();

        self.post_l1(&L1Action::Cancel { cancels }).await
    }

    /// Set leverage for a symbol (cross for the primary namespace, isolated
    /// for builder-dex symbols).
    #[instrument(skip(self), name = "venue::update_leverage")]
    pub async fn update_leverage(
        &self,
        symbol: &str,
        is_cross: bool,
        leverage: u32,
    ) -> Result<ExchangeResponseStatus> {
        let asset = self.asset_id(symbol)?;
        self.post_l1(&L1Action::UpdateLeverage {
            asset,
            is_cross,
            leverage,
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Namespace transfers
    // -------------------------------------------------------------------------

    /// Move USDC between venue namespaces (`""` = primary perps).
    #[instrument(skip(self), name = "venue::send_asset")]
    pub async fn send_asset(
        &self,
        destination: &str,
        source_dex: &str,
        destination_dex: &str,
        token: &str,
        amount: f64,
    ) -> Result<ExchangeResponseStatus> {
        let action = SendAsset {
            signature_chain_id: SIGNATURE_CHAIN_ID,
            hyperliquid_chain: "Mainnet".to_string(),
            destination: destination.to_lowercase(),
            source_dex: source_dex.to_string(),
            destination_dex: destination_dex.to_string(),
            token: token.to_string(),
            amount: format_wire_float((amount * 100.0).round() / 100.0),
            from_sub_account: String::new(),
            nonce: Self::now_ms(),
        };

        let signature = action.sign(&self.signer).await?;

        let mut action_value = serde_json::to_value(&action)?;
        if let serde_json::Value::Object(ref mut map) = action_value {
            map.insert("type".to_string(), json!("sendAsset"));
        }

        let payload = json!({
            "action": action_value,
            "signature": signature.to_json(),
            "nonce": action.nonce,
            "vaultAddress": null,
        });

        info!(source_dex, destination_dex, amount, "namespace transfer");
        let result = self.post(payload).await;
        if let Err(e) = &result {
            warn!(error = %e, "namespace transfer failed");
        }
        result
    }
}

impl std::fmt::Debug for ExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeClient")
            .field("endpoint", &self.endpoint)
            .field("signer", &"<redacted>")
            .field("known_assets", &self.asset_ids.read().len())
            .finish()
    }
}

/// Pad a reference price by the market slippage allowance and trim to five
/// significant figures, as the venue's price grammar requires.
fn slippage_price(ref_px: f64, is_buy: bool) -> f64 {
    let px = if is_buy {
        ref_px * (1.0 + MARKET_SLIPPAGE)
    } else {
        ref_px * (1.0 - MARKET_SLIPPAGE)
    };
    round_sig_figs(px, 5)
}

fn round_sig_figs(value: f64, figs: i32) -> f64 {
    if value == 0.0 {
        return 0.0;
    }
    let magnitude = value.abs().log10().floor() as i32;
    let factor = 10f64.powi(figs - 1 - magnitude);
    (value * factor).round() / factor
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l1_action_serialises_with_type_tag_first() {
        let action = L1Action::Order {
            orders: vec![OrderRequest::ioc(0, true, "100", "1")],
            grouping: "na".to_string(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "order");
        assert_eq!(json["grouping"], "na");
        assert_eq!(json["orders"][0]["a"], 0);

        let action = L1Action::UpdateLeverage {
            asset: 7,
            is_cross: false,
            leverage: 5,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "updateLeverage");
        assert_eq!(json["isCross"], false);
        assert_eq!(json["leverage"], 5);
    }

    #[test]
    fn asset_registration_resolves_namespaced_symbols() {
        let client = ExchangeClient::new(
            "e908f86dbb4d55ac876378565aafeabc187f6690f046459397b17d9b9a19688e",
        )
        .unwrap();

        let primary = vec![
            AssetMeta { name: "BTC".into(), sz_decimals: 5, max_leverage: 40 },
            AssetMeta { name: "ETH".into(), sz_decimals: 4, max_leverage: 25 },
        ];
        let secondary = vec![AssetMeta { name: "GOLD".into(), sz_decimals: 2, max_leverage: 10 }];

        client.register_assets("", 0, &primary);
        client.register_assets("xyz", 1, &secondary);

        assert_eq!(client.asset_id("BTC").unwrap(), 0);
        assert_eq!(client.asset_id("ETH").unwrap(), 1);
        assert_eq!(client.asset_id("xyz:GOLD").unwrap(), BUILDER_DEX_BASE);
        assert!(client.asset_id("DOGE").is_err());
    }

    #[test]
    fn slippage_price_pads_in_trade_direction() {
        let buy = slippage_price(100.0, true);
        let sell = slippage_price(100.0, false);
        assert!(buy > 100.0);
        assert!(sell < 100.0);
        assert!((buy - 103.0).abs() < 1e-9);
        assert!((sell - 97.0).abs() < 1e-9);
    }

    #[test]
    fn sig_fig_rounding() {
        assert_eq!(round_sig_figs(12345.678, 5), 12346.0);
        assert_eq!(round_sig_figs(0.0001234567, 5), 0.00012346);
        assert_eq!(round_sig_figs(0.0, 5), 0.0);
    }
}
