// =============================================================================
// Venue wire types — order requests, exchange responses, account snapshots
// =============================================================================
//
// The short field names (`a`, `b`, `p`, `s`, `r`, `t`) are the venue's action
// encoding and also feed the msgpack action hash, so both the names and the
// declaration order are pinned.
// =============================================================================

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    #[serde(rename = "a")]
    pub asset: u32,
    #[serde(rename = "b")]
    pub is_buy: bool,
    #[serde(rename = "p")]
    pub limit_px: String,
    #[serde(rename = "s")]
    pub sz: String,
    #[serde(rename = "r", default)]
    pub reduce_only: bool,
    #[serde(rename = "t")]
    pub order_type: OrderType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderType {
    Limit(Limit),
    Trigger(Trigger),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limit {
    /// "Alo", "Ioc", or "Gtc".
    pub tif: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "triggerPx")]
    pub trigger_px: String,
    #[serde(rename = "isMarket")]
    pub is_market: bool,
    /// "tp" or "sl".
    pub tpsl: String,
}

impl OrderRequest {
    /// Immediate-or-cancel limit order — the venue's market-order idiom.
    pub fn ioc(asset: u32, is_buy: bool, limit_px: impl Into<String>, sz: impl Into<String>) -> Self {
        Self {
            asset,
            is_buy,
            limit_px: limit_px.into(),
            sz: sz.into(),
            reduce_only: false,
            order_type: OrderType::Limit(Limit { tif: "Ioc".to_string() }),
        }
    }

    /// Market-on-trigger order (stop loss or take profit).
    pub fn trigger(
        asset: u32,
        is_buy: bool,
        trigger_px: impl Into<String>,
        sz: impl Into<String>,
        tpsl: impl Into<String>,
    ) -> Self {
        let trigger_px = trigger_px.into();
        Self {
            asset,
            is_buy,
            limit_px: trigger_px.clone(),
            sz: sz.into(),
            reduce_only: false,
            order_type: OrderType::Trigger(Trigger {
                trigger_px,
                is_market: true,
                tpsl: tpsl.into(),
            }),
        }
    }

    pub fn reduce_only(mut self, reduce_only: bool) -> Self {
        self.reduce_only = reduce_only;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    #[serde(rename = "a")]
    pub asset: u32,
    #[serde(rename = "o")]
    pub oid: u64,
}

// ---------------------------------------------------------------------------
// Exchange responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RestingOrder {
    pub oid: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilledOrder {
    pub total_sz: String,
    pub avg_px: String,
    pub oid: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExchangeDataStatus {
    Success,
    WaitingForFill,
    WaitingForTrigger,
    Error(String),
    Resting(RestingOrder),
    Filled(FilledOrder),
}

impl ExchangeDataStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::Resting(_) | Self::Filled(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Error(msg) => Some(msg),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeDataStatuses {
    pub statuses: Vec<ExchangeDataStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeResponse {
    #[serde(rename = "type")]
    pub response_type: String,
    pub data: Option<ExchangeDataStatuses>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(tag = "status", content = "response")]
pub enum ExchangeResponseStatus {
    Ok(ExchangeResponse),
    Err(String),
}

impl ExchangeResponseStatus {
    /// True when the action was accepted and every status is a fill/rest.
    pub fn all_ok(&self) -> bool {
        match self {
            Self::Ok(resp) => resp
                .data
                .as_ref()
                .map(|d| d.statuses.iter().all(|s| s.is_success()))
                .unwrap_or(true),
            Self::Err(_) => false,
        }
    }

    /// First order-level or action-level error message, if any.
    pub fn first_error(&self) -> Option<String> {
        match self {
            Self::Ok(resp) => resp
                .data
                .as_ref()
                .and_then(|d| d.statuses.iter().find_map(|s| s.error().map(String::from))),
            Self::Err(msg) => Some(msg.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Account snapshots (parsed from the info API)
// ---------------------------------------------------------------------------

/// One row of the venue universe.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMeta {
    pub name: String,
    pub sz_decimals: u32,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
}

fn default_max_leverage() -> u32 {
    10
}

/// Account state for one namespace.
#[derive(Debug, Clone, Default)]
pub struct UserState {
    pub account_value: f64,
    pub total_margin_used: f64,
    pub withdrawable: f64,
    pub positions: Vec<VenuePosition>,
}

/// An open venue position as reported by the account snapshot.
#[derive(Debug, Clone)]
pub struct VenuePosition {
    pub coin: String,
    /// Signed size: positive long, negative short.
    pub szi: f64,
    pub entry_px: f64,
    pub unrealized_pnl: f64,
}

/// A resting order.
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub coin: String,
    pub oid: u64,
}

/// Top-of-book snapshot, top levels only.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

#[derive(Debug, Clone)]
pub struct BookLevel {
    pub px: f64,
    pub sz: f64,
}

/// A fill from the user fills history.
#[derive(Debug, Clone)]
pub struct Fill {
    pub coin: String,
    pub px: f64,
    pub time: i64,
}

// ---------------------------------------------------------------------------
// Wire float formatting
// ---------------------------------------------------------------------------

/// Format a float for the venue wire: 8 decimal places, trailing zeros
/// removed, "-0" normalised to "0".
pub fn format_wire_float(value: f64) -> String {
    let mut x = format!("{value:.8}");
    while x.ends_with('0') {
        x.pop();
    }
    if x.ends_with('.') {
        x.pop();
    }
    if x == "-0" {
        "0".to_string()
    } else {
        x
    }
}
