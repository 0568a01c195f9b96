// =============================================================================
// Venue Info Client — unsigned read API
// =============================================================================
//
// Every info query is a JSON POST against a single endpoint; the `type` field
// selects the query. Numeric fields arrive as strings on the wire and are
// parsed defensively here so callers only see typed snapshots.
// =============================================================================

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::indicators::Candle;
use crate::venue::types::{
    AssetMeta, BookLevel, Fill, OpenOrder, OrderBook, UserState, VenuePosition,
};
use crate::venue::INFO_ENDPOINT;

/// Read-only venue client.
#[derive(Clone)]
pub struct InfoClient {
    client: reqwest::Client,
    endpoint: String,
}

impl InfoClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build info http client");

        Self {
            client,
            endpoint: INFO_ENDPOINT.to_string(),
        }
    }

    /// Override the endpoint (tests).
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        let mut c = Self::new();
        c.endpoint = endpoint.into();
        c
    }

    async fn request(&self, body: Value) -> Result<Value> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .context("info request failed")?;

        let status = resp.status();
        let value: Value = resp.json().await.context("info response not JSON")?;

        if !status.is_success() {
            anyhow::bail!("info API returned {status}: {value}");
        }
        Ok(value)
    }

    // -------------------------------------------------------------------------
    // Universe metadata
    // -------------------------------------------------------------------------

    /// Universe metadata for a namespace ("" = default perps).
    #[instrument(skip(self), name = "venue::meta")]
    pub async fn meta(&self, namespace: &str) -> Result<Vec<AssetMeta>> {
        let mut body = json!({ "type": "meta" });
        if !namespace.is_empty() {
            body["dex"] = json!(namespace);
        }

        let value = self.request(body).await?;
        let universe = value["universe"]
            .as_array()
            .context("meta response missing 'universe'")?;

        let mut assets = Vec::with_capacity(universe.len());
        for entry in universe {
            match serde_json::from_value::<AssetMeta>(entry.clone()) {
                Ok(meta) => assets.push(meta),
                Err(e) => warn!(error = %e, "skipping malformed universe entry"),
            }
        }

        debug!(namespace, count = assets.len(), "universe metadata fetched");
        Ok(assets)
    }

    // -------------------------------------------------------------------------
    // Account state
    // -------------------------------------------------------------------------

    /// Margin summary + open positions for one namespace.
    #[instrument(skip(self), name = "venue::user_state")]
    pub async fn user_state(&self, account: &str, namespace: &str) -> Result<UserState> {
        let mut body = json!({ "type": "clearinghouseState", "user": account });
        if !namespace.is_empty() {
            body["dex"] = json!(namespace);
        }

        let value = self.request(body).await?;

        let margin = &value["marginSummary"];
        let mut positions = Vec::new();
        if let Some(entries) = value["assetPositions"].as_array() {
            for entry in entries {
                let p = &entry["position"];
                let szi = parse_f64(&p["szi"]);
                if szi.abs() > 0.0 {
                    positions.push(VenuePosition {
                        coin: p["coin"].as_str().unwrap_or_default().to_string(),
                        szi,
                        entry_px: parse_f64(&p["entryPx"]),
                        unrealized_pnl: parse_f64(&p["unrealizedPnl"]),
                    });
                }
            }
        }

        Ok(UserState {
            account_value: parse_f64(&margin["accountValue"]),
            total_margin_used: parse_f64(&margin["totalMarginUsed"]),
            withdrawable: parse_f64(&value["withdrawable"]),
            positions,
        })
    }

    /// Resting orders for one namespace.
    #[instrument(skip(self), name = "venue::open_orders")]
    pub async fn open_orders(&self, account: &str, namespace: &str) -> Result<Vec<OpenOrder>> {
        let mut body = json!({ "type": "openOrders", "user": account });
        if !namespace.is_empty() {
            body["dex"] = json!(namespace);
        }

        let value = self.request(body).await?;
        let orders = value.as_array().context("openOrders response not an array")?;

        Ok(orders
            .iter()
            .filter_map(|o| {
                Some(OpenOrder {
                    coin: o["coin"].as_str()?.to_string(),
                    oid: o["oid"].as_u64()?,
                })
            })
            .collect())
    }

    // -------------------------------------------------------------------------
    // Market data
    // -------------------------------------------------------------------------

    /// Candle snapshot for `[start_ms, end_ms]`.
    #[instrument(skip(self), name = "venue::candles")]
    pub async fn candles_snapshot(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>> {
        let body = json!({
            "type": "candleSnapshot",
            "req": {
                "coin": symbol,
                "interval": interval,
                "startTime": start_ms,
                "endTime": end_ms,
            }
        });

        let value = self.request(body).await?;
        let raw = value.as_array().context("candleSnapshot response not an array")?;

        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            candles.push(Candle::new(
                entry["t"].as_i64().unwrap_or(0),
                parse_f64(&entry["o"]),
                parse_f64(&entry["h"]),
                parse_f64(&entry["l"]),
                parse_f64(&entry["c"]),
                parse_f64(&entry["v"]),
            ));
        }

        debug!(symbol, interval, count = candles.len(), "candles fetched");
        Ok(candles)
    }

    /// L2 book snapshot, truncated to the top `depth` levels per side.
    #[instrument(skip(self), name = "venue::l2_snapshot")]
    pub async fn l2_snapshot(&self, symbol: &str, depth: usize) -> Result<OrderBook> {
        let body = json!({ "type": "l2Book", "coin": symbol });
        let value = self.request(body).await?;

        let levels = value["levels"]
            .as_array()
            .context("l2Book response missing 'levels'")?;

        let side = |idx: usize| -> Vec<BookLevel> {
            levels
                .get(idx)
                .and_then(|v| v.as_array())
                .map(|rows| {
                    rows.iter()
                        .take(depth)
                        .map(|r| BookLevel {
                            px: parse_f64(&r["px"]),
                            sz: parse_f64(&r["sz"]),
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(OrderBook {
            bids: side(0),
            asks: side(1),
        })
    }

    /// Fills between two timestamps (used to resolve inferred closes).
    #[instrument(skip(self), name = "venue::user_fills")]
    pub async fn user_fills_by_time(
        &self,
        account: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Fill>> {
        let body = json!({
            "type": "userFillsByTime",
            "user": account,
            "startTime": start_ms,
            "endTime": end_ms,
        });

        let value = self.request(body).await?;
        let raw = value.as_array().context("userFillsByTime response not an array")?;

        Ok(raw
            .iter()
            .filter_map(|f| {
                Some(Fill {
                    coin: f["coin"].as_str()?.to_string(),
                    px: parse_f64(&f["px"]),
                    time: f["time"].as_i64().unwrap_or(0),
                })
            })
            .collect())
    }
}

impl Default for InfoClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InfoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfoClient")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Parse a JSON value that may be a string or a number into `f64`.
fn parse_f64(value: &Value) -> f64 {
    if let Some(s) = value.as_str() {
        s.parse().unwrap_or(0.0)
    } else {
        value.as_f64().unwrap_or(0.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_f64_handles_strings_and_numbers() {
        assert_eq!(parse_f64(&json!("1.5")), 1.5);
        assert_eq!(parse_f64(&json!(2.25)), 2.25);
        assert_eq!(parse_f64(&json!("garbage")), 0.0);
        assert_eq!(parse_f64(&json!(null)), 0.0);
    }
}
