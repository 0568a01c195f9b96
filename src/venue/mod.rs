// =============================================================================
// Venue access — Hyperliquid info + exchange clients
// =============================================================================
//
// `info.rs` covers the unsigned read API (meta, account state, candles, book,
// fills). `exchange.rs` covers signed actions (orders, cancels, leverage,
// namespace transfers), with the EIP-712 agent-signature scheme in `sign.rs`.
// =============================================================================

pub mod exchange;
pub mod info;
pub mod sign;
pub mod types;

pub use exchange::ExchangeClient;
pub use info::InfoClient;
pub use types::{
    AssetMeta, ExchangeDataStatus, ExchangeResponse, ExchangeResponseStatus, Fill, OpenOrder,
    OrderBook, UserState, VenuePosition,
};

/// Mainnet API endpoints.
pub const INFO_ENDPOINT: &str = "https://api.hyperliquid.xyz/info";
pub const EXCHANGE_ENDPOINT: &str = "https://api.hyperliquid.xyz/exchange";
