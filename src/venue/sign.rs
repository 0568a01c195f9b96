// =============================================================================
// Venue action signing — EIP-712 agent scheme
// =============================================================================
//
// L1 actions (orders, cancels, leverage) are hashed as
// `msgpack(action) ‖ nonce_be ‖ vault_flag` with keccak; the resulting
// `connection_id` is signed as the phantom
// `Agent(string source,bytes32 connectionId)` struct under the `Exchange`
// EIP-712 domain (chainId 1337). User-signed actions (`sendAsset`) are signed
// directly under the `HyperliquidSignTransaction` domain with the
// `HyperliquidTransaction:` type prefix.
//
// The msgpack encoding of an action must put the `type` tag first and the
// remaining fields in declaration order; the tagged-enum wrapper below pins
// that.
// =============================================================================

use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use alloy::sol_types::{eip712_domain, Eip712Domain};
use anyhow::{Context, Result};
use serde::Serialize;

/// Signature components the venue expects as `{r, s, v}`.
#[derive(Debug, Clone)]
pub struct VenueSignature {
    pub r: U256,
    pub s: U256,
    pub v: u64,
}

impl VenueSignature {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "r": format!("0x{:064x}", self.r),
            "s": format!("0x{:064x}", self.s),
            "v": self.v,
        })
    }
}

// ---------------------------------------------------------------------------
// EIP-712 value encoding
// ---------------------------------------------------------------------------

fn encode_string(value: &str) -> [u8; 32] {
    keccak256(value.as_bytes()).into()
}

fn encode_u64(value: u64) -> [u8; 32] {
    U256::from(value).to_be_bytes::<32>()
}

fn encode_b256(value: B256) -> [u8; 32] {
    value.into()
}

fn signing_hash(domain: &Eip712Domain, struct_hash: B256) -> B256 {
    let mut buf = Vec::with_capacity(66);
    buf.push(0x19);
    buf.push(0x01);
    buf.extend_from_slice(&domain.separator()[..]);
    buf.extend_from_slice(&struct_hash[..]);
    keccak256(&buf)
}

// ---------------------------------------------------------------------------
// L1 action hashing + phantom agent
// ---------------------------------------------------------------------------

/// Hash an L1 action into the `connection_id` the phantom agent signs.
pub fn action_hash<T: Serialize>(action: &T, nonce: u64, vault: Option<Address>) -> Result<B256> {
    let mut bytes = rmp_serde::to_vec_named(action).context("failed to msgpack action")?;
    bytes.extend(nonce.to_be_bytes());
    match vault {
        Some(addr) => {
            bytes.push(1);
            bytes.extend(addr.as_slice());
        }
        None => bytes.push(0),
    }
    Ok(keccak256(bytes))
}

fn agent_struct_hash(source: &str, connection_id: B256) -> B256 {
    let type_hash = keccak256("Agent(string source,bytes32 connectionId)".as_bytes());
    let mut encoded = Vec::with_capacity(96);
    encoded.extend_from_slice(&type_hash[..]);
    encoded.extend_from_slice(&encode_string(source));
    encoded.extend_from_slice(&encode_b256(connection_id));
    keccak256(encoded)
}

fn exchange_domain() -> Eip712Domain {
    eip712_domain! {
        name: "Exchange",
        version: "1",
        chain_id: 1337u64,
        verifying_contract: alloy::primitives::address!("0000000000000000000000000000000000000000"),
    }
}

/// Sign an L1 action hash. `source` is "a" on mainnet, "b" on testnet.
pub async fn sign_l1_action(
    signer: &PrivateKeySigner,
    connection_id: B256,
    source: &str,
) -> Result<VenueSignature> {
    let struct_hash = agent_struct_hash(source, connection_id);
    let hash = signing_hash(&exchange_domain(), struct_hash);
    sign_hash(signer, hash).await
}

// ---------------------------------------------------------------------------
// User-signed actions (sendAsset)
// ---------------------------------------------------------------------------

/// The `sendAsset` user action: moves balances between venue namespaces
/// (sub-accounts / builder dexs). Field order is the wire order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAsset {
    #[serde(serialize_with = "serialize_chain_id")]
    pub signature_chain_id: u64,
    pub hyperliquid_chain: String,
    pub destination: String,
    pub source_dex: String,
    pub destination_dex: String,
    pub token: String,
    pub amount: String,
    pub from_sub_account: String,
    pub nonce: u64,
}

fn serialize_chain_id<S>(chain_id: &u64, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format!("{chain_id:#x}"))
}

const SEND_ASSET_TYPE: &str = "HyperliquidTransaction:SendAsset(string hyperliquidChain,string destination,string sourceDex,string destinationDex,string token,string amount,string fromSubAccount,uint64 nonce)";

impl SendAsset {
    fn struct_hash(&self) -> B256 {
        let type_hash = keccak256(SEND_ASSET_TYPE.as_bytes());
        let mut encoded = Vec::new();
        encoded.extend_from_slice(&type_hash[..]);
        encoded.extend_from_slice(&encode_string(&self.hyperliquid_chain));
        encoded.extend_from_slice(&encode_string(&self.destination));
        encoded.extend_from_slice(&encode_string(&self.source_dex));
        encoded.extend_from_slice(&encode_string(&self.destination_dex));
        encoded.extend_from_slice(&encode_string(&self.token));
        encoded.extend_from_slice(&encode_string(&self.amount));
        encoded.extend_from_slice(&encode_string(&self.from_sub_account));
        encoded.extend_from_slice(&encode_u64(self.nonce));
        keccak256(encoded)
    }

    fn domain(&self) -> Eip712Domain {
        Eip712Domain::new(
            Some("HyperliquidSignTransaction".into()),
            Some("1".into()),
            Some(U256::from(self.signature_chain_id)),
            Some(Address::ZERO),
            None,
        )
    }

    /// Sign this action under the user-signed-transaction domain.
    pub async fn sign(&self, signer: &PrivateKeySigner) -> Result<VenueSignature> {
        let hash = signing_hash(&self.domain(), self.struct_hash());
        sign_hash(signer, hash).await
    }
}

// ---------------------------------------------------------------------------
// Shared signer plumbing
// ---------------------------------------------------------------------------

async fn sign_hash(signer: &PrivateKeySigner, hash: B256) -> Result<VenueSignature> {
    let sig = signer
        .sign_hash(&hash)
        .await
        .context("hash signing failed")?;

    Ok(VenueSignature {
        r: sig.r(),
        s: sig.s(),
        v: if sig.v() { 28 } else { 27 },
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    #[serde(tag = "type")]
    #[serde(rename_all = "camelCase")]
    enum TestAction {
        Cancel { cancels: Vec<u32> },
    }

    #[test]
    fn action_hash_is_deterministic_and_nonce_sensitive() {
        let action = TestAction::Cancel { cancels: vec![1, 2] };
        let h1 = action_hash(&action, 1000, None).unwrap();
        let h2 = action_hash(&action, 1000, None).unwrap();
        let h3 = action_hash(&action, 1001, None).unwrap();
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }

    #[test]
    fn vault_flag_changes_hash() {
        let action = TestAction::Cancel { cancels: vec![] };
        let h_plain = action_hash(&action, 5, None).unwrap();
        let h_vault = action_hash(&action, 5, Some(Address::ZERO)).unwrap();
        assert_ne!(h_plain, h_vault);
    }

    #[test]
    fn agent_type_hash_matches_reference() {
        let expected = keccak256("Agent(string source,bytes32 connectionId)");
        let struct_hash = agent_struct_hash("a", B256::ZERO);
        // The struct hash embeds the type hash; recompute by hand.
        let mut encoded = Vec::new();
        encoded.extend_from_slice(&expected[..]);
        encoded.extend_from_slice(&encode_string("a"));
        encoded.extend_from_slice(&encode_b256(B256::ZERO));
        assert_eq!(struct_hash, keccak256(encoded));
    }

    #[tokio::test]
    async fn l1_signature_matches_known_vector() {
        // Reference vector for the phantom-agent scheme.
        let signer: PrivateKeySigner =
            "e908f86dbb4d55ac876378565aafeabc187f6690f046459397b17d9b9a19688e"
                .parse()
                .unwrap();
        let connection_id: B256 =
            "de6c4037798a4434ca03cd05f00e3b803126221375cd1e7eaaaf041768be06eb"
                .parse()
                .unwrap();

        let sig = sign_l1_action(&signer, connection_id, "a").await.unwrap();
        let actual = format!("{:064x}{:064x}{:02x}", sig.r, sig.s, sig.v);
        assert_eq!(
            actual,
            "fa8a41f6a3fa728206df80801a83bcbfbab08649cd34d9c0bfba7c7b2f99340f53a00226604567b98a1492803190d65a201d6805e5831b7044f17fd530aec7841c"
        );

        let sig_b = sign_l1_action(&signer, connection_id, "b").await.unwrap();
        let actual_b = format!("{:064x}{:064x}{:02x}", sig_b.r, sig_b.s, sig_b.v);
        assert_eq!(
            actual_b,
            "1713c0fc661b792a50e8ffdd59b637b1ed172d9a3aa4d801d9d88646710fb74b33959f4d075a7ccbec9f2374a6da21ffa4448d58d0413a0d335775f680a881431c"
        );
    }

    #[test]
    fn send_asset_serialises_chain_id_as_hex() {
        let action = SendAsset {
            signature_chain_id: 42161,
            hyperliquid_chain: "Mainnet".to_string(),
            destination: "0x1234".to_string(),
            source_dex: "".to_string(),
            destination_dex: "xyz".to_string(),
            token: "USDC".to_string(),
            amount: "12.5".to_string(),
            from_sub_account: "".to_string(),
            nonce: 1700000000000,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["signatureChainId"], "0xa4b1");
        assert_eq!(json["destinationDex"], "xyz");
        assert_eq!(json["fromSubAccount"], "");
    }
}
