// =============================================================================
// DEX Swapper — Uniswap V3 swaps + Aerodrome liquidity on Base
// =============================================================================
//
// All calls go through the chain manager's wallet providers so every
// submission lands on a healthy RPC and records its budget cost. Amounts here
// are micro ($0.10–$0.50), which is why `amountOutMinimum = 0` is acceptable
// on the swap path; liquidity adds keep a 5% floor.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy::primitives::{Address, U256};
use alloy::sol;
use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::farm::chain::{eth_to_u256, ChainManager};
use crate::farm::config::{aerodrome_router, token_address, uniswap_router};

/// Uniswap V3 fee tier used for every swap (0.3%).
const POOL_FEE: u32 = 3000;
/// Transaction deadline window.
const DEADLINE_SECS: u64 = 300;
/// Liquidity slippage floor (5%).
const LP_SLIPPAGE: f64 = 0.95;
/// Settlement pause after a fresh approval.
const APPROVAL_SETTLE: Duration = Duration::from_secs(5);

sol! {
    #[sol(rpc)]
    contract IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
    }

    #[sol(rpc)]
    contract ISwapRouter {
        struct ExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint24 fee;
            address recipient;
            uint256 deadline;
            uint256 amountIn;
            uint256 amountOutMinimum;
            uint160 sqrtPriceLimitX96;
        }

        function exactInputSingle(ExactInputSingleParams calldata params)
            external
            payable
            returns (uint256 amountOut);
    }

    #[sol(rpc)]
    contract IAerodromeRouter {
        function addLiquidityETH(
            address token,
            bool stable,
            uint256 amountTokenDesired,
            uint256 amountTokenMin,
            uint256 amountETHMin,
            address to,
            uint256 deadline
        ) external payable returns (uint256 amountToken, uint256 amountETH, uint256 liquidity);

        function removeLiquidityETH(
            address token,
            bool stable,
            uint256 liquidity,
            uint256 amountTokenMin,
            uint256 amountETHMin,
            address to,
            uint256 deadline
        ) external returns (uint256 amountToken, uint256 amountETH);
    }
}

/// Outcome of an approval: either a transaction was sent or the allowance
/// already covered the amount.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalOutcome {
    AlreadyApproved,
    Approved(String),
}

pub struct DexSwapper {
    chain_mgr: Arc<ChainManager>,
}

impl DexSwapper {
    pub fn new(chain_mgr: Arc<ChainManager>) -> Self {
        Self { chain_mgr }
    }

    fn deadline() -> U256 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_secs();
        U256::from(now + DEADLINE_SECS)
    }

    fn weth(chain: &str) -> Result<Address> {
        token_address(chain, "WETH").with_context(|| format!("no WETH registered for {chain}"))
    }

    // -------------------------------------------------------------------------
    // ERC-20
    // -------------------------------------------------------------------------

    /// Raw token balance (smallest units).
    pub async fn token_balance(&self, chain: &str, token: Address, owner: &str) -> Result<U256> {
        let provider = self.chain_mgr.provider(chain).await?;
        let owner: Address = owner.parse().context("bad owner address")?;
        let erc20 = IERC20::new(token, &provider);
        let balance = erc20.balanceOf(owner).call().await.context("balanceOf failed")?;
        debug!(chain, %token, %balance, "token balance");
        Ok(balance)
    }

    /// Idempotent approval: skips the transaction when the current allowance
    /// already covers `amount`.
    pub async fn approve_token(
        &self,
        chain: &str,
        token: Address,
        spender: Address,
        amount: U256,
        private_key: &str,
    ) -> Result<ApprovalOutcome> {
        let provider = self.chain_mgr.wallet_provider(chain, private_key).await?;
        let owner = wallet_address(private_key)?;

        let erc20 = IERC20::new(token, &provider);
        let current = erc20
            .allowance(owner, spender)
            .call()
            .await
            .context("allowance check failed")?;
        if current >= amount {
            debug!(chain, %token, "allowance already sufficient");
            return Ok(ApprovalOutcome::AlreadyApproved);
        }

        let pending = erc20
            .approve(spender, amount)
            .send()
            .await
            .context("approve submission failed")?;
        let hash = format!("{:#x}", *pending.tx_hash());
        self.chain_mgr.record_spend(chain);

        info!(chain, %token, tx = %hash, "approval sent");
        tokio::time::sleep(APPROVAL_SETTLE).await;
        Ok(ApprovalOutcome::Approved(hash))
    }

    // -------------------------------------------------------------------------
    // Swaps
    // -------------------------------------------------------------------------

    /// Single-hop exact-in swap of native ETH into `token_out`.
    pub async fn swap_exact_eth_for_tokens(
        &self,
        chain: &str,
        amount_eth: f64,
        token_out: Address,
        private_key: &str,
    ) -> Result<String> {
        let provider = self.chain_mgr.wallet_provider(chain, private_key).await?;
        let recipient = wallet_address(private_key)?;
        let amount_wei = eth_to_u256(amount_eth);

        let router = ISwapRouter::new(uniswap_router(), &provider);
        let params = ISwapRouter::ExactInputSingleParams {
            tokenIn: Self::weth(chain)?,
            tokenOut: token_out,
            fee: alloy::primitives::Uint::from(POOL_FEE),
            recipient,
            deadline: Self::deadline(),
            amountIn: amount_wei,
            // Micro notionals: no minimum-out protection needed.
            amountOutMinimum: U256::ZERO,
            sqrtPriceLimitX96: alloy::primitives::Uint::ZERO,
        };

        let pending = router
            .exactInputSingle(params)
            .value(amount_wei)
            .send()
            .await
            .context("eth->token swap failed")?;
        let hash = format!("{:#x}", *pending.tx_hash());
        self.chain_mgr.record_spend(chain);

        info!(chain, amount_eth, token = %token_out, tx = %hash, "swapped ETH -> token");
        Ok(hash)
    }

    /// Single-hop exact-in swap of `amount` raw token units back to wrapped
    /// native. Ensures the router allowance first.
    pub async fn swap_tokens_for_eth(
        &self,
        chain: &str,
        token_in: Address,
        amount: U256,
        private_key: &str,
    ) -> Result<String> {
        self.approve_token(chain, token_in, uniswap_router(), amount, private_key)
            .await
            .context("approval before swap failed")?;

        let provider = self.chain_mgr.wallet_provider(chain, private_key).await?;
        let recipient = wallet_address(private_key)?;

        let router = ISwapRouter::new(uniswap_router(), &provider);
        let params = ISwapRouter::ExactInputSingleParams {
            tokenIn: token_in,
            tokenOut: Self::weth(chain)?,
            fee: alloy::primitives::Uint::from(POOL_FEE),
            recipient,
            deadline: Self::deadline(),
            amountIn: amount,
            amountOutMinimum: U256::ZERO,
            sqrtPriceLimitX96: alloy::primitives::Uint::ZERO,
        };

        let pending = router
            .exactInputSingle(params)
            .send()
            .await
            .context("token->eth swap failed")?;
        let hash = format!("{:#x}", *pending.tx_hash());
        self.chain_mgr.record_spend(chain);

        info!(chain, %token_in, tx = %hash, "swapped token -> ETH");
        Ok(hash)
    }

    // -------------------------------------------------------------------------
    // Liquidity
    // -------------------------------------------------------------------------

    /// Add token/ETH liquidity on Aerodrome (volatile pair) with 5% floors.
    pub async fn add_liquidity_eth(
        &self,
        chain: &str,
        token: Address,
        amount_token: U256,
        amount_eth: f64,
        private_key: &str,
    ) -> Result<String> {
        self.approve_token(chain, token, aerodrome_router(), amount_token, private_key)
            .await
            .context("approval before liquidity add failed")?;

        let provider = self.chain_mgr.wallet_provider(chain, private_key).await?;
        let recipient = wallet_address(private_key)?;
        let amount_eth_wei = eth_to_u256(amount_eth);

        let token_min = mul_fraction(amount_token, LP_SLIPPAGE);
        let eth_min = mul_fraction(amount_eth_wei, LP_SLIPPAGE);

        let router = IAerodromeRouter::new(aerodrome_router(), &provider);
        let pending = router
            .addLiquidityETH(
                token,
                false,
                amount_token,
                token_min,
                eth_min,
                recipient,
                Self::deadline(),
            )
            .value(amount_eth_wei)
            .send()
            .await
            .context("addLiquidityETH failed")?;
        let hash = format!("{:#x}", *pending.tx_hash());
        self.chain_mgr.record_spend(chain);

        info!(chain, %token, amount_eth, tx = %hash, "liquidity added");
        Ok(hash)
    }

    /// Burn LP tokens back into token + ETH. Micro amounts accept any output.
    pub async fn remove_liquidity_eth(
        &self,
        chain: &str,
        token: Address,
        liquidity: U256,
        private_key: &str,
    ) -> Result<String> {
        let provider = self.chain_mgr.wallet_provider(chain, private_key).await?;
        let recipient = wallet_address(private_key)?;

        let router = IAerodromeRouter::new(aerodrome_router(), &provider);
        let pending = router
            .removeLiquidityETH(
                token,
                false,
                liquidity,
                U256::ZERO,
                U256::ZERO,
                recipient,
                Self::deadline(),
            )
            .send()
            .await
            .context("removeLiquidityETH failed")?;
        let hash = format!("{:#x}", *pending.tx_hash());
        self.chain_mgr.record_spend(chain);

        info!(chain, %token, tx = %hash, "liquidity removed");
        Ok(hash)
    }
}

impl std::fmt::Debug for DexSwapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DexSwapper").finish()
    }
}

fn wallet_address(private_key: &str) -> Result<Address> {
    let signer: alloy::signers::local::PrivateKeySigner = private_key
        .trim()
        .trim_start_matches("0x")
        .parse()
        .context("invalid wallet key")?;
    Ok(signer.address())
}

fn mul_fraction(value: U256, fraction: f64) -> U256 {
    // Scale through parts-per-thousand to stay in integer space.
    let ppt = (fraction * 1000.0) as u64;
    value * U256::from(ppt) / U256::from(1000u64)
}
