//! Fixed-point scales and protocol constants.

use alloy_primitives::U256;

/// 1e18, the scale of slippage fractions.
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// 1e27, the scale of ERC-4626 share prices passed to the adapter.
pub const RAY: U256 = U256::from_limbs([0x9fd0803ce8000000, 0x33b2e3c, 0, 0]);

/// Default slippage tolerance for vault share prices: 0.03%.
pub const DEFAULT_SLIPPAGE: U256 = U256::from_limbs([300_000_000_000_000, 0, 0, 0]);

/// Lifetime of a permit authorization requested by the encoder (2 hours).
pub const PERMIT_VALIDITY_SECS: u64 = 7_200;

pub const EIP712_DOMAIN_TYPE: &[u8] =
    b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

pub const PERMIT_TYPE: &[u8] =
    b"Permit(address owner,address spender,uint256 value,uint256 nonce,uint256 deadline)";
