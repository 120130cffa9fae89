use alloy_primitives::{address, Address, U256};
use serde::{Deserialize, Serialize};

/// Sentinel address standing for the chain's native asset.
pub const NATIVE: Address = address!("EeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE");

/// How an ERC-20 lets an owner grant allowances.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermitSupport {
    /// Plain `approve` only.
    #[default]
    None,
    /// `approve` or an EIP-2612 `permit` signature.
    Eip2612,
    /// Allowances can only be granted by signature.
    Required,
}

impl PermitSupport {
    pub fn signable(self) -> bool {
        !matches!(self, PermitSupport::None)
    }
}

/// Conversion between a wrapped asset and its underlying form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WrapperKind {
    /// WETH-style 1:1 wrapper around the native asset.
    Native,
    /// ERC-4626 vault; shares convert at `total_assets / total_shares`.
    Vault { total_assets: U256, total_shares: U256 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperInfo {
    pub underlying: Address,
    #[serde(flatten)]
    pub kind: WrapperKind,
}

impl WrapperInfo {
    pub fn native() -> Self {
        Self {
            underlying: NATIVE,
            kind: WrapperKind::Native,
        }
    }

    pub fn vault(underlying: Address, total_assets: U256, total_shares: U256) -> Self {
        Self {
            underlying,
            kind: WrapperKind::Vault {
                total_assets,
                total_shares,
            },
        }
    }

    /// Underlying amount released by unwrapping `wrapped`, rounded down.
    /// `None` on overflow.
    pub fn to_underlying(&self, wrapped: U256) -> Option<U256> {
        match self.kind {
            WrapperKind::Native => Some(wrapped),
            WrapperKind::Vault {
                total_assets,
                total_shares,
            } => {
                if total_shares.is_zero() {
                    return Some(wrapped);
                }
                Some(wrapped.checked_mul(total_assets)? / total_shares)
            }
        }
    }

    /// Wrapped amount minted for `underlying`, rounded down.
    pub fn to_wrapped(&self, underlying: U256) -> Option<U256> {
        match self.kind {
            WrapperKind::Native => Some(underlying),
            WrapperKind::Vault {
                total_assets,
                total_shares,
            } => {
                if total_assets.is_zero() {
                    return Some(underlying);
                }
                Some(underlying.checked_mul(total_shares)? / total_assets)
            }
        }
    }
}

/// Token metadata the planner needs beyond balances.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// EIP-712 domain name.
    pub name: String,
    /// EIP-712 domain version.
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub permit: PermitSupport,
    #[serde(default)]
    pub wrapper: Option<WrapperInfo>,
}

fn default_version() -> String {
    "1".to_string()
}

impl TokenInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            permit: PermitSupport::None,
            wrapper: None,
        }
    }

    pub fn with_permit(mut self, permit: PermitSupport) -> Self {
        self.permit = permit;
        self
    }

    pub fn with_wrapper(mut self, wrapper: WrapperInfo) -> Self {
        self.wrapper = Some(wrapper);
        self
    }
}
