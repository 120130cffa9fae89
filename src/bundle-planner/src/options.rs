use std::collections::BTreeSet;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_SLIPPAGE, WAD};
use crate::errors::BundleError;

/// Caller-controlled knobs for one bundle build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundlingOptions {
    /// The wallet can sign EIP-2612 permits; signable approvals become authorizations.
    pub supports_signature: bool,
    /// Wrapped assets to unwrap if the adapter still holds them after population.
    pub unwrap_tokens: BTreeSet<Address>,
    /// Tolerance on unwrap outputs, WAD-scaled.
    pub unwrap_slippage: U256,
    /// Tolerance on vault share prices, WAD-scaled.
    pub slippage: U256,
}

impl Default for BundlingOptions {
    fn default() -> Self {
        Self {
            supports_signature: false,
            unwrap_tokens: BTreeSet::new(),
            unwrap_slippage: U256::ZERO,
            slippage: DEFAULT_SLIPPAGE,
        }
    }
}

impl BundlingOptions {
    pub fn with_signatures(mut self) -> Self {
        self.supports_signature = true;
        self
    }

    pub fn with_unwrap(mut self, asset: Address) -> Self {
        self.unwrap_tokens.insert(asset);
        self
    }

    pub fn with_unwrap_slippage(mut self, slippage: U256) -> Self {
        self.unwrap_slippage = slippage;
        self
    }

    pub fn validate(&self) -> Result<(), BundleError> {
        for slippage in [self.unwrap_slippage, self.slippage] {
            if slippage > WAD {
                return Err(BundleError::InvalidSlippage(slippage));
            }
        }
        Ok(())
    }
}
