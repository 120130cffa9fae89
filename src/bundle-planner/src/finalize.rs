//! Bundle finalizer: unwraps and skims what the adapter still holds.

use std::collections::BTreeSet;

use alloy_primitives::{Address, U256};
use bundle_types::{
    CallAction, Flow, LedgerSnapshot, PrimitiveOperation, TargetCall, TransferStep, WrapperKind,
    NATIVE,
};
use tracing::{debug, warn};

use crate::config::BundlerAddresses;
use crate::constants::WAD;
use crate::errors::BundleError;
use crate::math::floor_after_slippage;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalizedBundle {
    pub operations: Vec<PrimitiveOperation>,
    /// Projected snapshot after the whole bundle.
    pub snapshot: LedgerSnapshot,
}

/// Minimum output an unwrap step must deliver.
///
/// Vault redeems through the adapter carry the floor on-chain as a minimum
/// share price. `unwrapNative` takes no minimum, so native unwraps are only
/// held to the floor off-chain through [`UnwrapCheck::verify`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnwrapCheck {
    /// Wrapped asset being released.
    pub asset: Address,
    pub floor: U256,
}

impl UnwrapCheck {
    pub fn from_operation(operation: &PrimitiveOperation) -> Option<Self> {
        let PrimitiveOperation::Call(call) = operation else {
            return None;
        };
        match &call.action {
            CallAction::UnwrapNative { min_output, .. } => Some(Self {
                asset: call.flows.first()?.asset,
                floor: *min_output,
            }),
            CallAction::VaultRedeem {
                vault, min_output, ..
            } => Some(Self {
                asset: *vault,
                floor: *min_output,
            }),
            _ => None,
        }
    }

    /// Checks an observed unwrap output, e.g. from a simulation.
    pub fn verify(&self, received: U256) -> Result<(), BundleError> {
        if received < self.floor {
            return Err(BundleError::SlippageExceeded {
                asset: self.asset,
                floor: self.floor,
                received,
            });
        }
        Ok(())
    }
}

/// Appends unwrap steps for `unwrap_tokens` and skims every touched asset the
/// adapter still holds to `receiver`.
pub fn finalize_bundle(
    operations: Vec<PrimitiveOperation>,
    start: &LedgerSnapshot,
    addresses: &BundlerAddresses,
    receiver: Address,
    unwrap_tokens: &BTreeSet<Address>,
    unwrap_slippage: U256,
) -> Result<FinalizedBundle, BundleError> {
    if unwrap_slippage > WAD {
        return Err(BundleError::InvalidSlippage(unwrap_slippage));
    }

    let adapter = addresses.adapter;
    let mut snapshot = start
        .replay(&operations)
        .map_err(|err| BundleError::Replay {
            position: err.position,
            source: err.source,
        })?;
    let mut operations = operations;

    for &asset in unwrap_tokens {
        let held = snapshot.balance(adapter, asset);
        if held.is_zero() {
            continue;
        }
        let Some(wrapper) = snapshot.token(asset).and_then(|token| token.wrapper) else {
            warn!(%asset, "no wrapper metadata, skipping unwrap");
            continue;
        };

        let position = operations.len();
        let expected = wrapper
            .to_underlying(held)
            .ok_or(BundleError::Overflow { index: position })?;
        let min_output = floor_after_slippage(expected, unwrap_slippage)
            .ok_or(BundleError::InvalidSlippage(unwrap_slippage))?;

        let (action, produced) = match wrapper.kind {
            WrapperKind::Native => (
                CallAction::UnwrapNative {
                    amount: held,
                    min_output,
                    receiver: adapter,
                },
                NATIVE,
            ),
            WrapperKind::Vault { .. } => (
                CallAction::VaultRedeem {
                    vault: asset,
                    shares: held,
                    min_output,
                    receiver: adapter,
                    owner: adapter,
                },
                wrapper.underlying,
            ),
        };

        let step = PrimitiveOperation::Call(TargetCall {
            sender: adapter,
            target: adapter,
            value: U256::ZERO,
            action,
            flows: vec![
                Flow::debit(asset, adapter, held),
                Flow::credit(produced, adapter, expected),
            ],
        });
        snapshot = apply_step(&snapshot, &step, position)?;
        debug!(%asset, %held, %min_output, position, "unwrap appended");
        operations.push(step);
    }

    if receiver != adapter {
        let touched: BTreeSet<Address> = operations.iter().flat_map(|op| op.assets()).collect();
        for asset in touched {
            let held = snapshot.balance(adapter, asset);
            if held.is_zero() {
                continue;
            }
            let position = operations.len();
            let step = PrimitiveOperation::Transfer(TransferStep {
                asset,
                from: adapter,
                to: receiver,
                amount: held,
                spender: None,
                sweep: true,
            });
            snapshot = apply_step(&snapshot, &step, position)?;
            debug!(%asset, %held, position, "skim appended");
            operations.push(step);
        }
    }

    Ok(FinalizedBundle {
        operations,
        snapshot,
    })
}

fn apply_step(
    snapshot: &LedgerSnapshot,
    step: &PrimitiveOperation,
    position: usize,
) -> Result<LedgerSnapshot, BundleError> {
    snapshot
        .apply(step)
        .map_err(|source| BundleError::Replay { position, source })
}
