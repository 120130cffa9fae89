//! Immutable ledger snapshot and its transition function.
//!
//! The snapshot is built once from externally fetched state and never mutated in
//! place: `apply` returns a new value. Every map is ordered so iteration (and
//! therefore everything derived from it) is deterministic. Zero balances and
//! allowances are not stored, which keeps two snapshots reached through
//! different paths comparable with `==`.

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assets::TokenInfo;
use crate::operations::PrimitiveOperation;

/// Errors raised while applying a primitive operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("{account} holds {available} of {asset}, {required} required")]
    InsufficientBalance {
        account: Address,
        asset: Address,
        required: U256,
        available: U256,
    },
    #[error("{owner} allows {spender} to spend {available} of {asset}, {required} required")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        asset: Address,
        required: U256,
        available: U256,
    },
    #[error("balance of {asset} for {account} overflows")]
    Overflow { account: Address, asset: Address },
}

/// Failure while folding a sequence of operations over a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("operation {position} cannot be applied: {source}")]
pub struct ReplayError {
    pub position: usize,
    #[source]
    pub source: LedgerError,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub number: u64,
    pub timestamp: u64,
}

/// Point-in-time view of balances, allowances and permit nonces.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    chain_id: u64,
    #[serde(default)]
    block: BlockInfo,
    /// account => asset => quantity
    #[serde(default)]
    balances: BTreeMap<Address, BTreeMap<Address, U256>>,
    /// owner => spender => asset => quantity
    #[serde(default)]
    allowances: BTreeMap<Address, BTreeMap<Address, BTreeMap<Address, U256>>>,
    /// owner => asset => next EIP-2612 nonce
    #[serde(default)]
    permit_nonces: BTreeMap<Address, BTreeMap<Address, U256>>,
    #[serde(default)]
    tokens: BTreeMap<Address, TokenInfo>,
}

impl LedgerSnapshot {
    pub fn new(chain_id: u64, block: BlockInfo) -> Self {
        Self {
            chain_id,
            block,
            ..Default::default()
        }
    }

    pub fn with_balance(mut self, account: Address, asset: Address, amount: U256) -> Self {
        self.set_balance(account, asset, amount);
        self
    }

    pub fn with_allowance(
        mut self,
        owner: Address,
        spender: Address,
        asset: Address,
        amount: U256,
    ) -> Self {
        self.set_allowance(owner, spender, asset, amount);
        self
    }

    pub fn with_permit_nonce(mut self, owner: Address, asset: Address, nonce: U256) -> Self {
        self.set_permit_nonce(owner, asset, nonce);
        self
    }

    pub fn with_token(mut self, asset: Address, info: TokenInfo) -> Self {
        self.tokens.insert(asset, info);
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn block(&self) -> BlockInfo {
        self.block
    }

    pub fn balance(&self, account: Address, asset: Address) -> U256 {
        self.balances
            .get(&account)
            .and_then(|assets| assets.get(&asset))
            .copied()
            .unwrap_or_default()
    }

    pub fn allowance(&self, owner: Address, spender: Address, asset: Address) -> U256 {
        self.allowances
            .get(&owner)
            .and_then(|spenders| spenders.get(&spender))
            .and_then(|assets| assets.get(&asset))
            .copied()
            .unwrap_or_default()
    }

    pub fn permit_nonce(&self, owner: Address, asset: Address) -> U256 {
        self.permit_nonces
            .get(&owner)
            .and_then(|assets| assets.get(&asset))
            .copied()
            .unwrap_or_default()
    }

    pub fn token(&self, asset: Address) -> Option<&TokenInfo> {
        self.tokens.get(&asset)
    }

    /// Non-zero holdings of `account`, in ascending asset order.
    pub fn holdings(&self, account: Address) -> impl Iterator<Item = (Address, U256)> + '_ {
        self.balances
            .get(&account)
            .into_iter()
            .flat_map(|assets| assets.iter().map(|(asset, amount)| (*asset, *amount)))
    }

    /// Returns the snapshot reached by executing `op`.
    pub fn apply(&self, op: &PrimitiveOperation) -> Result<Self, LedgerError> {
        let mut next = self.clone();
        match op {
            PrimitiveOperation::Approve(approval) => {
                next.set_allowance(approval.owner, approval.spender, approval.asset, approval.amount);
            }
            PrimitiveOperation::Permit(permit) => {
                next.set_allowance(permit.owner, permit.spender, permit.asset, permit.amount);
                let nonce = next.permit_nonce(permit.owner, permit.asset);
                next.set_permit_nonce(permit.owner, permit.asset, nonce.saturating_add(U256::from(1)));
            }
            PrimitiveOperation::Transfer(step) => {
                next.move_balance(
                    step.asset,
                    Some(step.from),
                    Some(step.to),
                    step.amount,
                    step.spender,
                )?;
            }
            PrimitiveOperation::Call(call) => {
                for flow in &call.flows {
                    next.move_balance(flow.asset, flow.from, flow.to, flow.amount, flow.spender)?;
                }
            }
        }
        Ok(next)
    }

    /// Applies `ops` in order.
    pub fn replay<'a, I>(&self, ops: I) -> Result<Self, ReplayError>
    where
        I: IntoIterator<Item = &'a PrimitiveOperation>,
    {
        let mut current = self.clone();
        for (position, op) in ops.into_iter().enumerate() {
            current = current
                .apply(op)
                .map_err(|source| ReplayError { position, source })?;
        }
        Ok(current)
    }

    fn move_balance(
        &mut self,
        asset: Address,
        from: Option<Address>,
        to: Option<Address>,
        amount: U256,
        spender: Option<Address>,
    ) -> Result<(), LedgerError> {
        if let Some(from) = from {
            let available = self.balance(from, asset);
            if available < amount {
                return Err(LedgerError::InsufficientBalance {
                    account: from,
                    asset,
                    required: amount,
                    available,
                });
            }

            if let Some(spender) = spender.filter(|spender| *spender != from) {
                let allowance = self.allowance(from, spender, asset);
                if allowance < amount {
                    return Err(LedgerError::InsufficientAllowance {
                        owner: from,
                        spender,
                        asset,
                        required: amount,
                        available: allowance,
                    });
                }
                // Infinite allowances are never consumed.
                if allowance != U256::MAX {
                    self.set_allowance(from, spender, asset, allowance - amount);
                }
            }

            self.set_balance(from, asset, available - amount);
        }

        if let Some(to) = to {
            let credited = self
                .balance(to, asset)
                .checked_add(amount)
                .ok_or(LedgerError::Overflow { account: to, asset })?;
            self.set_balance(to, asset, credited);
        }

        Ok(())
    }

    fn set_balance(&mut self, account: Address, asset: Address, amount: U256) {
        if amount.is_zero() {
            if let Some(assets) = self.balances.get_mut(&account) {
                assets.remove(&asset);
                if assets.is_empty() {
                    self.balances.remove(&account);
                }
            }
        } else {
            self.balances.entry(account).or_default().insert(asset, amount);
        }
    }

    fn set_allowance(&mut self, owner: Address, spender: Address, asset: Address, amount: U256) {
        if amount.is_zero() {
            if let Some(spenders) = self.allowances.get_mut(&owner) {
                if let Some(assets) = spenders.get_mut(&spender) {
                    assets.remove(&asset);
                    if assets.is_empty() {
                        spenders.remove(&spender);
                    }
                }
                if spenders.is_empty() {
                    self.allowances.remove(&owner);
                }
            }
        } else {
            self.allowances
                .entry(owner)
                .or_default()
                .entry(spender)
                .or_default()
                .insert(asset, amount);
        }
    }

    fn set_permit_nonce(&mut self, owner: Address, asset: Address, nonce: U256) {
        self.permit_nonces.entry(owner).or_default().insert(asset, nonce);
    }
}

/// Free-standing form of [`LedgerSnapshot::apply`].
pub fn apply(snapshot: &LedgerSnapshot, op: &PrimitiveOperation) -> Result<LedgerSnapshot, LedgerError> {
    snapshot.apply(op)
}
