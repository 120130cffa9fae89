//! Dependency populator: expands declarative operations into primitives.
//!
//! Every primitive is applied to a running snapshot as soon as it is emitted,
//! so later operations see the allowances, balances and wraps that earlier ones
//! produced. Prerequisites are inserted immediately before the primitive that
//! needs them.

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, U256};
use bundle_types::{
    Amount, Approval, AuctionParams, CallAction, DeclarativeOperation, Flow, LedgerSnapshot,
    PermitGrant, PermitSupport, PrimitiveOperation, SwapQuote, TargetCall, TransferStep,
    WrapperInfo, WrapperKind, NATIVE,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bytes::{read_u256_be, write_u256_be};
use crate::config::BundlerAddresses;
use crate::constants::RAY;
use crate::errors::{BundleError, DependencyIssue};
use crate::math::{cap_after_slippage, floor_after_slippage, mul_div_down, mul_div_up};
use crate::options::BundlingOptions;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRole {
    /// Synthesized so the main step can succeed.
    Prerequisite,
    /// Directly requested by the declarative operation.
    Main,
}

/// Which declarative operation produced a primitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub input_index: usize,
    pub role: StepRole,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PopulatedBundle {
    pub operations: Vec<PrimitiveOperation>,
    /// Parallel to `operations`.
    pub provenance: Vec<Provenance>,
    /// Snapshot after every primitive has been applied.
    pub snapshot: LedgerSnapshot,
}

pub fn populate_bundle(
    operations: &[DeclarativeOperation],
    snapshot: &LedgerSnapshot,
    addresses: &BundlerAddresses,
    options: &BundlingOptions,
) -> Result<PopulatedBundle, BundleError> {
    let mut populator = Populator {
        addresses,
        options,
        snapshot: snapshot.clone(),
        operations: Vec::new(),
        provenance: Vec::new(),
        signed_approvals: BTreeMap::new(),
        index: 0,
    };

    for (index, operation) in operations.iter().enumerate() {
        populator.index = index;
        debug!(index, operation = operation.name(), "populating");
        populator.populate(operation)?;
    }

    Ok(PopulatedBundle {
        operations: populator.operations,
        provenance: populator.provenance,
        snapshot: populator.snapshot,
    })
}

struct Populator<'a> {
    addresses: &'a BundlerAddresses,
    options: &'a BundlingOptions,
    snapshot: LedgerSnapshot,
    operations: Vec<PrimitiveOperation>,
    provenance: Vec<Provenance>,
    /// owner => asset => approvals the encoder turns into permit requests
    signed_approvals: BTreeMap<(Address, Address), U256>,
    index: usize,
}

impl Populator<'_> {
    fn populate(&mut self, operation: &DeclarativeOperation) -> Result<(), BundleError> {
        match operation {
            DeclarativeOperation::TransferIn {
                sender,
                asset,
                amount,
            } => self.transfer_in(*sender, *asset, *amount),
            DeclarativeOperation::TransferOut {
                sender,
                asset,
                amount,
                receiver,
            } => self.transfer_out(*sender, *asset, *amount, *receiver),
            DeclarativeOperation::Exchange {
                sender,
                amount,
                quote,
            } => self.exchange(*sender, *amount, quote),
            DeclarativeOperation::Wrap {
                sender,
                asset,
                amount,
            } => self.wrap(*sender, *asset, *amount),
            DeclarativeOperation::Unwrap {
                sender,
                asset,
                amount,
                receiver,
            } => self.unwrap(*sender, *asset, *amount, *receiver),
            DeclarativeOperation::Authorize {
                sender,
                asset,
                spender,
                amount,
                deadline,
                signature,
            } => self.authorize(*sender, *asset, *spender, *amount, *deadline, signature),
            DeclarativeOperation::CreateAuction {
                sender,
                asset,
                amount,
                params,
            } => self.create_auction(*sender, *asset, *amount, params),
        }
    }

    fn transfer_in(&mut self, sender: Address, asset: Address, amount: Amount) -> Result<(), BundleError> {
        let adapter = self.addresses.adapter;
        if sender == adapter {
            return Err(self.unresolvable(DependencyIssue::AdapterSender));
        }

        let resolved = amount.resolve(self.available(sender, asset));
        if asset == NATIVE {
            return self.push(
                PrimitiveOperation::Transfer(TransferStep {
                    asset,
                    from: sender,
                    to: adapter,
                    amount: resolved,
                    spender: None,
                    sweep: false,
                }),
                StepRole::Main,
            );
        }

        self.ensure_wrapped(sender, asset, resolved)?;
        self.ensure_allowance(sender, adapter, asset, resolved)?;
        self.push(
            PrimitiveOperation::Transfer(TransferStep {
                asset,
                from: sender,
                to: adapter,
                amount: resolved,
                spender: Some(adapter),
                sweep: false,
            }),
            StepRole::Main,
        )
    }

    fn transfer_out(
        &mut self,
        sender: Address,
        asset: Address,
        amount: Amount,
        receiver: Address,
    ) -> Result<(), BundleError> {
        let resolved = amount.resolve(self.available(sender, asset));
        self.ensure_wrapped(sender, asset, resolved)?;
        self.push(
            PrimitiveOperation::Transfer(TransferStep {
                asset,
                from: sender,
                to: receiver,
                amount: resolved,
                spender: None,
                sweep: false,
            }),
            StepRole::Main,
        )
    }

    fn exchange(&mut self, sender: Address, amount: Amount, quote: &SwapQuote) -> Result<(), BundleError> {
        if quote.src_amount.is_zero() || quote.src_asset == quote.dst_asset {
            return Err(self.unresolvable(DependencyIssue::InvalidQuote));
        }

        let src = quote.src_asset;
        let resolved = amount.resolve(self.available(sender, src));
        let quote = if resolved == quote.src_amount {
            quote.clone()
        } else {
            resize_quote(quote, resolved).ok_or_else(|| self.unresolvable(DependencyIssue::QuoteNotResizable))?
        };

        if sender == self.addresses.adapter {
            return self.adapter_exchange(amount, quote);
        }

        self.ensure_wrapped(sender, src, resolved)?;
        let (value, debit) = if src == NATIVE {
            (resolved, Flow::debit(src, sender, resolved))
        } else {
            self.ensure_allowance(sender, quote.spender, src, resolved)?;
            (U256::ZERO, Flow::debit(src, sender, resolved).spent_by(quote.spender))
        };

        self.push(
            PrimitiveOperation::Call(TargetCall {
                sender,
                target: quote.router,
                value,
                action: CallAction::Exchange {
                    calldata: quote.calldata.clone(),
                },
                flows: vec![
                    debit,
                    Flow::credit(quote.dst_asset, quote.receiver, quote.min_dst_amount),
                ],
            }),
            StepRole::Main,
        )
    }

    fn adapter_exchange(&mut self, amount: Amount, quote: SwapQuote) -> Result<(), BundleError> {
        let adapter = self.addresses.adapter;
        let exchange_adapter = self
            .addresses
            .exchange_adapter
            .ok_or_else(|| self.unresolvable(DependencyIssue::MissingExchangeAdapter))?;
        let offsets = quote
            .offsets
            .ok_or_else(|| self.unresolvable(DependencyIssue::QuoteNotResizable))?;
        if quote.src_asset == NATIVE {
            return Err(self.unresolvable(DependencyIssue::InvalidQuote));
        }

        self.ensure_wrapped(adapter, quote.src_asset, quote.src_amount)?;
        self.push(
            PrimitiveOperation::Transfer(TransferStep {
                asset: quote.src_asset,
                from: adapter,
                to: exchange_adapter,
                amount: quote.src_amount,
                spender: None,
                sweep: false,
            }),
            StepRole::Prerequisite,
        )?;

        self.push(
            PrimitiveOperation::Call(TargetCall {
                sender: adapter,
                target: exchange_adapter,
                value: U256::ZERO,
                action: CallAction::ParaswapSell {
                    augustus: quote.router,
                    calldata: quote.calldata.clone(),
                    src_asset: quote.src_asset,
                    dst_asset: quote.dst_asset,
                    sell_entire_balance: amount.is_max(),
                    offsets,
                    receiver: quote.receiver,
                },
                flows: vec![
                    Flow::debit(quote.src_asset, exchange_adapter, quote.src_amount),
                    Flow::credit(quote.dst_asset, quote.receiver, quote.min_dst_amount),
                ],
            }),
            StepRole::Main,
        )
    }

    fn wrap(&mut self, sender: Address, asset: Address, amount: Amount) -> Result<(), BundleError> {
        let info = self.wrapper(asset)?;
        let resolved = amount.resolve(self.available(sender, info.underlying));
        let call = self.wrap_call(sender, asset, info, resolved)?;
        self.push(PrimitiveOperation::Call(call), StepRole::Main)
    }

    fn unwrap(
        &mut self,
        sender: Address,
        asset: Address,
        amount: Amount,
        receiver: Address,
    ) -> Result<(), BundleError> {
        let info = self.wrapper(asset)?;
        let adapter = self.addresses.adapter;
        let resolved = amount.resolve(self.snapshot.balance(sender, asset));
        let expected = info
            .to_underlying(resolved)
            .ok_or(BundleError::Overflow { index: self.index })?;
        let min_output = floor_after_slippage(expected, self.options.slippage)
            .ok_or(BundleError::InvalidSlippage(self.options.slippage))?;

        match info.kind {
            WrapperKind::Native if sender == adapter => self.push(
                PrimitiveOperation::Call(TargetCall {
                    sender,
                    target: adapter,
                    value: U256::ZERO,
                    action: CallAction::UnwrapNative {
                        amount: resolved,
                        min_output,
                        receiver,
                    },
                    flows: vec![
                        Flow::debit(asset, adapter, resolved),
                        Flow::credit(NATIVE, receiver, expected),
                    ],
                }),
                StepRole::Main,
            ),
            WrapperKind::Native => {
                // The wrapper releases native to its caller only.
                self.push(
                    PrimitiveOperation::Call(TargetCall {
                        sender,
                        target: asset,
                        value: U256::ZERO,
                        action: CallAction::UnwrapNative {
                            amount: resolved,
                            min_output,
                            receiver: sender,
                        },
                        flows: vec![
                            Flow::debit(asset, sender, resolved),
                            Flow::credit(NATIVE, sender, expected),
                        ],
                    }),
                    StepRole::Main,
                )?;
                if receiver == sender {
                    return Ok(());
                }
                self.push(
                    PrimitiveOperation::Transfer(TransferStep {
                        asset: NATIVE,
                        from: sender,
                        to: receiver,
                        amount: expected,
                        spender: None,
                        sweep: false,
                    }),
                    StepRole::Main,
                )
            }
            WrapperKind::Vault { .. } => {
                let target = if sender == adapter { adapter } else { asset };
                self.push(
                    PrimitiveOperation::Call(TargetCall {
                        sender,
                        target,
                        value: U256::ZERO,
                        action: CallAction::VaultRedeem {
                            vault: asset,
                            shares: resolved,
                            min_output,
                            receiver,
                            owner: sender,
                        },
                        flows: vec![
                            Flow::debit(asset, sender, resolved),
                            Flow::credit(info.underlying, receiver, expected),
                        ],
                    }),
                    StepRole::Main,
                )
            }
        }
    }

    fn authorize(
        &mut self,
        sender: Address,
        asset: Address,
        spender: Address,
        amount: U256,
        deadline: U256,
        signature: &Bytes,
    ) -> Result<(), BundleError> {
        if sender == self.addresses.adapter {
            return Err(self.unresolvable(DependencyIssue::AdapterSender));
        }
        if asset == NATIVE {
            return Err(self.unresolvable(DependencyIssue::NativeAllowance));
        }

        // Each signed approval ahead of this grant consumes a nonce first.
        let pending = self
            .signed_approvals
            .get(&(sender, asset))
            .copied()
            .unwrap_or_default();
        let nonce = self.snapshot.permit_nonce(sender, asset).saturating_add(pending);
        self.push(
            PrimitiveOperation::Permit(PermitGrant {
                owner: sender,
                asset,
                spender,
                amount,
                nonce,
                deadline,
                signature: signature.clone(),
            }),
            StepRole::Main,
        )
    }

    fn create_auction(
        &mut self,
        sender: Address,
        asset: Address,
        amount: Amount,
        params: &AuctionParams,
    ) -> Result<(), BundleError> {
        let adapter = self.addresses.adapter;
        let auction_adapter = self
            .addresses
            .auction_adapter
            .ok_or_else(|| self.unresolvable(DependencyIssue::MissingAuctionAdapter))?;
        if asset == NATIVE {
            return Err(self.unresolvable(DependencyIssue::NativeAllowance));
        }

        let held = self.snapshot.balance(auction_adapter, asset);
        let resolved = amount.resolve(self.snapshot.balance(sender, asset).saturating_add(held));
        let deficit = resolved.saturating_sub(held);

        if !deficit.is_zero() {
            let spender = if sender == adapter {
                None
            } else {
                self.ensure_allowance(sender, adapter, asset, deficit)?;
                Some(adapter)
            };
            self.push(
                PrimitiveOperation::Transfer(TransferStep {
                    asset,
                    from: sender,
                    to: auction_adapter,
                    amount: deficit,
                    spender,
                    sweep: false,
                }),
                StepRole::Prerequisite,
            )?;
        }

        // The auction adapter deposits everything it holds.
        let deposit = self.snapshot.balance(auction_adapter, asset);
        self.push(
            PrimitiveOperation::Call(TargetCall {
                sender,
                target: auction_adapter,
                value: U256::ZERO,
                action: CallAction::CreateAuction {
                    params: params.clone(),
                },
                flows: vec![Flow::debit(asset, auction_adapter, deposit)],
            }),
            StepRole::Main,
        )
    }

    /// Wrap `amount` of the underlying of `asset` for `sender`.
    fn wrap_call(
        &mut self,
        sender: Address,
        asset: Address,
        info: WrapperInfo,
        amount: U256,
    ) -> Result<TargetCall, BundleError> {
        let adapter = self.addresses.adapter;
        let wrapped = info
            .to_wrapped(amount)
            .ok_or(BundleError::Overflow { index: self.index })?;

        match info.kind {
            WrapperKind::Native => {
                let (target, value) = if sender == adapter {
                    (adapter, U256::ZERO)
                } else {
                    (asset, amount)
                };
                Ok(TargetCall {
                    sender,
                    target,
                    value,
                    action: CallAction::WrapNative {
                        amount,
                        receiver: sender,
                    },
                    flows: vec![
                        Flow::debit(NATIVE, sender, amount),
                        Flow::credit(asset, sender, wrapped),
                    ],
                })
            }
            WrapperKind::Vault {
                total_assets,
                total_shares,
            } => {
                let share_price = if total_shares.is_zero() {
                    Some(RAY)
                } else {
                    mul_div_up(total_assets, RAY, total_shares)
                };
                let max_share_price_e27 = share_price
                    .and_then(|price| cap_after_slippage(price, self.options.slippage))
                    .ok_or(BundleError::Overflow { index: self.index })?;

                let (target, debit) = if sender == adapter {
                    (adapter, Flow::debit(info.underlying, adapter, amount))
                } else {
                    self.ensure_allowance(sender, asset, info.underlying, amount)?;
                    (asset, Flow::debit(info.underlying, sender, amount).spent_by(asset))
                };

                Ok(TargetCall {
                    sender,
                    target,
                    value: U256::ZERO,
                    action: CallAction::VaultDeposit {
                        vault: asset,
                        assets: amount,
                        max_share_price_e27,
                        receiver: sender,
                    },
                    flows: vec![debit, Flow::credit(asset, sender, wrapped)],
                })
            }
        }
    }

    /// Wraps native into `asset` when `account` is short of it but holds enough native.
    fn ensure_wrapped(&mut self, account: Address, asset: Address, required: U256) -> Result<(), BundleError> {
        let Some(info) = self.snapshot.token(asset).and_then(|token| token.wrapper) else {
            return Ok(());
        };
        if info.kind != WrapperKind::Native {
            return Ok(());
        }

        let held = self.snapshot.balance(account, asset);
        if held >= required {
            return Ok(());
        }
        let deficit = required - held;
        if self.snapshot.balance(account, NATIVE) < deficit {
            return Ok(());
        }

        let call = self.wrap_call(account, asset, info, deficit)?;
        self.push(PrimitiveOperation::Call(call), StepRole::Prerequisite)
    }

    /// Inserts an `approve` when `owner`'s allowance towards `spender` is short.
    /// Allowances are only drawn on the operation's own sender, never the adapter.
    fn ensure_allowance(
        &mut self,
        owner: Address,
        spender: Address,
        asset: Address,
        amount: U256,
    ) -> Result<(), BundleError> {
        if owner == spender || self.snapshot.allowance(owner, spender, asset) >= amount {
            return Ok(());
        }
        if asset == NATIVE {
            return Err(self.unresolvable(DependencyIssue::NativeAllowance));
        }

        let permit = self
            .snapshot
            .token(asset)
            .map(|token| token.permit)
            .unwrap_or_default();
        if permit == PermitSupport::Required && !self.options.supports_signature {
            return Err(self.unresolvable(DependencyIssue::PermitRequired { asset }));
        }

        self.push(
            PrimitiveOperation::Approve(Approval {
                owner,
                asset,
                spender,
                amount,
                signable: permit.signable(),
            }),
            StepRole::Prerequisite,
        )?;
        if permit.signable() && self.options.supports_signature {
            let count = self.signed_approvals.entry((owner, asset)).or_default();
            *count = count.saturating_add(U256::from(1));
        }
        Ok(())
    }

    /// Balance `Max` resolves against. Wrapped native counts the native an implicit wrap could add.
    fn available(&self, account: Address, asset: Address) -> U256 {
        let held = self.snapshot.balance(account, asset);
        match self.snapshot.token(asset).and_then(|token| token.wrapper) {
            Some(WrapperInfo {
                kind: WrapperKind::Native,
                ..
            }) => held.saturating_add(self.snapshot.balance(account, NATIVE)),
            _ => held,
        }
    }

    fn wrapper(&self, asset: Address) -> Result<WrapperInfo, BundleError> {
        self.snapshot
            .token(asset)
            .and_then(|token| token.wrapper)
            .ok_or_else(|| self.unresolvable(DependencyIssue::NotWrapped { asset }))
    }

    fn push(&mut self, operation: PrimitiveOperation, role: StepRole) -> Result<(), BundleError> {
        let next = self
            .snapshot
            .apply(&operation)
            .map_err(|err| BundleError::from_ledger(self.index, err))?;
        debug!(
            index = self.index,
            position = self.operations.len(),
            kind = %operation.kind(),
            ?role,
            "step added"
        );
        self.snapshot = next;
        self.operations.push(operation);
        self.provenance.push(Provenance {
            input_index: self.index,
            role,
        });
        Ok(())
    }

    fn unresolvable(&self, reason: DependencyIssue) -> BundleError {
        BundleError::unresolvable(self.index, reason)
    }
}

/// Re-sizes a sell quote to `amount`, patching the calldata amount words.
///
/// The limit scales up and the quoted output scales down.
pub fn resize_quote(quote: &SwapQuote, amount: U256) -> Option<SwapQuote> {
    let offsets = quote.offsets?;
    let exact_at = usize::try_from(offsets.exact_amount).ok()?;
    let limit_at = usize::try_from(offsets.limit_amount).ok()?;
    let quoted_at = usize::try_from(offsets.quoted_amount).ok()?;

    let mut calldata = quote.calldata.to_vec();
    let old_exact = read_u256_be(&calldata, exact_at)?;
    let old_limit = read_u256_be(&calldata, limit_at)?;
    let old_quoted = read_u256_be(&calldata, quoted_at)?;
    if old_exact.is_zero() {
        return None;
    }

    let new_limit = mul_div_up(old_limit, amount, old_exact)?;
    let new_quoted = mul_div_down(old_quoted, amount, old_exact)?;
    write_u256_be(&mut calldata, exact_at, amount)?;
    write_u256_be(&mut calldata, limit_at, new_limit)?;
    write_u256_be(&mut calldata, quoted_at, new_quoted)?;

    Some(SwapQuote {
        src_amount: amount,
        min_dst_amount: mul_div_up(quote.min_dst_amount, amount, quote.src_amount)?,
        quoted_dst_amount: mul_div_down(quote.quoted_dst_amount, amount, quote.src_amount)?,
        calldata: calldata.into(),
        ..quote.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_sol_types::SolCall;
    use bundle_types::{BlockInfo, CalldataOffsets, TokenInfo};

    use crate::abi::{IERC4626, IGeneralAdapter1, IWrappedNative};
    use crate::constants::WAD;
    use crate::encoder::encode_bundle;

    const USER: Address = Address::repeat_byte(0x11);
    const ADAPTER: Address = Address::repeat_byte(0x22);
    const ROUTER: Address = Address::repeat_byte(0x33);
    const VAULT: Address = Address::repeat_byte(0x55);
    const TOKEN_A: Address = Address::repeat_byte(0xaa);
    const TOKEN_B: Address = Address::repeat_byte(0xbb);
    const WRAPPED: Address = Address::repeat_byte(0xcc);

    fn addresses() -> BundlerAddresses {
        BundlerAddresses {
            adapter: ADAPTER,
            bundler: None,
            exchange_adapter: Some(Address::repeat_byte(0x44)),
            auction_adapter: None,
        }
    }

    fn calldata(exact: u64, limit: u64, quoted: u64) -> Bytes {
        let mut data = vec![0u8; 4 + 96];
        write_u256_be(&mut data, 4, U256::from(exact)).unwrap();
        write_u256_be(&mut data, 36, U256::from(limit)).unwrap();
        write_u256_be(&mut data, 68, U256::from(quoted)).unwrap();
        data.into()
    }

    fn quote(src_amount: u64) -> SwapQuote {
        SwapQuote {
            src_asset: TOKEN_A,
            dst_asset: TOKEN_B,
            src_amount: U256::from(src_amount),
            min_dst_amount: U256::from(src_amount * 2),
            quoted_dst_amount: U256::from(src_amount * 2 + 10),
            router: ROUTER,
            spender: ROUTER,
            receiver: USER,
            calldata: calldata(src_amount, src_amount * 2, src_amount * 2 + 10),
            offsets: Some(CalldataOffsets {
                exact_amount: 4,
                limit_amount: 36,
                quoted_amount: 68,
            }),
        }
    }

    fn snapshot() -> LedgerSnapshot {
        LedgerSnapshot::new(8453, BlockInfo::default())
    }

    #[test]
    fn approval_is_inserted_before_exchange() {
        let snapshot = snapshot().with_balance(USER, TOKEN_A, U256::from(150u64));
        let ops = vec![DeclarativeOperation::Exchange {
            sender: USER,
            amount: Amount::Exact(U256::from(100u64)),
            quote: quote(100),
        }];

        let populated = populate_bundle(&ops, &snapshot, &addresses(), &BundlingOptions::default()).unwrap();

        assert_eq!(populated.operations.len(), 2);
        assert!(matches!(
            &populated.operations[0],
            PrimitiveOperation::Approve(a) if a.amount == U256::from(100u64) && a.spender == ROUTER
        ));
        assert_eq!(populated.provenance[0].role, StepRole::Prerequisite);
        assert_eq!(populated.provenance[1].role, StepRole::Main);
        assert_eq!(populated.snapshot.balance(USER, TOKEN_A), U256::from(50u64));
        assert_eq!(populated.snapshot.balance(USER, TOKEN_B), U256::from(200u64));
    }

    #[test]
    fn max_exchange_resizes_calldata() {
        let snapshot = snapshot()
            .with_balance(USER, TOKEN_A, U256::from(50u64))
            .with_allowance(USER, ROUTER, TOKEN_A, U256::MAX);
        let ops = vec![DeclarativeOperation::Exchange {
            sender: USER,
            amount: Amount::Max,
            quote: quote(100),
        }];

        let populated = populate_bundle(&ops, &snapshot, &addresses(), &BundlingOptions::default()).unwrap();
        let PrimitiveOperation::Call(call) = &populated.operations[0] else {
            panic!("expected exchange call");
        };
        let CallAction::Exchange { calldata } = &call.action else {
            panic!("expected raw exchange");
        };
        assert_eq!(read_u256_be(calldata, 4), Some(U256::from(50u64)));
        assert_eq!(read_u256_be(calldata, 36), Some(U256::from(100u64)));
        assert_eq!(read_u256_be(calldata, 68), Some(U256::from(105u64)));
    }

    #[test]
    fn quote_without_offsets_cannot_resize() {
        let mut fixed = quote(100);
        fixed.offsets = None;
        assert!(resize_quote(&fixed, U256::from(10u64)).is_none());

        let snapshot = snapshot().with_balance(USER, TOKEN_A, U256::from(50u64));
        let ops = vec![DeclarativeOperation::Exchange {
            sender: USER,
            amount: Amount::Max,
            quote: fixed,
        }];
        let err = populate_bundle(&ops, &snapshot, &addresses(), &BundlingOptions::default()).unwrap_err();
        assert_eq!(
            err,
            BundleError::UnresolvableDependency {
                index: 0,
                reason: DependencyIssue::QuoteNotResizable
            }
        );
    }

    #[test]
    fn adapter_exchange_moves_input_to_exchange_adapter() {
        let snapshot = snapshot().with_balance(ADAPTER, TOKEN_A, U256::from(100u64));
        let mut sell = quote(100);
        sell.receiver = ADAPTER;
        let ops = vec![DeclarativeOperation::Exchange {
            sender: ADAPTER,
            amount: Amount::Exact(U256::from(100u64)),
            quote: sell,
        }];

        let populated = populate_bundle(&ops, &snapshot, &addresses(), &BundlingOptions::default()).unwrap();
        assert_eq!(populated.operations.len(), 2);
        assert!(matches!(
            &populated.operations[0],
            PrimitiveOperation::Transfer(t) if t.to == Address::repeat_byte(0x44)
        ));
        assert!(matches!(
            &populated.operations[1],
            PrimitiveOperation::Call(TargetCall { action: CallAction::ParaswapSell { .. }, .. })
        ));
        assert_eq!(populated.snapshot.balance(ADAPTER, TOKEN_B), U256::from(200u64));
    }

    #[test]
    fn adapter_exchange_needs_exchange_adapter() {
        let snapshot = snapshot().with_balance(ADAPTER, TOKEN_A, U256::from(100u64));
        let ops = vec![DeclarativeOperation::Exchange {
            sender: ADAPTER,
            amount: Amount::Exact(U256::from(100u64)),
            quote: quote(100),
        }];
        let mut addresses = addresses();
        addresses.exchange_adapter = None;

        let err = populate_bundle(&ops, &snapshot, &addresses, &BundlingOptions::default()).unwrap_err();
        assert_eq!(
            err,
            BundleError::UnresolvableDependency {
                index: 0,
                reason: DependencyIssue::MissingExchangeAdapter
            }
        );
    }

    #[test]
    fn wrapped_native_is_wrapped_on_demand() {
        let weth = Address::repeat_byte(0xcc);
        let snapshot = snapshot()
            .with_token(weth, TokenInfo::new("Wrapped Ether").with_wrapper(WrapperInfo::native()))
            .with_balance(USER, weth, U256::from(4u64))
            .with_balance(USER, NATIVE, U256::from(10u64));
        let ops = vec![DeclarativeOperation::TransferIn {
            sender: USER,
            asset: weth,
            amount: Amount::Exact(U256::from(10u64)),
        }];

        let populated = populate_bundle(&ops, &snapshot, &addresses(), &BundlingOptions::default()).unwrap();
        let kinds: Vec<_> = populated.operations.iter().map(|op| op.kind().to_string()).collect();
        assert_eq!(kinds, vec!["call", "approve", "transfer"]);
        assert_eq!(populated.snapshot.balance(ADAPTER, weth), U256::from(10u64));
        assert_eq!(populated.snapshot.balance(USER, NATIVE), U256::from(4u64));
    }

    #[test]
    fn permit_only_token_needs_signatures() {
        let snapshot = snapshot()
            .with_token(
                TOKEN_A,
                TokenInfo::new("Token").with_permit(PermitSupport::Required),
            )
            .with_balance(USER, TOKEN_A, U256::from(10u64));
        let ops = vec![DeclarativeOperation::TransferIn {
            sender: USER,
            asset: TOKEN_A,
            amount: Amount::Max,
        }];

        let err = populate_bundle(&ops, &snapshot, &addresses(), &BundlingOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            BundleError::UnresolvableDependency {
                reason: DependencyIssue::PermitRequired { .. },
                ..
            }
        ));

        let populated = populate_bundle(
            &ops,
            &snapshot,
            &addresses(),
            &BundlingOptions::default().with_signatures(),
        )
        .unwrap();
        assert!(matches!(&populated.operations[0], PrimitiveOperation::Approve(a) if a.signable));
    }

    #[test]
    fn authorize_records_nonce_and_skips_approval() {
        let snapshot = snapshot()
            .with_balance(USER, TOKEN_A, U256::from(10u64))
            .with_permit_nonce(USER, TOKEN_A, U256::from(4u64));
        let ops = vec![
            DeclarativeOperation::Authorize {
                sender: USER,
                asset: TOKEN_A,
                spender: ADAPTER,
                amount: U256::from(10u64),
                deadline: U256::MAX,
                signature: Bytes::from(vec![0u8; 65]),
            },
            DeclarativeOperation::TransferIn {
                sender: USER,
                asset: TOKEN_A,
                amount: Amount::Max,
            },
        ];

        let populated = populate_bundle(&ops, &snapshot, &addresses(), &BundlingOptions::default()).unwrap();
        assert_eq!(populated.operations.len(), 2);
        assert!(matches!(
            &populated.operations[0],
            PrimitiveOperation::Permit(p) if p.nonce == U256::from(4u64)
        ));
        assert_eq!(populated.snapshot.permit_nonce(USER, TOKEN_A), U256::from(5u64));
    }

    #[test]
    fn vault_deposit_by_adapter_does_not_pull_from_initiator() {
        let vault = Address::repeat_byte(0x55);
        let snapshot = snapshot()
            .with_token(
                vault,
                TokenInfo::new("Vault").with_wrapper(WrapperInfo::vault(
                    TOKEN_A,
                    U256::from(110u64),
                    U256::from(100u64),
                )),
            )
            .with_balance(USER, TOKEN_A, U256::from(1_000u64));
        let ops = vec![DeclarativeOperation::Wrap {
            sender: ADAPTER,
            asset: vault,
            amount: Amount::Exact(U256::from(110u64)),
        }];

        let err = populate_bundle(&ops, &snapshot, &addresses(), &BundlingOptions::default()).unwrap_err();
        assert!(matches!(err, BundleError::InsufficientBalance { index: 0, .. }));
    }

    #[test]
    fn user_vault_deposit_approves_the_vault() {
        let vault = Address::repeat_byte(0x55);
        let snapshot = snapshot()
            .with_token(
                vault,
                TokenInfo::new("Vault").with_wrapper(WrapperInfo::vault(
                    TOKEN_A,
                    U256::from(110u64),
                    U256::from(100u64),
                )),
            )
            .with_balance(USER, TOKEN_A, U256::from(110u64));
        let ops = vec![DeclarativeOperation::Wrap {
            sender: USER,
            asset: vault,
            amount: Amount::Max,
        }];

        let populated = populate_bundle(&ops, &snapshot, &addresses(), &BundlingOptions::default()).unwrap();
        assert!(matches!(&populated.operations[0], PrimitiveOperation::Approve(a) if a.spender == vault));
        assert_eq!(populated.snapshot.balance(USER, vault), U256::from(100u64));
        assert_eq!(populated.snapshot.balance(USER, TOKEN_A), U256::ZERO);
    }

    #[test]
    fn unwrap_of_plain_token_is_unresolvable() {
        let snapshot = snapshot().with_balance(USER, TOKEN_A, U256::from(10u64));
        let ops = vec![DeclarativeOperation::Unwrap {
            sender: USER,
            asset: TOKEN_A,
            amount: Amount::Max,
            receiver: USER,
        }];
        let err = populate_bundle(&ops, &snapshot, &addresses(), &BundlingOptions::default()).unwrap_err();
        assert_eq!(
            err,
            BundleError::UnresolvableDependency {
                index: 0,
                reason: DependencyIssue::NotWrapped { asset: TOKEN_A }
            }
        );
    }

    fn one_percent() -> BundlingOptions {
        BundlingOptions {
            slippage: WAD / U256::from(100u64),
            ..BundlingOptions::default()
        }
    }

    fn vault_snapshot(holder: Address) -> LedgerSnapshot {
        snapshot()
            .with_token(
                VAULT,
                TokenInfo::new("Vault").with_wrapper(WrapperInfo::vault(
                    TOKEN_A,
                    U256::from(1_100u64),
                    U256::from(1_000u64),
                )),
            )
            .with_balance(holder, VAULT, U256::from(1_000u64))
    }

    #[test]
    fn user_native_unwrap_forwards_to_receiver() {
        let friend = Address::repeat_byte(0x66);
        let snapshot = snapshot()
            .with_token(WRAPPED, TokenInfo::new("Wrapped").with_wrapper(WrapperInfo::native()))
            .with_balance(USER, WRAPPED, U256::from(1_000u64));
        let ops = vec![DeclarativeOperation::Unwrap {
            sender: USER,
            asset: WRAPPED,
            amount: Amount::Max,
            receiver: friend,
        }];

        let populated = populate_bundle(&ops, &snapshot, &addresses(), &one_percent()).unwrap();
        assert_eq!(populated.operations.len(), 2);
        assert!(matches!(
            &populated.operations[0],
            PrimitiveOperation::Call(TargetCall {
                target,
                action: CallAction::UnwrapNative { amount, min_output, receiver },
                ..
            }) if *target == WRAPPED
                && *amount == U256::from(1_000u64)
                && *min_output == U256::from(990u64)
                && *receiver == USER
        ));
        assert!(matches!(
            &populated.operations[1],
            PrimitiveOperation::Transfer(t)
                if t.asset == NATIVE && t.from == USER && t.to == friend && t.amount == U256::from(1_000u64)
        ));
        assert_eq!(populated.snapshot.balance(friend, NATIVE), U256::from(1_000u64));
        assert_eq!(populated.snapshot.balance(USER, WRAPPED), U256::ZERO);

        let bundle = encode_bundle(&populated.operations, &snapshot, &addresses(), false).unwrap();
        let withdraw = IWrappedNative::withdrawCall::abi_decode(&bundle.calls[0].payload, true).unwrap();
        assert_eq!(withdraw.amount, U256::from(1_000u64));
        assert_eq!(bundle.calls[1].target, friend);
        assert_eq!(bundle.calls[1].value, U256::from(1_000u64));
    }

    #[test]
    fn user_vault_unwrap_redeems_on_the_vault() {
        let snapshot = vault_snapshot(USER);
        let ops = vec![DeclarativeOperation::Unwrap {
            sender: USER,
            asset: VAULT,
            amount: Amount::Exact(U256::from(500u64)),
            receiver: USER,
        }];

        let populated = populate_bundle(&ops, &snapshot, &addresses(), &one_percent()).unwrap();
        assert_eq!(populated.operations.len(), 1);
        // 500 shares at 1.1 => 550, less 1% rounded up
        assert!(matches!(
            &populated.operations[0],
            PrimitiveOperation::Call(TargetCall {
                target,
                action: CallAction::VaultRedeem { min_output, .. },
                ..
            }) if *target == VAULT && *min_output == U256::from(545u64)
        ));
        assert_eq!(populated.snapshot.balance(USER, TOKEN_A), U256::from(550u64));

        let bundle = encode_bundle(&populated.operations, &snapshot, &addresses(), false).unwrap();
        assert_eq!(bundle.calls[0].target, VAULT);
        let redeem = IERC4626::redeemCall::abi_decode(&bundle.calls[0].payload, true).unwrap();
        assert_eq!(redeem.shares, U256::from(500u64));
        assert_eq!(redeem.receiver, USER);
        assert_eq!(redeem.owner, USER);
    }

    #[test]
    fn adapter_vault_unwrap_carries_min_share_price() {
        let snapshot = vault_snapshot(ADAPTER);
        let ops = vec![DeclarativeOperation::Unwrap {
            sender: ADAPTER,
            asset: VAULT,
            amount: Amount::Max,
            receiver: USER,
        }];

        let populated = populate_bundle(&ops, &snapshot, &addresses(), &one_percent()).unwrap();
        assert!(matches!(
            &populated.operations[0],
            PrimitiveOperation::Call(TargetCall {
                target,
                action: CallAction::VaultRedeem { min_output, owner, .. },
                ..
            }) if *target == ADAPTER && *min_output == U256::from(1_089u64) && *owner == ADAPTER
        ));

        let bundle = encode_bundle(&populated.operations, &snapshot, &addresses(), false).unwrap();
        assert_eq!(bundle.calls[0].target, ADAPTER);
        let redeem = IGeneralAdapter1::erc4626RedeemCall::abi_decode(&bundle.calls[0].payload, true).unwrap();
        assert_eq!(redeem.vault, VAULT);
        assert_eq!(redeem.shares, U256::from(1_000u64));
        // 1089 underlying over 1000 shares
        assert_eq!(redeem.minSharePriceE27, U256::from(1_089u64) * RAY / U256::from(1_000u64));
        assert_eq!(redeem.receiver, USER);
        assert_eq!(redeem.owner, ADAPTER);
    }

    #[test]
    fn adapter_cannot_transfer_in() {
        let snapshot = snapshot().with_balance(ADAPTER, TOKEN_A, U256::from(10u64));
        let ops = vec![DeclarativeOperation::TransferIn {
            sender: ADAPTER,
            asset: TOKEN_A,
            amount: Amount::Max,
        }];
        let err = populate_bundle(&ops, &snapshot, &addresses(), &BundlingOptions::default()).unwrap_err();
        assert_eq!(
            err,
            BundleError::UnresolvableDependency {
                index: 0,
                reason: DependencyIssue::AdapterSender
            }
        );
    }

    #[test]
    fn degenerate_quotes_are_rejected() {
        let snapshot = snapshot().with_balance(USER, TOKEN_A, U256::from(150u64));
        let mut same_asset = quote(100);
        same_asset.dst_asset = TOKEN_A;
        let mut empty = quote(100);
        empty.src_amount = U256::ZERO;

        for quote in [same_asset, empty] {
            let ops = vec![DeclarativeOperation::Exchange {
                sender: USER,
                amount: Amount::Exact(U256::from(100u64)),
                quote,
            }];
            let err = populate_bundle(&ops, &snapshot, &addresses(), &BundlingOptions::default()).unwrap_err();
            assert_eq!(
                err,
                BundleError::UnresolvableDependency {
                    index: 0,
                    reason: DependencyIssue::InvalidQuote
                }
            );
        }
    }

    #[test]
    fn failing_operation_index_is_reported() {
        let snapshot = snapshot().with_balance(USER, TOKEN_A, U256::from(5u64));
        let ops = vec![
            DeclarativeOperation::TransferOut {
                sender: USER,
                asset: TOKEN_A,
                amount: Amount::Exact(U256::from(1u64)),
                receiver: TOKEN_B,
            },
            DeclarativeOperation::TransferOut {
                sender: USER,
                asset: TOKEN_A,
                amount: Amount::Exact(U256::from(10u64)),
                receiver: TOKEN_B,
            },
        ];
        let err = populate_bundle(&ops, &snapshot, &addresses(), &BundlingOptions::default()).unwrap_err();
        assert_eq!(
            err,
            BundleError::InsufficientBalance {
                index: 1,
                asset: TOKEN_A,
                required: U256::from(10u64),
                available: U256::from(4u64),
            }
        );
    }
}
