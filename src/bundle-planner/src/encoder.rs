//! Bundle encoder: one low-level call per primitive, input order preserved.

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use bundle_types::{
    Approval, AuctionParams, CallAction, LedgerSnapshot, PrimitiveOperation, TargetCall,
    TransferStep, NATIVE,
};
use tracing::debug;

use crate::abi::{
    BaseCreateOrderParams, BlockLeaf, IERC20, IERC4626, IGeneralAdapter1, IParaswapAdapter,
    IRiftAuctionAdaptor, IWrappedNative, Offsets,
};
use crate::config::BundlerAddresses;
use crate::constants::{PERMIT_VALIDITY_SECS, RAY};
use crate::errors::{BundleError, EncodingIssue};
use crate::math::mul_div_up;
use crate::permit::{domain_separator, permit_calldata, PermitMessage};
use crate::types::{BundleCall, EncodedBundle, PermitRequest};

/// Encodes `operations`. Signable approvals become [`PermitRequest`]s when
/// `supports_signature` is set.
pub fn encode_bundle(
    operations: &[PrimitiveOperation],
    snapshot: &LedgerSnapshot,
    addresses: &BundlerAddresses,
    supports_signature: bool,
) -> Result<EncodedBundle, BundleError> {
    let mut bundle = EncodedBundle::default();
    // owner => asset => next permit nonce within this bundle
    let mut nonces: BTreeMap<(Address, Address), U256> = BTreeMap::new();

    for (position, operation) in operations.iter().enumerate() {
        let fail = |reason: EncodingIssue| BundleError::Encoding {
            position,
            kind: operation.kind(),
            reason,
        };

        match operation {
            PrimitiveOperation::Approve(approval) if approval.signable && supports_signature => {
                let nonce = next_nonce(&mut nonces, snapshot, approval.owner, approval.asset);
                let request = permit_request(approval, nonce, snapshot, bundle.calls.len()).map_err(fail)?;
                debug!(position, asset = %approval.asset, nonce = %request.nonce, "approval replaced by permit");
                bundle.authorizations.push(request);
            }
            PrimitiveOperation::Approve(approval) => {
                bundle.calls.push(encode_approval(approval).map_err(fail)?);
            }
            PrimitiveOperation::Permit(grant) => {
                let expected = next_nonce(&mut nonces, snapshot, grant.owner, grant.asset);
                if grant.nonce != expected {
                    return Err(fail(EncodingIssue::NonceMismatch {
                        expected,
                        got: grant.nonce,
                    }));
                }
                let message = PermitMessage {
                    owner: grant.owner,
                    spender: grant.spender,
                    value: grant.amount,
                    nonce: grant.nonce,
                    deadline: grant.deadline,
                };
                bundle.calls.push(BundleCall {
                    target: grant.asset,
                    payload: permit_calldata(&message, &grant.signature).map_err(fail)?,
                    value: U256::ZERO,
                });
            }
            PrimitiveOperation::Transfer(step) => {
                bundle.calls.push(encode_transfer(step, addresses).map_err(fail)?);
            }
            PrimitiveOperation::Call(call) => {
                bundle.calls.push(encode_call(call, addresses).map_err(fail)?);
            }
        }
    }

    Ok(bundle)
}

fn next_nonce(
    nonces: &mut BTreeMap<(Address, Address), U256>,
    snapshot: &LedgerSnapshot,
    owner: Address,
    asset: Address,
) -> U256 {
    let slot = nonces
        .entry((owner, asset))
        .or_insert_with(|| snapshot.permit_nonce(owner, asset));
    let nonce = *slot;
    *slot = nonce.saturating_add(U256::from(1));
    nonce
}

fn permit_request(
    approval: &Approval,
    nonce: U256,
    snapshot: &LedgerSnapshot,
    insert_at: usize,
) -> Result<PermitRequest, EncodingIssue> {
    let token = snapshot
        .token(approval.asset)
        .ok_or(EncodingIssue::MissingTokenMetadata {
            asset: approval.asset,
        })?;
    let deadline = snapshot
        .block()
        .timestamp
        .checked_add(PERMIT_VALIDITY_SECS)
        .ok_or(EncodingIssue::Overflow)?;

    let message = PermitMessage {
        owner: approval.owner,
        spender: approval.spender,
        value: approval.amount,
        nonce,
        deadline: U256::from(deadline),
    };
    let separator = domain_separator(&token.name, &token.version, snapshot.chain_id(), approval.asset);

    Ok(PermitRequest {
        asset: approval.asset,
        owner: approval.owner,
        spender: approval.spender,
        amount: approval.amount,
        nonce,
        deadline: message.deadline,
        digest: message.digest(separator),
        insert_at,
    })
}

fn encode_approval(approval: &Approval) -> Result<BundleCall, EncodingIssue> {
    if approval.asset == NATIVE {
        return Err(EncodingIssue::NativeApproval);
    }
    let call = IERC20::approveCall {
        spender: approval.spender,
        amount: approval.amount,
    };
    Ok(BundleCall {
        target: approval.asset,
        payload: call.abi_encode().into(),
        value: U256::ZERO,
    })
}

fn encode_transfer(step: &TransferStep, addresses: &BundlerAddresses) -> Result<BundleCall, EncodingIssue> {
    let adapter = addresses.adapter;
    let amount = if step.sweep { U256::MAX } else { step.amount };

    // Adapter pulls from the initiator.
    if step.from != adapter && step.spender == Some(adapter) {
        if step.asset == NATIVE || step.sweep {
            return Err(EncodingIssue::UnsupportedTransfer);
        }
        let call = IGeneralAdapter1::erc20TransferFromCall {
            token: step.asset,
            receiver: step.to,
            amount: step.amount,
        };
        return Ok(adapter_call(adapter, call.abi_encode()));
    }

    // Adapter pushes what it holds.
    if step.from == adapter && step.spender.map_or(true, |spender| spender == adapter) {
        let payload = if step.asset == NATIVE {
            IGeneralAdapter1::nativeTransferCall {
                receiver: step.to,
                amount,
            }
            .abi_encode()
        } else {
            IGeneralAdapter1::erc20TransferCall {
                token: step.asset,
                receiver: step.to,
                amount,
            }
            .abi_encode()
        };
        return Ok(adapter_call(adapter, payload));
    }

    // Direct transfer from the sender's own context.
    if step.spender.is_none() && !step.sweep {
        if step.asset == NATIVE {
            return Ok(BundleCall {
                target: step.to,
                payload: Bytes::new(),
                value: step.amount,
            });
        }
        let call = IERC20::transferCall {
            to: step.to,
            amount: step.amount,
        };
        return Ok(BundleCall {
            target: step.asset,
            payload: call.abi_encode().into(),
            value: U256::ZERO,
        });
    }

    Err(EncodingIssue::UnsupportedTransfer)
}

fn encode_call(call: &TargetCall, addresses: &BundlerAddresses) -> Result<BundleCall, EncodingIssue> {
    let via_adapter = call.target == addresses.adapter;

    let payload: Vec<u8> = match &call.action {
        CallAction::Exchange { calldata } => calldata.to_vec(),
        CallAction::ParaswapSell {
            augustus,
            calldata,
            src_asset,
            dst_asset,
            sell_entire_balance,
            offsets,
            receiver,
        } => IParaswapAdapter::sellCall {
            augustus: *augustus,
            callData: calldata.clone(),
            srcToken: *src_asset,
            destToken: *dst_asset,
            sellEntireBalance: *sell_entire_balance,
            offsets: Offsets {
                exactAmount: U256::from(offsets.exact_amount),
                limitAmount: U256::from(offsets.limit_amount),
                quotedAmount: U256::from(offsets.quoted_amount),
            },
            receiver: *receiver,
        }
        .abi_encode(),
        CallAction::WrapNative { amount, receiver } if via_adapter => IGeneralAdapter1::wrapNativeCall {
            amount: *amount,
            receiver: *receiver,
        }
        .abi_encode(),
        CallAction::WrapNative { .. } => IWrappedNative::depositCall {}.abi_encode(),
        CallAction::UnwrapNative {
            amount, receiver, ..
        } if via_adapter => IGeneralAdapter1::unwrapNativeCall {
            amount: *amount,
            receiver: *receiver,
        }
        .abi_encode(),
        CallAction::UnwrapNative { amount, .. } => IWrappedNative::withdrawCall { amount: *amount }.abi_encode(),
        CallAction::VaultDeposit {
            vault,
            assets,
            max_share_price_e27,
            receiver,
        } if via_adapter => IGeneralAdapter1::erc4626DepositCall {
            vault: *vault,
            assets: *assets,
            maxSharePriceE27: *max_share_price_e27,
            receiver: *receiver,
        }
        .abi_encode(),
        CallAction::VaultDeposit {
            assets, receiver, ..
        } => IERC4626::depositCall {
            assets: *assets,
            receiver: *receiver,
        }
        .abi_encode(),
        CallAction::VaultRedeem {
            vault,
            shares,
            min_output,
            receiver,
            owner,
        } if via_adapter => IGeneralAdapter1::erc4626RedeemCall {
            vault: *vault,
            shares: *shares,
            minSharePriceE27: min_share_price_e27(*min_output, *shares)?,
            receiver: *receiver,
            owner: *owner,
        }
        .abi_encode(),
        CallAction::VaultRedeem {
            shares,
            receiver,
            owner,
            ..
        } => IERC4626::redeemCall {
            shares: *shares,
            receiver: *receiver,
            owner: *owner,
        }
        .abi_encode(),
        CallAction::CreateAuction { params } => encode_auction(params),
    };

    Ok(BundleCall {
        target: call.target,
        payload: payload.into(),
        value: call.value,
    })
}

fn min_share_price_e27(min_output: U256, shares: U256) -> Result<U256, EncodingIssue> {
    if shares.is_zero() {
        return Ok(U256::ZERO);
    }
    mul_div_up(min_output, RAY, shares).ok_or(EncodingIssue::Overflow)
}

fn encode_auction(params: &AuctionParams) -> Vec<u8> {
    IRiftAuctionAdaptor::createAuctionCall {
        startsBTCperBTCRate: params.start_rate,
        endcbsBTCperBTCRate: params.end_rate,
        decayBlocks: params.decay_blocks,
        deadline: params.deadline,
        fillerWhitelistContract: params.filler_whitelist,
        baseParams: BaseCreateOrderParams {
            owner: params.owner,
            bitcoinScriptPubKey: params.bitcoin_script_pub_key.clone(),
            salt: params.salt,
            confirmationBlocks: params.confirmation_blocks,
            safeBlockLeaf: BlockLeaf {
                blockHash: params.safe_block_leaf.block_hash,
                height: params.safe_block_leaf.height,
                cumulativeChainwork: params.safe_block_leaf.cumulative_chainwork,
            },
        },
    }
    .abi_encode()
}

fn adapter_call(adapter: Address, payload: Vec<u8>) -> BundleCall {
    BundleCall {
        target: adapter,
        payload: payload.into(),
        value: U256::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundle_types::{BlockInfo, PermitGrant, PermitSupport, TokenInfo};

    use crate::abi::IERC20Permit;

    const USER: Address = Address::repeat_byte(0x11);
    const ADAPTER: Address = Address::repeat_byte(0x22);
    const TOKEN: Address = Address::repeat_byte(0xaa);

    fn addresses() -> BundlerAddresses {
        BundlerAddresses {
            adapter: ADAPTER,
            bundler: None,
            exchange_adapter: None,
            auction_adapter: None,
        }
    }

    fn snapshot() -> LedgerSnapshot {
        let block = BlockInfo {
            number: 1,
            timestamp: 1_700_000_000,
        };
        LedgerSnapshot::new(8453, block).with_token(TOKEN, TokenInfo::new("Token").with_permit(PermitSupport::Eip2612))
    }

    fn approve(signable: bool) -> PrimitiveOperation {
        PrimitiveOperation::Approve(Approval {
            owner: USER,
            asset: TOKEN,
            spender: ADAPTER,
            amount: U256::from(100u64),
            signable,
        })
    }

    fn transfer(from: Address, to: Address, spender: Option<Address>, sweep: bool) -> PrimitiveOperation {
        PrimitiveOperation::Transfer(TransferStep {
            asset: TOKEN,
            from,
            to,
            amount: U256::from(100u64),
            spender,
            sweep,
        })
    }

    #[test]
    fn signable_approval_becomes_authorization() {
        let ops = vec![approve(true), transfer(USER, ADAPTER, Some(ADAPTER), false)];

        let bundle = encode_bundle(&ops, &snapshot(), &addresses(), true).unwrap();
        assert_eq!(bundle.calls.len(), 1);
        assert_eq!(bundle.authorizations.len(), 1);
        let request = &bundle.authorizations[0];
        assert_eq!(request.insert_at, 0);
        assert_eq!(request.nonce, U256::ZERO);
        assert_eq!(request.deadline, U256::from(1_700_007_200u64));

        let without = encode_bundle(&ops, &snapshot(), &addresses(), false).unwrap();
        assert_eq!(without.calls.len(), 2);
        assert!(without.authorizations.is_empty());
        assert_eq!(&without.calls[0].payload[..4], IERC20::approveCall::SELECTOR.as_slice());
    }

    #[test]
    fn each_authorization_takes_the_next_nonce() {
        let ops = vec![approve(true), approve(true)];
        let snapshot = snapshot().with_permit_nonce(USER, TOKEN, U256::from(7u64));
        let bundle = encode_bundle(&ops, &snapshot, &addresses(), true).unwrap();
        let nonces: Vec<_> = bundle.authorizations.iter().map(|r| r.nonce).collect();
        assert_eq!(nonces, vec![U256::from(7u64), U256::from(8u64)]);
        assert_ne!(bundle.authorizations[0].digest, bundle.authorizations[1].digest);
    }

    #[test]
    fn transfer_shapes() {
        let pull = encode_transfer(
            &TransferStep {
                asset: TOKEN,
                from: USER,
                to: ADAPTER,
                amount: U256::from(5u64),
                spender: Some(ADAPTER),
                sweep: false,
            },
            &addresses(),
        )
        .unwrap();
        assert_eq!(pull.target, ADAPTER);
        assert_eq!(&pull.payload[..4], IGeneralAdapter1::erc20TransferFromCall::SELECTOR.as_slice());

        let skim = encode_transfer(
            &TransferStep {
                asset: NATIVE,
                from: ADAPTER,
                to: USER,
                amount: U256::from(5u64),
                spender: None,
                sweep: true,
            },
            &addresses(),
        )
        .unwrap();
        let decoded = IGeneralAdapter1::nativeTransferCall::abi_decode(&skim.payload, true).unwrap();
        assert_eq!(decoded.amount, U256::MAX);

        let direct = encode_transfer(
            &TransferStep {
                asset: NATIVE,
                from: USER,
                to: ADAPTER,
                amount: U256::from(5u64),
                spender: None,
                sweep: false,
            },
            &addresses(),
        )
        .unwrap();
        assert_eq!(direct.value, U256::from(5u64));
        assert!(direct.payload.is_empty());
    }

    #[test]
    fn unsupported_transfer_is_an_encoding_error() {
        let ops = vec![transfer(USER, ADAPTER, Some(Address::repeat_byte(0x99)), false)];
        let err = encode_bundle(&ops, &snapshot(), &addresses(), false).unwrap_err();
        assert_eq!(
            err,
            BundleError::Encoding {
                position: 0,
                kind: bundle_types::OperationKind::Transfer,
                reason: EncodingIssue::UnsupportedTransfer,
            }
        );
    }

    #[test]
    fn malformed_permit_signature_is_rejected() {
        let ops = vec![PrimitiveOperation::Permit(PermitGrant {
            owner: USER,
            asset: TOKEN,
            spender: ADAPTER,
            amount: U256::from(1u64),
            nonce: U256::ZERO,
            deadline: U256::MAX,
            signature: Bytes::from(vec![0u8; 10]),
        })];
        let err = encode_bundle(&ops, &snapshot(), &addresses(), false).unwrap_err();
        assert!(matches!(
            err,
            BundleError::Encoding {
                reason: EncodingIssue::MalformedSignature { len: 10 },
                ..
            }
        ));
    }

    #[test]
    fn permit_reusing_a_requested_nonce_is_rejected() {
        let grant = |nonce: u64| {
            PrimitiveOperation::Permit(PermitGrant {
                owner: USER,
                asset: TOKEN,
                spender: ADAPTER,
                amount: U256::from(1u64),
                nonce: U256::from(nonce),
                deadline: U256::MAX,
                signature: Bytes::from(vec![0u8; 65]),
            })
        };

        let err = encode_bundle(&[approve(true), grant(0)], &snapshot(), &addresses(), true).unwrap_err();
        assert_eq!(
            err,
            BundleError::Encoding {
                position: 1,
                kind: bundle_types::OperationKind::Permit,
                reason: EncodingIssue::NonceMismatch {
                    expected: U256::from(1u64),
                    got: U256::ZERO,
                },
            }
        );

        let bundle = encode_bundle(&[approve(true), grant(1)], &snapshot(), &addresses(), true).unwrap();
        assert_eq!(bundle.authorizations[0].nonce, U256::ZERO);
        assert_eq!(bundle.calls.len(), 1);
        assert_eq!(&bundle.calls[0].payload[..4], IERC20Permit::permitCall::SELECTOR.as_slice());
    }

    #[test]
    fn adapter_unwrap_uses_adapter_entry_point() {
        let call = TargetCall {
            sender: ADAPTER,
            target: ADAPTER,
            value: U256::ZERO,
            action: CallAction::UnwrapNative {
                amount: U256::from(10u64),
                min_output: U256::from(10u64),
                receiver: ADAPTER,
            },
            flows: vec![],
        };
        let encoded = encode_call(&call, &addresses()).unwrap();
        assert_eq!(&encoded.payload[..4], IGeneralAdapter1::unwrapNativeCall::SELECTOR.as_slice());

        let direct = TargetCall {
            target: TOKEN,
            sender: USER,
            ..call
        };
        let encoded = encode_call(&direct, &addresses()).unwrap();
        assert_eq!(&encoded.payload[..4], IWrappedNative::withdrawCall::SELECTOR.as_slice());
    }

    #[test]
    fn redeem_share_price_floor_rounds_up() {
        let price = |min_output: u64, shares: u64| {
            min_share_price_e27(U256::from(min_output), U256::from(shares)).unwrap()
        };
        assert_eq!(price(11, 10), RAY * U256::from(11u64) / U256::from(10u64));
        assert_eq!(price(1, 3), RAY / U256::from(3u64) + U256::from(1u64));
        assert_eq!(min_share_price_e27(U256::from(1u64), U256::ZERO).unwrap(), U256::ZERO);
    }
}
