use alloy_primitives::{Address, Bytes, FixedBytes, U256};
use bundle_types::{OperationKind, PrimitiveOperation};
use serde::{Deserialize, Serialize};

use crate::bytes::address_word;
use crate::errors::{BundleError, EncodingIssue};
use crate::permit::{keccak256_bytes, permit_calldata, PermitMessage};

/// One low-level call of the bundle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleCall {
    pub target: Address,
    pub payload: Bytes,
    pub value: U256,
}

impl BundleCall {
    pub fn selector(&self) -> [u8; 4] {
        let mut selector = [0u8; 4];
        if self.payload.len() >= 4 {
            selector.copy_from_slice(&self.payload[..4]);
        }
        selector
    }
}

/// EIP-2612 authorization the wallet must sign before execution.
///
/// The signed permit call goes in front of `calls[insert_at]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitRequest {
    pub asset: Address,
    pub owner: Address,
    pub spender: Address,
    pub amount: U256,
    pub nonce: U256,
    pub deadline: U256,
    pub digest: FixedBytes<32>,
    pub insert_at: usize,
}

impl PermitRequest {
    pub fn message(&self) -> PermitMessage {
        PermitMessage {
            owner: self.owner,
            spender: self.spender,
            value: self.amount,
            nonce: self.nonce,
            deadline: self.deadline,
        }
    }

    pub fn signed_call(&self, signature: &[u8]) -> Result<BundleCall, BundleError> {
        let payload = permit_calldata(&self.message(), signature).map_err(|reason| {
            BundleError::Encoding {
                position: self.insert_at,
                kind: OperationKind::Permit,
                reason,
            }
        })?;
        Ok(BundleCall {
            target: self.asset,
            payload,
            value: U256::ZERO,
        })
    }
}

/// Ordered calls executed all-or-nothing, plus pending signatures.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedBundle {
    pub calls: Vec<BundleCall>,
    pub authorizations: Vec<PermitRequest>,
}

impl EncodedBundle {
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Total native value attached to the bundle.
    pub fn value(&self) -> U256 {
        self.calls
            .iter()
            .fold(U256::ZERO, |acc, call| acc.saturating_add(call.value))
    }

    /// Commitment over `(target, selector, keccak(payload), value)` of every call.
    pub fn bundle_hash(&self) -> FixedBytes<32> {
        let mut buf = Vec::with_capacity(self.calls.len() * (32 + 4 + 32 + 32));
        for call in &self.calls {
            buf.extend_from_slice(&address_word(&call.target));
            buf.extend_from_slice(&call.selector());
            buf.extend_from_slice(keccak256_bytes(&call.payload).as_slice());
            buf.extend_from_slice(&call.value.to_be_bytes::<32>());
        }
        keccak256_bytes(&buf)
    }

    /// Splices signed permits into the call list. `signatures[i]` signs `authorizations[i]`.
    pub fn signed_calls(&self, signatures: &[Bytes]) -> Result<Vec<BundleCall>, BundleError> {
        if signatures.len() != self.authorizations.len() {
            return Err(BundleError::Encoding {
                position: self.calls.len(),
                kind: OperationKind::Permit,
                reason: EncodingIssue::SignatureCount {
                    expected: self.authorizations.len(),
                    got: signatures.len(),
                },
            });
        }

        let mut out = Vec::with_capacity(self.calls.len() + signatures.len());
        let mut pending = self.authorizations.iter().zip(signatures).peekable();
        for (position, call) in self.calls.iter().enumerate() {
            while let Some((request, signature)) = pending.next_if(|(r, _)| r.insert_at <= position) {
                out.push(request.signed_call(signature)?);
            }
            out.push(call.clone());
        }
        for (request, signature) in pending {
            out.push(request.signed_call(signature)?);
        }
        Ok(out)
    }
}

/// Final primitives and their encoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleOutput {
    pub operations: Vec<PrimitiveOperation>,
    pub bundle: EncodedBundle,
}
