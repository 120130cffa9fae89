//! EIP-2612 permit hashing and signature handling.
//!
//! The digest is built word by word so it matches what the token's
//! `DOMAIN_SEPARATOR()` and `permit` verify on-chain.

use alloy_primitives::{Address, Bytes, FixedBytes, U256};
use alloy_sol_types::SolCall;
use sha3::{Digest, Keccak256};

use crate::abi::IERC20Permit;
use crate::bytes::address_word;
use crate::constants::{EIP712_DOMAIN_TYPE, PERMIT_TYPE};
use crate::errors::EncodingIssue;

pub(crate) fn keccak256_bytes(bytes: &[u8]) -> FixedBytes<32> {
    let mut h = Keccak256::new();
    h.update(bytes);
    let out = h.finalize();
    let mut b = [0u8; 32];
    b.copy_from_slice(out.as_slice());
    FixedBytes(b)
}

/// EIP-712 domain separator of a token.
pub fn domain_separator(
    name: &str,
    version: &str,
    chain_id: u64,
    verifying_contract: Address,
) -> FixedBytes<32> {
    let mut buf = Vec::with_capacity(32 * 5);
    buf.extend_from_slice(keccak256_bytes(EIP712_DOMAIN_TYPE).as_slice());
    buf.extend_from_slice(keccak256_bytes(name.as_bytes()).as_slice());
    buf.extend_from_slice(keccak256_bytes(version.as_bytes()).as_slice());
    buf.extend_from_slice(&U256::from(chain_id).to_be_bytes::<32>());
    buf.extend_from_slice(&address_word(&verifying_contract));
    keccak256_bytes(&buf)
}

/// Typed `Permit` message signed by the token owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PermitMessage {
    pub owner: Address,
    pub spender: Address,
    pub value: U256,
    pub nonce: U256,
    pub deadline: U256,
}

impl PermitMessage {
    pub fn struct_hash(&self) -> FixedBytes<32> {
        let mut buf = Vec::with_capacity(32 * 6);
        buf.extend_from_slice(keccak256_bytes(PERMIT_TYPE).as_slice());
        buf.extend_from_slice(&address_word(&self.owner));
        buf.extend_from_slice(&address_word(&self.spender));
        buf.extend_from_slice(&self.value.to_be_bytes::<32>());
        buf.extend_from_slice(&self.nonce.to_be_bytes::<32>());
        buf.extend_from_slice(&self.deadline.to_be_bytes::<32>());
        keccak256_bytes(&buf)
    }

    /// Hash the wallet signs: `keccak256(0x1901 || domainSeparator || structHash)`.
    pub fn digest(&self, domain_separator: FixedBytes<32>) -> FixedBytes<32> {
        let mut buf = Vec::with_capacity(2 + 32 + 32);
        buf.extend_from_slice(b"\x19\x01");
        buf.extend_from_slice(domain_separator.as_slice());
        buf.extend_from_slice(self.struct_hash().as_slice());
        keccak256_bytes(&buf)
    }
}

/// Splits an `r || s || v` signature. `v` in {0, 1} is lifted to {27, 28}.
pub fn split_signature(sig: &[u8]) -> Result<(u8, FixedBytes<32>, FixedBytes<32>), EncodingIssue> {
    if sig.len() != 65 {
        return Err(EncodingIssue::MalformedSignature { len: sig.len() });
    }
    let r = FixedBytes::<32>::from_slice(&sig[0..32]);
    let s = FixedBytes::<32>::from_slice(&sig[32..64]);
    let v = match sig[64] {
        v @ (0 | 1) => v + 27,
        v => v,
    };
    Ok((v, r, s))
}

/// `permit(owner, spender, value, deadline, v, r, s)` calldata.
pub fn permit_calldata(message: &PermitMessage, signature: &[u8]) -> Result<Bytes, EncodingIssue> {
    let (v, r, s) = split_signature(signature)?;
    let call = IERC20Permit::permitCall {
        owner: message.owner,
        spender: message.spender,
        value: message.value,
        deadline: message.deadline,
        v,
        r,
        s,
    };
    Ok(call.abi_encode().into())
}
