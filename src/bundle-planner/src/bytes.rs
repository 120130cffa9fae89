//! Big-endian word access into raw calldata.
//!
//! Used to re-size aggregator calldata in place: the quote carries byte offsets
//! of its amount words and the planner rewrites them.

use alloy_primitives::U256;

pub fn read_u256_be(bytes: &[u8], offset: usize) -> Option<U256> {
    let end = offset.checked_add(32)?;
    if bytes.len() < end {
        return None;
    }
    Some(U256::from_be_slice(&bytes[offset..end]))
}

pub fn write_u256_be(bytes: &mut [u8], offset: usize, value: U256) -> Option<()> {
    let end = offset.checked_add(32)?;
    if bytes.len() < end {
        return None;
    }
    bytes[offset..end].copy_from_slice(&value.to_be_bytes::<32>());
    Some(())
}

/// Left-pads a 20-byte address into an ABI word.
pub fn address_word(address: &alloy_primitives::Address) -> [u8; 32] {
    let mut padded = [0u8; 32];
    padded[12..32].copy_from_slice(address.as_slice());
    padded
}
