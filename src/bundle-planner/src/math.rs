//! Checked fixed-point helpers. `None` means the intermediate product overflowed
//! or the denominator is zero.

use alloy_primitives::U256;

use crate::constants::WAD;

pub fn mul_div_down(x: U256, y: U256, denominator: U256) -> Option<U256> {
    if denominator.is_zero() {
        return None;
    }
    Some(x.checked_mul(y)? / denominator)
}

pub fn mul_div_up(x: U256, y: U256, denominator: U256) -> Option<U256> {
    if denominator.is_zero() {
        return None;
    }
    let product = x.checked_mul(y)?;
    let quotient = product / denominator;
    if (product % denominator).is_zero() {
        Some(quotient)
    } else {
        quotient.checked_add(U256::from(1))
    }
}

/// `amount × (1 − slippage)`, rounded up so the floor never undershoots the tolerance.
pub fn floor_after_slippage(amount: U256, slippage: U256) -> Option<U256> {
    mul_div_up(amount, WAD.checked_sub(slippage)?, WAD)
}

/// `amount × (1 + slippage)`, rounded up.
pub fn cap_after_slippage(amount: U256, slippage: U256) -> Option<U256> {
    mul_div_up(amount, WAD.checked_add(slippage)?, WAD)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wad_fraction(bps: u64) -> U256 {
        WAD * U256::from(bps) / U256::from(10_000u64)
    }

    #[test]
    fn rounding_direction() {
        let seven = U256::from(7u64);
        let two = U256::from(2u64);
        assert_eq!(mul_div_down(seven, U256::from(1u64), two), Some(U256::from(3u64)));
        assert_eq!(mul_div_up(seven, U256::from(1u64), two), Some(U256::from(4u64)));
        assert_eq!(mul_div_up(U256::from(8u64), U256::from(1u64), two), Some(U256::from(4u64)));
    }

    #[test]
    fn zero_denominator_and_overflow() {
        assert_eq!(mul_div_down(U256::from(1u64), U256::from(1u64), U256::ZERO), None);
        assert_eq!(mul_div_up(U256::MAX, U256::from(2u64), U256::from(1u64)), None);
    }

    #[test]
    fn slippage_floor_of_ten_units_at_one_percent() {
        let ten = U256::from(10u64) * WAD;
        let floor = floor_after_slippage(ten, wad_fraction(100)).unwrap();
        assert_eq!(floor, U256::from(99u64) * WAD / U256::from(10u64));
    }

    #[test]
    fn slippage_above_one_is_rejected() {
        assert_eq!(floor_after_slippage(U256::from(1u64), WAD + U256::from(1u64)), None);
    }
}
