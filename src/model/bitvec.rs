//! Concrete 32-bit operator semantics.
//!
//! Every function matches the SMT-LIB bit-vector theory exactly, including
//! the total definitions of division and remainder by zero and shift
//! amounts beyond the word width. Constant folding and emulation both rely
//! on this, so folded formulas stay equivalent to unfolded ones.

pub fn add(left: u32, right: u32) -> u32 {
    left.wrapping_add(right)
}

pub fn sub(left: u32, right: u32) -> u32 {
    left.wrapping_sub(right)
}

pub fn mul(left: u32, right: u32) -> u32 {
    left.wrapping_mul(right)
}

// SMT-LIB defines unsigned division by zero as all ones.
pub fn udiv(left: u32, right: u32) -> u32 {
    left.checked_div(right).unwrap_or(u32::MAX)
}

// SMT-LIB defines unsigned remainder by zero as the dividend.
pub fn urem(left: u32, right: u32) -> u32 {
    left.checked_rem(right).unwrap_or(left)
}

pub fn sdiv(left: u32, right: u32) -> u32 {
    let (left_negative, right_negative) = (is_negative(left), is_negative(right));
    let quotient = udiv(abs(left), abs(right));
    if left_negative != right_negative {
        quotient.wrapping_neg()
    } else {
        quotient
    }
}

pub fn srem(left: u32, right: u32) -> u32 {
    let remainder = urem(abs(left), abs(right));
    if is_negative(left) {
        remainder.wrapping_neg()
    } else {
        remainder
    }
}

pub fn sll(value: u32, amount: u32) -> u32 {
    value.checked_shl(amount).unwrap_or(0)
}

pub fn srl(value: u32, amount: u32) -> u32 {
    value.checked_shr(amount).unwrap_or(0)
}

pub fn sra(value: u32, amount: u32) -> u32 {
    let amount = amount.min(31);
    ((value as i32) >> amount) as u32
}

pub fn slt(left: u32, right: u32) -> bool {
    (left as i32) < (right as i32)
}

pub fn ult(left: u32, right: u32) -> bool {
    left < right
}

fn is_negative(value: u32) -> bool {
    value & (1 << 31) != 0
}

fn abs(value: u32) -> u32 {
    if is_negative(value) {
        value.wrapping_neg()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neg(value: i32) -> u32 {
        value as u32
    }

    #[test]
    fn arithmetic_wraps_around() {
        assert_eq!(add(u32::MAX, 1), 0);
        assert_eq!(sub(0, 1), u32::MAX);
        assert_eq!(mul(1 << 31, 2), 0);
    }

    #[test]
    fn signed_division_truncates_towards_zero() {
        assert_eq!(sdiv(7, 2), 3);
        assert_eq!(sdiv(neg(-7), 2), neg(-3));
        assert_eq!(sdiv(7, neg(-2)), neg(-3));
        assert_eq!(sdiv(neg(-7), neg(-2)), 3);
        assert_eq!(sdiv(neg(i32::MIN), neg(-1)), neg(i32::MIN));
        assert_eq!(srem(neg(-7), 2), neg(-1));
        assert_eq!(srem(7, neg(-2)), 1);
        assert_eq!(srem(neg(i32::MIN), neg(-1)), 0);
    }

    #[test]
    fn division_by_zero_is_total() {
        assert_eq!(sdiv(5, 0), u32::MAX);
        assert_eq!(sdiv(neg(-5), 0), 1);
        assert_eq!(srem(5, 0), 5);
        assert_eq!(srem(neg(-5), 0), neg(-5));
        assert_eq!(udiv(5, 0), u32::MAX);
        assert_eq!(urem(5, 0), 5);
    }

    #[test]
    fn shifts_saturate_beyond_word_width() {
        assert_eq!(sll(1, 31), 1 << 31);
        assert_eq!(sll(1, 32), 0);
        assert_eq!(srl(1 << 31, 31), 1);
        assert_eq!(srl(u32::MAX, 40), 0);
        assert_eq!(sra(neg(-8), 1), neg(-4));
        assert_eq!(sra(neg(-8), 100), u32::MAX);
        assert_eq!(sra(8, 100), 0);
    }

    #[test]
    fn comparisons_distinguish_signedness() {
        assert!(slt(neg(-1), 0));
        assert!(!ult(neg(-1), 0));
        assert!(ult(0, neg(-1)));
    }
}
