//! Bijective variable-length unsigned integers.
//!
//! Format:
//!   short: one byte, long flag (0x80) clear, value in the low four bits
//!   long:  the flag byte 0x80, then `value - 16` in seven-bit groups,
//!          least significant group first, continuation bit (0x80) set on
//!          every non-final byte; every non-final group also borrows one
//!          from the remaining magnitude
//!
//! The borrow makes the scheme bijective: each value has exactly one
//! encoding, and every decoder state transition is `num += byte << mag`.
//! A short byte in 0x10..=0x7f or a long-flag byte with residual low bits
//! is rejected as malformed.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};

use crate::error::CodecError;

const LONG_FLAG: u8 = 0x80;
const SHORT_MAX: u64 = 15;

pub(crate) fn encode_u64(out: &mut Vec<u8>, n: u64) {
    if n <= SHORT_MAX {
        out.push(n as u8);
        return;
    }
    out.push(LONG_FLAG);
    let mut num = n - 16;
    loop {
        let group = (num & 0x7f) as u8;
        num >>= 7;
        if num == 0 {
            out.push(group);
            return;
        }
        out.push(group | 0x80);
        num -= 1;
    }
}

pub(crate) fn encode_big(out: &mut Vec<u8>, n: &BigUint) {
    if let Some(small) = n.to_u64() {
        encode_u64(out, small);
        return;
    }
    out.push(LONG_FLAG);
    let mut num = n.clone();
    num -= 16u32;
    loop {
        let group = (num.iter_u32_digits().next().unwrap_or(0) & 0x7f) as u8;
        num >>= 7u32;
        if num.is_zero() {
            out.push(group);
            return;
        }
        out.push(group | 0x80);
        num -= 1u32;
    }
}

/// Decodes a varint into a `u64`, returning the value and bytes consumed.
pub(crate) fn decode_u64(input: &[u8]) -> Result<(u64, usize), CodecError> {
    let (&b0, rest) = input.split_first().ok_or(CodecError::Truncated)?;
    if b0 & LONG_FLAG == 0 {
        if u64::from(b0) > SHORT_MAX {
            return Err(CodecError::BadVarint);
        }
        return Ok((u64::from(b0), 1));
    }
    if b0 != LONG_FLAG {
        return Err(CodecError::BadVarint);
    }
    let mut num: u128 = 16;
    let mut mag: u32 = 0;
    let mut used = 1;
    for &b in rest {
        used += 1;
        if mag > 63 {
            return Err(CodecError::IntOverflow);
        }
        num += u128::from(b) << mag;
        if b & 0x80 == 0 {
            return u64::try_from(num)
                .map(|v| (v, used))
                .map_err(|_| CodecError::IntOverflow);
        }
        mag += 7;
    }
    Err(CodecError::Truncated)
}

/// Decodes a varint of arbitrary magnitude.
pub(crate) fn decode_big(input: &[u8]) -> Result<(BigUint, usize), CodecError> {
    let (&b0, rest) = input.split_first().ok_or(CodecError::Truncated)?;
    if b0 & LONG_FLAG == 0 {
        if u64::from(b0) > SHORT_MAX {
            return Err(CodecError::BadVarint);
        }
        return Ok((BigUint::from(b0), 1));
    }
    if b0 != LONG_FLAG {
        return Err(CodecError::BadVarint);
    }
    let mut num = BigUint::from(16u32);
    let mut mag: u64 = 0;
    let mut used = 1;
    for &b in rest {
        used += 1;
        num += BigUint::from(b) << mag;
        if b & 0x80 == 0 {
            return Ok((num, used));
        }
        mag += 7;
    }
    Err(CodecError::Truncated)
}
