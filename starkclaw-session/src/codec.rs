//! Fixed-width unsigned codec for field elements and 256-bit values.
//!
//! Starknet's ERC-20 interface carries token amounts as a `(low, high)`
//! pair of 128-bit halves. This module provides that codec plus the
//! decimal-string parsing used everywhere an amount enters the core.
//! All arithmetic is exact integer arithmetic; floating point never
//! touches an amount.

use serde::{Deserialize, Serialize};
use starknet::core::types::FieldElement;

use crate::error::CoreError;

const LIMB_MASK: u128 = u64::MAX as u128;

/// Unsigned 256-bit value as a `(low, high)` pair of 128-bit halves.
///
/// `low` is the value mod 2^128, `high` the value shifted right by 128.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct U256 {
    pub low: u128,
    pub high: u128,
}

impl U256 {
    pub const ZERO: U256 = U256 { low: 0, high: 0 };

    pub fn from_u128(v: u128) -> Self {
        Self { low: v, high: 0 }
    }

    /// Rebuild from `(low, high)` felts; both halves must be < 2^128.
    pub fn from_felts(low: &FieldElement, high: &FieldElement) -> Result<Self, CoreError> {
        Ok(Self {
            low: felt_to_u128(low)
                .ok_or_else(|| CoreError::InvalidInput("u256 low half exceeds 2^128".into()))?,
            high: felt_to_u128(high)
                .ok_or_else(|| CoreError::InvalidInput("u256 high half exceeds 2^128".into()))?,
        })
    }

    /// Encode as `(low, high)` felts for calldata.
    pub fn to_felts(&self) -> (FieldElement, FieldElement) {
        (FieldElement::from(self.low), FieldElement::from(self.high))
    }

    /// Parse a base-10 string of arbitrary length (within 2^256).
    pub fn from_dec_str(s: &str) -> Result<Self, CoreError> {
        if s.is_empty() {
            return Err(CoreError::InvalidInput("empty decimal string".into()));
        }
        let mut v = U256::ZERO;
        for c in s.chars() {
            let d = c
                .to_digit(10)
                .ok_or_else(|| CoreError::InvalidInput(format!("invalid decimal digit '{c}'")))?;
            v = v
                .mul_small(10)
                .and_then(|v| v.add_small(d as u64))
                .ok_or_else(|| CoreError::InvalidInput("decimal value exceeds 2^256".into()))?;
        }
        Ok(v)
    }

    /// Render as a base-10 string without leading zeros.
    pub fn to_dec_string(&self) -> String {
        if self.low == 0 && self.high == 0 {
            return "0".to_string();
        }
        let mut limbs = [
            (self.high >> 64) as u64,
            (self.high & LIMB_MASK) as u64,
            (self.low >> 64) as u64,
            (self.low & LIMB_MASK) as u64,
        ];
        let mut digits = Vec::new();
        while limbs.iter().any(|&l| l != 0) {
            let mut rem: u128 = 0;
            for limb in limbs.iter_mut() {
                let acc = (rem << 64) | *limb as u128;
                *limb = (acc / 10) as u64;
                rem = acc % 10;
            }
            digits.push(b'0' + rem as u8);
        }
        digits.reverse();
        String::from_utf8(digits).expect("digits are ascii")
    }

    /// Multiply by a small constant, `None` on 256-bit overflow.
    fn mul_small(&self, m: u64) -> Option<U256> {
        let m = m as u128;
        let lo_lo = (self.low & LIMB_MASK) * m;
        let lo_hi = (self.low >> 64) * m + (lo_lo >> 64);
        let low = (lo_hi << 64) | (lo_lo & LIMB_MASK);
        let carry = lo_hi >> 64;

        let hi_lo = (self.high & LIMB_MASK) * m;
        let hi_hi = (self.high >> 64) * m + (hi_lo >> 64);
        if hi_hi >> 64 != 0 {
            return None;
        }
        let high = ((hi_hi << 64) | (hi_lo & LIMB_MASK)).checked_add(carry)?;
        Some(U256 { low, high })
    }

    /// Add a small constant, `None` on 256-bit overflow.
    fn add_small(&self, a: u64) -> Option<U256> {
        match self.low.checked_add(a as u128) {
            Some(low) => Some(U256 { low, high: self.high }),
            None => {
                let low = self.low.wrapping_add(a as u128);
                let high = self.high.checked_add(1)?;
                Some(U256 { low, high })
            }
        }
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.high, self.low).cmp(&(other.high, other.low))
    }
}

/// Parse a felt from a hex string, `0x`-prefixed or bare.
pub fn parse_felt(s: &str) -> Result<FieldElement, CoreError> {
    FieldElement::from_hex_be(s)
        .map_err(|e| CoreError::InvalidInput(format!("invalid felt '{s}': {e}")))
}

/// Canonical hex rendering: lowercase, `0x`-prefixed, no leading zeros.
pub fn felt_hex(f: &FieldElement) -> String {
    format!("{f:#x}")
}

/// Extract a felt's value as u128; `None` if it does not fit.
pub fn felt_to_u128(f: &FieldElement) -> Option<u128> {
    let bytes = f.to_bytes_be();
    if bytes[..16].iter().any(|&b| b != 0) {
        return None;
    }
    Some(u128::from_be_bytes(bytes[16..32].try_into().expect("16 bytes")))
}

/// Parse a human-entered token amount into base units.
///
/// Rejects scientific notation, empty input, a bare `"."`, and more
/// fractional digits than the token's `decimals`.
pub fn parse_units(text: &str, decimals: u32) -> Result<U256, CoreError> {
    let text = text.trim();
    if text.is_empty() || text == "." {
        return Err(CoreError::InvalidInput("amount is empty".into()));
    }
    if text.chars().any(|c| matches!(c, 'e' | 'E' | '+' | '-')) {
        return Err(CoreError::InvalidInput(
            "scientific notation is not accepted in amounts".into(),
        ));
    }
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, f),
        None => (text, ""),
    };
    if frac_part.contains('.') {
        return Err(CoreError::InvalidInput("amount has multiple decimal points".into()));
    }
    if frac_part.len() as u32 > decimals {
        return Err(CoreError::InvalidInput(format!(
            "amount has more than {decimals} fractional digits"
        )));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(CoreError::InvalidInput(format!("malformed amount '{text}'")));
    }

    let mut v = if int_part.is_empty() {
        U256::ZERO
    } else {
        U256::from_dec_str(int_part)?
    };
    for c in frac_part.chars() {
        v = v
            .mul_small(10)
            .and_then(|v| v.add_small(c.to_digit(10).expect("checked digit") as u64))
            .ok_or_else(|| CoreError::InvalidInput("amount exceeds 2^256".into()))?;
    }
    for _ in 0..(decimals - frac_part.len() as u32) {
        v = v
            .mul_small(10)
            .ok_or_else(|| CoreError::InvalidInput("amount exceeds 2^256".into()))?;
    }
    Ok(v)
}

/// Render base units as a human amount, trimming trailing zeros.
pub fn format_units(v: &U256, decimals: u32) -> String {
    let s = v.to_dec_string();
    if decimals == 0 {
        return s;
    }
    let d = decimals as usize;
    let (int_part, frac_part) = if s.len() > d {
        (s[..s.len() - d].to_string(), s[s.len() - d..].to_string())
    } else {
        ("0".to_string(), format!("{s:0>d$}"))
    };
    let frac_trimmed = frac_part.trim_end_matches('0');
    if frac_trimmed.is_empty() {
        int_part
    } else {
        format!("{int_part}.{frac_trimmed}")
    }
}
