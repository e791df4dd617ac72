//! Conversion between the ledger's base unit (Plank) and the displayed unit
//! (Dot).
//!
//! Both directions are exact, no floating point is involved.

use crate::types::U256;
use core::{fmt, str::FromStr};
use thiserror::Error;

/// Number of decimal places of a Dot, i.e. `1 Dot = 10^DECIMALS Plank`.
pub const DECIMALS: usize = 12;

pub fn plank_per_dot() -> U256 {
    U256::exp10(DECIMALS)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseAmountError {
    #[error("empty amount")]
    Empty,
    #[error("amount must not be negative")]
    Negative,
    #[error("invalid character {0:?} in amount")]
    InvalidDigit(char),
    #[error("more than one decimal point")]
    MultiplePoints,
    #[error("amount too large")]
    Overflow,
}

/// An amount in base units, displayed in Dot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Dot(pub U256);

impl Dot {
    pub fn planks(self) -> U256 {
        self.0
    }

    /// Whole Dots, as used for benchmark amounts.
    pub fn from_whole(dots: u64) -> Result<Self, ParseAmountError> {
        U256::from(dots)
            .checked_mul(plank_per_dot())
            .map(Self)
            .ok_or(ParseAmountError::Overflow)
    }
}

impl fmt::Display for Dot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (whole, frac) = self.0.div_mod(plank_per_dot());
        if frac.is_zero() {
            return write!(f, "{} DOT", whole);
        }
        let frac = format!("{:0>width$}", frac.to_string(), width = DECIMALS);
        write!(f, "{}.{} DOT", whole, frac.trim_end_matches('0'))
    }
}

impl FromStr for Dot {
    type Err = ParseAmountError;

    /// Parses a decimal number of Dots into Planks, rounding digits beyond
    /// the last Plank to nearest, ties to even.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with('-') {
            return Err(ParseAmountError::Negative);
        }
        let (whole, frac) = match s.split_once('.') {
            Some((_, frac)) if frac.contains('.') => return Err(ParseAmountError::MultiplePoints),
            Some((whole, frac)) => (whole, frac),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(ParseAmountError::Empty);
        }
        if let Some(c) = whole.chars().chain(frac.chars()).find(|c| !c.is_ascii_digit()) {
            return Err(ParseAmountError::InvalidDigit(c));
        }

        let whole = if whole.is_empty() {
            U256::zero()
        } else {
            U256::from_dec_str(whole).map_err(|_| ParseAmountError::Overflow)?
        };

        let (kept, rest) = frac.split_at(frac.len().min(DECIMALS));
        let kept = format!("{:0<width$}", kept, width = DECIMALS);
        let mut planks_frac =
            U256::from_dec_str(&kept).map_err(|_| ParseAmountError::Overflow)?;
        if round_up(&kept, rest) {
            planks_frac = planks_frac + 1u64;
        }

        whole
            .checked_mul(plank_per_dot())
            .and_then(|p| p.checked_add(planks_frac))
            .map(Self)
            .ok_or(ParseAmountError::Overflow)
    }
}

/// Round half to even on the dropped digits `rest`.
fn round_up(kept: &str, rest: &str) -> bool {
    let mut digits = rest.bytes();
    match digits.next() {
        None | Some(b'0'..=b'4') => false,
        Some(b'5') => {
            if digits.any(|d| d != b'0') {
                true
            } else {
                let last = kept.bytes().last().unwrap_or(b'0');
                (last - b'0') % 2 == 1
            }
        }
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planks(s: &str) -> U256 {
        s.parse::<Dot>().unwrap().planks()
    }

    #[test]
    fn parse_whole_and_fraction() {
        assert_eq!(planks("0"), U256::zero());
        assert_eq!(planks("10"), U256::from(10u64) * plank_per_dot());
        assert_eq!(planks("1.5"), U256::from(1_500_000_000_000u64));
        assert_eq!(planks(".5"), U256::from(500_000_000_000u64));
        assert_eq!(planks("2."), U256::from(2_000_000_000_000u64));
        assert_eq!(planks("0.000000000001"), U256::one());
    }

    #[test]
    fn parse_rounds_half_to_even() {
        assert_eq!(planks("0.0000000000004"), U256::zero());
        assert_eq!(planks("0.0000000000005"), U256::zero());
        assert_eq!(planks("0.0000000000015"), U256::from(2));
        assert_eq!(planks("0.0000000000025"), U256::from(2));
        assert_eq!(planks("0.00000000000251"), U256::from(3));
        assert_eq!(planks("0.9999999999999"), plank_per_dot());
    }

    #[test]
    fn parse_errors() {
        assert_eq!("abc".parse::<Dot>(), Err(ParseAmountError::InvalidDigit('a')));
        assert_eq!("-1".parse::<Dot>(), Err(ParseAmountError::Negative));
        assert_eq!("".parse::<Dot>(), Err(ParseAmountError::Empty));
        assert_eq!(".".parse::<Dot>(), Err(ParseAmountError::Empty));
        assert_eq!("1.2.3".parse::<Dot>(), Err(ParseAmountError::MultiplePoints));
        assert_eq!("1e5".parse::<Dot>(), Err(ParseAmountError::InvalidDigit('e')));
        assert_eq!(
            "1".repeat(80).parse::<Dot>(),
            Err(ParseAmountError::Overflow)
        );
    }

    #[test]
    fn display() {
        assert_eq!(Dot(U256::zero()).to_string(), "0 DOT");
        assert_eq!(Dot(plank_per_dot() * 10u64).to_string(), "10 DOT");
        assert_eq!(Dot(U256::from(1_500_000_000_000u64)).to_string(), "1.5 DOT");
        assert_eq!(Dot(U256::one()).to_string(), "0.000000000001 DOT");
    }

    #[test]
    fn display_parse_roundtrip_for_cli_range() {
        for s in ["0.25", "7", "123.456789", "0.000000000042"] {
            let dot: Dot = s.parse().unwrap();
            assert_eq!(dot.to_string(), format!("{} DOT", s));
        }
    }

    #[test]
    fn whole_dots() {
        assert_eq!(Dot::from_whole(3).unwrap().planks(), plank_per_dot() * 3u64);
    }
}
