//! Native coin amounts in the smallest on-chain unit.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Amount in wei (10^-18 of the native coin).
///
/// Kept as an integer end to end so that values are never rounded through a
/// float on their way from the explorer payload to the alert record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Wei(pub u128);

impl Wei {
    /// Number of decimal places of the display unit.
    pub const DECIMALS: u32 = 18;
    /// Scale factor: 10^18.
    pub const SCALE: u128 = 1_000_000_000_000_000_000;

    /// Parse a base-10 integer string as returned by explorer APIs.
    pub fn from_base_units(raw: &str) -> Result<Self, CoreError> {
        let raw = raw.trim();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CoreError::InvalidAmount(raw.to_string()));
        }
        raw.parse::<u128>()
            .map(Self)
            .map_err(|_| CoreError::InvalidAmount(raw.to_string()))
    }

    /// Parse a display-unit decimal such as `"1.5"` back into wei.
    pub fn from_display(value: &str) -> Result<Self, CoreError> {
        let value = value.trim();
        let invalid = || CoreError::InvalidAmount(value.to_string());

        let (whole, frac) = match value.split_once('.') {
            Some((w, f)) => (w, f),
            None => (value, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.len() > Self::DECIMALS as usize
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac_units: u128 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = Self::DECIMALS as usize);
            padded.parse().map_err(|_| invalid())?
        };

        whole
            .checked_mul(Self::SCALE)
            .and_then(|w| w.checked_add(frac_units))
            .map(Self)
            .ok_or_else(invalid)
    }

    /// Whole-coin part.
    pub fn whole(self) -> u128 {
        self.0 / Self::SCALE
    }

    /// Fractional part in wei.
    pub fn fraction(self) -> u128 {
        self.0 % Self::SCALE
    }

    /// Exact decimal string in the display unit, trailing zeros trimmed.
    pub fn to_display(self) -> String {
        let fraction = self.fraction();
        if fraction == 0 {
            return self.whole().to_string();
        }
        let digits = format!("{:0>width$}", fraction, width = Self::DECIMALS as usize);
        format!("{}.{}", self.whole(), digits.trim_end_matches('0'))
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display())
    }
}
