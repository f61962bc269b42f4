//! Fixed-width binary view of QC values.
//!
//! Rule tables address bits by their position in the MSB-first digit string (position 0 is
//! the most significant bit), so `BitString` keeps the integer and translates positions into
//! shifts instead of materialising a string for every pixel.

use crate::types::{QcError, QcResult, QcValue};

/// Widest value the decoder handles
pub const MAX_BITS: u32 = 64;

/// Number of binary digits needed to write `value` (at least one, `0` is written as "0")
pub fn bit_length(value: u64) -> u32 {
    (u64::BITS - value.leading_zeros()).max(1)
}

/// Left-padded binary representation of a QC value with a fixed width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitString {
    value: u64,
    width: u32,
}

impl BitString {
    /// Decode `value` into exactly `width` digits.
    ///
    /// Fails when the value is negative or its binary form is longer than `width`.
    pub fn decode(value: QcValue, width: u32) -> QcResult<Self> {
        if width == 0 || width > MAX_BITS {
            return Err(QcError::Configuration(format!(
                "Bit width must be between 1 and {}, got {}",
                MAX_BITS, width
            )));
        }
        if value < 0 || bit_length(value as u64) > width {
            return Err(QcError::BitWidth { value, width });
        }
        Ok(Self {
            value: value as u64,
            width,
        })
    }

    /// Build from a value already checked against `width`
    pub(crate) fn from_checked(value: QcValue, width: u32) -> Self {
        debug_assert!(value >= 0 && bit_length(value as u64) <= width);
        Self {
            value: value as u64,
            width,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    /// Integer formed by the digits in positions `[start, end)`
    pub fn slice(&self, start: usize, end: usize) -> u64 {
        debug_assert!(start < end && end <= self.width as usize);
        let len = (end - start) as u32;
        let mask = if len >= u64::BITS { u64::MAX } else { (1u64 << len) - 1 };
        (self.value >> (self.width - end as u32)) & mask
    }

    /// Digit at `position`
    pub fn bit(&self, position: usize) -> bool {
        self.slice(position, position + 1) == 1
    }
}

impl std::fmt::Display for BitString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:0width$b}", self.value, width = self.width as usize)
    }
}
