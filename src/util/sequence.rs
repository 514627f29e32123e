use std::fmt::{Display, Formatter};

/// Packet sequence number: 15 bits with wrap-around semantics. Comparisons must always go
///  through [SequenceNumber::distance] - raw numeric comparison is meaningless across the wrap.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct SequenceNumber(u16);

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SequenceNumber {
    pub const BITS: u32 = 15;
    /// number of unused high bits when a sequence number is stored in a u16
    pub const PADDING: u32 = 16 - Self::BITS;
    pub const MASK: u16 = (1 << Self::BITS) - 1;
    pub const HALF_RANGE: u16 = 1 << (Self::BITS - 1);

    pub const ZERO: SequenceNumber = SequenceNumber(0);

    /// bits outside the sequence number range are discarded
    pub fn from_raw(value: u16) -> SequenceNumber {
        SequenceNumber(value & Self::MASK)
    }

    pub fn to_raw(self) -> u16 {
        self.0
    }

    pub fn next(self) -> SequenceNumber {
        SequenceNumber(self.0.wrapping_add(1) & Self::MASK)
    }

    pub fn prev(self) -> SequenceNumber {
        SequenceNumber(self.0.wrapping_sub(1) & Self::MASK)
    }

    /// Signed circular distance `self - other`: positive if `self` is 'after' `other`. The result
    ///  is in the range `-HALF_RANGE .. HALF_RANGE`.
    ///
    /// Both values are shifted to the top of a u16 so the subtraction wraps at the sequence
    ///  number modulus, and the sign bit of the i16 is the sign of the distance.
    pub fn distance(self, other: SequenceNumber) -> i32 {
        let a = self.0 << Self::PADDING;
        let b = other.0 << Self::PADDING;
        (a.wrapping_sub(b) as i16 >> Self::PADDING) as i32
    }
}
