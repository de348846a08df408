use std::cmp::Ordering;
use std::fmt;

use crate::protocol::{
    packet::{DecodeError, EncodeError, RaknetEncodable},
    types::U24LE,
};

const MODULO: u32 = 1 << 24;
const MASK: u32 = MODULO - 1;
const HALF: u32 = MODULO / 2;

/// Wrapping 24-bit counter used for datagram sequence numbers and for the
/// reliable, sequence and ordering indices of fragments.
///
/// Comparison is serial-number arithmetic: `a > b` when `a` lies less than
/// half the number space ahead of `b`, so `0 > 0xFFFFFF`.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
pub struct Sequence24(u32);

impl Sequence24 {
    pub const MAX: Sequence24 = Sequence24(MASK);

    pub const fn new(v: u32) -> Sequence24 {
        Sequence24(v & MASK)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub const fn next(self) -> Sequence24 {
        self.wrapping_add(1)
    }

    pub const fn prev(self) -> Sequence24 {
        Sequence24::new(self.0.wrapping_add(MASK))
    }

    pub const fn wrapping_add(self, n: u32) -> Sequence24 {
        Sequence24::new(self.0.wrapping_add(n))
    }

    /// Steps forward from `self` to reach `newer`.
    pub const fn distance_to(self, newer: Sequence24) -> u32 {
        newer.0.wrapping_sub(self.0) & MASK
    }
}

impl Ord for Sequence24 {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.distance_to(*self) {
            0 => Ordering::Equal,
            d if d < HALF => Ordering::Greater,
            _ => Ordering::Less,
        }
    }
}

impl PartialOrd for Sequence24 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Sequence24 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Sequence24> for U24LE {
    fn from(seq: Sequence24) -> Self {
        U24LE(seq.value())
    }
}

impl RaknetEncodable for Sequence24 {
    fn encode_raknet(&self, dst: &mut impl bytes::BufMut) -> Result<(), EncodeError> {
        U24LE::from(*self).encode_raknet(dst)
    }

    fn decode_raknet(src: &mut impl bytes::Buf) -> Result<Self, DecodeError> {
        Ok(Sequence24::new(U24LE::decode_raknet(src)?.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_and_prev_wrap() {
        assert_eq!(Sequence24::MAX.next().value(), 0);
        assert_eq!(Sequence24::new(0).prev(), Sequence24::MAX);
    }

    #[test]
    fn ordering_handles_wrap() {
        let old = Sequence24::MAX;
        let zero = old.next();
        let one = zero.next();
        assert!(one > zero);
        assert!(zero > old);
        assert!(one > old);
        assert!(old < one);
    }

    #[test]
    fn distance_counts_across_wrap() {
        let a = Sequence24::new(MASK - 1);
        assert_eq!(a.distance_to(Sequence24::new(2)), 4);
        assert_eq!(Sequence24::new(5).distance_to(Sequence24::new(5)), 0);
    }

    #[test]
    fn new_masks_to_24_bits() {
        assert_eq!(Sequence24::new(0x0100_0005).value(), 5);
    }
}
