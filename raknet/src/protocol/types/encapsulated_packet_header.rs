use bytes::{Buf, BufMut};

use crate::protocol::{
    constants::{FRAME_FLAG_NEEDS_BAS, FRAME_FLAG_SPLIT},
    packet::{DecodeError, EncodeError, RaknetEncodable},
    reliability::Reliability,
};

/// First byte of an encapsulated fragment.
///
/// ```text
/// bits 7..5  reliability ordinal
/// bit  4     split flag
/// bit  2     needs B&AS (read and ignored)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncapsulatedPacketHeader {
    pub reliability: Reliability,
    pub is_split: bool,
}

impl EncapsulatedPacketHeader {
    pub fn new(reliability: Reliability, is_split: bool) -> Self {
        Self {
            reliability,
            is_split,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        let split = if self.is_split { FRAME_FLAG_SPLIT } else { 0 };
        ((self.reliability as u8) << 5) | split
    }

    #[inline]
    pub fn from_byte(b: u8) -> Result<Self, DecodeError> {
        let _needs_bas = b & FRAME_FLAG_NEEDS_BAS != 0;
        Ok(Self {
            reliability: Reliability::try_from(b >> 5)?,
            is_split: b & FRAME_FLAG_SPLIT != 0,
        })
    }
}

impl RaknetEncodable for EncapsulatedPacketHeader {
    fn encode_raknet(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        dst.put_u8(self.to_byte());
        Ok(())
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Self::from_byte(u8::decode_raknet(src)?)
    }
}
