//! Wire layout of one encapsulated fragment.
//!
//! ```text
//! u8      flags        reliability << 5 | 0x10 if split
//! u16 BE  bit length   content bytes << 3
//! u24 LE  reliable index                  (reliable kinds)
//! u24 LE  sequence index                  (sequenced kinds)
//! u24 LE  ordering index, u8 channel      (ordered or sequenced kinds)
//! u32 BE  part count, u16 BE part id, u32 BE part index   (split only)
//! ...     content
//! ```

use bytes::{Buf, BufMut, Bytes};

use crate::protocol::{
    packet::{DecodeError, EncodeError, RaknetEncodable},
    reliability::Reliability,
    state::Priority,
    types::{EncapsulatedPacketHeader, Sequence24},
};

/// Flags byte plus bit length.
pub const BASE_HEADER_SIZE: usize = 3;
pub const SPLIT_INFO_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct SplitInfo {
    pub count: u32,
    pub id: u16,
    pub index: u32,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EncapsulatedPacket {
    pub reliability: Reliability,
    /// Not transmitted; decoded fragments report `Medium`.
    pub priority: Priority,
    pub reliable_index: Option<Sequence24>,
    pub sequence_index: Option<Sequence24>,
    pub ordering_index: Option<Sequence24>,
    pub ordering_channel: Option<u8>,
    pub split: Option<SplitInfo>,
    pub payload: Bytes,
}

/// Bytes left in the buffer after a fragment was fully decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailingData {
    pub len: usize,
}

impl EncapsulatedPacket {
    /// A fragment with no indices assigned yet.
    pub fn new(reliability: Reliability, priority: Priority, payload: Bytes) -> Self {
        Self {
            reliability,
            priority,
            reliable_index: None,
            sequence_index: None,
            ordering_index: None,
            ordering_channel: None,
            split: None,
            payload,
        }
    }

    pub fn header(&self) -> EncapsulatedPacketHeader {
        EncapsulatedPacketHeader::new(self.reliability, self.split.is_some())
    }

    pub fn is_split(&self) -> bool {
        self.split.is_some()
    }

    /// Header bytes for a fragment of this kind, without content.
    pub fn header_size(reliability: Reliability, is_split: bool) -> usize {
        let split = if is_split { SPLIT_INFO_SIZE } else { 0 };
        BASE_HEADER_SIZE + reliability.index_bytes() + split
    }

    /// Total on-wire size.
    pub fn size(&self) -> usize {
        Self::header_size(self.reliability, self.is_split()) + self.payload.len()
    }

    /// Decodes exactly one fragment and reports any bytes left behind.
    pub fn decode_single(mut src: Bytes) -> Result<(Self, Option<TrailingData>), DecodeError> {
        let packet = Self::decode_raknet(&mut src)?;
        let trailing = (!src.is_empty()).then(|| TrailingData { len: src.len() });
        Ok((packet, trailing))
    }
}

impl RaknetEncodable for EncapsulatedPacket {
    fn encode_raknet(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        let bit_length = self
            .payload
            .len()
            .checked_mul(8)
            .and_then(|bits| u16::try_from(bits).ok())
            .ok_or(EncodeError::PayloadTooLong(self.payload.len()))?;

        self.header().encode_raknet(dst)?;
        bit_length.encode_raknet(dst)?;

        let rel = self.reliability;
        if rel.is_reliable() {
            self.reliable_index
                .ok_or(EncodeError::MissingReliableIndex)?
                .encode_raknet(dst)?;
        }
        if rel.is_sequenced() {
            self.sequence_index
                .ok_or(EncodeError::MissingSequenceIndex)?
                .encode_raknet(dst)?;
        }
        if rel.uses_ordering_channel() {
            self.ordering_index
                .ok_or(EncodeError::MissingOrderingIndex)?
                .encode_raknet(dst)?;
            self.ordering_channel
                .ok_or(EncodeError::MissingOrderingChannel)?
                .encode_raknet(dst)?;
        }
        if let Some(split) = &self.split {
            split.count.encode_raknet(dst)?;
            split.id.encode_raknet(dst)?;
            split.index.encode_raknet(dst)?;
        }

        dst.put_slice(&self.payload);
        Ok(())
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let header = EncapsulatedPacketHeader::decode_raknet(src)?;
        let bit_length = u16::decode_raknet(src)?;
        let declared = (bit_length as usize + 7) >> 3;

        let rel = header.reliability;
        let reliable_index = if rel.is_reliable() {
            Some(Sequence24::decode_raknet(src)?)
        } else {
            None
        };
        let sequence_index = if rel.is_sequenced() {
            Some(Sequence24::decode_raknet(src)?)
        } else {
            None
        };
        let (ordering_index, ordering_channel) = if rel.uses_ordering_channel() {
            (
                Some(Sequence24::decode_raknet(src)?),
                Some(u8::decode_raknet(src)?),
            )
        } else {
            (None, None)
        };
        let split = if header.is_split {
            Some(SplitInfo {
                count: u32::decode_raknet(src)?,
                id: u16::decode_raknet(src)?,
                index: u32::decode_raknet(src)?,
            })
        } else {
            None
        };

        if src.remaining() < declared {
            return Err(DecodeError::MalformedFragment {
                declared,
                remaining: src.remaining(),
            });
        }
        let payload = src.copy_to_bytes(declared);

        Ok(EncapsulatedPacket {
            reliability: rel,
            priority: Priority::Medium,
            reliable_index,
            sequence_index,
            ordering_index,
            ordering_channel,
            split,
            payload,
        })
    }
}
