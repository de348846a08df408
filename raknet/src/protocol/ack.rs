//! Range-compressed ACK/NACK payload.
//!
//! ```text
//! u16 BE  record count
//! per record:
//!   bool    singleton
//!   u24 LE  start
//!   u24 LE  end        (absent when singleton)
//! ```

use bytes::{Buf, BufMut};

use crate::protocol::{
    constants::MAX_ACK_SEQUENCES,
    packet::{DecodeError, EncodeError, RaknetEncodable},
    types::Sequence24,
};

/// Inclusive range of datagram sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRange {
    pub start: Sequence24,
    pub end: Sequence24,
}

impl SequenceRange {
    pub fn single(seq: Sequence24) -> Self {
        Self {
            start: seq,
            end: seq,
        }
    }

    pub fn new(start: Sequence24, end: Sequence24) -> Self {
        Self { start, end }
    }

    pub fn is_singleton(&self) -> bool {
        self.start == self.end
    }

    /// Encoded record size when the range does not wrap.
    pub fn size(&self) -> usize {
        if self.is_singleton() { 4 } else { 7 }
    }

    /// Numerically descending bounds mean the range crosses 0xFFFFFF.
    pub fn wraps(&self) -> bool {
        self.start.value() > self.end.value()
    }

    pub fn split_wrapping(&self) -> Option<(SequenceRange, SequenceRange)> {
        if !self.wraps() {
            return None;
        }
        Some((
            SequenceRange::new(self.start, Sequence24::MAX),
            SequenceRange::new(Sequence24::new(0), self.end),
        ))
    }

    pub fn record_count(&self) -> usize {
        if self.wraps() { 2 } else { 1 }
    }

    pub fn encoded_size(&self) -> usize {
        match self.split_wrapping() {
            Some((tail, head)) => tail.size() + head.size(),
            None => self.size(),
        }
    }

    /// Number of sequence numbers covered.
    pub fn count(&self) -> u32 {
        self.start.distance_to(self.end) + 1
    }

    pub fn contains(&self, seq: Sequence24) -> bool {
        self.start.distance_to(seq) <= self.start.distance_to(self.end)
    }

    pub fn iter(&self) -> impl Iterator<Item = Sequence24> + use<> {
        let start = self.start;
        (0..self.count()).map(move |i| start.wrapping_add(i))
    }
}

impl RaknetEncodable for SequenceRange {
    fn encode_raknet(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        let singleton = self.is_singleton();
        singleton.encode_raknet(dst)?;
        self.start.encode_raknet(dst)?;
        if !singleton {
            self.end.encode_raknet(dst)?;
        }
        Ok(())
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let singleton = bool::decode_raknet(src)?;
        let start = Sequence24::decode_raknet(src)?;
        if singleton {
            return Ok(SequenceRange::single(start));
        }
        let end = Sequence24::decode_raknet(src)?;
        if end.value() < start.value() {
            return Err(DecodeError::InvalidAckPacket);
        }
        Ok(SequenceRange::new(start, end))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckNackPayload {
    pub ranges: Vec<SequenceRange>,
}

impl AckNackPayload {
    pub fn size(&self) -> usize {
        2 + self.ranges.iter().map(SequenceRange::encoded_size).sum::<usize>()
    }

    pub fn sequences(&self) -> impl Iterator<Item = Sequence24> + '_ {
        self.ranges.iter().flat_map(SequenceRange::iter)
    }
}

impl RaknetEncodable for AckNackPayload {
    fn encode_raknet(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        let records: usize = self.ranges.iter().map(SequenceRange::record_count).sum();
        dst.put_u16(records as u16);
        for range in &self.ranges {
            match range.split_wrapping() {
                Some((tail, head)) => {
                    tail.encode_raknet(dst)?;
                    head.encode_raknet(dst)?;
                }
                None => range.encode_raknet(dst)?,
            }
        }
        Ok(())
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let records = u16::decode_raknet(src)?;
        if records > MAX_ACK_SEQUENCES {
            return Err(DecodeError::InvalidAckPacket);
        }
        let ranges = (0..records)
            .map(|_| SequenceRange::decode_raknet(src))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { ranges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn range(start: u32, end: u32) -> SequenceRange {
        SequenceRange::new(Sequence24::new(start), Sequence24::new(end))
    }

    #[test]
    fn encodes_expected_layout() {
        let payload = AckNackPayload {
            ranges: vec![range(1, 1), range(5, 8)],
        };

        let mut buf = BytesMut::new();
        payload.encode_raknet(&mut buf).unwrap();

        let expected = [
            0x00, 0x02, // record count
            0x01, 0x01, 0x00, 0x00, // single 1
            0x00, 0x05, 0x00, 0x00, 0x08, 0x00, 0x00, // 5..=8
        ];
        assert_eq!(buf.as_ref(), expected);
        assert_eq!(payload.size(), expected.len());
    }

    #[test]
    fn wrapping_range_is_written_as_two_records() {
        let payload = AckNackPayload {
            ranges: vec![range(0x00FF_FFFE, 2)],
        };
        assert_eq!(payload.size(), 16);

        let mut buf = BytesMut::new();
        payload.encode_raknet(&mut buf).unwrap();
        let expected = [
            0x00, 0x02, //
            0x00, 0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, //
            0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00,
        ];
        assert_eq!(buf.as_ref(), expected);
    }

    #[test]
    fn decode_rejects_oversized_record_count() {
        let mut src: &[u8] = &[0x20, 0x01];
        assert_eq!(
            AckNackPayload::decode_raknet(&mut src),
            Err(DecodeError::InvalidAckPacket)
        );
    }

    #[test]
    fn decode_rejects_descending_record() {
        let mut src: &[u8] = &[0x00, 0x01, 0x00, 0x09, 0x00, 0x00, 0x02, 0x00, 0x00];
        assert_eq!(
            AckNackPayload::decode_raknet(&mut src),
            Err(DecodeError::InvalidAckPacket)
        );
    }

    #[test]
    fn sequences_expand_ranges() {
        let payload = AckNackPayload {
            ranges: vec![range(3, 5), range(0x00FF_FFFF, 0)],
        };
        let seqs: Vec<u32> = payload.sequences().map(Sequence24::value).collect();
        assert_eq!(seqs, vec![3, 4, 5, 0x00FF_FFFF, 0]);
    }
}
