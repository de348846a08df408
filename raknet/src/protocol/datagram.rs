use bytes::{Buf, BufMut, Bytes};

use crate::protocol::{
    ack::AckNackPayload,
    constants::{DatagramFlags, RAKNET_DATAGRAM_HEADER_SIZE},
    encapsulated_packet::{BASE_HEADER_SIZE, EncapsulatedPacket, TrailingData},
    packet::{DecodeError, EncodeError, RaknetEncodable},
    types::{DatagramHeader, Sequence24},
};

/// Body of an online datagram, selected by the header flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatagramPayload {
    /// `0x80..=0x8F`: sequence number plus fragments.
    Packets(Vec<EncapsulatedPacket>),
    /// `0xC0`
    Ack(AckNackPayload),
    /// `0xA0`
    Nack(AckNackPayload),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub header: DatagramHeader,
    pub payload: DatagramPayload,
}

impl Datagram {
    pub fn ack(payload: AckNackPayload) -> Self {
        Self {
            header: DatagramHeader {
                flags: DatagramFlags::VALID | DatagramFlags::ACK,
                sequence: Sequence24::default(),
            },
            payload: DatagramPayload::Ack(payload),
        }
    }

    pub fn nack(payload: AckNackPayload) -> Self {
        Self {
            header: DatagramHeader {
                flags: DatagramFlags::VALID | DatagramFlags::NACK,
                sequence: Sequence24::default(),
            },
            payload: DatagramPayload::Nack(payload),
        }
    }

    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        match &self.payload {
            DatagramPayload::Packets(packets) => {
                self.header.encode_raknet(dst)?;
                for pkt in packets {
                    pkt.encode_raknet(dst)?;
                }
            }
            DatagramPayload::Ack(payload) | DatagramPayload::Nack(payload) => {
                dst.put_u8(self.header.flags.bits());
                payload.encode_raknet(dst)?;
            }
        }
        Ok(())
    }

    /// Decodes a whole datagram. A malformed fragment fails the datagram
    /// because the cursor of its siblings is lost with it.
    pub fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        Self::decode_with_trailing(src).map(|(datagram, _)| datagram)
    }

    /// Like [`Datagram::decode`], but tolerates a tail too short to hold a
    /// fragment header. The tail is skipped and reported.
    pub fn decode_with_trailing(
        src: &mut Bytes,
    ) -> Result<(Self, Option<TrailingData>), DecodeError> {
        let raw_flags = u8::decode_raknet(src)?;
        let flags = DatagramFlags::from_bits_truncate(raw_flags);

        if flags.contains(DatagramFlags::ACK) {
            return Ok((Self::ack(AckNackPayload::decode_raknet(src)?), None));
        }
        if flags.contains(DatagramFlags::NACK) {
            return Ok((Self::nack(AckNackPayload::decode_raknet(src)?), None));
        }

        let sequence = Sequence24::decode_raknet(src)?;
        let mut packets = Vec::new();
        let mut trailing = None;
        while src.has_remaining() {
            if !packets.is_empty() && src.remaining() < BASE_HEADER_SIZE {
                trailing = Some(TrailingData {
                    len: src.remaining(),
                });
                src.advance(src.remaining());
                break;
            }
            packets.push(EncapsulatedPacket::decode_raknet(src)?);
        }
        if packets.is_empty() {
            return Err(DecodeError::EmptyDatagram);
        }
        Ok((
            Self {
                header: DatagramHeader { flags, sequence },
                payload: DatagramPayload::Packets(packets),
            },
            trailing,
        ))
    }

    pub fn size(&self) -> usize {
        match &self.payload {
            DatagramPayload::Packets(packets) => {
                RAKNET_DATAGRAM_HEADER_SIZE + packets.iter().map(EncapsulatedPacket::size).sum::<usize>()
            }
            DatagramPayload::Ack(payload) | DatagramPayload::Nack(payload) => 1 + payload.size(),
        }
    }
}
