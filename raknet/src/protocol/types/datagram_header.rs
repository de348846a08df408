use bytes::{Buf, BufMut};

use crate::protocol::{
    constants::{DatagramFlags, RAKNET_DATAGRAM_HEADER_SIZE},
    packet::{DecodeError, EncodeError, RaknetEncodable},
    types::Sequence24,
};

/// Flags byte plus sequence number that open every data datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    pub flags: DatagramFlags,
    pub sequence: Sequence24,
}

impl DatagramHeader {
    pub fn data(flags: DatagramFlags, sequence: Sequence24) -> Self {
        Self {
            flags: flags | DatagramFlags::VALID,
            sequence,
        }
    }
}

impl RaknetEncodable for DatagramHeader {
    fn encode_raknet(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        dst.put_u8(self.flags.bits());
        self.sequence.encode_raknet(dst)
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if src.remaining() < RAKNET_DATAGRAM_HEADER_SIZE {
            return Err(DecodeError::UnexpectedEof);
        }
        let flags = DatagramFlags::from_bits_truncate(src.get_u8());
        let sequence = Sequence24::decode_raknet(src)?;
        Ok(DatagramHeader { flags, sequence })
    }
}
