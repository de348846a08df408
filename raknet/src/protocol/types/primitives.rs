use bytes::{Buf, BufMut};

use crate::protocol::constants::DEFAULT_UNCONNECTED_MAGIC;
use crate::protocol::packet::{DecodeError, EncodeError, RaknetEncodable};
use crate::protocol::types::Magic;

impl RaknetEncodable for u8 {
    fn encode_raknet(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        dst.put_u8(*self);
        Ok(())
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if !src.has_remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(src.get_u8())
    }
}

impl RaknetEncodable for bool {
    fn encode_raknet(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        dst.put_u8(u8::from(*self));
        Ok(())
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(u8::decode_raknet(src)? == 1)
    }
}

/// Decoding a `Magic` rejects anything but the unconnected constant, so
/// every handshake body that starts with one gets the check for free.
impl RaknetEncodable for Magic {
    fn encode_raknet(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        dst.put_slice(self);
        Ok(())
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if src.remaining() < DEFAULT_UNCONNECTED_MAGIC.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let mut magic = [0u8; 16];
        src.copy_to_slice(&mut magic);
        if magic != DEFAULT_UNCONNECTED_MAGIC {
            return Err(DecodeError::InvalidMagic);
        }
        Ok(magic)
    }
}
