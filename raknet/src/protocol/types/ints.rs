use bytes::{Buf, BufMut};
use std::mem;

use crate::protocol::packet::{DecodeError, EncodeError, RaknetEncodable};

/// Implements big-endian `RaknetEncodable` for a primitive integer.
macro_rules! impl_raknet_int {
    ($($ty:ty => $put:ident, $get:ident;)+) => {
        $(
            impl RaknetEncodable for $ty {
                fn encode_raknet(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
                    dst.$put(*self);
                    Ok(())
                }

                fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
                    if src.remaining() < mem::size_of::<$ty>() {
                        return Err(DecodeError::UnexpectedEof);
                    }
                    Ok(src.$get())
                }
            }
        )+
    };
}

impl_raknet_int! {
    u16 => put_u16, get_u16;
    u32 => put_u32, get_u32;
    u64 => put_u64, get_u64;
    i64 => put_i64, get_i64;
}

/// Little-endian `u16`, used by the IPv6 address family field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U16LE(pub u16);

impl RaknetEncodable for U16LE {
    fn encode_raknet(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        dst.put_u16_le(self.0);
        Ok(())
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if src.remaining() < 2 {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(U16LE(src.get_u16_le()))
    }
}

/// Three-byte little-endian unsigned integer. Every index in a fragment
/// header and every ACK/NACK bound uses this format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U24LE(pub u32);

impl RaknetEncodable for U24LE {
    fn encode_raknet(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        dst.put_slice(&self.0.to_le_bytes()[..3]);
        Ok(())
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        if src.remaining() < 3 {
            return Err(DecodeError::UnexpectedEof);
        }
        let mut raw = [0u8; 4];
        src.copy_to_slice(&mut raw[..3]);
        Ok(U24LE(u32::from_le_bytes(raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn u24le_writes_low_byte_first() {
        let mut buf = BytesMut::new();
        U24LE(0x0A0B0C).encode_raknet(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), [0x0C, 0x0B, 0x0A]);
    }

    #[test]
    fn u24le_drops_high_byte() {
        let mut buf = BytesMut::new();
        U24LE(0xFF12_3456).encode_raknet(&mut buf).unwrap();
        let decoded = U24LE::decode_raknet(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, U24LE(0x12_3456));
    }

    #[test]
    fn short_input_is_eof() {
        let mut src: &[u8] = &[0x01, 0x02];
        assert!(matches!(
            U24LE::decode_raknet(&mut src),
            Err(DecodeError::UnexpectedEof)
        ));
        let mut src: &[u8] = &[0x01];
        assert!(matches!(
            u16::decode_raknet(&mut src),
            Err(DecodeError::UnexpectedEof)
        ));
    }

    #[test]
    fn u16le_is_little_endian() {
        let mut buf = BytesMut::new();
        U16LE(23).encode_raknet(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), [23, 0]);
    }
}
