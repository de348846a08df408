//! Control packet bodies and the encoding traits every wire type shares.

pub mod connected;
mod error;
pub mod open_connection;
mod registry;
pub mod unconnected;

pub use connected::*;
pub use error::{DecodeError, EncodeError};
pub use open_connection::*;
pub use registry::RaknetPacket;
pub use unconnected::*;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A RakNet packet body with a fixed ID byte.
///
/// Implementations encode/decode only the body; the ID is handled by
/// [`RaknetPacket`] and [`Packet::to_bytes`].
pub trait Packet: Sized {
    const ID: u8;

    fn encode_body(&self, dst: &mut impl BufMut) -> Result<(), EncodeError>;

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError>;

    /// ID byte followed by the body.
    fn to_bytes(&self) -> Result<Bytes, EncodeError> {
        let mut buf = BytesMut::new();
        buf.put_u8(Self::ID);
        self.encode_body(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// Values that know their RakNet wire representation.
pub trait RaknetEncodable: Sized {
    fn encode_raknet(&self, dst: &mut impl BufMut) -> Result<(), EncodeError>;

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError>;
}
