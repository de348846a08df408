//! Offline discovery: unconnected pings and the pong reply.

use bytes::{Buf, BufMut, Bytes};

use crate::protocol::{
    constants::DEFAULT_UNCONNECTED_MAGIC,
    packet::{DecodeError, EncodeError, Packet, RaknetEncodable},
    types::{Magic, RaknetTime},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconnectedPing {
    pub ping_time: RaknetTime,
    pub client_guid: u64,
}

fn encode_ping(ping: &UnconnectedPing, dst: &mut impl BufMut) -> Result<(), EncodeError> {
    ping.ping_time.encode_raknet(dst)?;
    DEFAULT_UNCONNECTED_MAGIC.encode_raknet(dst)?;
    ping.client_guid.encode_raknet(dst)
}

fn decode_ping(src: &mut impl Buf) -> Result<UnconnectedPing, DecodeError> {
    let ping_time = RaknetTime::decode_raknet(src)?;
    Magic::decode_raknet(src)?;
    // Some clients omit the GUID.
    let client_guid = if src.remaining() >= 8 {
        u64::decode_raknet(src)?
    } else {
        0
    };
    Ok(UnconnectedPing {
        ping_time,
        client_guid,
    })
}

impl Packet for UnconnectedPing {
    const ID: u8 = 0x01;

    fn encode_body(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        encode_ping(self, dst)
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        decode_ping(src)
    }
}

/// Same body as [`UnconnectedPing`]; only answered while the server has
/// free slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconnectedPingOpenConnections(pub UnconnectedPing);

impl Packet for UnconnectedPingOpenConnections {
    const ID: u8 = 0x02;

    fn encode_body(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        encode_ping(&self.0, dst)
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        decode_ping(src).map(Self)
    }
}

/// Discovery reply. `data` is produced by the server's ping hook and is
/// written with a u16 length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconnectedPong {
    pub ping_time: RaknetTime,
    pub server_guid: u64,
    pub data: Bytes,
}

impl Packet for UnconnectedPong {
    const ID: u8 = 0x1c;

    fn encode_body(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        let len = u16::try_from(self.data.len())
            .map_err(|_| EncodeError::PayloadTooLong(self.data.len()))?;
        self.ping_time.encode_raknet(dst)?;
        self.server_guid.encode_raknet(dst)?;
        DEFAULT_UNCONNECTED_MAGIC.encode_raknet(dst)?;
        len.encode_raknet(dst)?;
        dst.put_slice(&self.data);
        Ok(())
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let ping_time = RaknetTime::decode_raknet(src)?;
        let server_guid = u64::decode_raknet(src)?;
        Magic::decode_raknet(src)?;
        let len = u16::decode_raknet(src)? as usize;
        if src.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(Self {
            ping_time,
            server_guid,
            data: src.copy_to_bytes(len),
        })
    }
}
