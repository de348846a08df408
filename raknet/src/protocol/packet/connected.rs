//! Control packets carried inside encapsulated fragments once the
//! offline handshake has completed.

use std::net::SocketAddr;

use bytes::{Buf, BufMut};

use crate::protocol::{
    constants::SYSTEM_ADDRESSES,
    packet::{DecodeError, EncodeError, Packet, RaknetEncodable},
    state::DisconnectReason,
    types::RaknetTime,
};

/// Size of the two trailing timestamps on the connection packets.
const TIMESTAMPS_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedPing {
    pub ping_time: RaknetTime,
}

impl Packet for ConnectedPing {
    const ID: u8 = 0x00;

    fn encode_body(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        self.ping_time.encode_raknet(dst)
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            ping_time: RaknetTime::decode_raknet(src)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedPong {
    pub ping_time: RaknetTime,
    pub pong_time: RaknetTime,
}

impl Packet for ConnectedPong {
    const ID: u8 = 0x03;

    fn encode_body(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        self.ping_time.encode_raknet(dst)?;
        self.pong_time.encode_raknet(dst)
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            ping_time: RaknetTime::decode_raknet(src)?,
            pong_time: RaknetTime::decode_raknet(src)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub client_guid: u64,
    pub timestamp: RaknetTime,
    pub secure: bool,
}

impl Packet for ConnectionRequest {
    const ID: u8 = 0x09;

    fn encode_body(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        self.client_guid.encode_raknet(dst)?;
        self.timestamp.encode_raknet(dst)?;
        self.secure.encode_raknet(dst)
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            client_guid: u64::decode_raknet(src)?,
            timestamp: RaknetTime::decode_raknet(src)?,
            secure: if src.has_remaining() {
                bool::decode_raknet(src)?
            } else {
                false
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequestAccepted {
    pub client_addr: SocketAddr,
    pub system_index: u16,
    pub request_timestamp: RaknetTime,
    pub accepted_timestamp: RaknetTime,
}

impl Packet for ConnectionRequestAccepted {
    const ID: u8 = 0x10;

    fn encode_body(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        self.client_addr.encode_raknet(dst)?;
        self.system_index.encode_raknet(dst)?;
        for addr in &SYSTEM_ADDRESSES {
            addr.encode_raknet(dst)?;
        }
        self.request_timestamp.encode_raknet(dst)?;
        self.accepted_timestamp.encode_raknet(dst)
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let client_addr = SocketAddr::decode_raknet(src)?;
        let system_index = u16::decode_raknet(src)?;
        skip_system_addresses(src)?;
        Ok(Self {
            client_addr,
            system_index,
            request_timestamp: RaknetTime::decode_raknet(src)?,
            accepted_timestamp: RaknetTime::decode_raknet(src)?,
        })
    }
}

/// Client confirmation that moves the session to `Connected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIncomingConnection {
    pub server_addr: SocketAddr,
    pub request_timestamp: RaknetTime,
    pub accepted_timestamp: RaknetTime,
}

impl Packet for NewIncomingConnection {
    const ID: u8 = 0x13;

    fn encode_body(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        self.server_addr.encode_raknet(dst)?;
        for addr in &SYSTEM_ADDRESSES {
            addr.encode_raknet(dst)?;
        }
        self.request_timestamp.encode_raknet(dst)?;
        self.accepted_timestamp.encode_raknet(dst)
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let server_addr = SocketAddr::decode_raknet(src)?;
        skip_system_addresses(src)?;
        Ok(Self {
            server_addr,
            request_timestamp: RaknetTime::decode_raknet(src)?,
            accepted_timestamp: RaknetTime::decode_raknet(src)?,
        })
    }
}

/// Peers disagree on the list length (10 or 20), so read addresses until
/// only the timestamps remain.
fn skip_system_addresses(src: &mut impl Buf) -> Result<(), DecodeError> {
    while src.remaining() > TIMESTAMPS_SIZE {
        SocketAddr::decode_raknet(src)?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectionNotification {
    pub reason: DisconnectReason,
}

impl Packet for DisconnectionNotification {
    const ID: u8 = 0x15;

    fn encode_body(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        self.reason.encode_raknet(dst)
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        // The reason byte is optional on the wire.
        let reason = if src.has_remaining() {
            DisconnectReason::decode_raknet(src)?
        } else {
            DisconnectReason::ClosedByRemotePeer
        };
        Ok(Self { reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn accepted_carries_ten_system_addresses() -> Result<(), DecodeError> {
        let pkt = ConnectionRequestAccepted {
            client_addr: "192.168.1.2:5000".parse().unwrap(),
            system_index: 0,
            request_timestamp: RaknetTime(10),
            accepted_timestamp: RaknetTime(20),
        };
        let mut buf = BytesMut::new();
        pkt.encode_body(&mut buf).unwrap();
        assert_eq!(buf.len(), 7 + 2 + 10 * 7 + 16);
        assert_eq!(ConnectionRequestAccepted::decode_body(&mut buf.freeze())?, pkt);
        Ok(())
    }

    #[test]
    fn new_incoming_connection_accepts_twenty_addresses() -> Result<(), DecodeError> {
        let server: SocketAddr = "10.1.1.1:19132".parse().unwrap();
        let mut buf = BytesMut::new();
        server.encode_raknet(&mut buf).unwrap();
        for _ in 0..20 {
            SYSTEM_ADDRESSES[1].encode_raknet(&mut buf).unwrap();
        }
        RaknetTime(1).encode_raknet(&mut buf).unwrap();
        RaknetTime(2).encode_raknet(&mut buf).unwrap();

        let pkt = NewIncomingConnection::decode_body(&mut buf.freeze())?;
        assert_eq!(pkt.server_addr, server);
        assert_eq!(pkt.request_timestamp, RaknetTime(1));
        assert_eq!(pkt.accepted_timestamp, RaknetTime(2));
        Ok(())
    }

    #[test]
    fn empty_disconnect_defaults_to_remote_close() -> Result<(), DecodeError> {
        let mut src: &[u8] = &[];
        let pkt = DisconnectionNotification::decode_body(&mut src)?;
        assert_eq!(pkt.reason, DisconnectReason::ClosedByRemotePeer);
        Ok(())
    }
}
