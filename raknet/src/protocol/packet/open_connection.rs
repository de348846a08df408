//! Offline connection negotiation and its rejection replies.
//!
//! These packets are exchanged before a session is online. Every body
//! carries the unconnected magic; decoding fails with
//! [`DecodeError::InvalidMagic`] when it is wrong.

use std::net::SocketAddr;

use bytes::{Buf, BufMut};

use crate::protocol::{
    constants::DEFAULT_UNCONNECTED_MAGIC,
    packet::{DecodeError, EncodeError, Packet, RaknetEncodable},
    types::{EoBPadding, Magic},
};

/// First handshake packet. The zero padding sizes the datagram to the
/// MTU the client is probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenConnectionRequest1 {
    pub protocol_version: u8,
    pub padding: EoBPadding,
}

impl Packet for OpenConnectionRequest1 {
    const ID: u8 = 0x05;

    fn encode_body(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        DEFAULT_UNCONNECTED_MAGIC.encode_raknet(dst)?;
        self.protocol_version.encode_raknet(dst)?;
        self.padding.encode_raknet(dst)
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Magic::decode_raknet(src)?;
        Ok(Self {
            protocol_version: u8::decode_raknet(src)?,
            padding: EoBPadding::decode_raknet(src)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenConnectionReply1 {
    pub server_guid: u64,
    pub mtu: u16,
}

impl Packet for OpenConnectionReply1 {
    const ID: u8 = 0x06;

    fn encode_body(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        DEFAULT_UNCONNECTED_MAGIC.encode_raknet(dst)?;
        self.server_guid.encode_raknet(dst)?;
        false.encode_raknet(dst)?;
        self.mtu.encode_raknet(dst)
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Magic::decode_raknet(src)?;
        let server_guid = u64::decode_raknet(src)?;
        if bool::decode_raknet(src)? {
            // Security cookie, unused.
            u32::decode_raknet(src)?;
        }
        Ok(Self {
            server_guid,
            mtu: u16::decode_raknet(src)?,
        })
    }
}

/// Second handshake packet: the address the client dialled, the MTU it
/// settled on and its GUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenConnectionRequest2 {
    pub server_addr: SocketAddr,
    pub mtu: u16,
    pub client_guid: u64,
}

impl Packet for OpenConnectionRequest2 {
    const ID: u8 = 0x07;

    fn encode_body(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        DEFAULT_UNCONNECTED_MAGIC.encode_raknet(dst)?;
        self.server_addr.encode_raknet(dst)?;
        self.mtu.encode_raknet(dst)?;
        self.client_guid.encode_raknet(dst)
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Magic::decode_raknet(src)?;
        // A client that saw a security flag echoes a cookie and a proof byte
        // before the address. Address versions are only ever 4 or 6.
        if src.has_remaining() && !matches!(src.chunk()[0], 4 | 6) {
            u32::decode_raknet(src)?;
            bool::decode_raknet(src)?;
        }
        Ok(Self {
            server_addr: SocketAddr::decode_raknet(src)?,
            mtu: u16::decode_raknet(src)?,
            client_guid: u64::decode_raknet(src)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenConnectionReply2 {
    pub server_guid: u64,
    pub client_addr: SocketAddr,
    pub mtu: u16,
}

impl Packet for OpenConnectionReply2 {
    const ID: u8 = 0x08;

    fn encode_body(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        DEFAULT_UNCONNECTED_MAGIC.encode_raknet(dst)?;
        self.server_guid.encode_raknet(dst)?;
        self.client_addr.encode_raknet(dst)?;
        self.mtu.encode_raknet(dst)?;
        false.encode_raknet(dst)
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Magic::decode_raknet(src)?;
        let pkt = Self {
            server_guid: u64::decode_raknet(src)?,
            client_addr: SocketAddr::decode_raknet(src)?,
            mtu: u16::decode_raknet(src)?,
        };
        bool::decode_raknet(src)?;
        Ok(pkt)
    }
}

/// Defines a rejection whose body is the magic followed by the server GUID.
macro_rules! guid_rejection {
    ($($(#[$meta:meta])* $name:ident = $id:literal;)+) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Eq)]
            pub struct $name {
                pub server_guid: u64,
            }

            impl Packet for $name {
                const ID: u8 = $id;

                fn encode_body(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
                    DEFAULT_UNCONNECTED_MAGIC.encode_raknet(dst)?;
                    self.server_guid.encode_raknet(dst)
                }

                fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
                    Magic::decode_raknet(src)?;
                    Ok(Self {
                        server_guid: u64::decode_raknet(src)?,
                    })
                }
            }
        )+
    };
}

guid_rejection! {
    ConnectionRequestFailed = 0x11;
    /// A session already exists for the sender.
    AlreadyConnected = 0x12;
    /// The sender is denied by the admission check.
    ConnectionBanned = 0x17;
}

/// The server is at capacity. ID only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoFreeIncomingConnections;

impl Packet for NoFreeIncomingConnections {
    const ID: u8 = 0x14;

    fn encode_body(&self, _dst: &mut impl BufMut) -> Result<(), EncodeError> {
        Ok(())
    }

    fn decode_body(_src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompatibleProtocolVersion {
    pub protocol: u8,
    pub server_guid: u64,
}

impl Packet for IncompatibleProtocolVersion {
    const ID: u8 = 0x19;

    fn encode_body(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        self.protocol.encode_raknet(dst)?;
        DEFAULT_UNCONNECTED_MAGIC.encode_raknet(dst)?;
        self.server_guid.encode_raknet(dst)
    }

    fn decode_body(src: &mut impl Buf) -> Result<Self, DecodeError> {
        let protocol = u8::decode_raknet(src)?;
        Magic::decode_raknet(src)?;
        Ok(Self {
            protocol,
            server_guid: u64::decode_raknet(src)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};

    #[test]
    fn reply1_layout() {
        let reply = OpenConnectionReply1 {
            server_guid: 1,
            mtu: 1400,
        };
        let mut buf = BytesMut::new();
        reply.encode_body(&mut buf).unwrap();
        assert_eq!(buf.len(), 16 + 8 + 1 + 2);
        assert_eq!(&buf[16..24], &1u64.to_be_bytes());
        assert_eq!(buf[24], 0);
        assert_eq!(&buf[25..], &1400u16.to_be_bytes());
    }

    #[test]
    fn request1_padding_counts_trailing_zeros() -> Result<(), DecodeError> {
        let req = OpenConnectionRequest1 {
            protocol_version: 11,
            padding: EoBPadding(1000),
        };
        let mut buf = BytesMut::new();
        req.encode_body(&mut buf).unwrap();
        assert_eq!(buf.len(), 1017);
        assert_eq!(OpenConnectionRequest1::decode_body(&mut buf.freeze())?, req);
        Ok(())
    }

    #[test]
    fn request2_skips_echoed_cookie() -> Result<(), DecodeError> {
        let addr: SocketAddr = "10.0.0.1:19132".parse().unwrap();
        let mut buf = BytesMut::new();
        DEFAULT_UNCONNECTED_MAGIC.encode_raknet(&mut buf).unwrap();
        buf.put_u32(0xDEAD_BEEF);
        buf.put_u8(0);
        addr.encode_raknet(&mut buf).unwrap();
        buf.put_u16(1200);
        buf.put_u64(77);

        let req = OpenConnectionRequest2::decode_body(&mut buf.freeze())?;
        assert_eq!(req.server_addr, addr);
        assert_eq!(req.mtu, 1200);
        assert_eq!(req.client_guid, 77);
        Ok(())
    }

    #[test]
    fn request2_with_bad_magic_is_rejected() {
        let mut src = Bytes::from_static(&[0u8; 40]);
        assert_eq!(
            OpenConnectionRequest2::decode_body(&mut src),
            Err(DecodeError::InvalidMagic)
        );
    }

    #[test]
    fn incompatible_version_leads_with_protocol() {
        let pkt = IncompatibleProtocolVersion {
            protocol: 11,
            server_guid: 5,
        };
        let mut buf = BytesMut::new();
        pkt.encode_body(&mut buf).unwrap();
        assert_eq!(buf[0], 11);
        assert_eq!(&buf[1..17], &DEFAULT_UNCONNECTED_MAGIC);
    }
}
