use bytes::{Buf, BufMut};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use crate::protocol::packet::{DecodeError, EncodeError, RaknetEncodable};
use crate::protocol::types::U16LE;

/// `AF_INET6` as written by the Windows socket headers.
const AF_INET6: u16 = 23;

/// RakNet socket address encoding. IPv4 octets are bit-inverted; IPv6 is a
/// raw `sockaddr_in6`.
impl RaknetEncodable for SocketAddr {
    fn encode_raknet(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        match self {
            SocketAddr::V4(addr) => {
                dst.put_u8(4);
                dst.put_u32(!u32::from(*addr.ip()));
                dst.put_u16(addr.port());
            }
            SocketAddr::V6(addr) => {
                dst.put_u8(6);
                U16LE(AF_INET6).encode_raknet(dst)?;
                dst.put_u16(addr.port());
                dst.put_u32(addr.flowinfo());
                dst.put_slice(&addr.ip().octets());
                dst.put_u32(addr.scope_id());
            }
        }
        Ok(())
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        match u8::decode_raknet(src)? {
            4 => {
                let ip = Ipv4Addr::from(!u32::decode_raknet(src)?);
                let port = u16::decode_raknet(src)?;
                Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
            }
            6 => {
                let _family = U16LE::decode_raknet(src)?;
                let port = u16::decode_raknet(src)?;
                let flowinfo = u32::decode_raknet(src)?;
                if src.remaining() < 16 {
                    return Err(DecodeError::UnexpectedEof);
                }
                let mut octets = [0u8; 16];
                src.copy_to_slice(&mut octets);
                let scope_id = u32::decode_raknet(src)?;
                Ok(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(octets),
                    port,
                    flowinfo,
                    scope_id,
                )))
            }
            other => Err(DecodeError::InvalidAddrVersion(other)),
        }
    }
}
