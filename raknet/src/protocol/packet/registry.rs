use bytes::{Buf, BufMut, Bytes};

use crate::protocol::packet::*;

/// Generates [`RaknetPacket`] over the listed packet bodies.
macro_rules! define_raknet_packets {
    ($($name:ident,)+) => {
        /// Every control packet this crate understands, keyed by leading ID.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum RaknetPacket {
            $(
                $name($name),
            )+
            /// Any other ID; the body is kept verbatim for the application.
            UserData { id: u8, payload: Bytes },
        }

        impl RaknetPacket {
            /// Decodes the ID byte and the body that follows it.
            pub fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
                let id = u8::decode_raknet(src)?;
                Ok(match id {
                    $(
                        <$name as Packet>::ID => {
                            RaknetPacket::$name(<$name as Packet>::decode_body(src)?)
                        }
                    )+
                    other => RaknetPacket::UserData {
                        id: other,
                        payload: src.split_to(src.len()),
                    },
                })
            }

            pub fn id(&self) -> u8 {
                match self {
                    $(
                        RaknetPacket::$name(_) => <$name as Packet>::ID,
                    )+
                    RaknetPacket::UserData { id, .. } => *id,
                }
            }

            pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
                dst.put_u8(self.id());
                match self {
                    $(
                        RaknetPacket::$name(inner) => inner.encode_body(dst)?,
                    )+
                    RaknetPacket::UserData { payload, .. } => dst.put_slice(payload),
                }
                Ok(())
            }
        }

        $(
            impl From<$name> for RaknetPacket {
                fn from(value: $name) -> Self {
                    RaknetPacket::$name(value)
                }
            }
        )+
    };
}

define_raknet_packets! {
    ConnectedPing,
    ConnectedPong,
    UnconnectedPing,
    UnconnectedPingOpenConnections,
    UnconnectedPong,
    OpenConnectionRequest1,
    OpenConnectionReply1,
    OpenConnectionRequest2,
    OpenConnectionReply2,
    ConnectionRequest,
    ConnectionRequestAccepted,
    ConnectionRequestFailed,
    AlreadyConnected,
    NewIncomingConnection,
    NoFreeIncomingConnections,
    DisconnectionNotification,
    ConnectionBanned,
    IncompatibleProtocolVersion,
}

impl RaknetPacket {
    /// Leading ID of a raw buffer without consuming it.
    pub fn peek_id(src: &impl Buf) -> Option<u8> {
        src.chunk().first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::RaknetTime;
    use bytes::BytesMut;

    #[test]
    fn connected_ping_via_enum() -> Result<(), DecodeError> {
        let pkt = RaknetPacket::from(ConnectedPing {
            ping_time: RaknetTime(42),
        });

        let mut buf = BytesMut::new();
        pkt.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 0x00);
        assert_eq!(RaknetPacket::decode(&mut buf.freeze())?, pkt);
        Ok(())
    }

    #[test]
    fn unknown_id_is_user_data() -> Result<(), DecodeError> {
        let mut src = Bytes::from_static(&[0xFE, 1, 2, 3]);
        match RaknetPacket::decode(&mut src)? {
            RaknetPacket::UserData { id, payload } => {
                assert_eq!(id, 0xFE);
                assert_eq!(payload.as_ref(), [1, 2, 3]);
            }
            other => panic!("expected UserData, got id {}", other.id()),
        }
        assert!(src.is_empty());
        Ok(())
    }

    #[test]
    fn peek_does_not_consume() {
        let src = Bytes::from_static(&[0x05, 0x00]);
        assert_eq!(RaknetPacket::peek_id(&src), Some(0x05));
        assert_eq!(src.len(), 2);
    }
}
