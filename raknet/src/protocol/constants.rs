//! Wire-level constants and flag sets shared by the codec, the session
//! core and the handshake handlers.

use bitflags::bitflags;
use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    time::Duration,
};

use crate::protocol::types::Magic;

// === Protocol / version ===

/// RakNet protocol version spoken by this server.
pub const RAKNET_PROTOCOL_VERSION: u8 = 11;

// === MTU and framing sizes ===

/// Lower bound of a negotiated MTU.
pub const MINIMUM_MTU_SIZE: u16 = 576;
/// Upper bound of a negotiated MTU.
pub const MAXIMUM_MTU_SIZE: u16 = 1400;

const _: () = {
    assert!(
        MINIMUM_MTU_SIZE < MAXIMUM_MTU_SIZE,
        "MINIMUM_MTU_SIZE must be less than MAXIMUM_MTU_SIZE"
    );
};

/// Number of independent ordering channels per session.
pub const MAXIMUM_ORDERING_CHANNELS: u8 = 16;

/// Worst-case header of one encapsulated fragment, reserved when sizing
/// fragments so any reliability kind plus split metadata fits.
pub const MAXIMUM_ENCAPSULATED_HEADER_SIZE: usize = 28;

/// Upper bound on NACK chunk length and on decoded ACK/NACK record counts.
pub const MAX_ACK_SEQUENCES: u16 = 8192;

pub const UDP_HEADER_SIZE: usize = 8;
pub const IPV4_HEADER_SIZE: usize = 20;
pub const IPV6_HEADER_SIZE: usize = 40;

/// Flags byte plus the 24-bit datagram sequence number.
pub const RAKNET_DATAGRAM_HEADER_SIZE: usize = 4;

/// IP header size for the family of `addr`.
pub const fn ip_header_size(addr: &SocketAddr) -> usize {
    match addr {
        SocketAddr::V4(_) => IPV4_HEADER_SIZE,
        SocketAddr::V6(_) => IPV6_HEADER_SIZE,
    }
}

// === Session timing ===

/// Default inactivity limit before the watchdog closes a session.
pub const DEFAULT_MAX_INACTIVITY: Duration = Duration::from_secs(5);

/// Default interval between keep-alive connected pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(2);

/// Period of the per-session flush tick.
pub const TICK_INTERVAL: Duration = Duration::from_millis(20);

bitflags! {
    /// Flags for the main RakNet UDP datagram header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct DatagramFlags: u8 {
        const VALID          = 0b1000_0000;
        const ACK            = 0b0100_0000;
        const NACK           = 0b0010_0000;
        /// Datagram is part of a packet pair (bandwidth probing).
        const PACKET_PAIR    = 0b0001_0000;
        /// More datagrams of the same burst follow immediately.
        const CONTINUOUS_SEND = 0b0000_1000;
        /// Datagram carries B&AS (bandwidth and arrival speed) info.
        const HAS_B_AND_AS   = 0b0000_0100;
    }
}

// Frame (encapsulated fragment) header bits.
pub const FRAME_FLAG_SPLIT: u8 = 0b0001_0000;
pub const FRAME_FLAG_NEEDS_BAS: u8 = 0b0000_0100;

// === Magic ===

/// Prefix of every unconnected handshake packet.
pub const DEFAULT_UNCONNECTED_MAGIC: Magic = [
    0x00, 0xFF, 0xFF, 0x00, 0xFE, 0xFE, 0xFE, 0xFE, 0xFD, 0xFD, 0xFD, 0xFD, 0x12, 0x34, 0x56, 0x78,
];

// === Congestion control ===

/// Ceiling of the retransmission timeout, in milliseconds.
pub const CC_MAXIMUM_THRESHOLD: u64 = 2000;
/// Jitter margin added to the retransmission timeout, in milliseconds.
pub const CC_ADDITIONAL_VARIANCE: u64 = 30;
/// Default acknowledgement send delay, in milliseconds.
pub const CC_SYN: u64 = 10;

/// Placeholder system address list sent in connection-request-accepted.
pub const SYSTEM_ADDRESSES: [SocketAddr; 10] = {
    const ANY: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
    let mut list = [ANY; 10];
    list[0] = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));
    list
};
