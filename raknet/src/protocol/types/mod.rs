//! Low-level on-the-wire primitives: integer formats, the wrapping 24-bit
//! sequence type, RakNet address encoding and the header bytes shared by
//! datagrams and encapsulated fragments.

mod addr;
mod datagram_header;
mod encapsulated_packet_header;
mod ints;
mod padding;
mod primitives;
mod sequence;
mod time;

pub use datagram_header::DatagramHeader;
pub use encapsulated_packet_header::EncapsulatedPacketHeader;
pub use ints::{U16LE, U24LE};
pub use padding::EoBPadding;
pub use sequence::Sequence24;
pub use time::{RaknetTime, raknet_start_time};

/// Magic used to identify unconnected RakNet packets.
pub type Magic = [u8; 16];
