//! Wire formats: constants, fragment and datagram codecs, ACK/NACK ranges
//! and control packets.

pub mod ack;
pub mod constants;
pub mod datagram;
pub mod encapsulated_packet;
pub mod packet;
pub mod reliability;
pub mod state;
pub mod types;
