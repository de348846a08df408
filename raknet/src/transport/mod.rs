//! Server side of the transport: the UDP socket loop, the offline
//! handshake, packet dispatch and the collaborators they consult.

pub mod dispatcher;
pub mod hooks;
pub mod listener;
pub mod registry;

use std::net::SocketAddr;

use bytes::Bytes;

pub use dispatcher::{Dispatcher, PacketHandler};
pub use hooks::{Advertisement, DefaultHooks, Peer, ServerHooks};
pub use listener::{RaknetListener, RaknetListenerConfig, RaknetListenerConfigBuilder, ServerContext};
pub use registry::{InMemoryPeerRegistry, PeerRegistry};

/// One UDP payload waiting for the socket writer.
#[derive(Debug, Clone)]
pub(crate) struct OutboundDatagram {
    pub peer: SocketAddr,
    pub payload: Bytes,
}
