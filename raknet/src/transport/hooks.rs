use std::{
    net::SocketAddr,
    sync::{Arc, RwLock},
};

use bytes::Bytes;

use crate::protocol::{state::DisconnectReason, types::RaknetTime};
use crate::session::SessionHandle;

/// Whoever sent a datagram nobody handles.
#[derive(Debug, Clone, Copy)]
pub enum Peer<'a> {
    Address(SocketAddr),
    Session(&'a Arc<SessionHandle>),
}

impl Peer<'_> {
    pub fn addr(&self) -> SocketAddr {
        match self {
            Peer::Address(addr) => *addr,
            Peer::Session(session) => session.remote_addr(),
        }
    }
}

/// Admission and notification callbacks invoked by the handshake
/// handlers and the dispatcher. Every method has a neutral default.
pub trait ServerHooks: Send + Sync {
    fn is_connection_allowed(&self, _addr: &SocketAddr) -> bool {
        true
    }

    fn on_session_created(&self, _session: &Arc<SessionHandle>) {}

    fn on_unknown_datagram(&self, peer: Peer<'_>, datagram: &Bytes) {
        tracing::trace!(
            event = "unknown_datagram",
            peer = %peer.addr(),
            id = datagram.first().copied(),
            len = datagram.len()
        );
    }

    /// Pong payload for an unconnected ping.
    fn on_ping(&self, _addr: &SocketAddr, _client_guid: u64, _ping_time: RaknetTime) -> Bytes {
        Bytes::new()
    }

    fn on_session_closed(&self, _session: &Arc<SessionHandle>, _reason: DisconnectReason) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl ServerHooks for DefaultHooks {}

/// Hooks that answer every ping with a fixed, replaceable advertisement.
#[derive(Debug, Default)]
pub struct Advertisement {
    payload: RwLock<Bytes>,
}

impl Advertisement {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: RwLock::new(payload.into()),
        }
    }

    /// Replaces the payload sent in unconnected pongs.
    pub fn set(&self, payload: impl Into<Bytes>) {
        *self.payload.write().unwrap_or_else(|e| e.into_inner()) = payload.into();
    }

    pub fn get(&self) -> Bytes {
        self.payload
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ServerHooks for Advertisement {
    fn on_ping(&self, _addr: &SocketAddr, _client_guid: u64, _ping_time: RaknetTime) -> Bytes {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertisement_is_replaceable() {
        let ad = Advertisement::new(&b"MCPE;first"[..]);
        let addr = "127.0.0.1:1".parse().unwrap();
        assert_eq!(ad.on_ping(&addr, 1, RaknetTime(0)).as_ref(), b"MCPE;first");
        ad.set(&b"MCPE;second"[..]);
        assert_eq!(ad.on_ping(&addr, 1, RaknetTime(0)).as_ref(), b"MCPE;second");
    }

    #[test]
    fn defaults_admit_everyone_and_answer_empty() {
        let hooks = DefaultHooks;
        let addr = "127.0.0.1:1".parse().unwrap();
        assert!(hooks.is_connection_allowed(&addr));
        assert!(hooks.on_ping(&addr, 1, RaknetTime(5)).is_empty());
    }
}
