//! `0x80..=0xFF`: data, ACK and NACK datagrams of an established session.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::RaknetError;
use crate::session::SessionHandle;
use crate::transport::dispatcher::PacketHandler;

use super::ServerContext;

/// Hands online datagrams to the session task. Without a session they fall
/// through to the unknown-datagram hook.
pub(crate) struct OnlineDatagramHandler;

impl PacketHandler for OnlineDatagramHandler {
    fn handle_session(
        &self,
        _ctx: &Arc<ServerContext>,
        session: &Arc<SessionHandle>,
        datagram: &Bytes,
        body: &mut Bytes,
    ) -> Result<(), RaknetError> {
        body.clear();
        if !session.state().is_online() {
            return Err(RaknetError::InvalidHandshake("online datagram before request 2"));
        }
        if !session.enqueue_datagram(datagram.clone()) {
            return Err(RaknetError::SessionQueueFull(session.remote_addr()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::state::SessionState;
    use crate::session::SessionTunables;
    use crate::transport::{
        hooks::DefaultHooks, listener::RaknetListenerConfig, registry::InMemoryPeerRegistry,
    };
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn context() -> Arc<ServerContext> {
        let (socket_tx, _) = mpsc::channel(1);
        let (accept_tx, _) = mpsc::channel(1);
        ServerContext::new(
            RaknetListenerConfig::default(),
            "0.0.0.0:19132".parse().unwrap(),
            Arc::new(InMemoryPeerRegistry::new()),
            Arc::new(DefaultHooks),
            socket_tx,
            accept_tx,
            CancellationToken::new(),
        )
    }

    fn session() -> Arc<SessionHandle> {
        SessionHandle::new(
            "10.0.0.1:1000".parse().unwrap(),
            "0.0.0.0:19132".parse().unwrap(),
            11,
            1400,
            &SessionTunables::default(),
            &CancellationToken::new(),
        )
    }

    #[test]
    fn datagram_reaches_the_session_queue() {
        let ctx = context();
        let session = session();
        session
            .transition(SessionState::Created, SessionState::Initializing)
            .unwrap();
        session
            .transition(SessionState::Initializing, SessionState::Initialized)
            .unwrap();
        let mut runtime = session.take_runtime().unwrap();

        let datagram = Bytes::from_static(&[0xC0, 0, 0]);
        let mut body = datagram.slice(1..);
        OnlineDatagramHandler
            .handle_session(&ctx, &session, &datagram, &mut body)
            .unwrap();
        assert!(body.is_empty());
        assert_eq!(runtime.inbound_rx.try_recv().unwrap(), datagram);
    }

    #[test]
    fn full_session_queue_is_reported() {
        let ctx = context();
        let tunables = SessionTunables {
            queue_capacity: 1,
            ..SessionTunables::default()
        };
        let session = SessionHandle::new(
            "10.0.0.1:1000".parse().unwrap(),
            "0.0.0.0:19132".parse().unwrap(),
            11,
            1400,
            &tunables,
            &CancellationToken::new(),
        );
        session
            .transition(SessionState::Created, SessionState::Initializing)
            .unwrap();
        session
            .transition(SessionState::Initializing, SessionState::Initialized)
            .unwrap();
        let _runtime = session.take_runtime().unwrap();

        let datagram = Bytes::from_static(&[0xC0, 0, 0]);
        OnlineDatagramHandler
            .handle_session(&ctx, &session, &datagram, &mut datagram.slice(1..))
            .unwrap();
        let err = OnlineDatagramHandler
            .handle_session(&ctx, &session, &datagram, &mut datagram.slice(1..))
            .unwrap_err();
        assert!(matches!(err, RaknetError::SessionQueueFull(_)));
    }

    #[test]
    fn datagram_during_offline_handshake_is_refused() {
        let ctx = context();
        let session = session();
        let datagram = Bytes::from_static(&[0x84, 0, 0, 0]);
        let mut body = datagram.slice(1..);
        let err = OnlineDatagramHandler
            .handle_session(&ctx, &session, &datagram, &mut body)
            .unwrap_err();
        assert!(matches!(err, RaknetError::InvalidHandshake(_)));
    }
}
