use std::{net::SocketAddr, sync::Arc};

use bytes::{Buf, Bytes};

use crate::error::RaknetError;
use crate::session::SessionHandle;

use super::{
    hooks::Peer,
    listener::{
        ServerContext,
        offline::{OpenConnectionRequest1Handler, OpenConnectionRequest2Handler, UnconnectedPingHandler},
        online::OnlineDatagramHandler,
    },
};

/// Handles one packet ID. `body` starts after the ID byte; `datagram` is
/// the whole UDP payload.
///
/// Both entry points default to reporting the datagram as unknown.
pub trait PacketHandler: Sync {
    fn handle_no_session(
        &self,
        ctx: &Arc<ServerContext>,
        sender: SocketAddr,
        datagram: &Bytes,
        body: &mut Bytes,
    ) -> Result<(), RaknetError> {
        ctx.hooks().on_unknown_datagram(Peer::Address(sender), datagram);
        body.clear();
        Ok(())
    }

    fn handle_session(
        &self,
        ctx: &Arc<ServerContext>,
        session: &Arc<SessionHandle>,
        datagram: &Bytes,
        body: &mut Bytes,
    ) -> Result<(), RaknetError> {
        ctx.hooks().on_unknown_datagram(Peer::Session(session), datagram);
        body.clear();
        Ok(())
    }
}

type HandlerTable = [Option<&'static dyn PacketHandler>; 256];

static HANDLERS: HandlerTable = handler_table();

const fn handler_table() -> HandlerTable {
    let mut table: HandlerTable = [None; 256];
    table[0x01] = Some(&UnconnectedPingHandler);
    table[0x02] = Some(&UnconnectedPingHandler);
    table[0x05] = Some(&OpenConnectionRequest1Handler);
    table[0x07] = Some(&OpenConnectionRequest2Handler);
    let mut id = 0x80;
    while id <= 0xFF {
        table[id] = Some(&OnlineDatagramHandler);
        id += 1;
    }
    table
}

/// Routes raw datagrams to the handler registered for their leading byte.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<ServerContext>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    /// Handles one datagram from `sender`.
    ///
    /// Protocol errors are contained and logged here; only
    /// [`RaknetError::SessionSetupFailure`] is returned to the caller.
    pub fn dispatch(&self, datagram: Bytes, sender: SocketAddr) -> Result<(), RaknetError> {
        let Some(&id) = datagram.first() else {
            tracing::trace!(event = "empty_datagram", peer = %sender);
            return Ok(());
        };
        let session = self.ctx.registry().get(&sender);

        let Some(handler) = HANDLERS[id as usize] else {
            let peer = match &session {
                Some(session) => Peer::Session(session),
                None => Peer::Address(sender),
            };
            self.ctx.hooks().on_unknown_datagram(peer, &datagram);
            return Ok(());
        };

        let mut body = datagram.slice(1..);
        let result = match &session {
            Some(session) => handler.handle_session(&self.ctx, session, &datagram, &mut body),
            None => handler.handle_no_session(&self.ctx, sender, &datagram, &mut body),
        };

        match result {
            Ok(()) => {
                if let Some(session) = &session {
                    session.mark_active();
                }
                if body.has_remaining() {
                    tracing::debug!(peer = %sender, id, remaining = body.remaining(), "datagram not fully consumed");
                }
                Ok(())
            }
            Err(e @ RaknetError::SessionSetupFailure(_)) => Err(e),
            Err(e) => {
                tracing::debug!(peer = %sender, id, error = %e, "dropped datagram");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        constants::DEFAULT_UNCONNECTED_MAGIC,
        packet::{Packet, RaknetPacket, UnconnectedPing},
        state::SessionState,
        types::RaknetTime,
    };
    use crate::transport::{
        OutboundDatagram,
        hooks::{Advertisement, ServerHooks},
        listener::RaknetListenerConfig,
        registry::{InMemoryPeerRegistry, PeerRegistry},
    };
    use bytes::{BufMut, BytesMut};
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    const SENDER: &str = "10.1.1.1:40000";

    struct Fixture {
        dispatcher: Dispatcher,
        registry: Arc<InMemoryPeerRegistry>,
        socket_rx: mpsc::Receiver<OutboundDatagram>,
        _accept_rx: mpsc::Receiver<Arc<SessionHandle>>,
    }

    fn fixture_with(hooks: Arc<dyn ServerHooks>) -> Fixture {
        let registry = Arc::new(InMemoryPeerRegistry::new());
        let (socket_tx, socket_rx) = mpsc::channel(16);
        let (accept_tx, accept_rx) = mpsc::channel(4);
        let config = RaknetListenerConfig::builder().guid(0xABCD).build();
        let ctx = ServerContext::new(
            config,
            "0.0.0.0:19132".parse().unwrap(),
            registry.clone(),
            hooks,
            socket_tx,
            accept_tx,
            CancellationToken::new(),
        );
        Fixture {
            dispatcher: Dispatcher::new(ctx),
            registry,
            socket_rx,
            _accept_rx: accept_rx,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(Advertisement::new(&b"MCPE;test"[..])))
    }

    fn reply(f: &mut Fixture) -> RaknetPacket {
        let out = f.socket_rx.try_recv().expect("a reply");
        assert_eq!(out.peer, SENDER.parse().unwrap());
        RaknetPacket::decode(&mut out.payload.clone()).unwrap()
    }

    #[test]
    fn unconnected_ping_gets_pong_with_same_time() {
        let mut f = fixture();
        let ping = UnconnectedPing {
            ping_time: RaknetTime(777),
            client_guid: 42,
        }
        .to_bytes()
        .unwrap();

        f.dispatcher.dispatch(ping, SENDER.parse().unwrap()).unwrap();
        match reply(&mut f) {
            RaknetPacket::UnconnectedPong(pong) => {
                assert_eq!(pong.ping_time, RaknetTime(777));
                assert_eq!(pong.server_guid, 0xABCD);
                assert_eq!(pong.data.as_ref(), b"MCPE;test");
            }
            other => panic!("unexpected reply {:#04x}", other.id()),
        }
    }

    #[test]
    fn request1_with_bad_magic_is_dropped() {
        let mut f = fixture();
        let mut buf = BytesMut::new();
        buf.put_u8(0x05);
        let mut magic = DEFAULT_UNCONNECTED_MAGIC;
        magic[0] ^= 0xFF;
        buf.put_slice(&magic);
        buf.put_u8(11);
        buf.put_bytes(0, 100);

        f.dispatcher
            .dispatch(buf.freeze(), SENDER.parse().unwrap())
            .unwrap();
        assert!(f.socket_rx.try_recv().is_err());
        assert!(f.registry.is_empty());
    }

    #[derive(Default)]
    struct RecordingHooks {
        unknown: Mutex<Vec<(SocketAddr, bool)>>,
    }

    impl ServerHooks for RecordingHooks {
        fn on_unknown_datagram(&self, peer: Peer<'_>, _datagram: &Bytes) {
            let with_session = matches!(peer, Peer::Session(_));
            self.unknown.lock().unwrap().push((peer.addr(), with_session));
        }
    }

    #[test]
    fn unregistered_id_goes_to_unknown_hook() {
        let hooks = Arc::new(RecordingHooks::default());
        let f = fixture_with(hooks.clone());
        f.dispatcher
            .dispatch(Bytes::from_static(&[0x42, 1, 2]), SENDER.parse().unwrap())
            .unwrap();
        // Online datagram without a session.
        f.dispatcher
            .dispatch(Bytes::from_static(&[0x84, 0, 0, 0]), SENDER.parse().unwrap())
            .unwrap();

        let seen = hooks.unknown.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![(SENDER.parse().unwrap(), false), (SENDER.parse().unwrap(), false)]
        );
    }

    #[test]
    fn empty_datagram_is_ignored() {
        let mut f = fixture();
        f.dispatcher
            .dispatch(Bytes::new(), SENDER.parse().unwrap())
            .unwrap();
        assert!(f.socket_rx.try_recv().is_err());
    }

    #[test]
    fn request2_without_session_creates_nothing() {
        let mut f = fixture();
        let req = crate::protocol::packet::OpenConnectionRequest2 {
            server_addr: "10.0.0.1:19132".parse().unwrap(),
            mtu: 1400,
            client_guid: 9,
        }
        .to_bytes()
        .unwrap();
        f.dispatcher.dispatch(req, SENDER.parse().unwrap()).unwrap();
        assert!(f.socket_rx.try_recv().is_err());
        assert!(f.registry.get(&SENDER.parse().unwrap()).is_none());
    }

    #[test]
    fn request1_opens_an_initializing_session() {
        let mut f = fixture();
        let req = crate::protocol::packet::OpenConnectionRequest1 {
            protocol_version: 11,
            padding: crate::protocol::types::EoBPadding(1000),
        }
        .to_bytes()
        .unwrap();
        f.dispatcher.dispatch(req, SENDER.parse().unwrap()).unwrap();

        match reply(&mut f) {
            RaknetPacket::OpenConnectionReply1(reply) => {
                assert_eq!(reply.server_guid, 0xABCD);
                // 1000 + 18 + 20 + 8
                assert_eq!(reply.mtu, 1046);
            }
            other => panic!("unexpected reply {:#04x}", other.id()),
        }
        let session = f.registry.get(&SENDER.parse().unwrap()).unwrap();
        assert_eq!(session.state(), SessionState::Initializing);
        assert_eq!(session.mtu(), 1046);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_online_datagram_does_not_count_as_activity() {
        let f = fixture();
        let tunables = crate::session::SessionTunables {
            queue_capacity: 1,
            ..Default::default()
        };
        let session = SessionHandle::new(
            SENDER.parse().unwrap(),
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
        assert!(f.registry.try_insert(SENDER.parse().unwrap(), session.clone()).is_none());

        let datagram = Bytes::from_static(&[0xC0, 0, 0]);
        f.dispatcher.dispatch(datagram.clone(), SENDER.parse().unwrap()).unwrap();
        tokio::time::advance(std::time::Duration::from_secs(2)).await;

        // queue holds one datagram already
        f.dispatcher.dispatch(datagram, SENDER.parse().unwrap()).unwrap();
        assert!(session.idle() >= std::time::Duration::from_secs(2));
    }
}
