//! Unconnected ping and the two open-connection handshake steps.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;

use crate::error::RaknetError;
use crate::protocol::{
    constants::{MAXIMUM_MTU_SIZE, MINIMUM_MTU_SIZE, UDP_HEADER_SIZE, ip_header_size},
    packet::{
        AlreadyConnected, ConnectionBanned, IncompatibleProtocolVersion, NoFreeIncomingConnections,
        OpenConnectionReply1, OpenConnectionReply2, OpenConnectionRequest1, OpenConnectionRequest2,
        Packet, UnconnectedPing, UnconnectedPingOpenConnections, UnconnectedPong,
    },
    state::SessionState,
};
use crate::session::{SessionDriver, SessionHandle, run_watchdog};
use crate::transport::dispatcher::PacketHandler;

use super::ServerContext;

/// `0x01` and `0x02`. Answered with or without a session.
pub(crate) struct UnconnectedPingHandler;

impl UnconnectedPingHandler {
    fn answer(
        ctx: &ServerContext,
        sender: SocketAddr,
        datagram: &Bytes,
        body: &mut Bytes,
    ) -> Result<(), RaknetError> {
        let ping = UnconnectedPing::decode_body(body)?;
        if datagram.first() == Some(&UnconnectedPingOpenConnections::ID)
            && ctx.registry().len() >= ctx.config().max_connections
        {
            tracing::trace!(event = "open_connections_ping_ignored", peer = %sender);
            return Ok(());
        }
        let data = ctx
            .hooks()
            .on_ping(&sender, ping.client_guid, ping.ping_time);
        ctx.reply(
            sender,
            &UnconnectedPong {
                ping_time: ping.ping_time,
                server_guid: ctx.guid(),
                data,
            },
        )
    }
}

impl PacketHandler for UnconnectedPingHandler {
    fn handle_no_session(
        &self,
        ctx: &Arc<ServerContext>,
        sender: SocketAddr,
        datagram: &Bytes,
        body: &mut Bytes,
    ) -> Result<(), RaknetError> {
        Self::answer(ctx, sender, datagram, body)
    }

    fn handle_session(
        &self,
        ctx: &Arc<ServerContext>,
        session: &Arc<SessionHandle>,
        datagram: &Bytes,
        body: &mut Bytes,
    ) -> Result<(), RaknetError> {
        Self::answer(ctx, session.remote_addr(), datagram, body)
    }
}

/// `0x05`: creates the session.
pub(crate) struct OpenConnectionRequest1Handler;

impl PacketHandler for OpenConnectionRequest1Handler {
    fn handle_no_session(
        &self,
        ctx: &Arc<ServerContext>,
        sender: SocketAddr,
        datagram: &Bytes,
        body: &mut Bytes,
    ) -> Result<(), RaknetError> {
        let req = OpenConnectionRequest1::decode_body(body)?;
        let config = ctx.config();

        if !config.accepts_protocol(req.protocol_version) {
            tracing::debug!(peer = %sender, version = req.protocol_version, "unsupported protocol");
            return ctx.reply(
                sender,
                &IncompatibleProtocolVersion {
                    protocol: config.preferred_protocol(),
                    server_guid: ctx.guid(),
                },
            );
        }
        if ctx.registry().len() >= config.max_connections {
            tracing::debug!(peer = %sender, "server full");
            return ctx.reply(sender, &NoFreeIncomingConnections);
        }
        if ctx.registry().is_banned(&sender) || !ctx.hooks().is_connection_allowed(&sender) {
            tracing::debug!(peer = %sender, "connection denied");
            return ctx.reply(
                sender,
                &ConnectionBanned {
                    server_guid: ctx.guid(),
                },
            );
        }

        let mtu = probe_mtu(datagram.len(), &sender, config.max_mtu);
        let session = SessionHandle::new(
            sender,
            ctx.local_addr(),
            req.protocol_version,
            mtu,
            ctx.tunables(),
            ctx.cancellation(),
        );
        if ctx.registry().try_insert(sender, session.clone()).is_some() {
            session.fail();
            return Err(RaknetError::ConcurrentSessionConflict(sender));
        }
        session.transition(SessionState::Created, SessionState::Initializing)?;

        tracing::info!(peer = %sender, mtu, protocol = req.protocol_version, "session created");
        ctx.hooks().on_session_created(&session);
        ctx.reply(
            sender,
            &OpenConnectionReply1 {
                server_guid: ctx.guid(),
                mtu,
            },
        )
    }

    fn handle_session(
        &self,
        ctx: &Arc<ServerContext>,
        session: &Arc<SessionHandle>,
        _datagram: &Bytes,
        body: &mut Bytes,
    ) -> Result<(), RaknetError> {
        OpenConnectionRequest1::decode_body(body)?;
        tracing::debug!(peer = %session.remote_addr(), state = %session.state(), "already connected");
        ctx.reply(
            session.remote_addr(),
            &AlreadyConnected {
                server_guid: ctx.guid(),
            },
        )
    }
}

/// `0x07`: finishes the offline handshake and starts the session task.
pub(crate) struct OpenConnectionRequest2Handler;

impl PacketHandler for OpenConnectionRequest2Handler {
    fn handle_no_session(
        &self,
        _ctx: &Arc<ServerContext>,
        _sender: SocketAddr,
        _datagram: &Bytes,
        body: &mut Bytes,
    ) -> Result<(), RaknetError> {
        body.clear();
        Err(RaknetError::InvalidHandshake("request 2 without session"))
    }

    fn handle_session(
        &self,
        ctx: &Arc<ServerContext>,
        session: &Arc<SessionHandle>,
        _datagram: &Bytes,
        body: &mut Bytes,
    ) -> Result<(), RaknetError> {
        if session.state() != SessionState::Initializing {
            body.clear();
            return Err(RaknetError::InvalidHandshake("request 2 outside handshake"));
        }
        let req = OpenConnectionRequest2::decode_body(body)?;
        if !endpoint_matches(&req.server_addr, &ctx.local_addr()) {
            return Err(RaknetError::InvalidHandshake("request 2 address mismatch"));
        }

        let mtu = session
            .mtu()
            .min(req.mtu)
            .clamp(MINIMUM_MTU_SIZE, MAXIMUM_MTU_SIZE);
        session.transition(SessionState::Initializing, SessionState::Initialized)?;
        session.set_guid(req.client_guid);
        session.set_mtu(mtu);
        start_session(ctx, session)?;

        ctx.reply(
            session.remote_addr(),
            &OpenConnectionReply2 {
                server_guid: ctx.guid(),
                client_addr: session.remote_addr(),
                mtu,
            },
        )
    }
}

/// MTU implied by the size of a request 1 datagram, bounded to what the
/// listener supports.
pub(crate) fn probe_mtu(datagram_len: usize, peer: &SocketAddr, max_mtu: u16) -> u16 {
    let upper = max_mtu.clamp(MINIMUM_MTU_SIZE, MAXIMUM_MTU_SIZE);
    let probed = datagram_len + ip_header_size(peer) + UDP_HEADER_SIZE;
    u16::try_from(probed)
        .unwrap_or(u16::MAX)
        .clamp(MINIMUM_MTU_SIZE, upper)
}

/// Whether the address a client dialled is the one this listener serves.
fn endpoint_matches(echoed: &SocketAddr, local: &SocketAddr) -> bool {
    echoed.port() == local.port() && (local.ip().is_unspecified() || echoed.ip() == local.ip())
}

/// Spawns the session task and the watchdog. On failure the session is
/// marked failed and unregistered.
fn start_session(ctx: &Arc<ServerContext>, session: &Arc<SessionHandle>) -> Result<(), RaknetError> {
    let setup = session
        .take_runtime()
        .ok_or("session runtime already taken")
        .and_then(|runtime| {
            Handle::try_current()
                .map(|rt| (runtime, rt))
                .map_err(|_| "no tokio runtime")
        });
    let (runtime, rt) = match setup {
        Ok(parts) => parts,
        Err(reason) => {
            session.fail();
            ctx.registry().remove_session(session);
            return Err(RaknetError::SessionSetupFailure(format!(
                "{}: {reason}",
                session.remote_addr()
            )));
        }
    };

    let driver = SessionDriver::new(
        session.clone(),
        runtime,
        ctx.socket_tx().clone(),
        ctx.accept_tx().clone(),
        ctx.tunables(),
    );
    let task_ctx = ctx.clone();
    let task_session = session.clone();
    let tasks = ctx.session_tasks();
    tasks.spawn_on(
        async move {
            driver.run().await;
            task_ctx.finish_session(&task_session);
        },
        &rt,
    );
    tasks.spawn_on(run_watchdog(session.clone(), ctx.tunables().max_inactivity), &rt);
    session.mark_active();
    Ok(())
}
