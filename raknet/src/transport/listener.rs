pub(crate) mod offline;
pub(crate) mod online;

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::error::RaknetError;
use crate::protocol::{
    constants::{self, UDP_HEADER_SIZE},
    packet::Packet,
    state::DisconnectReason,
};
use crate::session::{SessionHandle, SessionTunables};

use super::{
    OutboundDatagram,
    dispatcher::Dispatcher,
    hooks::{DefaultHooks, ServerHooks},
    registry::{InMemoryPeerRegistry, PeerRegistry},
};

/// Configuration for a [`RaknetListener`].
#[derive(Debug, Clone)]
pub struct RaknetListenerConfig {
    /// Address to start server.
    pub bind_addr: SocketAddr,

    /// GUID advertised in pongs and handshake replies.
    pub guid: u64,

    /// Maximum number of concurrent sessions, handshaking ones included.
    pub max_connections: usize,

    /// Maximum MTU size to support/advertise.
    pub max_mtu: u16,

    /// Protocol versions accepted by open-connection request 1. Empty
    /// accepts every version.
    pub supported_protocols: BTreeSet<u8>,

    /// Idle time after which a session is closed.
    pub max_inactivity: Duration,

    /// Interval of the connected keep-alive ping.
    pub ping_interval: Duration,

    /// Delay before received sequences are acknowledged.
    pub ack_delay: Duration,

    /// Bound of each session's inbound datagram and outbound message queues.
    pub session_queue_capacity: usize,

    /// Bound of each session's delivery channel to the application.
    pub message_buffer: usize,

    /// Bound of the socket writer queue shared by all sessions.
    pub outbound_queue_capacity: usize,

    /// Maximum number of parts in a single split packet.
    pub max_split_parts: u32,

    /// Maximum number of split packets being reassembled per session.
    pub max_concurrent_splits: usize,

    /// Timeout for reassembling split packets.
    pub split_timeout: Duration,
}

impl Default for RaknetListenerConfig {
    /// Binds `0.0.0.0:19132` with a random GUID, 1024 sessions, MTU 1400
    /// and a 5 s inactivity timeout.
    fn default() -> Self {
        let session = SessionTunables::default();
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 19132)),
            guid: rand::random(),
            max_connections: 1024,
            max_mtu: constants::MAXIMUM_MTU_SIZE,
            supported_protocols: BTreeSet::new(),
            max_inactivity: session.max_inactivity,
            ping_interval: session.ping_interval,
            ack_delay: session.ack_delay,
            session_queue_capacity: session.queue_capacity,
            message_buffer: session.message_buffer,
            outbound_queue_capacity: 4096,
            max_split_parts: session.max_split_parts,
            max_concurrent_splits: session.max_concurrent_splits,
            split_timeout: session.split_timeout,
        }
    }
}

impl RaknetListenerConfig {
    /// Creates a new [`RaknetListenerConfig`] with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for [`RaknetListenerConfig`].
    pub fn builder() -> RaknetListenerConfigBuilder {
        RaknetListenerConfigBuilder::default()
    }

    /// Per-session limits derived from this configuration.
    pub fn tunables(&self) -> SessionTunables {
        SessionTunables {
            ack_delay: self.ack_delay,
            max_split_parts: self.max_split_parts,
            max_concurrent_splits: self.max_concurrent_splits,
            split_timeout: self.split_timeout,
            queue_capacity: self.session_queue_capacity,
            message_buffer: self.message_buffer,
            ping_interval: self.ping_interval,
            max_inactivity: self.max_inactivity,
            ..SessionTunables::default()
        }
    }

    /// Highest supported protocol, as advertised in version rejections.
    pub(crate) fn preferred_protocol(&self) -> u8 {
        self.supported_protocols
            .last()
            .copied()
            .unwrap_or(constants::RAKNET_PROTOCOL_VERSION)
    }

    pub(crate) fn accepts_protocol(&self, version: u8) -> bool {
        self.supported_protocols.is_empty() || self.supported_protocols.contains(&version)
    }
}

/// Configuration builder for [`RaknetListener`].
#[derive(Debug, Clone, Default)]
pub struct RaknetListenerConfigBuilder {
    config: RaknetListenerConfig,
}

impl From<RaknetListenerConfigBuilder> for RaknetListenerConfig {
    fn from(builder: RaknetListenerConfigBuilder) -> Self {
        builder.build()
    }
}

impl RaknetListenerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bind_address(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    #[must_use]
    pub fn guid(mut self, guid: u64) -> Self {
        self.config.guid = guid;
        self
    }

    #[must_use]
    pub fn max_connections(mut self, value: usize) -> Self {
        self.config.max_connections = value;
        self
    }

    /// Upper bound for negotiated MTUs. Values above 1400 have no effect.
    #[must_use]
    pub fn max_mtu(mut self, mtu: u16) -> Self {
        self.config.max_mtu = mtu;
        self
    }

    /// Adds a protocol version to the accepted set.
    #[must_use]
    pub fn supported_protocol(mut self, version: u8) -> Self {
        self.config.supported_protocols.insert(version);
        self
    }

    #[must_use]
    pub fn max_inactivity(mut self, timeout: Duration) -> Self {
        self.config.max_inactivity = timeout;
        self
    }

    #[must_use]
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    #[must_use]
    pub fn ack_delay(mut self, delay: Duration) -> Self {
        self.config.ack_delay = delay;
        self
    }

    #[must_use]
    pub fn session_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.session_queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn message_buffer(mut self, capacity: usize) -> Self {
        self.config.message_buffer = capacity;
        self
    }

    #[must_use]
    pub fn outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn max_split_parts(mut self, parts: u32) -> Self {
        self.config.max_split_parts = parts;
        self
    }

    #[must_use]
    pub fn max_concurrent_splits(mut self, splits: usize) -> Self {
        self.config.max_concurrent_splits = splits;
        self
    }

    #[must_use]
    pub fn split_timeout(mut self, timeout: Duration) -> Self {
        self.config.split_timeout = timeout;
        self
    }

    pub fn build(self) -> RaknetListenerConfig {
        self.config
    }
}

/// State shared by the socket loop, the dispatcher and every handler.
pub struct ServerContext {
    config: RaknetListenerConfig,
    local_addr: SocketAddr,
    registry: Arc<dyn PeerRegistry>,
    hooks: Arc<dyn ServerHooks>,
    socket_tx: mpsc::Sender<OutboundDatagram>,
    accept_tx: mpsc::Sender<Arc<SessionHandle>>,
    tunables: SessionTunables,
    cancel: CancellationToken,
    session_tasks: TaskTracker,
}

impl ServerContext {
    pub(crate) fn new(
        config: RaknetListenerConfig,
        local_addr: SocketAddr,
        registry: Arc<dyn PeerRegistry>,
        hooks: Arc<dyn ServerHooks>,
        socket_tx: mpsc::Sender<OutboundDatagram>,
        accept_tx: mpsc::Sender<Arc<SessionHandle>>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let tunables = config.tunables();
        Arc::new(Self {
            config,
            local_addr,
            registry,
            hooks,
            socket_tx,
            accept_tx,
            tunables,
            cancel,
            session_tasks: TaskTracker::new(),
        })
    }

    pub fn config(&self) -> &RaknetListenerConfig {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn guid(&self) -> u64 {
        self.config.guid
    }

    pub fn registry(&self) -> &Arc<dyn PeerRegistry> {
        &self.registry
    }

    pub fn hooks(&self) -> &Arc<dyn ServerHooks> {
        &self.hooks
    }

    pub(crate) fn tunables(&self) -> &SessionTunables {
        &self.tunables
    }

    pub(crate) fn socket_tx(&self) -> &mpsc::Sender<OutboundDatagram> {
        &self.socket_tx
    }

    pub(crate) fn accept_tx(&self) -> &mpsc::Sender<Arc<SessionHandle>> {
        &self.accept_tx
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Session drivers and watchdogs, awaited on shutdown.
    pub(crate) fn session_tasks(&self) -> &TaskTracker {
        &self.session_tasks
    }

    /// Queues an unconnected reply. Dropped with a warning when the socket
    /// writer is saturated.
    pub(crate) fn reply<P: Packet>(&self, peer: SocketAddr, packet: &P) -> Result<(), RaknetError> {
        let payload = packet.to_bytes()?;
        if self
            .socket_tx
            .try_send(OutboundDatagram { peer, payload })
            .is_err()
        {
            tracing::warn!(%peer, id = P::ID, "socket queue full, reply dropped");
        }
        Ok(())
    }

    /// Unregisters a session whose task has ended.
    pub(crate) fn finish_session(&self, session: &Arc<SessionHandle>) {
        if self.registry.remove_session(session) {
            let reason = session
                .close_reason()
                .unwrap_or(DisconnectReason::Disconnected);
            tracing::debug!(peer = %session.remote_addr(), ?reason, "session removed");
            self.hooks.on_session_closed(session, reason);
        }
    }
}

/// Server-side RakNet listener that accepts new connections.
pub struct RaknetListener {
    ctx: Arc<ServerContext>,
    new_connections: mpsc::Receiver<Arc<SessionHandle>>,
    cancel_token: CancellationToken,
    _socket_task: JoinHandle<()>,
}

impl RaknetListener {
    /// Binds with an in-memory registry and [`DefaultHooks`].
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use raknet::transport::{RaknetListener, RaknetListenerConfig};
    ///
    /// # async fn example() -> std::io::Result<()> {
    /// let listener = RaknetListener::bind(RaknetListenerConfig::default()).await?;
    /// println!("Bound to {}", listener.local_addr());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn bind(config: RaknetListenerConfig) -> std::io::Result<Self> {
        Self::bind_with(
            config,
            Arc::new(InMemoryPeerRegistry::new()),
            Arc::new(DefaultHooks),
        )
        .await
    }

    /// Binds with caller-supplied registry and hooks.
    pub async fn bind_with(
        config: RaknetListenerConfig,
        registry: Arc<dyn PeerRegistry>,
        hooks: Arc<dyn ServerHooks>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(config.bind_addr).await?;
        let local_addr = socket.local_addr()?;
        let (socket_tx, socket_rx) = mpsc::channel(config.outbound_queue_capacity.max(1));
        let (accept_tx, accept_rx) = mpsc::channel(config.max_connections.clamp(1, 1024));
        let cancel_token = CancellationToken::new();

        let ctx = ServerContext::new(
            config,
            local_addr,
            registry,
            hooks,
            socket_tx,
            accept_tx,
            cancel_token.clone(),
        );
        tracing::info!(addr = %local_addr, guid = ctx.guid(), "raknet listener bound");

        let socket_task = tokio::spawn(run_socket_loop(socket, ctx.clone(), socket_rx));

        Ok(Self {
            ctx,
            new_connections: accept_rx,
            cancel_token,
            _socket_task: socket_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.ctx.local_addr()
    }

    pub fn guid(&self) -> u64 {
        self.ctx.guid()
    }

    pub fn registry(&self) -> &Arc<dyn PeerRegistry> {
        self.ctx.registry()
    }

    /// Next session to complete the online handshake.
    pub async fn accept(&mut self) -> Option<Arc<SessionHandle>> {
        self.next().await
    }

    /// Stops the socket loop and closes every session.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for RaknetListener {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl Stream for RaknetListener {
    type Item = Arc<SessionHandle>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.new_connections.poll_recv(cx)
    }
}

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Receives datagrams, fans them out to dispatch workers, writes queued
/// replies and sweeps stale sessions until cancelled.
async fn run_socket_loop(
    socket: UdpSocket,
    ctx: Arc<ServerContext>,
    mut outbound_rx: mpsc::Receiver<OutboundDatagram>,
) {
    // Room for probes slightly larger than the configured MTU.
    let mut buf = vec![0u8; (ctx.config().max_mtu as usize + UDP_HEADER_SIZE + 64).max(2048)];
    let dispatcher = Dispatcher::new(ctx.clone());
    let cancel = ctx.cancellation().clone();
    let mut maintenance = tokio::time::interval(Duration::from_secs(1));
    maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("listener socket loop cancelled");
                break;
            }
            res = socket.recv_from(&mut buf) => {
                match res {
                    Ok((len, peer)) => {
                        let datagram = Bytes::copy_from_slice(&buf[..len]);
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move {
                            if let Err(e) = dispatcher.dispatch(datagram, peer) {
                                tracing::error!(%peer, error = %e, "session setup failed");
                            }
                        });
                    }
                    Err(e) => {
                        if e.kind() == std::io::ErrorKind::ConnectionReset {
                            // Windows ICMP port unreachable.
                            continue;
                        }
                        tracing::error!("UDP socket error: {}", e);
                        continue;
                    }
                }
            }
            Some(out) = outbound_rx.recv() => {
                if let Err(e) = socket.send_to(&out.payload, out.peer).await {
                    tracing::debug!(peer = %out.peer, error = %e, "send failed");
                }
            }
            _ = maintenance.tick() => sweep_sessions(&ctx),
        }
    }

    for session in ctx.registry().sessions() {
        session.close(DisconnectReason::ShuttingDown);
    }

    // Session tasks hand their goodbyes to the socket as they stop.
    let tasks = ctx.session_tasks();
    tasks.close();
    let grace = tokio::time::sleep(SHUTDOWN_GRACE);
    tokio::pin!(grace);
    loop {
        tokio::select! {
            _ = tasks.wait() => break,
            _ = &mut grace => {
                tracing::debug!(running = tasks.len(), "session tasks outlived shutdown grace");
                break;
            }
            Some(out) = outbound_rx.recv() => {
                let _ = socket.send_to(&out.payload, out.peer).await;
            }
        }
    }
    while let Ok(out) = outbound_rx.try_recv() {
        let _ = socket.send_to(&out.payload, out.peer).await;
    }
}

/// Times out sessions stuck before `INITIALIZED` and unregisters terminal
/// ones.
fn sweep_sessions(ctx: &ServerContext) {
    let max_inactivity = ctx.config().max_inactivity;
    for session in ctx.registry().sessions() {
        let state = session.state();
        if state.is_handshaking() && session.idle() >= max_inactivity {
            tracing::debug!(peer = %session.remote_addr(), %state, "handshake timed out");
            session.close(DisconnectReason::TimedOut);
            ctx.finish_session(&session);
        } else if state.is_terminal() {
            ctx.finish_session(&session);
        }
    }
}
