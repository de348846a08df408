use std::{
    net::SocketAddr,
    pin::Pin,
    sync::{
        Arc, Mutex, MutexGuard, OnceLock,
        atomic::{AtomicU16, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures::Stream;
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::error::RaknetError;
use crate::protocol::{
    constants::MAXIMUM_ORDERING_CHANNELS,
    reliability::Reliability,
    state::{DisconnectReason, Priority, SessionState},
};

use super::{Message, SessionTunables};

/// Payload handed to the session task for fragmentation.
#[derive(Debug)]
pub(crate) struct OutboundMessage {
    pub payload: Bytes,
    pub reliability: Reliability,
    pub priority: Priority,
    pub channel: u8,
}

/// Receiving ends consumed by the session task once it starts.
pub(crate) struct SessionRuntime {
    pub inbound_rx: mpsc::Receiver<Bytes>,
    pub outbound_rx: mpsc::Receiver<OutboundMessage>,
    pub deliver_tx: mpsc::Sender<Message>,
}

/// Shared view of one peer session.
///
/// Handshake handlers drive the state machine through it, the dispatcher
/// feeds it raw datagrams and the application sends and receives
/// messages with it. All protocol work happens on the session task.
pub struct SessionHandle {
    remote: SocketAddr,
    local: SocketAddr,
    protocol_version: u8,
    mtu: AtomicU16,
    guid: OnceLock<u64>,
    state: Mutex<SessionState>,
    close_reason: OnceLock<DisconnectReason>,
    last_activity: Mutex<Instant>,
    cancel: CancellationToken,
    inbound_tx: mpsc::Sender<Bytes>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    runtime: Mutex<Option<SessionRuntime>>,
    incoming: Mutex<Option<mpsc::Receiver<Message>>>,
}

impl SessionHandle {
    /// A fresh session in [`SessionState::Created`]. Its cancellation token
    /// is a child of `parent`.
    pub(crate) fn new(
        remote: SocketAddr,
        local: SocketAddr,
        protocol_version: u8,
        mtu: u16,
        tunables: &SessionTunables,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(tunables.queue_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(tunables.queue_capacity.max(1));
        let (deliver_tx, deliver_rx) = mpsc::channel(tunables.message_buffer.max(1));

        Arc::new(Self {
            remote,
            local,
            protocol_version,
            mtu: AtomicU16::new(mtu),
            guid: OnceLock::new(),
            state: Mutex::new(SessionState::Created),
            close_reason: OnceLock::new(),
            last_activity: Mutex::new(Instant::now()),
            cancel: parent.child_token(),
            inbound_tx,
            outbound_tx,
            runtime: Mutex::new(Some(SessionRuntime {
                inbound_rx,
                outbound_rx,
                deliver_tx,
            })),
            incoming: Mutex::new(Some(deliver_rx)),
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// RakNet protocol version the peer announced in its first request.
    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    pub fn mtu(&self) -> u16 {
        self.mtu.load(Ordering::Acquire)
    }

    pub(crate) fn set_mtu(&self, mtu: u16) {
        self.mtu.store(mtu, Ordering::Release);
    }

    /// Peer GUID, known from the second handshake request on.
    pub fn guid(&self) -> Option<u64> {
        self.guid.get().copied()
    }

    pub(crate) fn set_guid(&self, guid: u64) {
        let _ = self.guid.set(guid);
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Why the session closed, once it has.
    pub fn close_reason(&self) -> Option<DisconnectReason> {
        self.close_reason.get().copied()
    }

    /// Moves `from → to` atomically. The state is left untouched when the
    /// session is not in `from` or the step is not allowed.
    pub fn transition(&self, from: SessionState, to: SessionState) -> Result<(), RaknetError> {
        let mut state = lock(&self.state);
        if *state != from || !from.can_transition_to(to) {
            return Err(RaknetError::InvalidStateTransition { from: *state, to });
        }
        *state = to;
        drop(state);

        tracing::debug!(peer = %self.remote, %from, %to, "session state");
        Ok(())
    }

    /// Marks a session that never finished setting up and cancels its work.
    pub(crate) fn fail(&self) {
        {
            let mut state = lock(&self.state);
            if state.can_transition_to(SessionState::ConnectionFailed) {
                *state = SessionState::ConnectionFailed;
            }
        }
        tracing::debug!(peer = %self.remote, "session setup failed");
        self.cancel.cancel();
    }

    /// Closes the session. Returns `false` when it was already closed or
    /// failed. The session task sends a disconnection notification on its
    /// way out unless the peer initiated the close.
    pub fn close(&self, reason: DisconnectReason) -> bool {
        {
            let mut state = lock(&self.state);
            if !state.can_transition_to(SessionState::Closed) {
                return false;
            }
            *state = SessionState::Closed;
        }
        let _ = self.close_reason.set(reason);
        tracing::info!(peer = %self.remote, ?reason, "session closed");
        self.cancel.cancel();
        true
    }

    pub fn mark_active(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    /// Time since the last routed inbound datagram.
    pub fn idle(&self) -> Duration {
        lock(&self.last_activity).elapsed()
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Queues a message for the peer. Waits while the outbound queue is
    /// full and fails with [`RaknetError::Disconnected`] once the session
    /// is closed.
    pub async fn send(
        &self,
        payload: impl Into<Bytes>,
        reliability: Reliability,
        channel: u8,
        priority: Priority,
    ) -> Result<(), RaknetError> {
        if channel >= MAXIMUM_ORDERING_CHANNELS {
            return Err(RaknetError::InvalidOrderingChannel(channel));
        }
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let msg = OutboundMessage {
            payload: payload.into(),
            reliability,
            priority,
            channel,
        };
        tokio::select! {
            res = self.outbound_tx.send(msg) => res.map_err(|_| self.closed_error()),
            _ = self.cancel.cancelled() => Err(self.closed_error()),
        }
    }

    fn closed_error(&self) -> RaknetError {
        match self.close_reason() {
            Some(reason) => RaknetError::Disconnected(reason),
            None => RaknetError::ConnectionClosed,
        }
    }

    /// Messages from the peer. Handed out once; later calls return `None`.
    pub fn incoming(&self) -> Option<IncomingMessages> {
        lock(&self.incoming)
            .take()
            .map(|rx| IncomingMessages { rx })
    }

    /// Hands a raw online datagram to the session task without waiting.
    pub(crate) fn enqueue_datagram(&self, datagram: Bytes) -> bool {
        match self.inbound_tx.try_send(datagram) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(peer = %self.remote, "session inbound queue full, dropping datagram");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub(crate) fn take_runtime(&self) -> Option<SessionRuntime> {
        lock(&self.runtime).take()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("remote", &self.remote)
            .field("state", &self.state())
            .field("mtu", &self.mtu())
            .field("guid", &self.guid())
            .finish()
    }
}

/// Stream of messages delivered by one session.
pub struct IncomingMessages {
    rx: mpsc::Receiver<Message>,
}

impl IncomingMessages {
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Stream for IncomingMessages {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
