//! The task that owns a [`Session`] once the offline handshake is done.

use std::sync::Arc;

use bytes::Bytes;
use tokio::{
    sync::mpsc,
    time::{self, Instant, MissedTickBehavior},
};

use crate::error::RaknetError;
use crate::protocol::{
    constants::{TICK_INTERVAL, ip_header_size},
    datagram::Datagram,
    encapsulated_packet::EncapsulatedPacket,
    packet::{
        ConnectedPing, ConnectedPong, ConnectionRequest, ConnectionRequestAccepted,
        DisconnectionNotification, NewIncomingConnection, Packet, RaknetPacket,
    },
    reliability::Reliability,
    state::{DisconnectReason, Priority, SessionState},
    types::RaknetTime,
};
use crate::transport::OutboundDatagram;

use super::{Message, OutboundMessage, Session, SessionHandle, SessionRuntime, SessionTunables};

/// IDs the session answers itself instead of delivering.
const CONTROL_IDS: [u8; 5] = [
    ConnectedPing::ID,
    ConnectedPong::ID,
    ConnectionRequest::ID,
    NewIncomingConnection::ID,
    DisconnectionNotification::ID,
];

pub(crate) struct SessionDriver {
    handle: Arc<SessionHandle>,
    session: Session,
    runtime: SessionRuntime,
    socket_tx: mpsc::Sender<OutboundDatagram>,
    accept_tx: mpsc::Sender<Arc<SessionHandle>>,
    tunables: SessionTunables,
}

impl SessionDriver {
    pub(crate) fn new(
        handle: Arc<SessionHandle>,
        runtime: SessionRuntime,
        socket_tx: mpsc::Sender<OutboundDatagram>,
        accept_tx: mpsc::Sender<Arc<SessionHandle>>,
        tunables: &SessionTunables,
    ) -> Self {
        let session = Session::new(
            handle.mtu(),
            ip_header_size(&handle.remote_addr()),
            tunables,
        );
        Self {
            handle,
            session,
            runtime,
            socket_tx,
            accept_tx,
            tunables: tunables.clone(),
        }
    }

    /// Runs until the session is closed or the listener shuts down.
    pub(crate) async fn run(mut self) {
        let cancel = self.handle.cancellation().clone();
        let mut tick = time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let ping_every = self.tunables.ping_interval;
        let mut ping = time::interval_at(Instant::now() + ping_every, ping_every);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(raw) = self.runtime.inbound_rx.recv() => self.on_datagram(raw),
                Some(msg) = self.runtime.outbound_rx.recv() => self.on_outbound(msg),
                _ = tick.tick() => self.flush().await,
                _ = ping.tick() => self.send_ping(),
            }
            if self.session.flush_requested() {
                self.flush().await;
            }
        }

        self.shutdown();
    }

    fn on_datagram(&mut self, mut raw: Bytes) {
        let datagram = match Datagram::decode_with_trailing(&mut raw) {
            Ok((datagram, trailing)) => {
                if let Some(trailing) = trailing {
                    tracing::debug!(peer = %self.handle.remote_addr(), len = trailing.len, "trailing bytes after last fragment");
                }
                datagram
            }
            Err(e) => {
                tracing::debug!(peer = %self.handle.remote_addr(), error = %e, "dropping malformed datagram");
                return;
            }
        };
        let now = Instant::now().into_std();
        for pkt in self.session.handle_datagram(datagram, now) {
            match RaknetPacket::peek_id(&pkt.payload) {
                Some(id) if CONTROL_IDS.contains(&id) => self.on_control(pkt.payload),
                _ => self.deliver(pkt),
            }
        }
    }

    fn on_control(&mut self, mut payload: Bytes) {
        let packet = match RaknetPacket::decode(&mut payload) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(peer = %self.handle.remote_addr(), error = %e, "bad control packet");
                return;
            }
        };

        match packet {
            RaknetPacket::ConnectedPing(ping) => {
                let pong = ConnectedPong {
                    ping_time: ping.ping_time,
                    pong_time: RaknetTime::now(),
                };
                self.queue_control(&pong, Reliability::Unreliable);
            }
            RaknetPacket::ConnectedPong(pong) => {
                tracing::trace!(event = "connected_pong", ping_time = pong.ping_time.0);
            }
            RaknetPacket::ConnectionRequest(req) => self.accept_connection(&req),
            RaknetPacket::NewIncomingConnection(_) => {
                match self
                    .handle
                    .transition(SessionState::Initialized, SessionState::Connected)
                {
                    Ok(()) => {
                        tracing::info!(peer = %self.handle.remote_addr(), "session connected");
                        match self.accept_tx.try_send(self.handle.clone()) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                tracing::warn!(peer = %self.handle.remote_addr(), "accept queue full");
                                self.handle.close(DisconnectReason::NoFreeIncomingConnections);
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                self.handle.close(DisconnectReason::ShuttingDown);
                            }
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "ignoring new incoming connection"),
                }
            }
            RaknetPacket::DisconnectionNotification(_) => {
                self.handle.close(DisconnectReason::ClosedByRemotePeer);
            }
            other => tracing::trace!(event = "control_ignored", id = other.id()),
        }
    }

    fn accept_connection(&mut self, req: &ConnectionRequest) {
        if self.handle.state() != SessionState::Initialized {
            tracing::debug!(
                peer = %self.handle.remote_addr(),
                state = ?self.handle.state(),
                "connection request outside handshake"
            );
            return;
        }
        if self.handle.guid() != Some(req.client_guid) {
            tracing::debug!(peer = %self.handle.remote_addr(), guid = req.client_guid, "connection request guid differs");
        }
        let accepted = ConnectionRequestAccepted {
            client_addr: self.handle.remote_addr(),
            system_index: 0,
            request_timestamp: req.timestamp,
            accepted_timestamp: RaknetTime::now(),
        };
        self.queue_control(&accepted, Reliability::Reliable);
    }

    /// Never waits: a reader that falls `message_buffer` messages behind
    /// loses the session.
    fn deliver(&mut self, pkt: EncapsulatedPacket) {
        if self.handle.state() != SessionState::Connected {
            tracing::debug!(peer = %self.handle.remote_addr(), "dropping payload before connection");
            return;
        }
        match self.runtime.deliver_tx.try_send(Message::from(pkt)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(peer = %self.handle.remote_addr(), "delivery queue full");
                self.handle.close(DisconnectReason::QueueTooLong);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!(event = "delivery_receiver_dropped");
            }
        }
    }

    fn on_outbound(&mut self, msg: OutboundMessage) {
        if let Err(e) = self
            .session
            .queue(msg.payload, msg.reliability, msg.priority, msg.channel)
        {
            tracing::debug!(peer = %self.handle.remote_addr(), error = %e, "rejected outbound message");
        }
    }

    fn send_ping(&mut self) {
        if !self.handle.state().is_online() {
            return;
        }
        let ping = ConnectedPing {
            ping_time: RaknetTime::now(),
        };
        self.queue_control(&ping, Reliability::Reliable);
    }

    fn queue_control(&mut self, packet: &impl Packet, reliability: Reliability) {
        let queued = packet
            .to_bytes()
            .map_err(RaknetError::from)
            .and_then(|payload| {
                self.session
                    .queue(payload, reliability, Priority::Immediate, 0)
            });
        if let Err(e) = queued {
            tracing::debug!(peer = %self.handle.remote_addr(), error = %e, "failed to queue control packet");
        }
    }

    async fn flush(&mut self) {
        let peer = self.handle.remote_addr();
        match self.session.poll_transmit(Instant::now().into_std()) {
            Ok(datagrams) => {
                for payload in datagrams {
                    if self
                        .socket_tx
                        .send(OutboundDatagram { peer, payload })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
            Err(e) => tracing::warn!(%peer, error = %e, "flush failed"),
        }
    }

    /// Best-effort goodbye, then the queues are dropped with `self`.
    fn shutdown(mut self) {
        self.handle.close(DisconnectReason::ShuttingDown);
        let reason = self
            .handle
            .close_reason()
            .unwrap_or(DisconnectReason::Disconnected);
        if reason == DisconnectReason::ClosedByRemotePeer
            || self.handle.state() != SessionState::Closed
        {
            return;
        }

        self.queue_control(&DisconnectionNotification { reason }, Reliability::Reliable);
        let peer = self.handle.remote_addr();
        match self.session.poll_transmit(Instant::now().into_std()) {
            Ok(datagrams) => {
                for payload in datagrams {
                    if self
                        .socket_tx
                        .try_send(OutboundDatagram { peer, payload })
                        .is_err()
                    {
                        break;
                    }
                }
            }
            Err(e) => tracing::debug!(%peer, error = %e, "disconnect notification not sent"),
        }
        tracing::debug!(%peer, ?reason, "session task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        constants::DatagramFlags,
        datagram::DatagramPayload,
        types::{DatagramHeader, Sequence24},
    };
    use bytes::BytesMut;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        handle: Arc<SessionHandle>,
        socket_rx: mpsc::Receiver<OutboundDatagram>,
        accept_tx: mpsc::Sender<Arc<SessionHandle>>,
        accept_rx: mpsc::Receiver<Arc<SessionHandle>>,
        next_seq: u32,
    }

    fn start() -> Harness {
        start_with(SessionTunables::default(), 4)
    }

    fn start_with(tunables: SessionTunables, accept_capacity: usize) -> Harness {
        let handle = SessionHandle::new(
            "127.0.0.1:50000".parse().unwrap(),
            "127.0.0.1:19132".parse().unwrap(),
            11,
            1400,
            &tunables,
            &CancellationToken::new(),
        );
        handle
            .transition(SessionState::Created, SessionState::Initializing)
            .unwrap();
        handle
            .transition(SessionState::Initializing, SessionState::Initialized)
            .unwrap();
        handle.set_guid(7);

        let (socket_tx, socket_rx) = mpsc::channel(64);
        let (accept_tx, accept_rx) = mpsc::channel(accept_capacity);
        let runtime = handle.take_runtime().unwrap();
        let driver = SessionDriver::new(
            handle.clone(),
            runtime,
            socket_tx,
            accept_tx.clone(),
            &tunables,
        );
        tokio::spawn(driver.run());

        Harness {
            handle,
            socket_rx,
            accept_tx,
            accept_rx,
            next_seq: 0,
        }
    }

    impl Harness {
        fn send_reliable(&mut self, payload: Bytes) {
            let seq = self.next_seq;
            self.next_seq += 1;
            let mut pkt = EncapsulatedPacket::new(Reliability::Reliable, Priority::Medium, payload);
            pkt.reliable_index = Some(Sequence24::new(seq));
            let datagram = Datagram {
                header: DatagramHeader::data(DatagramFlags::empty(), Sequence24::new(seq)),
                payload: DatagramPayload::Packets(vec![pkt]),
            };
            let mut buf = BytesMut::new();
            datagram.encode(&mut buf).unwrap();
            assert!(self.handle.enqueue_datagram(buf.freeze()));
        }

        /// Next fragment payload the driver sent whose ID is `id`.
        async fn expect_packet(&mut self, id: u8) -> Bytes {
            loop {
                let out = tokio::time::timeout(Duration::from_secs(2), self.socket_rx.recv())
                    .await
                    .expect("driver output")
                    .expect("socket queue open");
                let Ok(datagram) = Datagram::decode(&mut out.payload.clone()) else {
                    continue;
                };
                if let DatagramPayload::Packets(packets) = datagram.payload
                    && let Some(pkt) = packets.into_iter().find(|p| p.payload.first() == Some(&id))
                {
                    return pkt.payload;
                }
            }
        }
    }

    fn connection_request() -> Bytes {
        ConnectionRequest {
            client_guid: 7,
            timestamp: RaknetTime(1234),
            secure: false,
        }
        .to_bytes()
        .unwrap()
    }

    fn new_incoming_connection() -> Bytes {
        NewIncomingConnection {
            server_addr: "127.0.0.1:19132".parse().unwrap(),
            request_timestamp: RaknetTime(1),
            accepted_timestamp: RaknetTime(2),
        }
        .to_bytes()
        .unwrap()
    }

    #[tokio::test]
    async fn online_handshake_then_delivery() {
        let mut h = start();

        h.send_reliable(connection_request());
        let mut accepted = h.expect_packet(ConnectionRequestAccepted::ID).await;
        match RaknetPacket::decode(&mut accepted).unwrap() {
            RaknetPacket::ConnectionRequestAccepted(acc) => {
                assert_eq!(acc.request_timestamp, RaknetTime(1234));
                assert_eq!(acc.client_addr, h.handle.remote_addr());
            }
            other => panic!("unexpected packet {:#04x}", other.id()),
        }

        h.send_reliable(new_incoming_connection());
        let connected = tokio::time::timeout(Duration::from_secs(2), h.accept_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&connected, &h.handle));
        assert_eq!(h.handle.state(), SessionState::Connected);

        let mut incoming = h.handle.incoming().unwrap();
        h.send_reliable(Bytes::from_static(b"\xFEgame"));
        let msg = tokio::time::timeout(Duration::from_secs(2), incoming.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload.as_ref(), b"\xFEgame");
    }

    #[tokio::test]
    async fn connected_ping_is_answered() {
        let mut h = start();
        let ping = ConnectedPing {
            ping_time: RaknetTime(99),
        }
        .to_bytes()
        .unwrap();
        h.send_reliable(ping);
        let mut pong = h.expect_packet(ConnectedPong::ID).await;
        match RaknetPacket::decode(&mut pong).unwrap() {
            RaknetPacket::ConnectedPong(p) => assert_eq!(p.ping_time, RaknetTime(99)),
            other => panic!("unexpected packet {:#04x}", other.id()),
        }
    }

    #[tokio::test]
    async fn payload_before_connected_is_not_delivered() {
        let mut h = start();
        let mut incoming = h.handle.incoming().unwrap();
        h.send_reliable(Bytes::from_static(b"\xFEearly"));
        let got = tokio::time::timeout(Duration::from_millis(200), incoming.next()).await;
        assert!(got.is_err());
    }

    #[tokio::test]
    async fn remote_disconnect_closes_without_reply() {
        let mut h = start();
        let bye = DisconnectionNotification {
            reason: DisconnectReason::Disconnected,
        }
        .to_bytes()
        .unwrap();
        h.send_reliable(bye);
        h.handle.cancellation().cancelled().await;
        assert_eq!(h.handle.state(), SessionState::Closed);
        assert_eq!(
            h.handle.close_reason(),
            Some(DisconnectReason::ClosedByRemotePeer)
        );
    }

    #[tokio::test]
    async fn local_close_sends_notification() {
        let mut h = start();
        h.handle.close(DisconnectReason::Disconnected);
        let mut bye = h.expect_packet(DisconnectionNotification::ID).await;
        match RaknetPacket::decode(&mut bye).unwrap() {
            RaknetPacket::DisconnectionNotification(n) => {
                assert_eq!(n.reason, DisconnectReason::Disconnected)
            }
            other => panic!("unexpected packet {:#04x}", other.id()),
        }
    }

    fn expect_notification(bye: &mut Bytes) -> DisconnectReason {
        match RaknetPacket::decode(bye).unwrap() {
            RaknetPacket::DisconnectionNotification(n) => n.reason,
            other => panic!("unexpected packet {:#04x}", other.id()),
        }
    }

    #[tokio::test]
    async fn full_accept_queue_closes_the_session() {
        let mut h = start_with(SessionTunables::default(), 1);
        let other = SessionHandle::new(
            "127.0.0.1:50001".parse().unwrap(),
            "127.0.0.1:19132".parse().unwrap(),
            11,
            1400,
            &SessionTunables::default(),
            &CancellationToken::new(),
        );
        h.accept_tx.try_send(other).unwrap();

        h.send_reliable(new_incoming_connection());
        let mut bye = h.expect_packet(DisconnectionNotification::ID).await;
        assert_eq!(
            expect_notification(&mut bye),
            DisconnectReason::NoFreeIncomingConnections
        );
        assert_eq!(h.handle.state(), SessionState::Closed);
        assert!(!Arc::ptr_eq(&h.accept_rx.try_recv().unwrap(), &h.handle));
        assert!(h.accept_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_reader_loses_the_session_instead_of_stalling_it() {
        let tunables = SessionTunables {
            message_buffer: 1,
            ..SessionTunables::default()
        };
        let mut h = start_with(tunables, 4);
        let _incoming = h.handle.incoming().unwrap();

        h.send_reliable(new_incoming_connection());
        tokio::time::timeout(Duration::from_secs(2), h.accept_rx.recv())
            .await
            .unwrap()
            .unwrap();
        h.send_reliable(Bytes::from_static(b"\xFEone"));
        h.send_reliable(Bytes::from_static(b"\xFEtwo"));

        let mut bye = h.expect_packet(DisconnectionNotification::ID).await;
        assert_eq!(expect_notification(&mut bye), DisconnectReason::QueueTooLong);
        assert_eq!(h.handle.close_reason(), Some(DisconnectReason::QueueTooLong));
    }
}
