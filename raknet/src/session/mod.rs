//! RakNet per-peer session state and reliability logic.
//!
//! [`Session`] is the synchronous protocol core owned by one driver task.
//! It manages:
//! - Fragmentation on send and split reassembly on receive
//! - Reliability (duplicate filtering, ACK/NACK generation, resends)
//! - Congestion control (sliding window) and datagram batching
//!
//! [`SessionHandle`] is the shared, thread-safe face of a session: its
//! state machine, activity clock and queues.

pub mod ack_queue;
pub mod batcher;
mod driver;
pub mod fragment;
mod handle;
mod reliable_tracker;
pub mod retransmit;
pub mod sliding_window;
pub mod split_assembler;
mod watchdog;

pub(crate) use driver::SessionDriver;
pub use handle::{IncomingMessages, SessionHandle};
pub(crate) use handle::{OutboundMessage, SessionRuntime};
pub(crate) use watchdog::run_watchdog;

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};

use crate::error::RaknetError;
use crate::protocol::{
    ack::{AckNackPayload, SequenceRange},
    constants::{self, MAX_ACK_SEQUENCES},
    datagram::{Datagram, DatagramPayload},
    encapsulated_packet::EncapsulatedPacket,
    reliability::Reliability,
    state::Priority,
    types::{DatagramHeader, Sequence24},
};

use ack_queue::AckQueue;
use batcher::{DatagramBatcher, RejectReason, Rejected};
use fragment::FragmentAssembler;
use reliable_tracker::ReliableTracker;
use retransmit::RetransmitQueue;
use sliding_window::SlidingWindow;
use split_assembler::SplitAssembler;

/// Application payload received from, or destined for, a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub payload: Bytes,
    pub reliability: Reliability,
    /// Ordering channel; 0 for kinds that carry none.
    pub channel: u8,
}

impl From<EncapsulatedPacket> for Message {
    fn from(pkt: EncapsulatedPacket) -> Self {
        Self {
            channel: pkt.ordering_channel.unwrap_or(0),
            reliability: pkt.reliability,
            payload: pkt.payload,
        }
    }
}

/// Per-session limits, derived from the listener configuration.
#[derive(Debug, Clone)]
pub struct SessionTunables {
    pub ack_delay: Duration,
    pub ack_queue_capacity: usize,
    pub reliable_window: u32,
    pub max_split_parts: u32,
    pub max_concurrent_splits: usize,
    pub split_timeout: Duration,
    /// Bound of the inbound datagram and outbound message queues.
    pub queue_capacity: usize,
    /// Bound of the channel delivering messages to the application.
    pub message_buffer: usize,
    pub ping_interval: Duration,
    pub max_inactivity: Duration,
}

impl Default for SessionTunables {
    fn default() -> Self {
        Self {
            ack_delay: Duration::from_millis(constants::CC_SYN),
            ack_queue_capacity: 1024,
            reliable_window: MAX_ACK_SEQUENCES as u32,
            max_split_parts: 8192,
            max_concurrent_splits: 256,
            split_timeout: Duration::from_secs(30),
            queue_capacity: 1024,
            message_buffer: 1024,
            ping_interval: constants::DEFAULT_PING_INTERVAL,
            max_inactivity: constants::DEFAULT_MAX_INACTIVITY,
        }
    }
}

pub struct Session {
    datagram_mtu: usize,
    max_fragment: usize,

    fragments: FragmentAssembler,
    window: SlidingWindow,
    retransmit: RetransmitQueue,
    outgoing: [VecDeque<EncapsulatedPacket>; Priority::COUNT],
    outgoing_acks: AckQueue,
    outgoing_nacks: AckQueue,

    datagram_read_index: Sequence24,
    datagram_write_index: Sequence24,
    split_assembler: SplitAssembler,
    reliable_tracker: ReliableTracker,
    flush_requested: bool,
}

impl Session {
    /// `mtu` is the negotiated MTU; `ip_header` the IP header size of the
    /// peer's address family.
    pub fn new(mtu: u16, ip_header: usize, tunables: &SessionTunables) -> Self {
        Self {
            datagram_mtu: fragment::datagram_mtu(mtu, ip_header),
            max_fragment: fragment::max_fragment_length(mtu, ip_header),
            fragments: FragmentAssembler::new(),
            window: SlidingWindow::new(mtu as usize, tunables.ack_delay),
            retransmit: RetransmitQueue::new(),
            outgoing: Default::default(),
            outgoing_acks: AckQueue::new(tunables.ack_queue_capacity),
            outgoing_nacks: AckQueue::new(tunables.ack_queue_capacity),
            datagram_read_index: Sequence24::new(0),
            datagram_write_index: Sequence24::new(0),
            split_assembler: SplitAssembler::new(
                tunables.split_timeout,
                tunables.max_split_parts,
                tunables.max_concurrent_splits,
            ),
            reliable_tracker: ReliableTracker::new(tunables.reliable_window),
            flush_requested: false,
        }
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    /// Datagrams sent but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.retransmit.len()
    }

    /// Fragments waiting for bandwidth.
    pub fn queued(&self) -> usize {
        self.outgoing.iter().map(VecDeque::len).sum()
    }

    /// Set when an `Immediate` payload is waiting for a flush.
    pub fn flush_requested(&self) -> bool {
        self.flush_requested
    }

    /// Fragments `payload` and queues the parts under `priority`.
    pub fn queue(
        &mut self,
        payload: Bytes,
        reliability: Reliability,
        priority: Priority,
        channel: u8,
    ) -> Result<(), RaknetError> {
        let parts =
            self.fragments
                .assemble(payload, reliability, priority, channel, self.max_fragment)?;
        self.outgoing[priority.index()].extend(parts);
        if priority == Priority::Immediate {
            self.flush_requested = true;
        }
        Ok(())
    }

    /// Feeds one decoded online datagram and returns the fragments that
    /// are complete and new.
    #[tracing::instrument(skip_all, level = "trace")]
    pub fn handle_datagram(&mut self, datagram: Datagram, now: Instant) -> Vec<EncapsulatedPacket> {
        match datagram.payload {
            DatagramPayload::Packets(packets) => {
                self.process_datagram_sequence(datagram.header.sequence);
                self.window.on_packet_received(now);
                packets
                    .into_iter()
                    .filter_map(|pkt| self.accept_fragment(pkt, now))
                    .collect()
            }
            DatagramPayload::Ack(payload) => {
                self.handle_ack(&payload, now);
                Vec::new()
            }
            DatagramPayload::Nack(payload) => {
                self.handle_nack(&payload);
                Vec::new()
            }
        }
    }

    /// Queues an ACK for `seq` and NACKs for any gap before it.
    fn process_datagram_sequence(&mut self, seq: Sequence24) {
        let expected = self.datagram_read_index;

        if seq < expected {
            tracing::trace!(event = "ack_out_of_order", seq = seq.value());
            self.outgoing_acks.push(SequenceRange::single(seq));
            return;
        }

        self.datagram_read_index = seq.next();

        if seq != expected {
            let last_missing = seq.prev();
            let mut start = expected;
            tracing::trace!(event = "datagram_gap", missing = expected.distance_to(seq));
            loop {
                let span = start
                    .distance_to(last_missing)
                    .min(MAX_ACK_SEQUENCES as u32 - 1);
                let end = start.wrapping_add(span);
                self.outgoing_nacks.push(SequenceRange::new(start, end));
                if end == last_missing {
                    break;
                }
                start = end.next();
            }
        }

        self.outgoing_acks.push(SequenceRange::single(seq));
    }

    fn accept_fragment(&mut self, pkt: EncapsulatedPacket, now: Instant) -> Option<EncapsulatedPacket> {
        let reliable_index = pkt.reliable_index.filter(|_| pkt.reliability.is_reliable());
        if let Some(index) = reliable_index
            && self.reliable_tracker.contains(index)
        {
            tracing::trace!(event = "duplicate_reliable", index = index.value());
            return None;
        }

        match self.split_assembler.add(pkt, now) {
            Ok(complete) => {
                if let Some(index) = reliable_index {
                    self.reliable_tracker.insert(index);
                }
                complete
            }
            Err(e) => {
                tracing::debug!(error = %e, "dropping split fragment");
                None
            }
        }
    }

    fn handle_ack(&mut self, payload: &AckNackPayload, now: Instant) {
        for range in &payload.ranges {
            if self.retransmit.is_empty() {
                break;
            }
            for seq in self.retransmit.tracked_in(range) {
                if let Some(rtt) = self.retransmit.on_ack(seq, now) {
                    self.window.on_ack(rtt, seq, self.datagram_write_index);
                }
            }
        }
    }

    fn handle_nack(&mut self, payload: &AckNackPayload) {
        let mut lost = false;
        for range in &payload.ranges {
            if self.retransmit.is_empty() {
                break;
            }
            for seq in self.retransmit.tracked_in(range) {
                lost |= self.retransmit.on_nack(seq);
            }
        }
        if lost {
            self.window.on_nak();
        }
    }

    /// One flush: ACKs, NACKs, resends, then new data within the
    /// congestion budget. Returns encoded datagrams ready for the socket.
    #[tracing::instrument(skip_all, level = "trace")]
    pub fn poll_transmit(&mut self, now: Instant) -> Result<Vec<Bytes>, RaknetError> {
        self.flush_requested = false;
        let mut out = Vec::new();

        let expired = self.split_assembler.prune(now);
        if expired > 0 {
            tracing::debug!(expired, "split reassemblies timed out");
        }

        if !self.outgoing_acks.is_empty() && self.window.should_send_acks(now) {
            while let Some(payload) = self.outgoing_acks.pop_for_mtu(self.datagram_mtu) {
                out.push(encode(&Datagram::ack(payload))?);
            }
            self.window.on_send_ack();
        }
        while let Some(payload) = self.outgoing_nacks.pop_for_mtu(self.datagram_mtu) {
            out.push(encode(&Datagram::nack(payload))?);
        }

        let nack_bytes = self.retransmit.nack_bytes();
        let rto = self.window.rto_for_retransmission();
        let transmission = self.window.transmission_bandwidth(nack_bytes);
        let resends = self.retransmit.collect_resends(
            now,
            self.window.retransmission_bandwidth(nack_bytes),
            transmission,
            rto,
        );
        if !resends.datagrams.is_empty() {
            tracing::trace!(event = "resend", datagrams = resends.datagrams.len());
            self.window.on_resend(self.datagram_write_index);
            for datagram in &resends.datagrams {
                out.push(encode(datagram)?);
            }
        }

        let budget = transmission.saturating_sub(resends.transmission_used);
        let mut batcher = DatagramBatcher::new(self.datagram_mtu, budget);
        let mut batches = Vec::new();
        'drain: for queue in &mut self.outgoing {
            while let Some(fragment) = queue.pop_front() {
                match batcher.push(fragment, &mut batches) {
                    Ok(()) => {}
                    Err(Rejected {
                        fragment,
                        reason: RejectReason::BandwidthExhausted,
                    }) => {
                        queue.push_front(fragment);
                        break 'drain;
                    }
                    Err(Rejected {
                        fragment,
                        reason: RejectReason::FragmentTooLarge,
                    }) => {
                        tracing::debug!(size = fragment.size(), "dropping oversized fragment");
                    }
                }
            }
        }
        batcher.finish(&mut batches);

        for batch in batches {
            let seq = self.datagram_write_index;
            self.datagram_write_index = seq.next();
            let datagram = Datagram {
                header: DatagramHeader::data(batch.flags, seq),
                payload: DatagramPayload::Packets(batch.packets),
            };
            out.push(encode(&datagram)?);
            if let DatagramPayload::Packets(packets) = &datagram.payload {
                self.retransmit.track(seq, datagram.header.flags, packets, now, rto);
            }
        }

        Ok(out)
    }
}

fn encode(datagram: &Datagram) -> Result<Bytes, RaknetError> {
    let mut buf = BytesMut::with_capacity(datagram.size());
    datagram.encode(&mut buf)?;
    Ok(buf.freeze())
}
