//! Sent-but-unacknowledged datagrams and their resend schedule.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::protocol::{
    ack::SequenceRange,
    constants::{DatagramFlags, RAKNET_DATAGRAM_HEADER_SIZE},
    datagram::{Datagram, DatagramPayload},
    encapsulated_packet::EncapsulatedPacket,
    types::{DatagramHeader, Sequence24},
};

#[derive(Debug, Clone)]
struct TrackedDatagram {
    flags: DatagramFlags,
    packets: Vec<EncapsulatedPacket>,
    size: usize,
    send_time: Instant,
    next_send: Instant,
    nacked: bool,
}

/// Resends produced by one flush.
#[derive(Debug, Default)]
pub struct Resends {
    pub datagrams: Vec<Datagram>,
    /// Bytes taken from the transmission budget by RTO resends.
    pub transmission_used: usize,
}

/// Datagrams holding reliable fragments, keyed by their sequence number.
/// Resends reuse the original sequence.
#[derive(Debug, Default)]
pub struct RetransmitQueue {
    entries: HashMap<Sequence24, TrackedDatagram>,
    order: VecDeque<Sequence24>,
    nack_bytes: usize,
}

impl RetransmitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes of datagrams currently marked as nacked.
    pub fn nack_bytes(&self) -> usize {
        self.nack_bytes
    }

    /// Keeps the reliable fragments of a freshly sent datagram. Returns
    /// `false` when there were none to keep.
    pub fn track(
        &mut self,
        seq: Sequence24,
        flags: DatagramFlags,
        packets: &[EncapsulatedPacket],
        now: Instant,
        rto: Duration,
    ) -> bool {
        let reliable: Vec<EncapsulatedPacket> = packets
            .iter()
            .filter(|p| p.reliability.is_reliable())
            .cloned()
            .collect();
        if reliable.is_empty() {
            return false;
        }
        let size = RAKNET_DATAGRAM_HEADER_SIZE + reliable.iter().map(EncapsulatedPacket::size).sum::<usize>();
        self.entries.insert(
            seq,
            TrackedDatagram {
                flags,
                packets: reliable,
                size,
                send_time: now,
                next_send: now + rto,
                nacked: false,
            },
        );
        self.order.push_back(seq);
        true
    }

    /// Tracked sequences inside `range`, in range order. Costs the smaller
    /// of the range width and the number of tracked datagrams.
    pub fn tracked_in(&self, range: &SequenceRange) -> Vec<Sequence24> {
        if range.count() as usize <= self.entries.len() {
            return range.iter().filter(|seq| self.entries.contains_key(seq)).collect();
        }
        let mut seqs: Vec<Sequence24> = self
            .entries
            .keys()
            .copied()
            .filter(|seq| range.contains(*seq))
            .collect();
        seqs.sort_unstable_by_key(|seq| range.start.distance_to(*seq));
        seqs
    }

    /// Drops an acknowledged datagram and returns its round-trip time.
    pub fn on_ack(&mut self, seq: Sequence24, now: Instant) -> Option<Duration> {
        let entry = self.entries.remove(&seq)?;
        if entry.nacked {
            self.nack_bytes -= entry.size;
        }
        self.trim_order();
        Some(now.saturating_duration_since(entry.send_time))
    }

    /// Marks a datagram for priority resend. Returns `false` for unknown or
    /// already nacked sequences.
    pub fn on_nack(&mut self, seq: Sequence24) -> bool {
        match self.entries.get_mut(&seq) {
            Some(entry) if !entry.nacked => {
                entry.nacked = true;
                self.nack_bytes += entry.size;
                true
            }
            _ => false,
        }
    }

    /// Nacked entries first, bounded by `retransmission_budget`, then entries
    /// whose timer expired, bounded by `transmission_budget`.
    pub fn collect_resends(
        &mut self,
        now: Instant,
        retransmission_budget: usize,
        transmission_budget: usize,
        rto: Duration,
    ) -> Resends {
        let mut out = Resends::default();
        let mut retransmit_left = retransmission_budget;
        let mut transmit_left = transmission_budget;

        for nacked_pass in [true, false] {
            for seq in &self.order {
                let Some(entry) = self.entries.get_mut(seq) else {
                    continue;
                };
                if nacked_pass != entry.nacked {
                    continue;
                }
                let budget = if nacked_pass {
                    &mut retransmit_left
                } else {
                    if entry.next_send > now {
                        continue;
                    }
                    &mut transmit_left
                };
                if entry.size > *budget {
                    continue;
                }
                *budget -= entry.size;
                if entry.nacked {
                    entry.nacked = false;
                    self.nack_bytes -= entry.size;
                } else {
                    out.transmission_used += entry.size;
                }
                entry.send_time = now;
                entry.next_send = now + rto;
                out.datagrams.push(Datagram {
                    header: DatagramHeader {
                        flags: entry.flags,
                        sequence: *seq,
                    },
                    payload: DatagramPayload::Packets(entry.packets.clone()),
                });
            }
        }
        out
    }

    fn trim_order(&mut self) {
        while let Some(front) = self.order.front() {
            if self.entries.contains_key(front) {
                break;
            }
            self.order.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{reliability::Reliability, state::Priority};
    use bytes::Bytes;

    const RTO: Duration = Duration::from_millis(100);

    fn frag(reliability: Reliability, len: usize) -> EncapsulatedPacket {
        let mut pkt = EncapsulatedPacket::new(reliability, Priority::Medium, Bytes::from(vec![1u8; len]));
        if reliability.is_reliable() {
            pkt.reliable_index = Some(Sequence24::new(0));
        }
        pkt
    }

    fn queue_with(seqs: &[u32], now: Instant) -> RetransmitQueue {
        let mut q = RetransmitQueue::new();
        for &s in seqs {
            // 4 + 3 + 3 + 90 = 100 bytes tracked
            q.track(
                Sequence24::new(s),
                DatagramFlags::VALID,
                &[frag(Reliability::Reliable, 90)],
                now,
                RTO,
            );
        }
        q
    }

    #[test]
    fn unreliable_only_datagrams_are_not_tracked() {
        let mut q = RetransmitQueue::new();
        let now = Instant::now();
        assert!(!q.track(
            Sequence24::new(0),
            DatagramFlags::VALID,
            &[frag(Reliability::Unreliable, 10)],
            now,
            RTO
        ));
        assert!(q.is_empty());
    }

    #[test]
    fn ack_removes_and_reports_rtt() {
        let t0 = Instant::now();
        let mut q = queue_with(&[0, 1], t0);
        let rtt = q.on_ack(Sequence24::new(0), t0 + Duration::from_millis(40));
        assert_eq!(rtt, Some(Duration::from_millis(40)));
        assert_eq!(q.len(), 1);
        assert_eq!(q.on_ack(Sequence24::new(0), t0), None);
    }

    #[test]
    fn nack_counts_bytes_once() {
        let t0 = Instant::now();
        let mut q = queue_with(&[3], t0);
        assert!(q.on_nack(Sequence24::new(3)));
        assert!(!q.on_nack(Sequence24::new(3)));
        assert!(!q.on_nack(Sequence24::new(9)));
        assert_eq!(q.nack_bytes(), 100);
        q.on_ack(Sequence24::new(3), t0);
        assert_eq!(q.nack_bytes(), 0);
    }

    #[test]
    fn nacked_entries_resend_with_same_sequence() {
        let t0 = Instant::now();
        let mut q = queue_with(&[5, 6], t0);
        q.on_nack(Sequence24::new(6));

        let resends = q.collect_resends(t0, q.nack_bytes(), 0, RTO);
        assert_eq!(resends.datagrams.len(), 1);
        assert_eq!(resends.datagrams[0].header.sequence, Sequence24::new(6));
        assert_eq!(resends.transmission_used, 0);
        assert_eq!(q.nack_bytes(), 0);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn expired_entries_resend_within_transmission_budget() {
        let t0 = Instant::now();
        let mut q = queue_with(&[0, 1, 2], t0);

        assert!(q.collect_resends(t0 + Duration::from_millis(50), 0, 1000, RTO)
            .datagrams
            .is_empty());

        let later = t0 + RTO;
        let resends = q.collect_resends(later, 0, 250, RTO);
        let seqs: Vec<u32> = resends.datagrams.iter().map(|d| d.header.sequence.value()).collect();
        assert_eq!(seqs, vec![0, 1]);
        assert_eq!(resends.transmission_used, 200);

        // timers of resent entries were refreshed, seq 2 is still due
        let again = q.collect_resends(later, 0, 1000, RTO);
        let seqs: Vec<u32> = again.datagrams.iter().map(|d| d.header.sequence.value()).collect();
        assert_eq!(seqs, vec![2]);
    }

    #[test]
    fn tracked_in_walks_whichever_side_is_smaller() {
        let t0 = Instant::now();
        let q = queue_with(&[2, 4, 9, 0xFF_FFFE], t0);

        let narrow = SequenceRange::new(Sequence24::new(3), Sequence24::new(4));
        assert_eq!(q.tracked_in(&narrow), vec![Sequence24::new(4)]);

        let wide = SequenceRange::new(Sequence24::new(0xFF_FFF0), Sequence24::new(8));
        assert_eq!(
            q.tracked_in(&wide),
            vec![Sequence24::new(0xFF_FFFE), Sequence24::new(2), Sequence24::new(4)]
        );

        let whole = SequenceRange::new(Sequence24::new(1), Sequence24::new(0));
        assert_eq!(q.tracked_in(&whole).len(), 4);
    }

    #[test]
    fn resend_keeps_only_reliable_fragments() {
        let t0 = Instant::now();
        let mut q = RetransmitQueue::new();
        q.track(
            Sequence24::new(1),
            DatagramFlags::VALID,
            &[frag(Reliability::Unreliable, 10), frag(Reliability::ReliableOrdered, 5)],
            t0,
            RTO,
        );
        let resends = q.collect_resends(t0 + RTO, 0, usize::MAX, RTO);
        match &resends.datagrams[0].payload {
            DatagramPayload::Packets(packets) => {
                assert_eq!(packets.len(), 1);
                assert_eq!(packets[0].reliability, Reliability::ReliableOrdered);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
