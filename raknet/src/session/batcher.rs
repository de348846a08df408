//! Greedy packing of fragments into MTU-bounded datagrams.

use crate::protocol::{
    constants::{DatagramFlags, RAKNET_DATAGRAM_HEADER_SIZE},
    encapsulated_packet::EncapsulatedPacket,
};

/// Fragments destined for one datagram, before a sequence is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub flags: DatagramFlags,
    pub packets: Vec<EncapsulatedPacket>,
}

impl Batch {
    pub fn size(&self) -> usize {
        RAKNET_DATAGRAM_HEADER_SIZE + self.packets.iter().map(EncapsulatedPacket::size).sum::<usize>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Bigger than an empty datagram; it should have been split upstream.
    FragmentTooLarge,
    /// The pass budget is spent; retry on the next pass.
    BandwidthExhausted,
}

/// A fragment handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub fragment: EncapsulatedPacket,
    pub reason: RejectReason,
}

/// Packs one pass worth of fragments.
///
/// The bandwidth budget covers the whole pass: flushing a datagram resets
/// the accumulator, never the remaining budget. The caller must call
/// [`DatagramBatcher::finish`] once the pass is drained.
#[derive(Debug)]
pub struct DatagramBatcher {
    mtu: usize,
    remaining: usize,
    running_size: usize,
    any_split: bool,
    packets: Vec<EncapsulatedPacket>,
}

impl DatagramBatcher {
    /// `mtu` is the datagram payload limit, i.e. without UDP/IP headers.
    pub fn new(mtu: usize, budget: usize) -> Self {
        Self {
            mtu,
            remaining: budget,
            running_size: RAKNET_DATAGRAM_HEADER_SIZE,
            any_split: false,
            packets: Vec::new(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn push(
        &mut self,
        fragment: EncapsulatedPacket,
        out: &mut Vec<Batch>,
    ) -> Result<(), Rejected> {
        let size = fragment.size();
        if size + RAKNET_DATAGRAM_HEADER_SIZE > self.mtu {
            return Err(Rejected {
                fragment,
                reason: RejectReason::FragmentTooLarge,
            });
        }
        if size > self.remaining {
            return Err(Rejected {
                fragment,
                reason: RejectReason::BandwidthExhausted,
            });
        }
        if self.running_size + size > self.mtu {
            self.flush(out);
        }

        self.any_split |= fragment.is_split();
        self.remaining -= size;
        self.running_size += size;
        self.packets.push(fragment);
        Ok(())
    }

    pub fn finish(mut self, out: &mut Vec<Batch>) {
        self.flush(out);
    }

    fn flush(&mut self, out: &mut Vec<Batch>) {
        if self.packets.is_empty() {
            return;
        }
        let mut flags = DatagramFlags::VALID;
        if self.any_split {
            flags |= DatagramFlags::CONTINUOUS_SEND;
        }
        out.push(Batch {
            flags,
            packets: std::mem::take(&mut self.packets),
        });
        self.running_size = RAKNET_DATAGRAM_HEADER_SIZE;
        self.any_split = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        encapsulated_packet::SplitInfo, reliability::Reliability, state::Priority,
    };
    use bytes::Bytes;
    use rand::Rng;

    fn unreliable(len: usize) -> EncapsulatedPacket {
        EncapsulatedPacket::new(Reliability::Unreliable, Priority::Medium, Bytes::from(vec![0u8; len]))
    }

    #[test]
    fn packs_until_mtu_then_starts_new_datagram() {
        // each fragment is 3 + 97 = 100 bytes
        let mut batcher = DatagramBatcher::new(4 + 250, usize::MAX);
        let mut out = Vec::new();
        for _ in 0..5 {
            batcher.push(unreliable(97), &mut out).unwrap();
        }
        batcher.finish(&mut out);

        let counts: Vec<usize> = out.iter().map(|b| b.packets.len()).collect();
        assert_eq!(counts, vec![2, 2, 1]);
        assert!(out.iter().all(|b| b.size() <= 254));
        assert!(out.iter().all(|b| b.flags == DatagramFlags::VALID));
    }

    #[test]
    fn random_streams_never_exceed_mtu_or_budget() {
        let mut rng = rand::rng();
        for _ in 0..50 {
            let mtu = rng.random_range(100..1500);
            let budget = rng.random_range(0..20_000);
            let mut batcher = DatagramBatcher::new(mtu, budget);
            let mut out = Vec::new();
            let mut accepted = 0;
            for _ in 0..100 {
                let len = rng.random_range(0..mtu);
                match batcher.push(unreliable(len), &mut out) {
                    Ok(()) => accepted += 3 + len,
                    Err(rejected) => {
                        let too_large = 3 + len + 4 > mtu;
                        assert_eq!(rejected.reason == RejectReason::FragmentTooLarge, too_large);
                    }
                }
            }
            batcher.finish(&mut out);
            assert!(out.iter().all(|b| b.size() <= mtu));
            assert!(accepted <= budget);
            let total: usize = out.iter().map(|b| b.size() - 4).sum();
            assert_eq!(total, accepted);
        }
    }

    #[test]
    fn oversized_fragment_is_rejected() {
        let mut batcher = DatagramBatcher::new(100, usize::MAX);
        let mut out = Vec::new();
        let err = batcher.push(unreliable(94), &mut out).unwrap_err();
        assert_eq!(err.reason, RejectReason::FragmentTooLarge);
        assert_eq!(err.fragment.payload.len(), 94);
        batcher.push(unreliable(93), &mut out).unwrap();
    }

    #[test]
    fn exhausted_budget_hands_fragment_back() {
        let mut batcher = DatagramBatcher::new(1000, 150);
        let mut out = Vec::new();
        batcher.push(unreliable(97), &mut out).unwrap();
        let err = batcher.push(unreliable(97), &mut out).unwrap_err();
        assert_eq!(err.reason, RejectReason::BandwidthExhausted);
        assert_eq!(batcher.remaining(), 50);
        batcher.finish(&mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn split_fragments_set_continuous_send() {
        let mut batcher = DatagramBatcher::new(1000, usize::MAX);
        let mut out = Vec::new();
        let mut split = unreliable(10);
        split.reliability = Reliability::Reliable;
        split.reliable_index = Some(Default::default());
        split.split = Some(SplitInfo {
            count: 2,
            id: 0,
            index: 0,
        });
        batcher.push(split, &mut out).unwrap();
        batcher.finish(&mut out);
        assert!(out[0].flags.contains(DatagramFlags::CONTINUOUS_SEND));
    }

    #[test]
    fn finish_on_empty_batcher_emits_nothing() {
        let batcher = DatagramBatcher::new(1000, 1000);
        let mut out = Vec::new();
        batcher.finish(&mut out);
        assert!(out.is_empty());
    }
}
