use std::collections::VecDeque;

use crate::protocol::ack::{AckNackPayload, SequenceRange};

/// Bytes of an ACK/NACK datagram before its first record: flags byte and
/// record count.
const ACK_DATAGRAM_OVERHEAD: usize = 3;

/// Pending outbound ACK or NACK ranges.
///
/// Consecutive pushes that touch or overlap are merged; anything that
/// would grow the queue past `max_ranges` is dropped.
#[derive(Clone, Debug)]
pub struct AckQueue {
    max_ranges: usize,
    queue: VecDeque<SequenceRange>,
}

impl AckQueue {
    pub fn new(max_ranges: usize) -> Self {
        Self {
            max_ranges,
            queue: VecDeque::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn push(&mut self, range: SequenceRange) {
        if let Some(last) = self.queue.back_mut() {
            if !range.wraps() && last.end.value() + 1 == range.start.value() {
                last.end = range.end;
                return;
            }
            if !last.wraps()
                && !range.wraps()
                && last.end.value() >= range.start.value()
                && range.end.value() >= last.start.value()
            {
                last.start = last.start.min(range.start);
                last.end = last.end.max(range.end);
                return;
            }
        }

        if let Some((tail, head)) = range.split_wrapping() {
            self.push(tail);
            self.push(head);
            return;
        }

        if self.queue.len() >= self.max_ranges {
            tracing::trace!(event = "ack_queue_full");
            return;
        }
        self.queue.push_back(range);
    }

    /// Takes as many ranges as fit in one datagram of `mtu` bytes.
    pub fn pop_for_mtu(&mut self, mtu: usize) -> Option<AckNackPayload> {
        let mut ranges = Vec::new();
        let mut used = ACK_DATAGRAM_OVERHEAD;

        while let Some(front) = self.queue.front() {
            let size = front.encoded_size();
            if !ranges.is_empty() && used + size > mtu {
                break;
            }
            used += size;
            ranges.extend(self.queue.pop_front());
        }

        (!ranges.is_empty()).then_some(AckNackPayload { ranges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::Sequence24;

    fn single(v: u32) -> SequenceRange {
        SequenceRange::single(Sequence24::new(v))
    }

    #[test]
    fn merges_adjacent() {
        let mut q = AckQueue::new(16);
        q.push(single(1));
        q.push(single(2));
        q.push(single(3));

        let out = q.pop_for_mtu(1024).unwrap();
        assert_eq!(out.ranges, vec![SequenceRange::new(Sequence24::new(1), Sequence24::new(3))]);
        assert!(q.is_empty());
    }

    #[test]
    fn merges_overlap_and_keeps_gaps() {
        let mut q = AckQueue::new(16);
        q.push(SequenceRange::new(Sequence24::new(2), Sequence24::new(6)));
        q.push(SequenceRange::new(Sequence24::new(4), Sequence24::new(9)));
        q.push(single(20));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn respects_mtu() {
        let mut q = AckQueue::new(16);
        for i in (0..8).step_by(2) {
            q.push(single(i));
        }
        // 3 overhead + 4 per singleton
        let out = q.pop_for_mtu(11).unwrap();
        assert_eq!(out.ranges.len(), 2);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn wrapping_range_is_split() {
        let mut q = AckQueue::new(16);
        q.push(SequenceRange::new(Sequence24::new(0x00FF_FFFE), Sequence24::new(1)));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn drops_past_capacity() {
        let mut q = AckQueue::new(1);
        q.push(single(1));
        q.push(single(5));
        assert_eq!(q.len(), 1);
        assert!(q.pop_for_mtu(1400).is_some());
        assert!(q.pop_for_mtu(1400).is_none());
    }
}
