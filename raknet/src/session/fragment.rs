//! Outbound fragmentation and the per-session counters it consumes.

use bytes::Bytes;

use crate::error::RaknetError;
use crate::protocol::{
    constants::{
        MAXIMUM_ENCAPSULATED_HEADER_SIZE, MAXIMUM_ORDERING_CHANNELS, RAKNET_DATAGRAM_HEADER_SIZE,
        UDP_HEADER_SIZE,
    },
    encapsulated_packet::{EncapsulatedPacket, SplitInfo},
    reliability::Reliability,
    state::Priority,
    types::Sequence24,
};

const CHANNELS: usize = MAXIMUM_ORDERING_CHANNELS as usize;

/// Payload bytes per datagram once UDP/IP overhead is removed.
pub fn datagram_mtu(mtu: u16, ip_header: usize) -> usize {
    (mtu as usize).saturating_sub(UDP_HEADER_SIZE + ip_header)
}

/// Largest fragment content that always fits one datagram, whatever the
/// reliability kind or split header.
pub fn max_fragment_length(mtu: u16, ip_header: usize) -> usize {
    datagram_mtu(mtu, ip_header)
        .saturating_sub(RAKNET_DATAGRAM_HEADER_SIZE + MAXIMUM_ENCAPSULATED_HEADER_SIZE)
        .max(1)
}

/// Turns application payloads into fragments, assigning split ids,
/// reliable indices and per-channel ordering/sequence indices.
///
/// Every counter hands out 0 first and then increments. The 24-bit
/// indices wrap at 2^24, the split id at 2^16.
#[derive(Debug, Clone, Default)]
pub struct FragmentAssembler {
    next_split_id: u16,
    next_reliable_index: Sequence24,
    next_ordering_index: [Sequence24; CHANNELS],
    next_sequence_index: [Sequence24; CHANNELS],
}

impl FragmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits `payload` into fragments of at most `max_len` content bytes.
    ///
    /// Fails only for an ordering channel outside `0..16`; no counter is
    /// touched in that case.
    pub fn assemble(
        &mut self,
        payload: Bytes,
        reliability: Reliability,
        priority: Priority,
        channel: u8,
        max_len: usize,
    ) -> Result<Vec<EncapsulatedPacket>, RaknetError> {
        if channel >= MAXIMUM_ORDERING_CHANNELS {
            return Err(RaknetError::InvalidOrderingChannel(channel));
        }
        let max_len = max_len.max(1);
        let split = payload.len() > max_len;
        let reliability = if split {
            reliability.escalate_for_split()
        } else {
            reliability
        };

        let ch = channel as usize;
        let (ordering_index, sequence_index) = if reliability.is_ordered() {
            (Some(bump(&mut self.next_ordering_index[ch])), None)
        } else if reliability.is_sequenced() {
            (
                Some(self.next_ordering_index[ch]),
                Some(bump(&mut self.next_sequence_index[ch])),
            )
        } else {
            (None, None)
        };
        let ordering_channel = reliability.uses_ordering_channel().then_some(channel);

        let template = EncapsulatedPacket {
            ordering_index,
            sequence_index,
            ordering_channel,
            ..EncapsulatedPacket::new(reliability, priority, Bytes::new())
        };

        if !split {
            let mut pkt = template;
            pkt.payload = payload;
            if reliability.is_reliable() {
                pkt.reliable_index = Some(bump(&mut self.next_reliable_index));
            }
            return Ok(vec![pkt]);
        }

        let count = payload.len().div_ceil(max_len);
        let id = self.allocate_split_id();
        let mut out = Vec::with_capacity(count);
        for index in 0..count {
            let start = index * max_len;
            let end = (start + max_len).min(payload.len());
            let mut pkt = template.clone();
            pkt.payload = payload.slice(start..end);
            pkt.reliable_index = Some(bump(&mut self.next_reliable_index));
            pkt.split = Some(SplitInfo {
                count: count as u32,
                id,
                index: index as u32,
            });
            out.push(pkt);
        }

        tracing::trace!(event = "payload_split", split_id = id, parts = count);
        Ok(out)
    }

    fn allocate_split_id(&mut self) -> u16 {
        let id = self.next_split_id;
        self.next_split_id = id.wrapping_add(1);
        id
    }
}

fn bump(counter: &mut Sequence24) -> Sequence24 {
    let current = *counter;
    *counter = current.next();
    current
}
