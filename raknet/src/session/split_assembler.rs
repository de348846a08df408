use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::protocol::{encapsulated_packet::EncapsulatedPacket, packet::DecodeError};

struct SplitEntry {
    /// First part seen; its indices are kept for the reassembled packet.
    first: EncapsulatedPacket,
    parts: Vec<Option<Bytes>>,
    received: usize,
    last_update: Instant,
}

/// Reassembles split fragments by split id.
pub struct SplitAssembler {
    entries: HashMap<u16, SplitEntry>,
    ttl: Duration,
    max_parts: u32,
    max_concurrent: usize,
}

impl SplitAssembler {
    pub fn new(ttl: Duration, max_parts: u32, max_concurrent: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_parts,
            max_concurrent,
        }
    }

    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Returns the whole packet once its last part arrives. Unsplit
    /// fragments pass straight through.
    pub fn add(
        &mut self,
        pkt: EncapsulatedPacket,
        now: Instant,
    ) -> Result<Option<EncapsulatedPacket>, DecodeError> {
        let Some(split) = pkt.split else {
            return Ok(Some(pkt));
        };

        if split.count == 0 || split.count > self.max_parts {
            return Err(DecodeError::SplitTooLarge);
        }
        if split.index >= split.count {
            return Err(DecodeError::SplitIndexOutOfRange);
        }
        if self.entries.len() >= self.max_concurrent && !self.entries.contains_key(&split.id) {
            return Err(DecodeError::SplitBufferFull);
        }

        let entry = self.entries.entry(split.id).or_insert_with(|| SplitEntry {
            first: pkt.clone(),
            parts: vec![None; split.count as usize],
            received: 0,
            last_update: now,
        });

        if entry.parts.len() != split.count as usize {
            return Err(DecodeError::SplitCountMismatch);
        }
        let slot = &mut entry.parts[split.index as usize];
        if slot.is_some() {
            // Retransmitted part; harmless.
            tracing::trace!(event = "duplicate_split_part", id = split.id, index = split.index);
            return Ok(None);
        }
        *slot = Some(pkt.payload);
        entry.received += 1;
        entry.last_update = now;

        if entry.received < entry.parts.len() {
            return Ok(None);
        }

        let Some(entry) = self.entries.remove(&split.id) else {
            return Ok(None);
        };
        let total = entry.parts.iter().flatten().map(Bytes::len).sum();
        let mut buf = BytesMut::with_capacity(total);
        for part in entry.parts.iter().flatten() {
            buf.extend_from_slice(part);
        }

        tracing::trace!(event = "split_reassembled", id = split.id, parts = split.count);
        Ok(Some(EncapsulatedPacket {
            split: None,
            payload: buf.freeze(),
            ..entry.first
        }))
    }

    /// Drops reassemblies idle for longer than the timeout.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|id, entry| {
            let keep = now.saturating_duration_since(entry.last_update) < ttl;
            if !keep {
                tracing::debug!(split_id = id, "dropping expired split");
            }
            keep
        });
        before - self.entries.len()
    }
}
