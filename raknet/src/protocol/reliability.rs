//! Reliability kinds and the header fields each one carries.

use crate::protocol::packet::{DecodeError, EncodeError, RaknetEncodable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reliability {
    Unreliable = 0,
    UnreliableSequenced = 1,
    Reliable = 2,
    ReliableOrdered = 3,
    ReliableSequenced = 4,
    UnreliableWithAckReceipt = 5,
    ReliableWithAckReceipt = 6,
    ReliableOrderedWithAckReceipt = 7,
}

#[derive(Debug, Clone, Copy)]
struct ReliabilityProperties {
    is_reliable: bool,
    is_ordered: bool,
    is_sequenced: bool,
    is_with_ack_receipt: bool,
}

const fn props(
    is_reliable: bool,
    is_ordered: bool,
    is_sequenced: bool,
    is_with_ack_receipt: bool,
) -> ReliabilityProperties {
    ReliabilityProperties {
        is_reliable,
        is_ordered,
        is_sequenced,
        is_with_ack_receipt,
    }
}

// Indexed by ordinal.
const RELIABILITY_TABLE: [ReliabilityProperties; 8] = [
    props(false, false, false, false),
    props(false, false, true, false),
    props(true, false, false, false),
    props(true, true, false, false),
    props(true, false, true, false),
    props(false, false, false, true),
    props(true, false, false, true),
    props(true, true, false, true),
];

impl Reliability {
    pub const ALL: [Reliability; 8] = [
        Reliability::Unreliable,
        Reliability::UnreliableSequenced,
        Reliability::Reliable,
        Reliability::ReliableOrdered,
        Reliability::ReliableSequenced,
        Reliability::UnreliableWithAckReceipt,
        Reliability::ReliableWithAckReceipt,
        Reliability::ReliableOrderedWithAckReceipt,
    ];

    #[inline]
    fn properties(self) -> &'static ReliabilityProperties {
        &RELIABILITY_TABLE[self as usize]
    }

    #[inline]
    pub fn is_reliable(self) -> bool {
        self.properties().is_reliable
    }

    #[inline]
    pub fn is_ordered(self) -> bool {
        self.properties().is_ordered
    }

    #[inline]
    pub fn is_sequenced(self) -> bool {
        self.properties().is_sequenced
    }

    #[inline]
    pub fn is_with_ack_receipt(self) -> bool {
        self.properties().is_with_ack_receipt
    }

    /// Ordered and sequenced kinds both carry an ordering index and channel.
    #[inline]
    pub fn uses_ordering_channel(self) -> bool {
        self.is_ordered() || self.is_sequenced()
    }

    /// Bytes of index fields this kind adds to a fragment header.
    #[inline]
    pub fn index_bytes(self) -> usize {
        let mut size = 0;
        if self.is_reliable() {
            size += 3;
        }
        if self.is_sequenced() {
            size += 3;
        }
        if self.uses_ordering_channel() {
            size += 4;
        }
        size
    }

    /// Kind used when a payload has to be split. A lost part makes every
    /// other part useless, so unreliable kinds are promoted.
    pub fn escalate_for_split(self) -> Reliability {
        match self {
            Reliability::Unreliable => Reliability::Reliable,
            Reliability::UnreliableSequenced => Reliability::ReliableSequenced,
            Reliability::UnreliableWithAckReceipt => Reliability::ReliableOrderedWithAckReceipt,
            other => other,
        }
    }
}

impl TryFrom<u8> for Reliability {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Reliability::ALL
            .get(value as usize)
            .copied()
            .ok_or(DecodeError::UnknownReliability(value))
    }
}

impl RaknetEncodable for Reliability {
    fn encode_raknet(&self, dst: &mut impl bytes::BufMut) -> Result<(), EncodeError> {
        (*self as u8).encode_raknet(dst)
    }

    fn decode_raknet(src: &mut impl bytes::Buf) -> Result<Self, DecodeError> {
        Reliability::try_from(u8::decode_raknet(src)?)
    }
}
