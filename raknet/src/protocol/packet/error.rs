use thiserror::Error;

/// Errors raised when a value is inconsistent with its own wire layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("split info missing on a split fragment")]
    MissingSplitInfo,
    #[error("reliable index missing for reliable fragment")]
    MissingReliableIndex,
    #[error("sequence index missing for sequenced fragment")]
    MissingSequenceIndex,
    #[error("ordering index missing for ordered/sequenced fragment")]
    MissingOrderingIndex,
    #[error("ordering channel missing for ordered/sequenced fragment")]
    MissingOrderingChannel,
    #[error("payload of {0} bytes does not fit a u16 length field")]
    PayloadTooLong(usize),
}

/// Errors shared by every `RaknetEncodable` and packet body decoder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("unknown packet id 0x{0:02x}")]
    UnknownId(u8),

    /// The fragment header declares more content than the datagram holds.
    #[error("malformed fragment: declared {declared} content bytes, {remaining} remaining")]
    MalformedFragment { declared: usize, remaining: usize },

    #[error("invalid address version {0}, expected 4 or 6")]
    InvalidAddrVersion(u8),

    #[error("unknown disconnect reason {0}")]
    UnknownDisconnectReason(u8),

    #[error("unknown reliability {0}")]
    UnknownReliability(u8),

    #[error("invalid ack/nack payload")]
    InvalidAckPacket,

    #[error("split count mismatch")]
    SplitCountMismatch,

    #[error("split index out of range")]
    SplitIndexOutOfRange,

    #[error("duplicate split part")]
    DuplicateSplitPart,

    #[error("split exceeds maximum supported parts")]
    SplitTooLarge,

    #[error("split reassembly buffer full")]
    SplitBufferFull,

    #[error("invalid magic for unconnected packet")]
    InvalidMagic,

    #[error("datagram carried no fragments")]
    EmptyDatagram,
}
