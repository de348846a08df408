//! Session lifecycle states, disconnect reasons and send priorities.

use std::fmt;

use crate::protocol::packet::{DecodeError, EncodeError, RaknetEncodable};

/// Lifecycle of one peer connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Created,
    Initializing,
    Initialized,
    Connected,
    Closed,
    ConnectionFailed,
}

impl SessionState {
    pub fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Created, Initializing)
                | (Initializing, Initialized)
                | (Initialized, Connected)
                | (Created | Initializing, ConnectionFailed)
                | (Initialized, ConnectionFailed)
                | (Created | Initializing | Initialized | Connected, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::ConnectionFailed)
    }

    /// Still negotiating the offline handshake.
    pub fn is_handshaking(self) -> bool {
        matches!(self, SessionState::Created | SessionState::Initializing)
    }

    /// Online traffic (pings, requests) may flow.
    pub fn is_online(self) -> bool {
        matches!(self, SessionState::Initialized | SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DisconnectReason {
    ClosedByRemotePeer = 0,
    ShuttingDown = 1,
    Disconnected = 2,
    TimedOut = 3,
    ConnectionRequestFailed = 4,
    AlreadyConnected = 5,
    NoFreeIncomingConnections = 6,
    IncompatibleProtocolVersion = 7,
    IpRecentlyConnected = 8,
    BadPacket = 9,
    QueueTooLong = 10,
}

impl TryFrom<u8> for DisconnectReason {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use DisconnectReason::*;
        Ok(match value {
            0 => ClosedByRemotePeer,
            1 => ShuttingDown,
            2 => Disconnected,
            3 => TimedOut,
            4 => ConnectionRequestFailed,
            5 => AlreadyConnected,
            6 => NoFreeIncomingConnections,
            7 => IncompatibleProtocolVersion,
            8 => IpRecentlyConnected,
            9 => BadPacket,
            10 => QueueTooLong,
            other => return Err(DecodeError::UnknownDisconnectReason(other)),
        })
    }
}

impl RaknetEncodable for DisconnectReason {
    fn encode_raknet(&self, dst: &mut impl bytes::BufMut) -> Result<(), EncodeError> {
        (*self as u8).encode_raknet(dst)
    }

    fn decode_raknet(src: &mut impl bytes::Buf) -> Result<Self, DecodeError> {
        DisconnectReason::try_from(u8::decode_raknet(src)?)
    }
}

/// Outbound queue class. Queues drain in declaration order and
/// `Immediate` flushes without waiting for the next tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Immediate,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn forward_handshake_path_is_allowed() {
        assert!(Created.can_transition_to(Initializing));
        assert!(Initializing.can_transition_to(Initialized));
        assert!(Initialized.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Closed));
    }

    #[test]
    fn backwards_and_skipping_transitions_are_rejected() {
        assert!(!Initializing.can_transition_to(Created));
        assert!(!Created.can_transition_to(Initialized));
        assert!(!Connected.can_transition_to(Initialized));
        assert!(!Connected.can_transition_to(ConnectionFailed));
        assert!(!Closed.can_transition_to(Closed));
        assert!(!ConnectionFailed.can_transition_to(Closed));
    }

    #[test]
    fn failure_reachable_from_setup_states() {
        for s in [Created, Initializing, Initialized] {
            assert!(s.can_transition_to(ConnectionFailed));
        }
    }

    #[test]
    fn disconnect_reason_rejects_unknown_byte() {
        assert!(matches!(
            DisconnectReason::try_from(200),
            Err(DecodeError::UnknownDisconnectReason(200))
        ));
    }

    #[test]
    fn priority_orders_immediate_first() {
        assert!(Priority::Immediate < Priority::High);
        assert!(Priority::Medium < Priority::Low);
        assert_eq!(Priority::default(), Priority::Medium);
    }
}
