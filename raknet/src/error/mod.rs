use std::net::SocketAddr;

use thiserror::Error;

use crate::protocol::state::{DisconnectReason, SessionState};

#[derive(Error, Debug)]
pub enum RaknetError {
    #[error("packet decode error: {0}")]
    Decode(#[from] crate::protocol::packet::DecodeError),
    #[error("packet encode error: {0}")]
    Encode(#[from] crate::protocol::packet::EncodeError),
    #[error("invalid session state transition {from} -> {to}")]
    InvalidStateTransition { from: SessionState, to: SessionState },
    #[error("invalid handshake: {0}")]
    InvalidHandshake(&'static str),
    #[error("concurrent session conflict for {0}")]
    ConcurrentSessionConflict(SocketAddr),
    #[error("session setup failed: {0}")]
    SessionSetupFailure(String),
    #[error("ordering channel {0} out of range")]
    InvalidOrderingChannel(u8),
    #[error("inbound queue of {0} is full")]
    SessionQueueFull(SocketAddr),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("disconnected: {0:?}")]
    Disconnected(DisconnectReason),
}
