//! Server-side RakNet: a reliable, ordered, fragmenting transport over UDP.
//!
//! The crate is layered bottom-up:
//!
//! - [`protocol`] holds the wire formats: encapsulated fragments, datagrams,
//!   ACK/NACK ranges and the offline and connected control packets.
//! - [`session`] holds the per-peer machinery: fragmentation, datagram
//!   batching, congestion control, retransmission and the session state
//!   machine.
//! - [`transport`] binds a UDP socket, runs the offline handshake and routes
//!   datagrams to sessions.
//!
//! ## Example: Server
//!
//! ```rust,no_run
//! use raknet::{RaknetListener, transport::RaknetListenerConfigBuilder};
//! use futures::StreamExt;
//! use std::net::SocketAddr;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let addr: SocketAddr = "0.0.0.0:19132".parse()?;
//!     let mut listener = RaknetListener::bind(RaknetListenerConfigBuilder::new()
//!         .bind_address(addr)
//!         .build()).await?;
//!
//!     // RaknetListener implements Stream
//!     while let Some(session) = listener.next().await {
//!         tokio::spawn(async move {
//!             let Some(mut incoming) = session.incoming() else { return };
//!             // IncomingMessages also implements Stream
//!             while let Some(msg) = incoming.next().await {
//!                 let _ = session
//!                     .send(msg.payload, msg.reliability, msg.channel, Default::default())
//!                     .await;
//!             }
//!         });
//!     }
//!     Ok(())
//! }
//! ```
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::RaknetError;
pub use protocol::{
    reliability::Reliability,
    state::{DisconnectReason, Priority, SessionState},
};
pub use session::{IncomingMessages, Message, SessionHandle};
pub use transport::{RaknetListener, RaknetListenerConfig};
