//! Re-exports the [`raknet`] library for convenient access to the transport types.
#[cfg(feature = "raknet")]
pub use raknet;
