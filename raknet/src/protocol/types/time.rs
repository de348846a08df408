use bytes::{Buf, BufMut};
use std::sync::OnceLock;
use std::time::Instant;

use crate::protocol::packet::{DecodeError, EncodeError, RaknetEncodable};

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Process-wide epoch for connected ping and connection timestamps.
pub fn raknet_start_time() -> Instant {
    *START_TIME.get_or_init(Instant::now)
}

/// Milliseconds on the wire, as a big-endian `u64`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RaknetTime(pub u64);

impl RaknetTime {
    /// Milliseconds elapsed since [`raknet_start_time`].
    pub fn now() -> Self {
        Self(raknet_start_time().elapsed().as_millis() as u64)
    }
}

impl RaknetEncodable for RaknetTime {
    fn encode_raknet(&self, dst: &mut impl BufMut) -> Result<(), EncodeError> {
        self.0.encode_raknet(dst)
    }

    fn decode_raknet(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self(u64::decode_raknet(src)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic() {
        let a = RaknetTime::now();
        let b = RaknetTime::now();
        assert!(b.0 >= a.0);
    }
}
