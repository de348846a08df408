use std::{sync::Arc, time::Duration};

use crate::protocol::state::DisconnectReason;

use super::SessionHandle;

/// Closes `handle` with [`DisconnectReason::TimedOut`] once no datagram has
/// been routed to it for `max_inactivity`.
pub(crate) async fn run_watchdog(handle: Arc<SessionHandle>, max_inactivity: Duration) {
    let cancel = handle.cancellation().clone();
    loop {
        let idle = handle.idle();
        if idle >= max_inactivity {
            tracing::debug!(peer = %handle.remote_addr(), ?idle, "session inactive");
            handle.close(DisconnectReason::TimedOut);
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(max_inactivity - idle) => {}
        }
    }
}
