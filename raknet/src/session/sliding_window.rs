use std::time::{Duration, Instant};

use crate::protocol::constants::{CC_ADDITIONAL_VARIANCE, CC_MAXIMUM_THRESHOLD};
use crate::protocol::types::Sequence24;

/// Congestion controller for one session.
///
/// Byte-based window with slow start and congestion avoidance. A loss
/// backs off at most once per congestion-control block, where a block ends
/// when an ack arrives for a sequence past the recorded boundary.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    mtu: f64,
    cwnd: f64,
    /// 0 means unset.
    ss_thresh: f64,
    /// Milliseconds.
    estimated_rtt: Option<f64>,
    last_rtt: Option<f64>,
    deviation_rtt: f64,
    oldest_unsent_ack: Option<Instant>,
    ack_delay: Duration,
    next_congestion_block: Sequence24,
    backoff_this_block: bool,
}

impl SlidingWindow {
    pub fn new(mtu: usize, ack_delay: Duration) -> Self {
        let mtu = mtu as f64;
        Self {
            mtu,
            cwnd: mtu,
            ss_thresh: 0.0,
            estimated_rtt: None,
            last_rtt: None,
            deviation_rtt: 0.0,
            oldest_unsent_ack: None,
            ack_delay,
            next_congestion_block: Sequence24::new(0),
            backoff_this_block: false,
        }
    }

    pub fn is_in_slow_start(&self) -> bool {
        self.cwnd <= self.ss_thresh || self.ss_thresh == 0.0
    }

    pub fn congestion_window(&self) -> f64 {
        self.cwnd
    }

    pub fn slow_start_threshold(&self) -> f64 {
        self.ss_thresh
    }

    pub fn estimated_rtt(&self) -> Option<Duration> {
        self.estimated_rtt.map(millis_to_duration)
    }

    /// Budget for new sends in one flush.
    pub fn transmission_bandwidth(&self, nack_bytes: usize) -> usize {
        (self.cwnd - nack_bytes as f64).max(0.0) as usize
    }

    /// Budget for resending nacked datagrams in one flush.
    pub fn retransmission_bandwidth(&self, nack_bytes: usize) -> usize {
        nack_bytes
    }

    pub fn on_packet_received(&mut self, now: Instant) {
        self.oldest_unsent_ack.get_or_insert(now);
    }

    pub fn on_send_ack(&mut self) {
        self.oldest_unsent_ack = None;
    }

    /// A datagram was resent because of loss.
    pub fn on_resend(&mut self, current_seq: Sequence24) {
        if self.backoff_this_block {
            return;
        }
        self.ss_thresh = (self.cwnd / 2.0).max(self.mtu);
        self.cwnd = self.mtu;
        self.next_congestion_block = current_seq;
        self.backoff_this_block = true;
        tracing::trace!(event = "cc_backoff", cwnd = self.cwnd, ss_thresh = self.ss_thresh);
    }

    pub fn on_nak(&mut self) {
        if !self.backoff_this_block {
            self.ss_thresh = self.cwnd / 2.0;
        }
    }

    pub fn on_ack(&mut self, rtt: Duration, acked_seq: Sequence24, current_seq: Sequence24) {
        let rtt_ms = rtt.as_micros() as f64 / 1000.0;
        self.last_rtt = Some(rtt_ms);

        match self.estimated_rtt {
            None => {
                self.estimated_rtt = Some(rtt_ms);
                self.deviation_rtt = rtt_ms;
            }
            Some(estimated) => {
                let diff = rtt_ms - estimated;
                self.estimated_rtt = Some(estimated + 0.5 * diff);
                self.deviation_rtt += 0.5 * (diff.abs() - self.deviation_rtt);
            }
        }

        let is_new_period = acked_seq > self.next_congestion_block;
        if is_new_period {
            self.backoff_this_block = false;
            self.next_congestion_block = current_seq;
        }

        let mtu_squared = self.mtu * self.mtu;
        if self.is_in_slow_start() {
            self.cwnd += self.mtu;
            if self.ss_thresh != 0.0 && self.cwnd > self.ss_thresh {
                self.cwnd = self.ss_thresh + mtu_squared / self.cwnd;
            }
        } else if is_new_period {
            self.cwnd += mtu_squared / self.cwnd;
        }
    }

    pub fn rto_for_retransmission(&self) -> Duration {
        let max = CC_MAXIMUM_THRESHOLD as f64;
        let Some(estimated) = self.estimated_rtt else {
            return Duration::from_millis(CC_MAXIMUM_THRESHOLD);
        };
        let threshold = 2.0 * estimated + 4.0 * self.deviation_rtt + CC_ADDITIONAL_VARIANCE as f64;
        millis_to_duration(threshold.min(max))
    }

    pub fn should_send_acks(&self, now: Instant) -> bool {
        if self.last_rtt.is_none() {
            return true;
        }
        match self.oldest_unsent_ack {
            None => true,
            Some(oldest) => now.saturating_duration_since(oldest) > self.ack_delay,
        }
    }
}

fn millis_to_duration(ms: f64) -> Duration {
    Duration::from_micros((ms * 1000.0).round() as u64)
}
