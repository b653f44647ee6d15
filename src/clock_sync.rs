//! Clock Synchronization
//!
//! Estimates the offset between the local clock and a peer's clock from
//! `TimeRequest`/`TimeResponse` round trips. Exchanges run in small
//! bursts; within a burst the exchange with the lowest round-trip time is
//! trusted (it bounds the one-way delay tightest) and its delta feeds an
//! exponential moving average. The smoothed round-trip time updates with
//! every exchange.

use crate::math::Scalar;
use crate::packet::Packet;

/// Exchanges per sync burst.
const EXCHANGES_PER_BURST: usize = 4;

/// EMA smoothing factor for `time_delta` and `round_trip_time`.
const EMA_ALPHA: Scalar = 0.2;

/// Clock sync state against one peer.
#[derive(Clone, Debug, Default)]
pub struct ClockSync {
    /// Estimated `peer_clock - local_clock`.
    pub time_delta: Scalar,
    /// Number of completed sync bursts.
    pub count: u32,
    /// Smoothed round-trip time.
    pub round_trip_time: Scalar,
    next_id: u32,
    pending: Vec<(u32, Scalar)>,
    burst: Vec<(Scalar, Scalar)>,
    last_burst_time: Scalar,
}

impl ClockSync {
    /// Create an idle clock sync.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new burst of time requests if `interval` has elapsed.
    /// Returns the packets to send.
    pub fn maybe_start_burst(&mut self, time: Scalar, interval: Scalar) -> Vec<Packet> {
        if self.count > 0 && time - self.last_burst_time < interval {
            return Vec::new();
        }
        if !self.pending.is_empty() {
            // Abandon a burst whose responses never arrived.
            if time - self.last_burst_time > interval.max(0.25) * 4.0 {
                self.pending.clear();
                self.burst.clear();
            } else {
                return Vec::new();
            }
        }
        self.last_burst_time = time;
        self.burst.clear();

        let mut packets = Vec::with_capacity(EXCHANGES_PER_BURST);
        for _ in 0..EXCHANGES_PER_BURST {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            self.pending.push((id, time));
            packets.push(Packet::TimeRequest { id });
        }
        packets
    }

    /// Fold in a time response received at local time `now`.
    pub fn process_time_response(&mut self, id: u32, peer_time: Scalar, now: Scalar) {
        let Some(pos) = self.pending.iter().position(|&(pending_id, _)| pending_id == id) else {
            return;
        };
        let (_, sent) = self.pending.remove(pos);
        let rtt = (now - sent).max(0.0);
        let delta = peer_time - (sent + rtt * 0.5);
        self.burst.push((rtt, delta));

        self.round_trip_time = if self.count == 0 && self.burst.len() == 1 {
            rtt
        } else {
            self.round_trip_time + (rtt - self.round_trip_time) * EMA_ALPHA
        };

        if self.pending.is_empty() {
            // Trust the exchange with the tightest round trip.
            if let Some(&(_, best_delta)) = self
                .burst
                .iter()
                .min_by(|a, b| a.0.total_cmp(&b.0))
            {
                self.time_delta = if self.count == 0 {
                    best_delta
                } else {
                    self.time_delta + (best_delta - self.time_delta) * EMA_ALPHA
                };
                self.count += 1;
            }
            self.burst.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ids_of(packets: &[Packet]) -> Vec<u32> {
        packets
            .iter()
            .map(|p| match p {
                Packet::TimeRequest { id } => *id,
                _ => panic!("expected time requests"),
            })
            .collect()
    }

    #[test]
    fn test_burst_completes_and_estimates_delta() {
        let mut sync = ClockSync::new();
        let packets = sync.maybe_start_burst(0.0, 1.0);
        assert_eq!(packets.len(), EXCHANGES_PER_BURST);

        // Peer clock runs 100 ahead; symmetric 0.05 one-way latency.
        for (i, id) in ids_of(&packets).into_iter().enumerate() {
            let now = 0.1 * (i + 1) as Scalar;
            let peer_time = (0.0 + now) * 0.5 + 100.0;
            sync.process_time_response(id, peer_time, now);
        }

        assert_eq!(sync.count, 1);
        assert_relative_eq!(sync.time_delta, 100.0, epsilon = 1e-6);
        assert!(sync.round_trip_time > 0.0);
    }

    #[test]
    fn test_min_rtt_exchange_wins() {
        let mut sync = ClockSync::new();
        let packets = sync.maybe_start_burst(0.0, 1.0);
        let ids = ids_of(&packets);

        // Three noisy exchanges with inflated asymmetric delay, one clean.
        sync.process_time_response(ids[0], 50.0 + 0.5, 1.0);
        sync.process_time_response(ids[1], 50.0 + 1.2, 2.0);
        sync.process_time_response(ids[2], 50.0 + 0.8, 1.5);
        // Clean exchange: rtt 0.01, true delta 50.
        sync.process_time_response(ids[3], 50.0 + 0.005, 0.01);

        assert_relative_eq!(sync.time_delta, 50.0, epsilon = 1e-6);
    }

    #[test]
    fn test_no_new_burst_while_pending() {
        let mut sync = ClockSync::new();
        let first = sync.maybe_start_burst(0.0, 1.0);
        assert!(!first.is_empty());
        let second = sync.maybe_start_burst(10.0, 1.0);
        assert!(second.is_empty(), "burst already in flight");
    }

    #[test]
    fn test_unknown_response_id_ignored() {
        let mut sync = ClockSync::new();
        sync.process_time_response(999, 1.0, 1.0);
        assert_eq!(sync.count, 0);
    }
}
