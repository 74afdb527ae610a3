//! Peer clock offset and inter-arrival jitter

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::SyncConfig;

#[derive(Debug, Clone, Serialize)]
pub struct SyncState {
    /// local − peer, seconds
    pub offset_secs: f64,
    pub secs_since_sync: Option<f64>,
    pub jitter_ms: f64,
    pub arrival_samples: usize,
}

pub struct ClockSynchronizer {
    offset: f64,
    last_sync: Option<Instant>,
    interval: Duration,
    window: usize,
    /// (sequence, local arrival time in seconds)
    arrivals: VecDeque<(u64, f64)>,
}

impl ClockSynchronizer {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            offset: 0.0,
            last_sync: None,
            interval: Duration::from_secs(config.sync_interval_secs),
            window: config.jitter_window.max(2),
            arrivals: VecDeque::with_capacity(config.jitter_window.max(2)),
        }
    }

    /// Record a sync point; returns the new offset
    pub fn sync_clocks(&mut self, peer_time: f64, local_time: f64) -> f64 {
        self.sync_clocks_at(peer_time, local_time, Instant::now())
    }

    pub fn sync_clocks_at(&mut self, peer_time: f64, local_time: f64, now: Instant) -> f64 {
        self.offset = local_time - peer_time;
        self.last_sync = Some(now);
        tracing::debug!("Clock offset now {:.6}s", self.offset);
        self.offset
    }

    /// Sync from a request/response exchange. The peer's timestamp is
    /// taken to correspond to the midpoint of the local round trip.
    pub fn sync_round_trip(&mut self, request_sent: f64, peer_time: f64, response_received: f64) -> f64 {
        let midpoint = (request_sent + response_received) / 2.0;
        self.sync_clocks(peer_time, midpoint)
    }

    /// Map a peer timestamp onto the local clock
    pub fn adjust(&self, peer_time: f64) -> f64 {
        peer_time + self.offset
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn needs_sync(&self) -> bool {
        self.needs_sync_at(Instant::now())
    }

    pub fn needs_sync_at(&self, now: Instant) -> bool {
        match self.last_sync {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.interval,
        }
    }

    pub fn record_arrival(&mut self, sequence: u64, arrival_secs: f64) {
        if self.arrivals.len() == self.window {
            self.arrivals.pop_front();
        }
        self.arrivals.push_back((sequence, arrival_secs));
    }

    /// Population standard deviation of consecutive inter-arrival intervals,
    /// in seconds, with arrivals ordered by sequence
    pub fn estimate_jitter(&self) -> f64 {
        if self.arrivals.len() < 3 {
            return 0.0;
        }

        let mut sorted: Vec<(u64, f64)> = self.arrivals.iter().copied().collect();
        sorted.sort_by_key(|(seq, _)| *seq);

        let intervals: Vec<f64> = sorted.windows(2).map(|w| w[1].1 - w[0].1).collect();
        let n = intervals.len() as f64;
        let mean = intervals.iter().sum::<f64>() / n;
        let variance = intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / n;
        variance.sqrt()
    }

    pub fn snapshot(&self) -> SyncState {
        SyncState {
            offset_secs: self.offset,
            secs_since_sync: self.last_sync.map(|at| at.elapsed().as_secs_f64()),
            jitter_ms: self.estimate_jitter() * 1000.0,
            arrival_samples: self.arrivals.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync() -> ClockSynchronizer {
        ClockSynchronizer::new(&SyncConfig::default())
    }

    #[test]
    fn test_offset_and_adjust() {
        let mut clock = sync();
        assert_eq!(clock.sync_clocks(100.0, 102.5), 2.5);
        assert_eq!(clock.adjust(200.0), 202.5);
    }

    #[test]
    fn test_round_trip_uses_midpoint() {
        let mut clock = sync();
        // request at 10.0, response at 10.2, peer says 5.1
        let offset = clock.sync_round_trip(10.0, 5.1, 10.2);
        assert!((offset - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_needs_sync_interval() {
        let mut clock = sync();
        let start = Instant::now();
        assert!(clock.needs_sync_at(start));

        clock.sync_clocks_at(0.0, 0.0, start);
        assert!(!clock.needs_sync_at(start + Duration::from_secs(29)));
        assert!(clock.needs_sync_at(start + Duration::from_secs(30)));
    }

    #[test]
    fn test_periodic_arrivals_have_no_jitter() {
        let mut clock = sync();
        for seq in 0..20 {
            clock.record_arrival(seq, seq as f64 * 0.02);
        }
        assert!(clock.estimate_jitter() < 1e-9);
    }

    #[test]
    fn test_alternating_gaps_have_jitter() {
        let mut clock = sync();
        let mut t = 0.0;
        // 20 intervals, alternating 10 ms and 30 ms
        for seq in 0..21 {
            clock.record_arrival(seq, t);
            t += if seq % 2 == 0 { 0.01 } else { 0.03 };
        }
        assert!((clock.estimate_jitter() - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_jitter_orders_by_sequence() {
        let mut clock = sync();
        for seq in [1u64, 0, 3, 2, 4] {
            clock.record_arrival(seq, seq as f64 * 0.5);
        }
        assert!(clock.estimate_jitter() < 1e-9);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut clock = ClockSynchronizer::new(&SyncConfig {
            jitter_window: 4,
            ..Default::default()
        });
        for seq in 0..10 {
            clock.record_arrival(seq, seq as f64);
        }
        assert_eq!(clock.snapshot().arrival_samples, 4);
    }
}
