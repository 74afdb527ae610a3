//! Network condition monitoring
//!
//! Counts traffic, keeps a rolling latency window and derives loss,
//! a bandwidth estimate and a quality score from it. The ack tracker on the
//! sending side feeds round-trip latency and timeout losses in.
//!
//! Loss is only known once the peer has answered at least once. Until then,
//! or with loss tracking off, the loss rate reads 0 and the quality score is
//! the latency score alone.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::codec::NetworkConditions;
use crate::config::MonitorConfig;

/// Network statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Sent but neither acknowledged nor expired
    pub in_flight: u64,
    /// Declared lost by acknowledgement timeout
    pub lost_by_timeout: u64,
    pub latency_samples: usize,
    pub average_latency_ms: f64,
    /// Whether `loss_rate` is backed by acknowledgements or receipts
    pub loss_known: bool,
    pub loss_rate: f64,
    pub bandwidth_mbps: f64,
    pub quality_score: f64,
    pub stable: bool,
}

pub struct NetworkMonitor {
    config: MonitorConfig,
    packets_sent: u64,
    packets_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
    in_flight: u64,
    lost_by_timeout: u64,
    loss_tracking: bool,
    latencies: VecDeque<f64>,
}

impl NetworkMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let window = config.latency_window.max(1);
        Self {
            config,
            packets_sent: 0,
            packets_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
            in_flight: 0,
            lost_by_timeout: 0,
            loss_tracking: true,
            latencies: VecDeque::with_capacity(window),
        }
    }

    pub fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize, latency_ms: f64) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
        self.push_latency(latency_ms);
    }

    /// An acknowledgement for one of our packets came back
    pub fn record_ack(&mut self, round_trip_ms: f64) {
        self.packets_received += 1;
        self.push_latency(round_trip_ms);
    }

    pub fn record_lost(&mut self, count: usize) {
        self.lost_by_timeout += count as u64;
    }

    /// Off when the peer is not asked to acknowledge what we send
    pub fn set_loss_tracking(&mut self, enabled: bool) {
        self.loss_tracking = enabled;
    }

    pub fn set_in_flight(&mut self, in_flight: usize) {
        self.in_flight = in_flight as u64;
    }

    fn push_latency(&mut self, latency_ms: f64) {
        if self.latencies.len() >= self.config.latency_window.max(1) {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency_ms.max(0.0));
    }

    fn average_latency(&self) -> f64 {
        if self.latencies.is_empty() {
            0.0
        } else {
            self.latencies.iter().sum::<f64>() / self.latencies.len() as f64
        }
    }

    fn loss_known(&self) -> bool {
        self.loss_tracking && self.packets_received > 0
    }

    fn loss_rate(&self) -> f64 {
        if !self.loss_known() {
            return 0.0;
        }
        let settled = self.packets_sent.saturating_sub(self.in_flight);
        if settled == 0 {
            return 0.0;
        }
        (1.0 - self.packets_received as f64 / settled as f64).clamp(0.0, 1.0)
    }

    /// Rough estimate: the reference bandwidth scaled by how far latency is
    /// from the reference latency
    fn bandwidth_estimate(&self, average_latency_ms: f64) -> f64 {
        if self.latencies.is_empty() {
            return self.config.reference_bandwidth_mbps;
        }
        if average_latency_ms <= 0.0 {
            return 100.0;
        }
        (self.config.reference_bandwidth_mbps * self.config.reference_latency_ms / average_latency_ms)
            .clamp(0.1, 100.0)
    }

    pub fn stats(&self) -> NetworkStats {
        let average_latency_ms = self.average_latency();
        let loss_known = self.loss_known();
        let loss_rate = self.loss_rate();

        let latency_score = (1.0 - average_latency_ms / self.config.worst_latency_ms).clamp(0.0, 1.0);
        let quality_score = if loss_known {
            let loss_score = (1.0 - loss_rate / self.config.worst_loss_rate).clamp(0.0, 1.0);
            (latency_score + loss_score) / 2.0
        } else {
            latency_score
        };

        let stable = loss_rate < self.config.stable_loss_rate
            && average_latency_ms < self.config.stable_latency_ms
            && self.latencies.len() >= self.config.min_stable_samples;

        NetworkStats {
            packets_sent: self.packets_sent,
            packets_received: self.packets_received,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            in_flight: self.in_flight,
            lost_by_timeout: self.lost_by_timeout,
            latency_samples: self.latencies.len(),
            average_latency_ms,
            loss_known,
            loss_rate,
            bandwidth_mbps: self.bandwidth_estimate(average_latency_ms),
            quality_score,
            stable,
        }
    }

    pub fn should_adapt(&self) -> bool {
        let stats = self.stats();
        self.should_adapt_with(&stats)
    }

    pub fn should_adapt_with(&self, stats: &NetworkStats) -> bool {
        stats.loss_rate > self.config.adapt_loss_rate
            || stats.average_latency_ms > self.config.adapt_latency_ms
            || stats.quality_score < self.config.adapt_quality_score
    }

    /// Conditions for the compression policy, with the given CPU figure
    pub fn conditions(&self, cpu_percent: f64) -> NetworkConditions {
        let stats = self.stats();
        NetworkConditions {
            bandwidth_mbps: stats.bandwidth_mbps,
            latency_ms: stats.average_latency_ms,
            cpu_percent,
        }
    }
}

/// Outstanding packets awaiting acknowledgement
pub struct AckTracker {
    pending: HashMap<u64, Instant>,
    timeout: Duration,
}

impl AckTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
        }
    }

    pub fn track(&mut self, sequence: u64, sent_at: Instant) {
        self.pending.insert(sequence, sent_at);
    }

    /// Round-trip time for `sequence`, if it was still pending
    pub fn acknowledge(&mut self, sequence: u64, now: Instant) -> Option<Duration> {
        self.pending
            .remove(&sequence)
            .map(|sent_at| now.saturating_duration_since(sent_at))
    }

    /// Drop entries older than the timeout; returns how many were lost
    pub fn expire(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let before = self.pending.len();
        self.pending
            .retain(|_, sent_at| now.saturating_duration_since(*sent_at) < timeout);
        let lost = before - self.pending.len();
        if lost > 0 {
            tracing::debug!("{} packets unacknowledged after {:?}", lost, timeout);
        }
        lost
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Forget everything pending, e.g. after the connection changed
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> NetworkMonitor {
        NetworkMonitor::new(MonitorConfig::default())
    }

    #[test]
    fn test_fresh_monitor_is_healthy() {
        let m = monitor();
        let stats = m.stats();
        assert_eq!(stats.loss_rate, 0.0);
        assert_eq!(stats.quality_score, 1.0);
        assert_eq!(stats.bandwidth_mbps, 10.0);
        assert!(!stats.stable);
        assert!(!m.should_adapt());
    }

    #[test]
    fn test_loss_and_quality() {
        let mut m = monitor();
        for _ in 0..100 {
            m.record_sent(1000);
        }
        for _ in 0..95 {
            m.record_received(1000, 100.0);
        }

        let stats = m.stats();
        assert!((stats.loss_rate - 0.05).abs() < 1e-9);
        assert!((stats.average_latency_ms - 100.0).abs() < 1e-9);
        // latency score 0.9, loss score 0.5
        assert!((stats.quality_score - 0.7).abs() < 1e-9);
        assert!((stats.bandwidth_mbps - 5.0).abs() < 1e-9);
        assert!(!stats.stable);
        assert!(m.should_adapt());
    }

    #[test]
    fn test_in_flight_is_not_loss() {
        let mut m = monitor();
        for _ in 0..10 {
            m.record_sent(500);
        }
        for _ in 0..6 {
            m.record_ack(20.0);
        }
        m.set_in_flight(4);
        assert_eq!(m.stats().loss_rate, 0.0);

        m.set_in_flight(0);
        m.record_lost(4);
        let stats = m.stats();
        assert!((stats.loss_rate - 0.4).abs() < 1e-9);
        assert_eq!(stats.lost_by_timeout, 4);
    }

    #[test]
    fn test_loss_unknown_without_answers() {
        let mut m = monitor();
        for _ in 0..8 {
            m.record_sent(4000);
        }
        let stats = m.stats();
        assert!(!stats.loss_known);
        assert_eq!(stats.loss_rate, 0.0);
        assert_eq!(stats.quality_score, 1.0);
        assert!(!m.should_adapt());

        m.record_ack(50.0);
        let stats = m.stats();
        assert!(stats.loss_known);
        assert!((stats.loss_rate - 0.875).abs() < 1e-9);
        assert!(m.should_adapt());
    }

    #[test]
    fn test_loss_tracking_off_ignores_sends() {
        let mut m = monitor();
        m.set_loss_tracking(false);
        for _ in 0..10 {
            m.record_sent(1000);
        }
        m.record_received(1000, 100.0);

        let stats = m.stats();
        assert!(!stats.loss_known);
        assert_eq!(stats.loss_rate, 0.0);
        // latency score only
        assert!((stats.quality_score - 0.9).abs() < 1e-9);
        assert!(!m.should_adapt());
    }

    #[test]
    fn test_latency_window_and_stability() {
        let mut m = monitor();
        for _ in 0..60 {
            m.record_sent(100);
            m.record_received(100, 1000.0);
        }
        for _ in 0..50 {
            m.record_sent(100);
            m.record_received(100, 20.0);
        }

        let stats = m.stats();
        assert_eq!(stats.latency_samples, 50);
        assert!((stats.average_latency_ms - 20.0).abs() < 1e-9);
        assert!(stats.stable);
        assert!(!m.should_adapt());
        assert!((stats.bandwidth_mbps - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_bandwidth_is_clamped() {
        let mut m = monitor();
        m.record_received(10, 100_000.0);
        assert_eq!(m.stats().bandwidth_mbps, 0.1);

        let mut m = monitor();
        m.record_received(10, 0.0);
        assert_eq!(m.stats().bandwidth_mbps, 100.0);
    }

    #[test]
    fn test_high_latency_triggers_adaptation() {
        let mut m = monitor();
        for _ in 0..10 {
            m.record_sent(100);
            m.record_received(100, 350.0);
        }
        assert!(m.should_adapt());
        assert_eq!(m.conditions(12.0).latency_ms, 350.0);
    }

    #[test]
    fn test_ack_tracker() {
        let mut acks = AckTracker::new(Duration::from_secs(5));
        let start = Instant::now();
        acks.track(0, start);
        acks.track(1, start);
        acks.track(2, start + Duration::from_secs(3));

        assert_eq!(
            acks.acknowledge(0, start + Duration::from_millis(40)),
            Some(Duration::from_millis(40))
        );
        assert_eq!(acks.acknowledge(0, start), None);

        assert_eq!(acks.expire(start + Duration::from_secs(5)), 1);
        assert_eq!(acks.in_flight(), 1);
        assert_eq!(acks.clear(), 1);
    }
}
