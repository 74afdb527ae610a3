//! Receive-side reordering and loss tracking
//!
//! Packets are released strictly in sequence order. Gaps are remembered as
//! missing until the packet arrives or the gap is given up: either because a
//! held packet waited longer than the timeout, or because the stream jumped
//! further ahead than `max_gap`.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use crate::config::ReorderConfig;
use crate::protocol::AudioPacket;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReorderStats {
    pub expected_sequence: u64,
    pub released: u64,
    pub duplicates: u64,
    pub held: usize,
    pub missing: usize,
    /// Sequence numbers given up on for good
    pub abandoned: u64,
    /// Held packets dropped after waiting too long
    pub purged: u64,
    pub discontinuities: u64,
}

pub struct ReorderWindow {
    expected: u64,
    held: BTreeMap<u64, (AudioPacket, Instant)>,
    missing: BTreeSet<u64>,
    timeout: Duration,
    max_gap: u64,
    released: u64,
    duplicates: u64,
    abandoned: u64,
    purged: u64,
    discontinuities: u64,
}

impl ReorderWindow {
    pub fn new(config: &ReorderConfig) -> Self {
        Self {
            expected: 0,
            held: BTreeMap::new(),
            missing: BTreeSet::new(),
            timeout: config.packet_timeout(),
            max_gap: config.max_gap.max(1),
            released: 0,
            duplicates: 0,
            abandoned: 0,
            purged: 0,
            discontinuities: 0,
        }
    }

    pub fn accept(&mut self, packet: AudioPacket) -> Vec<AudioPacket> {
        self.accept_at(packet, Instant::now())
    }

    /// Accept a packet that arrived at `now`; returns everything newly
    /// releasable, in order
    pub fn accept_at(&mut self, packet: AudioPacket, now: Instant) -> Vec<AudioPacket> {
        let seq = packet.sequence;
        if seq < self.expected || self.held.contains_key(&seq) {
            self.duplicates += 1;
            tracing::trace!("Discarding duplicate or late packet {}", seq);
            return Vec::new();
        }

        let mut out = Vec::new();
        if seq - self.expected > self.max_gap {
            out = self.skip_to(seq);
        }

        for gap in self.expected..seq {
            if !self.held.contains_key(&gap) {
                self.missing.insert(gap);
            }
        }
        self.missing.remove(&seq);
        self.held.insert(seq, (packet, now));

        out.extend(self.release());
        out
    }

    /// Stream discontinuity: flush what is held and restart at `seq`
    fn skip_to(&mut self, seq: u64) -> Vec<AudioPacket> {
        let flushed: Vec<AudioPacket> = std::mem::take(&mut self.held)
            .into_values()
            .map(|(packet, _)| packet)
            .collect();
        let gap = seq - self.expected;
        let lost = gap - flushed.len() as u64;

        tracing::warn!(
            "Sequence jumped from {} to {}, abandoning {} missing packets",
            self.expected,
            seq,
            lost
        );

        self.abandoned += lost;
        self.released += flushed.len() as u64;
        self.discontinuities += 1;
        self.missing.clear();
        self.expected = seq;
        flushed
    }

    fn release(&mut self) -> Vec<AudioPacket> {
        let mut out = Vec::new();
        while let Some((packet, _)) = self.held.remove(&self.expected) {
            self.missing.remove(&self.expected);
            out.push(packet);
            self.expected += 1;
            self.released += 1;
        }
        out
    }

    /// Drop held packets older than the timeout and give up on every gap
    /// below the newest of them. Held packets below it that have not expired
    /// are released in order, then any contiguous run above.
    pub fn purge_expired(&mut self, now: Instant) -> Vec<AudioPacket> {
        let timeout = self.timeout;
        let is_expired = |arrived: &Instant| now.saturating_duration_since(*arrived) >= timeout;

        let Some(newest) = self
            .held
            .iter()
            .filter(|(_, (_, arrived))| is_expired(arrived))
            .map(|(seq, _)| *seq)
            .last()
        else {
            return Vec::new();
        };

        let above = self.held.split_off(&(newest + 1));
        let below = std::mem::replace(&mut self.held, above);

        let mut out = Vec::new();
        let mut purged = 0u64;
        for (_, (packet, arrived)) in below {
            if is_expired(&arrived) {
                purged += 1;
            } else {
                out.push(packet);
            }
        }

        let still_missing = self.missing.split_off(&(newest + 1));
        let abandoned = self.missing.len() as u64;
        self.missing = still_missing;

        tracing::warn!(
            "Purged {} stale packets, abandoned {} missing up to sequence {}",
            purged,
            abandoned,
            newest
        );

        self.purged += purged;
        self.abandoned += abandoned;
        self.released += out.len() as u64;
        self.expected = newest + 1;

        out.extend(self.release());
        out
    }

    /// Sequence numbers currently known to be missing, ascending
    pub fn missing(&self) -> Vec<u64> {
        self.missing.iter().copied().collect()
    }

    pub fn expected_sequence(&self) -> u64 {
        self.expected
    }

    /// Start a new logical stream. Counters are kept.
    pub fn reset(&mut self) {
        self.expected = 0;
        self.held.clear();
        self.missing.clear();
    }

    pub fn stats(&self) -> ReorderStats {
        ReorderStats {
            expected_sequence: self.expected,
            released: self.released,
            duplicates: self.duplicates,
            held: self.held.len(),
            missing: self.missing.len(),
            abandoned: self.abandoned,
            purged: self.purged,
            discontinuities: self.discontinuities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CompressionAlgorithm;
    use bytes::Bytes;
    use proptest::prelude::*;

    fn packet(sequence: u64) -> AudioPacket {
        AudioPacket {
            sequence,
            sent_at_us: 0,
            captured_at_us: 0,
            sample_rate: 16000,
            channels: 1,
            algorithm: CompressionAlgorithm::None,
            original_len: 0,
            checksum: 0,
            payload: Bytes::new(),
        }
    }

    fn window() -> ReorderWindow {
        ReorderWindow::new(&ReorderConfig::default())
    }

    fn seqs(packets: &[AudioPacket]) -> Vec<u64> {
        packets.iter().map(|p| p.sequence).collect()
    }

    #[test]
    fn test_in_order_passthrough() {
        let mut w = window();
        for s in 0..5 {
            assert_eq!(seqs(&w.accept(packet(s))), vec![s]);
        }
        assert!(w.missing().is_empty());
        assert_eq!(w.stats().released, 5);
    }

    #[test]
    fn test_permutation_releases_in_order() {
        let mut w = window();
        let mut released = Vec::new();
        for s in [2, 0, 1, 4, 3, 5, 7, 6, 9, 8] {
            released.extend(seqs(&w.accept(packet(s))));
        }

        assert_eq!(released, (0..10).collect::<Vec<_>>());
        assert_eq!(w.stats().abandoned, 0);
        assert!(w.missing().is_empty());
    }

    #[test]
    fn test_gap_tracking_and_duplicates() {
        let mut w = window();
        assert!(w.accept(packet(3)).is_empty());
        assert_eq!(w.missing(), vec![0, 1, 2]);

        assert!(w.accept(packet(1)).is_empty());
        assert_eq!(w.missing(), vec![0, 2]);

        assert!(w.accept(packet(3)).is_empty());
        assert_eq!(seqs(&w.accept(packet(0))), vec![0, 1]);
        assert!(w.accept(packet(0)).is_empty());
        assert_eq!(w.stats().duplicates, 2);
        assert_eq!(w.missing(), vec![2]);
    }

    #[test]
    fn test_purge_abandons_gap() {
        let mut w = window();
        let start = Instant::now();

        w.accept_at(packet(2), start);
        w.accept_at(packet(5), start + Duration::from_secs(4));
        assert_eq!(w.missing(), vec![0, 1, 3, 4]);

        // only seq 2 is stale
        assert!(w.purge_expired(start + Duration::from_secs(5)).is_empty());
        assert_eq!(w.expected_sequence(), 3);
        assert_eq!(w.missing(), vec![3, 4]);

        let stats = w.stats();
        assert_eq!(stats.purged, 1);
        assert_eq!(stats.abandoned, 2);

        // late arrival of an abandoned number is discarded
        assert!(w.accept(packet(1)).is_empty());
        assert_eq!(seqs(&w.accept(packet(3))), vec![3]);
        assert_eq!(seqs(&w.accept(packet(4))), vec![4, 5]);
    }

    #[test]
    fn test_purge_releases_fresh_packets_below_newest_stale() {
        let mut w = window();
        let start = Instant::now();

        w.accept_at(packet(4), start);
        w.accept_at(packet(2), start + Duration::from_secs(3));
        w.accept_at(packet(6), start + Duration::from_secs(3));

        let released = w.purge_expired(start + Duration::from_secs(5));
        assert_eq!(seqs(&released), vec![2]);
        assert_eq!(w.expected_sequence(), 5);
        assert_eq!(w.missing(), vec![5]);
        assert_eq!(w.stats().abandoned, 3);
    }

    #[test]
    fn test_purge_without_stale_is_noop() {
        let mut w = window();
        let start = Instant::now();
        w.accept_at(packet(1), start);

        assert!(w.purge_expired(start + Duration::from_secs(1)).is_empty());
        assert_eq!(w.expected_sequence(), 0);
        assert_eq!(w.missing(), vec![0]);
    }

    #[test]
    fn test_large_gap_is_discontinuity() {
        let mut w = ReorderWindow::new(&ReorderConfig {
            max_gap: 8,
            ..Default::default()
        });

        w.accept(packet(0));
        w.accept(packet(3));
        let released = w.accept(packet(100));

        assert_eq!(seqs(&released), vec![3, 100]);
        assert_eq!(w.expected_sequence(), 101);
        assert!(w.missing().is_empty());

        let stats = w.stats();
        assert_eq!(stats.discontinuities, 1);
        assert_eq!(stats.abandoned, 98);
    }

    #[test]
    fn test_reset_starts_new_stream() {
        let mut w = window();
        w.accept(packet(0));
        w.accept(packet(1));
        w.accept(packet(5));
        w.reset();

        assert!(w.missing().is_empty());
        assert_eq!(seqs(&w.accept(packet(0))), vec![0]);
        assert_eq!(w.stats().released, 3);
    }

    fn permutation_with_duplicates() -> impl Strategy<Value = (u64, Vec<u64>)> {
        (1u64..96).prop_flat_map(|n| {
            prop::collection::vec(0..n, 0..24).prop_flat_map(move |dups| {
                let mut all: Vec<u64> = (0..n).collect();
                all.extend(dups);
                (Just(n), Just(all).prop_shuffle())
            })
        })
    }

    proptest! {
        #[test]
        fn prop_any_permutation_releases_in_order((n, order) in permutation_with_duplicates()) {
            let mut w = window();
            let mut released = Vec::new();
            for s in order {
                released.extend(seqs(&w.accept(packet(s))));
            }

            prop_assert_eq!(released, (0..n).collect::<Vec<_>>());
            prop_assert!(w.missing().is_empty());
            prop_assert_eq!(w.stats().held, 0);
            prop_assert_eq!(w.stats().abandoned, 0);
        }
    }
}
