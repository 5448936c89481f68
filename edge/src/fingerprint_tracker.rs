//! Per-address composite-fingerprint stability tracking.
//!
//! One concrete history type per spec §9's "no shared base class" note;
//! the common surface across detectors is the `DashMap` they're stored
//! in, not the entry type.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pixl_common::CompositeFingerprint;

/// Recent-rate window (spec §4.5).
const RATE_WINDOW: Duration = Duration::from_secs(5 * 60);
/// Per-address sliding TTL (spec §4.5: 24 hours).
const ENTRY_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Timestamp list cap (spec §4.5 and §8 boundary behavior).
const MAX_TIMESTAMPS: usize = 1000;

struct FingerprintHistory {
    fingerprints: HashSet<CompositeFingerprint>,
    observation_count: u64,
    /// Oldest-first insertion order, pruned to the rate window and capped
    /// at [`MAX_TIMESTAMPS`].
    timestamps: VecDeque<Instant>,
    last_seen: Instant,
}

impl FingerprintHistory {
    fn new() -> Self {
        Self {
            fingerprints: HashSet::new(),
            observation_count: 0,
            timestamps: VecDeque::new(),
            last_seen: Instant::now(),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_seen) > ENTRY_TTL
    }
}

/// Per-call result, stamped by `EdgeEnricher` into `_srv_fp*` keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerprintResult {
    pub observation_count: u64,
    pub unique_count: u32,
    pub recent_5m_count: u32,
    pub suspicious_variation: bool,
    pub high_volume: bool,
    pub extreme_volume: bool,
    pub high_rate: bool,
}

pub struct FingerprintTracker {
    histories: DashMap<String, FingerprintHistory>,
}

impl Default for FingerprintTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            histories: DashMap::new(),
        }
    }

    /// `RecordAndCheck(address, canvasHash, webglHash, audioHash)`.
    pub fn record_and_check(
        &self,
        address: &str,
        canvas: &str,
        webgl: &str,
        audio: &str,
    ) -> FingerprintResult {
        let fp = CompositeFingerprint::new(canvas, webgl, audio);
        let now = Instant::now();
        let key = format!("fp:{address}");

        let mut entry = self
            .histories
            .entry(key)
            .and_modify(|h| {
                if h.is_expired(now) {
                    *h = FingerprintHistory::new();
                }
            })
            .or_insert_with(FingerprintHistory::new);

        entry.fingerprints.insert(fp);
        entry.observation_count += 1;
        entry.last_seen = now;

        // Prune older than the rate window, oldest-first.
        while let Some(&front) = entry.timestamps.front() {
            if now.duration_since(front) > RATE_WINDOW {
                entry.timestamps.pop_front();
            } else {
                break;
            }
        }
        // Cap at 1000: still counted in observation_count, but not appended.
        if entry.timestamps.len() < MAX_TIMESTAMPS {
            entry.timestamps.push_back(now);
        }

        let unique_count = entry.fingerprints.len() as u32;
        let observation_count = entry.observation_count;
        let recent_5m_count = entry.timestamps.len() as u32;

        FingerprintResult {
            observation_count,
            unique_count,
            recent_5m_count,
            suspicious_variation: unique_count > 2 && observation_count > 3,
            high_volume: observation_count > 50,
            extreme_volume: observation_count > 200,
            high_rate: recent_5m_count > 20,
        }
    }
}

/// Timestamp used only for log/diagnostic purposes, not part of the hot
/// cache key.
#[must_use]
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_is_not_suspicious() {
        let t = FingerprintTracker::new();
        let r = t.record_and_check("1.2.3.4", "a", "b", "c");
        assert_eq!(r.observation_count, 1);
        assert_eq!(r.unique_count, 1);
        assert!(!r.suspicious_variation);
    }

    #[test]
    fn four_distinct_fingerprints_trip_suspicious_variation() {
        let t = FingerprintTracker::new();
        for i in 0..4 {
            t.record_and_check("203.0.113.5", &format!("canvas{i}"), "webgl", "audio");
        }
        let r = t.record_and_check("203.0.113.5", "canvas-final", "webgl", "audio");
        assert_eq!(r.unique_count, 5);
        assert_eq!(r.observation_count, 5);
        assert!(r.suspicious_variation);
    }

    #[test]
    fn repeated_identical_fingerprint_keeps_unique_count_at_one() {
        let t = FingerprintTracker::new();
        for _ in 0..5 {
            t.record_and_check("9.9.9.9", "same", "same", "same");
        }
        let r = t.record_and_check("9.9.9.9", "same", "same", "same");
        assert_eq!(r.unique_count, 1);
        assert_eq!(r.observation_count, 6);
        assert!(!r.suspicious_variation);
    }

    #[test]
    fn high_and_extreme_volume_thresholds() {
        let t = FingerprintTracker::new();
        let mut last = t.record_and_check("5.5.5.5", "a", "b", "c");
        for _ in 0..60 {
            last = t.record_and_check("5.5.5.5", "a", "b", "c");
        }
        assert!(last.high_volume);
        assert!(!last.extreme_volume);
        for _ in 0..150 {
            last = t.record_and_check("5.5.5.5", "a", "b", "c");
        }
        assert!(last.extreme_volume);
    }

    #[test]
    fn timestamp_list_caps_at_1000_but_observation_count_keeps_incrementing() {
        let t = FingerprintTracker::new();
        let mut last = t.record_and_check("1.1.1.1", "a", "b", "c");
        for _ in 0..1200 {
            last = t.record_and_check("1.1.1.1", "a", "b", "c");
        }
        assert_eq!(last.observation_count, 1201);
        assert!(last.recent_5m_count <= 1000);
    }
}
