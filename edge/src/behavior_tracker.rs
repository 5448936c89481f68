//! Per-address and per-/24-subnet timestamp-history tracking: rapid-fire
//! and subnet-velocity detection.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use dashmap::DashMap;

const SUBNET_TTL: Duration = Duration::from_secs(10 * 60);
const SUBNET_PRUNE_WINDOW: Duration = Duration::from_secs(5 * 60);
const RAPID_TTL: Duration = Duration::from_secs(2 * 60);
const RAPID_PRUNE_WINDOW: Duration = Duration::from_secs(15);
const SUBNET_VELOCITY_THRESHOLD: usize = 3;
const RAPID_FIRE_THRESHOLD: usize = 3;
const SUB_SECOND_MS: i64 = 1000;

/// Subnet (/24) history: distinct addresses seen plus a pruned timestamp
/// list. IPv4 only.
struct SubnetHistory {
    addresses: HashSet<String>,
    timestamps: VecDeque<Instant>,
    last_seen: Instant,
}

impl SubnetHistory {
    fn new() -> Self {
        Self {
            addresses: HashSet::new(),
            timestamps: VecDeque::new(),
            last_seen: Instant::now(),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_seen) > SUBNET_TTL
    }
}

/// Per-address rapid-fire history.
struct RapidFireHistory {
    timestamps: VecDeque<Instant>,
    last_seen: Instant,
}

impl RapidFireHistory {
    fn new() -> Self {
        Self {
            timestamps: VecDeque::new(),
            last_seen: Instant::now(),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_seen) > RAPID_TTL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BehaviorResult {
    pub subnet_ips: Option<u32>,
    /// Total hits (not distinct addresses) seen from this /24 within its
    /// 5-minute prune window.
    pub subnet_hits: Option<u32>,
    pub subnet_alert: bool,
    pub hits_in_15s: u32,
    pub last_gap_ms: i64,
    pub rapid_fire: bool,
    pub sub_second_dupe: bool,
}

pub struct BehaviorTracker {
    subnets: DashMap<String, SubnetHistory>,
    rapid: DashMap<String, RapidFireHistory>,
}

impl Default for BehaviorTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BehaviorTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subnets: DashMap::new(),
            rapid: DashMap::new(),
        }
    }

    /// `RecordAndCheck(address) -> BehaviorResult`.
    pub fn record_and_check(&self, address: &str) -> BehaviorResult {
        let now = Instant::now();
        let mut result = BehaviorResult::default();

        if let Some(subnet) = subnet24(address) {
            let key = format!("subnet:{subnet}");
            let mut entry = self
                .subnets
                .entry(key)
                .and_modify(|h| {
                    if h.is_expired(now) {
                        *h = SubnetHistory::new();
                    }
                })
                .or_insert_with(SubnetHistory::new);

            while let Some(&front) = entry.timestamps.front() {
                if now.duration_since(front) > SUBNET_PRUNE_WINDOW {
                    entry.timestamps.pop_front();
                } else {
                    break;
                }
            }
            entry.timestamps.push_back(now);
            entry.addresses.insert(address.to_owned());
            entry.last_seen = now;

            let count = entry.addresses.len() as u32;
            result.subnet_ips = Some(count);
            result.subnet_hits = Some(entry.timestamps.len() as u32);
            result.subnet_alert = count as usize >= SUBNET_VELOCITY_THRESHOLD;
        }

        {
            let key = format!("rapid:{address}");
            let mut entry = self
                .rapid
                .entry(key)
                .and_modify(|h| {
                    if h.is_expired(now) {
                        *h = RapidFireHistory::new();
                    }
                })
                .or_insert_with(RapidFireHistory::new);

            while let Some(&front) = entry.timestamps.front() {
                if now.duration_since(front) > RAPID_PRUNE_WINDOW {
                    entry.timestamps.pop_front();
                } else {
                    break;
                }
            }

            let gap_ms = entry
                .timestamps
                .back()
                .map_or(-1, |&prev| now.duration_since(prev).as_millis() as i64);

            entry.timestamps.push_back(now);
            entry.last_seen = now;

            let count = entry.timestamps.len() as u32;
            result.hits_in_15s = count;
            result.last_gap_ms = gap_ms;
            result.rapid_fire = count as usize >= RAPID_FIRE_THRESHOLD;
            result.sub_second_dupe = gap_ms >= 0 && gap_ms < SUB_SECOND_MS;
        }

        result
    }
}

/// Text prefix of an IPv4 address up to the final dot. `None` for IPv6 or
/// unparseable input.
#[must_use]
pub fn subnet24(address: &str) -> Option<String> {
    let addr: std::net::Ipv4Addr = address.parse().ok()?;
    let o = addr.octets();
    Some(format!("{}.{}.{}", o[0], o[1], o[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet24_extracts_24_bit_prefix() {
        assert_eq!(subnet24("198.51.100.42").as_deref(), Some("198.51.100"));
    }

    #[test]
    fn subnet24_is_none_for_ipv6() {
        assert_eq!(subnet24("::1"), None);
        assert_eq!(subnet24("not-an-ip"), None);
    }

    #[test]
    fn three_distinct_addresses_same_subnet_trips_alert() {
        let t = BehaviorTracker::new();
        t.record_and_check("198.51.100.10");
        t.record_and_check("198.51.100.42");
        let r = t.record_and_check("198.51.100.77");
        assert_eq!(r.subnet_ips, Some(3));
        assert_eq!(r.subnet_hits, Some(3));
        assert!(r.subnet_alert);
    }

    #[test]
    fn two_distinct_addresses_do_not_trip_alert() {
        let t = BehaviorTracker::new();
        t.record_and_check("198.51.100.10");
        let r = t.record_and_check("198.51.100.42");
        assert_eq!(r.subnet_ips, Some(2));
        assert!(!r.subnet_alert);
    }

    #[test]
    fn ipv6_address_has_no_subnet_signal_but_rapid_fire_still_runs() {
        let t = BehaviorTracker::new();
        let r = t.record_and_check("2001:db8::1");
        assert_eq!(r.subnet_ips, None);
        assert!(!r.subnet_alert);
        assert_eq!(r.hits_in_15s, 1);
    }

    #[test]
    fn three_rapid_hits_trip_rapid_fire_and_sub_second_dupe() {
        let t = BehaviorTracker::new();
        t.record_and_check("198.51.100.42");
        t.record_and_check("198.51.100.42");
        let r = t.record_and_check("198.51.100.42");
        assert_eq!(r.hits_in_15s, 3);
        assert!(r.rapid_fire);
        assert!(r.last_gap_ms < SUB_SECOND_MS);
        assert!(r.sub_second_dupe);
    }

    #[test]
    fn first_hit_has_gap_of_negative_one() {
        let t = BehaviorTracker::new();
        let r = t.record_and_check("1.2.3.4");
        assert_eq!(r.last_gap_ms, -1);
        assert!(!r.sub_second_dupe);
    }
}
