//! Tier 2 — cross-request correlation, all stateful and in-memory (spec
//! §4.10 steps 7-10).

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use pixl_common::CompositeFingerprint;

use crate::client_fields::ClientFields;

const SESSION_IDLE_THRESHOLD: Duration = Duration::from_secs(30 * 60);
const CROSS_CUSTOMER_WINDOW: Duration = Duration::from_secs(5 * 60);
const CROSS_CUSTOMER_ALERT_THRESHOLD: u32 = 3;

struct SessionEntry {
    session_id: String,
    first_seen: Instant,
    last_seen: Instant,
    hit_count: u32,
    pages: HashSet<String>,
}

pub struct SessionResult {
    pub session_id: String,
    pub hit_num: u32,
    pub duration_secs: i64,
    pub page_count: u32,
}

/// Session stitching keyed by composite fingerprint (spec §4.10 step 7).
#[derive(Default)]
pub struct SessionTracker {
    sessions: DashMap<CompositeFingerprint, SessionEntry>,
}

impl SessionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_and_check(&self, fingerprint: &CompositeFingerprint, request_path: &str) -> SessionResult {
        let now = Instant::now();
        let mut entry = self.sessions.entry(fingerprint.clone()).or_insert_with(|| SessionEntry {
            session_id: uuid::Uuid::new_v4().to_string(),
            first_seen: now,
            last_seen: now,
            hit_count: 0,
            pages: HashSet::new(),
        });

        if now.duration_since(entry.last_seen) > SESSION_IDLE_THRESHOLD {
            entry.session_id = uuid::Uuid::new_v4().to_string();
            entry.first_seen = now;
            entry.hit_count = 0;
            entry.pages.clear();
        }

        entry.last_seen = now;
        entry.hit_count += 1;
        entry.pages.insert(request_path.to_string());

        SessionResult {
            session_id: entry.session_id.clone(),
            hit_num: entry.hit_count,
            duration_secs: now.duration_since(entry.first_seen).as_secs() as i64,
            page_count: entry.pages.len() as u32,
        }
    }
}

/// Cross-customer intel keyed by `(address, fingerprint)` (spec §4.10
/// step 8): how many distinct companies have hit this address+fingerprint
/// pair in the last 5 minutes.
#[derive(Default)]
pub struct CrossCustomerTracker {
    windows: DashMap<String, VecDeque<(Instant, String)>>,
}

pub struct CrossCustomerResult {
    pub company_count: u32,
    pub alert: bool,
}

impl CrossCustomerTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_and_check(
        &self,
        address: &str,
        fingerprint: &CompositeFingerprint,
        company_id: &str,
    ) -> CrossCustomerResult {
        let key = format!("{address}|{fingerprint}");
        let now = Instant::now();
        let mut window = self.windows.entry(key).or_default();
        window.push_back((now, company_id.to_string()));
        while let Some((ts, _)) = window.front() {
            if now.duration_since(*ts) > CROSS_CUSTOMER_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }

        let distinct: HashSet<&str> = window.iter().map(|(_, c)| c.as_str()).collect();
        let count = distinct.len() as u32;
        CrossCustomerResult {
            company_count: count,
            alert: count >= CROSS_CUSTOMER_ALERT_THRESHOLD,
        }
    }
}

/// GPU renderer string → rendering tier lookup (spec §4.10 step 9).
/// Partial catalog — unrecognized strings fall through to `Unknown`.
fn gpu_tier(renderer: &str) -> &'static str {
    let lower = renderer.to_ascii_lowercase();
    const HIGH: &[&str] = &["rtx 4090", "rtx 4080", "rtx 3090", "rx 7900", "apple m3", "apple m2 max", "apple m2 pro"];
    const MID: &[&str] = &["rtx 3060", "rtx 2060", "gtx 1660", "gtx 1060", "rx 580", "apple m1", "apple m2", "iris xe"];
    const LOW: &[&str] = &["intel hd", "intel uhd", "mali", "adreno", "powervr", "swiftshader", "llvmpipe"];

    if HIGH.iter().any(|m| lower.contains(m)) {
        "HIGH"
    } else if MID.iter().any(|m| lower.contains(m)) {
        "MID"
    } else if LOW.iter().any(|m| lower.contains(m)) {
        "LOW"
    } else {
        "Unknown"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffluenceTier {
    High,
    Mid,
    Low,
}

/// Device affluence: combines GPU tier, CPU cores, memory, and screen
/// resolution into a single tier (spec §4.10 step 9).
#[must_use]
pub fn device_affluence(fields: &ClientFields) -> (AffluenceTier, &'static str) {
    let tier = gpu_tier(fields.gpu_renderer.as_deref().unwrap_or(""));

    let cores_high = fields.cpu_cores.unwrap_or(0) >= 8;
    let mem_high = fields.memory_gb.unwrap_or(0) >= 16;
    let res_high = fields.resolution_area().unwrap_or(0) >= 1_920 * 1_080;

    let score = [tier == "HIGH", cores_high, mem_high, res_high]
        .iter()
        .filter(|b| **b)
        .count();

    let affluence = if tier == "HIGH" || score >= 3 {
        AffluenceTier::High
    } else if tier == "LOW" && score == 0 {
        AffluenceTier::Low
    } else {
        AffluenceTier::Mid
    };

    (affluence, tier)
}

/// Nine boolean signals feeding the lead-quality score (spec §4.10 step
/// 10). Carried as a plain struct so Tier 3's contradiction/timezone
/// outputs can be folded in before scoring, per spec's note that the
/// contract only requires Tier 1/2 outputs be present, not Tier 3's.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeadQualitySignals {
    pub residential_ip: bool,
    pub stable_fingerprint: bool,
    pub human_like_mouse: bool,
    pub font_count_ok: bool,
    pub clean_canvas: bool,
    pub timezone_matches: bool,
    pub no_contradictions: bool,
    pub geolocatable_public_ip: bool,
    pub non_bot_ua: bool,
}

const LEAD_QUALITY_WEIGHT: u8 = 100 / 9;

#[must_use]
pub fn lead_quality_score(signals: LeadQualitySignals) -> u8 {
    let flags = [
        signals.residential_ip,
        signals.stable_fingerprint,
        signals.human_like_mouse,
        signals.font_count_ok,
        signals.clean_canvas,
        signals.timezone_matches,
        signals.no_contradictions,
        signals.geolocatable_public_ip,
        signals.non_bot_ua,
    ];
    let hit_count = flags.iter().filter(|b| **b).count() as u32;
    (hit_count * u32::from(LEAD_QUALITY_WEIGHT)).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_stitching_assigns_stable_id_within_idle_window() {
        let tracker = SessionTracker::new();
        let fp = CompositeFingerprint::new("a", "b", "c");
        let first = tracker.record_and_check(&fp, "/1/1_SMART.GIF");
        let second = tracker.record_and_check(&fp, "/1/1_SMART.GIF?x=2");
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(second.hit_num, 2);
        assert_eq!(second.page_count, 2);
    }

    #[test]
    fn cross_customer_alert_fires_at_three_distinct_companies() {
        let tracker = CrossCustomerTracker::new();
        let fp = CompositeFingerprint::new("x", "y", "z");
        tracker.record_and_check("1.2.3.4", &fp, "company-a");
        tracker.record_and_check("1.2.3.4", &fp, "company-b");
        let result = tracker.record_and_check("1.2.3.4", &fp, "company-c");
        assert_eq!(result.company_count, 3);
        assert!(result.alert);
    }

    #[test]
    fn cross_customer_no_alert_below_threshold() {
        let tracker = CrossCustomerTracker::new();
        let fp = CompositeFingerprint::new("x", "y", "z");
        let result = tracker.record_and_check("1.2.3.4", &fp, "company-a");
        assert_eq!(result.company_count, 1);
        assert!(!result.alert);
    }

    #[test]
    fn gpu_tier_classifies_known_renderers() {
        assert_eq!(gpu_tier("ANGLE (NVIDIA, NVIDIA GeForce RTX 3060 Direct3D11)"), "MID");
        assert_eq!(gpu_tier("Intel(R) UHD Graphics 620"), "LOW");
        assert_eq!(gpu_tier("Apple M1"), "MID");
        assert_eq!(gpu_tier("totally unknown gpu"), "Unknown");
    }

    #[test]
    fn lead_quality_score_tops_out_at_99_with_all_signals() {
        let signals = LeadQualitySignals {
            residential_ip: true,
            stable_fingerprint: true,
            human_like_mouse: true,
            font_count_ok: true,
            clean_canvas: true,
            timezone_matches: true,
            no_contradictions: true,
            geolocatable_public_ip: true,
            non_bot_ua: true,
        };
        assert_eq!(lead_quality_score(signals), 99);
    }

    #[test]
    fn lead_quality_score_zero_with_no_signals() {
        assert_eq!(lead_quality_score(LeadQualitySignals::default()), 0);
    }
}
