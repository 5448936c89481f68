//! Tier 3 — asymmetric detection (spec §4.10 steps 11-15). Unlike Tier 2,
//! several of these are deliberately asymmetric: a positive stamp is a
//! strong signal, but absence proves nothing (device-age table coverage,
//! cultural-flag coverage, etc. are all partial by design).

use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use twox_hash::XxHash64;

use crate::client_fields::ClientFields;
use crate::enrich::tier1::UaInfo;

/// One contradiction-matrix rule (spec §4.10 step 11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Impossible,
    Improbable,
    Suspicious,
}

pub struct Contradiction {
    pub name: &'static str,
    pub severity: Severity,
}

/// Input bundle for the Tier 3 contradiction matrix. Carried as a
/// borrowed struct so callers don't need to thread a dozen positional
/// arguments through.
pub struct ContradictionInput<'a> {
    pub ua: &'a UaInfo,
    pub fields: &'a ClientFields,
    pub is_datacenter_ip: bool,
    pub battery_api_present: bool,
}

/// Evaluate the fixed 13-rule contradiction catalog (7 IMPOSSIBLE, 3
/// IMPROBABLE, 3 SUSPICIOUS). Partial catalog — see DESIGN.md.
#[must_use]
pub fn evaluate_contradictions(input: &ContradictionInput<'_>) -> Vec<Contradiction> {
    let mut hits = Vec::new();
    let os = input.ua.os.as_deref().unwrap_or("").to_ascii_lowercase();
    let browser = input.ua.browser.as_deref().unwrap_or("").to_ascii_lowercase();
    let gpu = input.fields.gpu_renderer.as_deref().unwrap_or("").to_ascii_lowercase();
    let resolution = input.fields.resolution_area().unwrap_or(0);
    let mouse_moves = input.fields.mouse_moves.unwrap_or(0);

    // IMPOSSIBLE (7)
    if input.fields.mobile && resolution > 2_000 * 1_000 && mouse_moves > 0 {
        hits.push(Contradiction { name: "mobile_with_desktop_resolution_and_mouse", severity: Severity::Impossible });
    }
    if os.contains("mac") && gpu.contains("directx") {
        hits.push(Contradiction { name: "macos_with_directx_gpu", severity: Severity::Impossible });
    }
    if os.contains("ios") && gpu.contains("nvidia") {
        hits.push(Contradiction { name: "ios_with_nvidia_gpu", severity: Severity::Impossible });
    }
    if os.contains("android") && browser.contains("safari") && !browser.contains("chrome") {
        hits.push(Contradiction { name: "android_with_safari", severity: Severity::Impossible });
    }
    if input.fields.platform.as_deref().is_some_and(|p| p.to_ascii_lowercase().contains("win")) && os.contains("mac") {
        hits.push(Contradiction { name: "windows_platform_macos_ua", severity: Severity::Impossible });
    }
    if os.contains("linux") && gpu.contains("apple") {
        hits.push(Contradiction { name: "linux_with_apple_gpu", severity: Severity::Impossible });
    }
    if input.fields.cpu_cores == Some(0) && mouse_moves > 100 {
        hits.push(Contradiction { name: "zero_cores_with_heavy_interaction", severity: Severity::Impossible });
    }

    // IMPROBABLE (3)
    if input.battery_api_present && os.contains("mac") && browser.contains("safari") {
        hits.push(Contradiction { name: "battery_api_on_macos_safari", severity: Severity::Improbable });
    }
    if input.is_datacenter_ip && mouse_moves > 50 {
        hits.push(Contradiction { name: "datacenter_ip_with_heavy_mouse_activity", severity: Severity::Improbable });
    }
    if input.fields.font_count.is_some_and(|c| c > 500) {
        hits.push(Contradiction { name: "implausibly_large_font_count", severity: Severity::Improbable });
    }

    // SUSPICIOUS (3)
    if input.fields.memory_gb.is_some_and(|m| m > 256) {
        hits.push(Contradiction { name: "implausible_memory_size", severity: Severity::Suspicious });
    }
    if input.fields.cpu_cores.is_some_and(|c| c > 128) {
        hits.push(Contradiction { name: "implausible_core_count", severity: Severity::Suspicious });
    }
    if input.fields.font_count == Some(0) && !browser.is_empty() {
        hits.push(Contradiction { name: "zero_fonts_reported", severity: Severity::Suspicious });
    }

    hits
}

/// Weighted geographic-arbitrage score over 7 signals (spec §4.10 step
/// 12): client locale/fonts/timezone/calendar/date-number-format against
/// geo-derived region. Higher is more consistent.
pub struct CulturalInput<'a> {
    pub fields: &'a ClientFields,
    pub geo_country_code: Option<&'a str>,
    pub geo_timezone: Option<&'a str>,
}

#[must_use]
pub fn cultural_consistency(input: &CulturalInput<'_>) -> (u8, Vec<&'static str>) {
    let mut flags = Vec::new();
    let mut score: i32 = 100;

    let locale_cc = input
        .fields
        .locale
        .as_deref()
        .and_then(|l| l.split(['-', '_']).nth(1))
        .map(str::to_ascii_uppercase);
    if let (Some(locale_cc), Some(geo_cc)) = (&locale_cc, input.geo_country_code) {
        if locale_cc != geo_cc {
            score -= 20;
            flags.push("locale_country_mismatch");
        }
    }

    if let (Some(client_tz), Some(geo_tz)) = (&input.fields.timezone, input.geo_timezone) {
        if client_tz != geo_tz {
            score -= 20;
            flags.push("timezone_region_mismatch");
        }
    }

    if input.fields.calendar.as_deref().is_some_and(|c| c != "gregory")
        && matches!(input.geo_country_code, Some(cc) if !["SA", "IR", "IL", "TH"].contains(&cc))
    {
        score -= 15;
        flags.push("non_gregorian_calendar_unexpected_region");
    }

    if input.fields.date_format.as_deref() == Some("MM/DD/YYYY")
        && matches!(input.geo_country_code, Some(cc) if cc != "US")
    {
        score -= 15;
        flags.push("us_date_format_outside_us");
    }

    if input.fields.number_format.as_deref() == Some("1,234.56")
        && matches!(input.geo_country_code, Some(cc) if ["DE", "FR", "ES", "IT", "RU"].contains(&cc))
    {
        score -= 10;
        flags.push("us_number_format_in_comma_decimal_region");
    }

    if input.fields.font_count.is_some_and(|c| c < 3)
        && matches!(input.geo_country_code, Some(cc) if cc != "Unknown")
    {
        score -= 10;
        flags.push("unusually_low_font_diversity");
    }

    if locale_cc.is_none() && input.geo_country_code.is_some() {
        score -= 10;
        flags.push("locale_not_reported");
    }

    (score.clamp(0, 100) as u8, flags)
}

/// GPU renderer → release year lookup, a partial catalog of roughly 70
/// well-known discrete/integrated GPUs. See DESIGN.md for the "partial by
/// design" rationale shared with the bot-UA catalog.
const GPU_RELEASE_YEARS: &[(&str, u32)] = &[
    ("rtx 4090", 2022), ("rtx 4080", 2022), ("rtx 4070", 2023), ("rtx 4060", 2023),
    ("rtx 3090", 2020), ("rtx 3080", 2020), ("rtx 3070", 2020), ("rtx 3060", 2021),
    ("rtx 2080", 2018), ("rtx 2070", 2018), ("rtx 2060", 2019),
    ("gtx 1660", 2019), ("gtx 1650", 2019), ("gtx 1080", 2016), ("gtx 1070", 2016),
    ("gtx 1060", 2016), ("gtx 1050", 2016), ("gtx 980", 2014), ("gtx 970", 2014),
    ("gtx 960", 2015), ("gtx 750", 2014),
    ("rx 7900", 2022), ("rx 6900", 2020), ("rx 6800", 2020), ("rx 6700", 2021),
    ("rx 6600", 2021), ("rx 5700", 2019), ("rx 580", 2017), ("rx 570", 2017),
    ("rx 480", 2016), ("vega 64", 2017), ("vega 56", 2017),
    ("apple m3", 2023), ("apple m2 max", 2023), ("apple m2 pro", 2023), ("apple m2", 2022),
    ("apple m1 max", 2021), ("apple m1 pro", 2021), ("apple m1", 2020),
    ("iris xe", 2020), ("iris plus", 2019), ("intel uhd 630", 2017), ("intel uhd 620", 2017),
    ("intel hd 530", 2015), ("intel hd 520", 2015), ("intel hd 4600", 2013), ("intel hd 4000", 2012),
    ("intel hd 3000", 2011), ("intel hd graphics", 2010),
    ("adreno 750", 2023), ("adreno 740", 2022), ("adreno 730", 2022), ("adreno 660", 2021),
    ("adreno 650", 2020), ("adreno 640", 2019), ("adreno 630", 2018), ("adreno 540", 2017),
    ("adreno 530", 2016), ("adreno 430", 2015), ("adreno 330", 2013),
    ("mali-g710", 2021), ("mali-g78", 2020), ("mali-g77", 2019), ("mali-g76", 2018),
    ("mali-g72", 2017), ("mali-t880", 2016), ("mali-t860", 2015), ("mali-450", 2013),
    ("powervr gt7600", 2016), ("powervr sgx544", 2012),
];

#[must_use]
pub fn gpu_release_year(renderer: &str) -> Option<u32> {
    let lower = renderer.to_ascii_lowercase();
    GPU_RELEASE_YEARS
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, year)| *year)
}

pub struct DeviceAgeResult {
    pub age_years: Option<f64>,
    pub anomaly: bool,
}

/// Estimates device age from GPU release year vs. the current year, and
/// flags a "modern browser, ancient hardware, zero interaction,
/// datacenter IP" anomaly pattern (spec §4.10 step 13).
#[must_use]
pub fn estimate_device_age(
    fields: &ClientFields,
    current_year: u32,
    is_modern_browser: bool,
    is_datacenter_ip: bool,
) -> DeviceAgeResult {
    let Some(release_year) = fields.gpu_renderer.as_deref().and_then(gpu_release_year) else {
        return DeviceAgeResult { age_years: None, anomaly: false };
    };
    let age_years = f64::from(current_year.saturating_sub(release_year));

    let ancient_hardware = age_years >= 10.0;
    let zero_interaction = fields.mouse_moves.unwrap_or(0) == 0;
    let anomaly = is_modern_browser && ancient_hardware && zero_interaction && is_datacenter_ip;

    DeviceAgeResult { age_years: Some(age_years), anomaly }
}

/// Quantizes a raw `mousePath` string to a 10-pixel / 100-ms grid so near
/// identical but not byte-identical paths collide, then hashes with
/// `twox-hash` (fast, non-cryptographic — collision resistance against an
/// adversary is not the goal, only detecting genuine replay).
#[must_use]
pub fn quantize_and_hash_mouse_path(mouse_path: &str) -> Option<u64> {
    if mouse_path.is_empty() {
        return None;
    }
    let mut hasher = XxHash64::with_seed(0);
    for point in mouse_path.split(';') {
        let mut parts = point.splitn(3, ',');
        let (Some(x), Some(y), Some(t)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let (Ok(x), Ok(y), Ok(t)) = (x.parse::<i64>(), y.parse::<i64>(), t.parse::<i64>()) else {
            continue;
        };
        (x / 10).hash(&mut hasher);
        (y / 10).hash(&mut hasher);
        (t / 100).hash(&mut hasher);
    }
    Some(hasher.finish())
}

const REPLAY_CACHE_CAPACITY: usize = 50_000;
const REPLAY_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

struct ReplayEntry {
    fingerprint: String,
    seen_at: Instant,
}

/// Bounded cache of recent quantized mouse-path hashes, keyed by hash, so
/// a hit from a *different* fingerprint with the same path hash is a
/// replay candidate (spec §4.10 step 14).
#[derive(Default)]
pub struct ReplayCache {
    entries: DashMap<u64, ReplayEntry>,
}

pub struct ReplayResult {
    pub detected: bool,
    pub match_fingerprint: Option<String>,
}

impl ReplayCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_and_check(&self, hash: u64, fingerprint: &str) -> ReplayResult {
        let now = Instant::now();
        if self.entries.len() >= REPLAY_CACHE_CAPACITY {
            self.entries.retain(|_, e| now.duration_since(e.seen_at) < REPLAY_CACHE_TTL);
        }

        if let Some(existing) = self.entries.get(&hash) {
            if now.duration_since(existing.seen_at) < REPLAY_CACHE_TTL && existing.fingerprint != fingerprint {
                let match_fp = existing.fingerprint.clone();
                drop(existing);
                self.entries.insert(hash, ReplayEntry { fingerprint: fingerprint.to_string(), seen_at: now });
                return ReplayResult { detected: true, match_fingerprint: Some(match_fp) };
            }
        }

        self.entries.insert(hash, ReplayEntry { fingerprint: fingerprint.to_string(), seen_at: now });
        ReplayResult { detected: false, match_fingerprint: None }
    }
}

/// Per-company, per-hour bucket tracking total hits and a weighted
/// bot-like score (spec §4.10 step 15).
#[derive(Default)]
struct DeadInternetBucket {
    total_hits: u64,
    weighted_score: f64,
}

#[derive(Default)]
pub struct DeadInternetIndex {
    buckets: DashMap<(String, i64), DeadInternetBucket>,
}

pub struct DeadInternetSignals {
    pub bot_score_ge_50: bool,
    pub zero_mouse_moves: bool,
    pub datacenter_ip: bool,
    pub any_contradiction: bool,
    pub low_fingerprint_diversity: bool,
}

impl DeadInternetIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_and_check(&self, company_id: &str, hour_bucket: i64, signals: &DeadInternetSignals) -> u8 {
        let weight = [
            (signals.bot_score_ge_50, 0.30),
            (signals.zero_mouse_moves, 0.20),
            (signals.datacenter_ip, 0.20),
            (signals.any_contradiction, 0.15),
            (signals.low_fingerprint_diversity, 0.15),
        ]
        .iter()
        .filter(|(present, _)| *present)
        .map(|(_, w)| w)
        .sum::<f64>();

        let mut bucket = self
            .buckets
            .entry((company_id.to_string(), hour_bucket))
            .or_default();
        bucket.total_hits += 1;
        bucket.weighted_score += weight;

        ((bucket.weighted_score / bucket.total_hits as f64) * 100.0).clamp(0.0, 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ua(os: &str, browser: &str) -> UaInfo {
        UaInfo {
            browser: Some(browser.to_string()),
            browser_version: None,
            os: Some(os.to_string()),
            os_version: None,
            device_type: Some("desktop".to_string()),
            device_brand: None,
            device_model: None,
        }
    }

    #[test]
    fn macos_with_directx_gpu_is_impossible() {
        let fields = ClientFields { gpu_renderer: Some("ANGLE DirectX11".into()), ..Default::default() };
        let input = ContradictionInput { ua: &ua("macOS", "Safari"), fields: &fields, is_datacenter_ip: false, battery_api_present: false };
        let hits = evaluate_contradictions(&input);
        assert!(hits.iter().any(|c| c.name == "macos_with_directx_gpu" && c.severity == Severity::Impossible));
    }

    #[test]
    fn clean_signals_produce_no_contradictions() {
        let fields = ClientFields { gpu_renderer: Some("Apple M1".into()), mouse_moves: Some(10), ..Default::default() };
        let input = ContradictionInput { ua: &ua("macOS", "Safari"), fields: &fields, is_datacenter_ip: false, battery_api_present: false };
        assert!(evaluate_contradictions(&input).is_empty());
    }

    #[test]
    fn cultural_score_penalizes_timezone_mismatch() {
        let fields = ClientFields { timezone: Some("Asia/Tokyo".into()), ..Default::default() };
        let input = CulturalInput { fields: &fields, geo_country_code: Some("US"), geo_timezone: Some("America/New_York") };
        let (score, flags) = cultural_consistency(&input);
        assert!(score < 100);
        assert!(flags.contains(&"timezone_region_mismatch"));
    }

    #[test]
    fn gpu_release_year_recognizes_known_model() {
        assert_eq!(gpu_release_year("ANGLE (NVIDIA, NVIDIA GeForce RTX 3060 Direct3D11)"), Some(2021));
        assert_eq!(gpu_release_year("some unknown gpu"), None);
    }

    #[test]
    fn device_age_anomaly_requires_all_four_conditions() {
        let fields = ClientFields { gpu_renderer: Some("Intel HD Graphics".into()), mouse_moves: Some(0), ..Default::default() };
        let result = estimate_device_age(&fields, 2026, true, true);
        assert!(result.anomaly);

        let fields_with_mouse = ClientFields { gpu_renderer: Some("Intel HD Graphics".into()), mouse_moves: Some(5), ..Default::default() };
        let result = estimate_device_age(&fields_with_mouse, 2026, true, true);
        assert!(!result.anomaly);
    }

    #[test]
    fn mouse_path_quantization_collapses_near_identical_paths() {
        let a = quantize_and_hash_mouse_path("100,200,0;105,204,50").unwrap();
        let b = quantize_and_hash_mouse_path("101,201,10;106,205,60").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_mouse_path_hashes_to_none() {
        assert!(quantize_and_hash_mouse_path("").is_none());
    }

    #[test]
    fn replay_cache_flags_collision_from_different_fingerprint() {
        let cache = ReplayCache::new();
        let first = cache.record_and_check(42, "fp-a");
        assert!(!first.detected);
        let second = cache.record_and_check(42, "fp-b");
        assert!(second.detected);
        assert_eq!(second.match_fingerprint.as_deref(), Some("fp-a"));
    }

    #[test]
    fn replay_cache_does_not_flag_same_fingerprint_repeat() {
        let cache = ReplayCache::new();
        cache.record_and_check(7, "fp-a");
        let second = cache.record_and_check(7, "fp-a");
        assert!(!second.detected);
    }

    #[test]
    fn dead_internet_index_averages_weighted_score_across_hits() {
        let index = DeadInternetIndex::new();
        let all_bot = DeadInternetSignals {
            bot_score_ge_50: true,
            zero_mouse_moves: true,
            datacenter_ip: true,
            any_contradiction: true,
            low_fingerprint_diversity: true,
        };
        let score = index.record_and_check("company-a", 1, &all_bot);
        assert_eq!(score, 100);

        let clean = DeadInternetSignals {
            bot_score_ge_50: false,
            zero_mouse_moves: false,
            datacenter_ip: false,
            any_contradiction: false,
            low_fingerprint_diversity: false,
        };
        let averaged = index.record_and_check("company-a", 1, &clean);
        assert_eq!(averaged, 50);
    }
}
