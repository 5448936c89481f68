//! Typed `_srv_*` server-parameter stamps.
//!
//! Every value the edge or forge enrichers add to a hit's query string is
//! represented here as one variant of [`SrvParam`], per the design note in
//! spec §9 ("model `_srv_*` stamps as a typed key set"). [`append`] is the
//! single writer: it owns the `_srv_` prefix, the key name, and URL
//! encoding, so no enricher formats a query-string fragment by hand.

use crate::qs::{append_pair, percent_encode};

/// A single server-stamped query-string parameter.
///
/// Boolean "alert" stamps (e.g. `_srv_fpAlert`) carry no payload — their
/// presence means `=1` — they're separated here from value-carrying stamps
/// only so call sites read naturally (`SrvParam::RapidFire` vs.
/// `SrvParam::FpObs(count)`).
#[derive(Debug, Clone, PartialEq)]
pub enum SrvParam {
    // --- HitCapture / legacy fallback ---
    HitType(HitType),

    // --- FingerprintTracker ---
    FpAlert,
    FpObs(u32),
    FpUniq(u32),
    FpRate5m(u32),

    // --- BehaviorTracker ---
    SubnetIps(u32),
    SubnetHits(u32),
    HitsIn15s(u32),
    LastGapMs(i64),
    SubnetAlert,
    RapidFire,
    SubSecDupe,

    // --- DatacenterMatcher ---
    Dc(String),

    // --- IpClassifier ---
    IpType(u8),

    // --- GeoCache ---
    GeoCc(String),
    GeoReg(String),
    GeoCity(String),
    GeoTz(String),
    GeoIsp(String),
    GeoProxy(bool),
    GeoMobile(bool),
    GeoTzMismatch,

    // --- Tier 1: bot-UA / UA parse ---
    KnownBot,
    BotName(String),
    BotScore(u8),
    Browser(String),
    BrowserVer(String),
    Os(String),
    OsVer(String),
    DeviceType(String),
    DeviceModel(String),
    DeviceBrand(String),

    // --- Tier 1: reverse DNS ---
    Rdns(String),
    RdnsCloud,

    // --- Tier 1: offline geo (MaxMind) ---
    MmCc(String),
    MmReg(String),
    MmCity(String),
    MmLat(f64),
    MmLon(f64),
    MmAsn(String),
    MmAsnOrg(String),

    // --- Tier 1: online geo ---
    IpapiCc(String),
    IpapiIsp(String),
    IpapiProxy(bool),
    IpapiMobile(bool),
    IpapiReverse(String),
    IpapiAsn(String),

    // --- Tier 1: WHOIS ---
    WhoisAsn(String),
    WhoisOrg(String),

    // --- Tier 2: session stitching ---
    SessionId(String),
    SessionHitNum(u32),
    SessionDurationSec(i64),
    SessionPageCount(u32),

    // --- Tier 2: cross-customer ---
    CrossCompanies(u32),
    CrossCustomerAlert,

    // --- Tier 2: device affluence ---
    Affluence(Affluence),
    GpuTier(String),

    // --- Tier 2: lead quality ---
    LeadQuality(u8),

    // --- Tier 3: contradictions ---
    Contradictions(u32),
    ContradictionList(String),

    // --- Tier 3: cultural consistency ---
    CulturalScore(u8),
    CulturalFlags(String),

    // --- Tier 3: device age ---
    DeviceAgeYears(f64),
    DeviceAgeAnomaly,

    // --- Tier 3: behavioral replay ---
    ReplayDetected,
    ReplayMatchFingerprint(String),

    // --- Tier 3: dead-internet index ---
    DeadInternetIdx(u8),
}

/// Hit-type tag (spec §4.1): modern when the query string carries a
/// JavaScript-collected parameter, legacy otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitType {
    Modern,
    Legacy,
}

impl HitType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Modern => "modern",
            Self::Legacy => "legacy",
        }
    }
}

/// Device affluence tier (spec §4.10 step 9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affluence {
    High,
    Mid,
    Low,
}

impl Affluence {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Mid => "MID",
            Self::Low => "LOW",
        }
    }
}

impl SrvParam {
    /// The bare key name, without the `_srv_` prefix.
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            Self::HitType(_) => "hitType",
            Self::FpAlert => "fpAlert",
            Self::FpObs(_) => "fpObs",
            Self::FpUniq(_) => "fpUniq",
            Self::FpRate5m(_) => "fpRate5m",
            Self::SubnetIps(_) => "subnetIps",
            Self::SubnetHits(_) => "subnetHits",
            Self::HitsIn15s(_) => "hitsIn15s",
            Self::LastGapMs(_) => "lastGapMs",
            Self::SubnetAlert => "subnetAlert",
            Self::RapidFire => "rapidFire",
            Self::SubSecDupe => "subSecDupe",
            Self::Dc(_) => "dc",
            Self::IpType(_) => "ipType",
            Self::GeoCc(_) => "geoCC",
            Self::GeoReg(_) => "geoReg",
            Self::GeoCity(_) => "geoCity",
            Self::GeoTz(_) => "geoTz",
            Self::GeoIsp(_) => "geoISP",
            Self::GeoProxy(_) => "geoProxy",
            Self::GeoMobile(_) => "geoMobile",
            Self::GeoTzMismatch => "geoTzMismatch",
            Self::KnownBot => "knownBot",
            Self::BotName(_) => "botName",
            Self::BotScore(_) => "botScore",
            Self::Browser(_) => "browser",
            Self::BrowserVer(_) => "browserVer",
            Self::Os(_) => "os",
            Self::OsVer(_) => "osVer",
            Self::DeviceType(_) => "deviceType",
            Self::DeviceModel(_) => "deviceModel",
            Self::DeviceBrand(_) => "deviceBrand",
            Self::Rdns(_) => "rdns",
            Self::RdnsCloud => "rdnsCloud",
            Self::MmCc(_) => "mmCC",
            Self::MmReg(_) => "mmReg",
            Self::MmCity(_) => "mmCity",
            Self::MmLat(_) => "mmLat",
            Self::MmLon(_) => "mmLon",
            Self::MmAsn(_) => "mmASN",
            Self::MmAsnOrg(_) => "mmASNOrg",
            Self::IpapiCc(_) => "ipapiCC",
            Self::IpapiIsp(_) => "ipapiISP",
            Self::IpapiProxy(_) => "ipapiProxy",
            Self::IpapiMobile(_) => "ipapiMobile",
            Self::IpapiReverse(_) => "ipapiReverse",
            Self::IpapiAsn(_) => "ipapiASN",
            Self::WhoisAsn(_) => "whoisASN",
            Self::WhoisOrg(_) => "whoisOrg",
            Self::SessionId(_) => "sessionId",
            Self::SessionHitNum(_) => "sessionHitNum",
            Self::SessionDurationSec(_) => "sessionDurationSec",
            Self::SessionPageCount(_) => "sessionPageCount",
            Self::CrossCompanies(_) => "crossCompanies",
            Self::CrossCustomerAlert => "crossCustomerAlert",
            Self::Affluence(_) => "affluence",
            Self::GpuTier(_) => "gpuTier",
            Self::LeadQuality(_) => "leadQuality",
            Self::Contradictions(_) => "contradictions",
            Self::ContradictionList(_) => "contradictionList",
            Self::CulturalScore(_) => "culturalScore",
            Self::CulturalFlags(_) => "culturalFlags",
            Self::DeviceAgeYears(_) => "deviceAgeYears",
            Self::DeviceAgeAnomaly => "deviceAgeAnomaly",
            Self::ReplayDetected => "replayDetected",
            Self::ReplayMatchFingerprint(_) => "replayMatchFingerprint",
            Self::DeadInternetIdx(_) => "deadInternetIdx",
        }
    }

    /// The raw (not yet percent-encoded) value. Boolean-flag variants are
    /// `"1"`; boolean-payload variants (`geoProxy`, `ipapiProxy`, ...) are
    /// `"1"`/`"0"`.
    #[must_use]
    pub fn value(&self) -> String {
        match self {
            Self::HitType(t) => t.as_str().to_owned(),
            Self::FpAlert
            | Self::SubnetAlert
            | Self::RapidFire
            | Self::SubSecDupe
            | Self::GeoTzMismatch
            | Self::KnownBot
            | Self::RdnsCloud
            | Self::CrossCustomerAlert
            | Self::DeviceAgeAnomaly
            | Self::ReplayDetected => "1".to_owned(),
            Self::FpObs(v) | Self::SubnetIps(v) | Self::SubnetHits(v) | Self::HitsIn15s(v) => {
                v.to_string()
            }
            Self::FpUniq(v) => v.to_string(),
            Self::FpRate5m(v) => v.to_string(),
            Self::LastGapMs(v) => v.to_string(),
            Self::Dc(s)
            | Self::GeoCc(s)
            | Self::GeoReg(s)
            | Self::GeoCity(s)
            | Self::GeoTz(s)
            | Self::GeoIsp(s)
            | Self::BotName(s)
            | Self::Browser(s)
            | Self::BrowserVer(s)
            | Self::Os(s)
            | Self::OsVer(s)
            | Self::DeviceType(s)
            | Self::DeviceModel(s)
            | Self::DeviceBrand(s)
            | Self::Rdns(s)
            | Self::MmCc(s)
            | Self::MmReg(s)
            | Self::MmCity(s)
            | Self::MmAsn(s)
            | Self::MmAsnOrg(s)
            | Self::IpapiCc(s)
            | Self::IpapiIsp(s)
            | Self::IpapiReverse(s)
            | Self::IpapiAsn(s)
            | Self::WhoisAsn(s)
            | Self::WhoisOrg(s)
            | Self::SessionId(s)
            | Self::GpuTier(s)
            | Self::ContradictionList(s)
            | Self::CulturalFlags(s)
            | Self::ReplayMatchFingerprint(s) => s.clone(),
            Self::IpType(v) => v.to_string(),
            Self::GeoProxy(b) | Self::GeoMobile(b) | Self::IpapiProxy(b) | Self::IpapiMobile(b) => {
                u8::from(*b).to_string()
            }
            Self::MmLat(v) | Self::MmLon(v) | Self::DeviceAgeYears(v) => v.to_string(),
            Self::SessionHitNum(v) | Self::SessionPageCount(v) | Self::CrossCompanies(v) => {
                v.to_string()
            }
            Self::SessionDurationSec(v) => v.to_string(),
            Self::Affluence(a) => a.as_str().to_owned(),
            Self::LeadQuality(v) | Self::CulturalScore(v) | Self::DeadInternetIdx(v) | Self::BotScore(v) => {
                v.to_string()
            }
            Self::Contradictions(v) => v.to_string(),
        }
    }
}

/// Append one stamp to `query_string`, prefixing the key with `_srv_` and
/// percent-encoding the value. Centralizes encoding so no call site ever
/// hand-builds a query-string fragment (spec §9 design note).
pub fn append(query_string: &mut String, param: &SrvParam) {
    let key = format!("_srv_{}", param.key());
    let value = percent_encode(&param.value());
    append_pair(query_string, &key, &value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_type_stamps_correct_key_and_value() {
        let mut qs = String::new();
        append(&mut qs, &SrvParam::HitType(HitType::Modern));
        assert_eq!(qs, "_srv_hitType=modern");
    }

    #[test]
    fn boolean_alert_stamps_as_one() {
        let mut qs = String::new();
        append(&mut qs, &SrvParam::RapidFire);
        assert_eq!(qs, "_srv_rapidFire=1");
    }

    #[test]
    fn appends_without_overwriting_prior_content() {
        let mut qs = "sw=1920".to_string();
        append(&mut qs, &SrvParam::FpObs(4));
        append(&mut qs, &SrvParam::FpUniq(4));
        assert_eq!(qs, "sw=1920&_srv_fpObs=4&_srv_fpUniq=4");
    }

    #[test]
    fn string_values_are_percent_encoded() {
        let mut qs = String::new();
        append(&mut qs, &SrvParam::GeoCity("New York".into()));
        assert_eq!(qs, "_srv_geoCity=New%20York");
    }

    #[test]
    fn append_only_grows_the_query_string() {
        let before = "sw=1920&sh=1080".to_string();
        let mut after = before.clone();
        append(&mut after, &SrvParam::FpAlert);
        assert!(after.len() >= before.len());
        assert!(after.starts_with(&before));
    }
}
