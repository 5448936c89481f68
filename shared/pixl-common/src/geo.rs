//! Geo record shared between `GeoCache`'s relational read-through (edge)
//! and the offline/online geo enrichers (forge).

use serde::{Deserialize, Serialize};

/// A per-address geo snapshot. `GeoCache` and the forge's geo enrichers
/// populate this from different sources (relational store, `MaxMind`
/// database, online provider) but it is the same shape everywhere.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GeoRecord {
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
    pub isp: Option<String>,
    pub organization: Option<String>,
    pub proxy: bool,
    pub mobile: bool,
}

/// Result of a cache lookup that distinguishes "not found" from "unknown
/// yet" — `GeoCache` caches negative results with a short absolute expiry
/// (spec §4.4) so a miss doesn't hot-loop the relational store.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoLookup {
    Found(GeoRecord),
    NotFound,
}
