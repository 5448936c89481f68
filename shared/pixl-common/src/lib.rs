//! Shared wire types for the SmartPiXL edge and forge processes.
//!
//! This crate carries nothing process-specific: the [`Hit`] record, the
//! handoff wire format, geo/fingerprint value types, and the `_srv_*`
//! server-parameter writer used by both the edge and forge enrichment
//! pipelines.

pub mod fingerprint;
pub mod geo;
pub mod hit;
pub mod qs;
pub mod srv_params;

pub use fingerprint::CompositeFingerprint;
pub use geo::{GeoLookup, GeoRecord};
pub use hit::Hit;
pub use srv_params::SrvParam;
