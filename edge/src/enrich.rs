//! `EdgeEnricher`: runs the five in-memory detectors in the fixed order
//! required by spec §4.7, stamping `_srv_*` parameters as it goes.

use std::sync::Arc;

use pixl_common::srv_params::{HitType, SrvParam};
use pixl_common::{GeoLookup, Hit};
use sqlx::PgPool;

use crate::behavior_tracker::BehaviorTracker;
use crate::capture::is_modern;
use crate::datacenter::DatacenterMatcher;
use crate::fingerprint_tracker::FingerprintTracker;
use crate::geo_cache::GeoCache;
use crate::ip_classifier;
use pixl_common::qs::find_param;

pub struct EdgeEnricher {
    pub fingerprints: FingerprintTracker,
    pub behavior: BehaviorTracker,
    pub datacenter: DatacenterMatcher,
    pub geo: Arc<GeoCache>,
    pub db: PgPool,
}

impl EdgeEnricher {
    #[must_use]
    pub fn new(db: PgPool) -> Self {
        Self {
            fingerprints: FingerprintTracker::new(),
            behavior: BehaviorTracker::new(),
            datacenter: DatacenterMatcher::new(),
            geo: Arc::new(GeoCache::new()),
            db,
        }
    }

    /// Runs all five detectors over `hit` in the fixed spec order and
    /// appends `_srv_*` stamps. Never performs blocking I/O; geo misses
    /// are backfilled asynchronously and simply absent from this hit.
    pub fn enrich(&self, hit: &mut Hit) {
        // 1. Hit-type tag.
        let hit_type = if is_modern(&hit.query_string) {
            HitType::Modern
        } else {
            HitType::Legacy
        };
        hit.stamp(SrvParam::HitType(hit_type));

        // 2. Legacy referrer fallback already applied during capture.

        // 3. FingerprintTracker.
        let canvas = find_param(&hit.query_string, "canvasFP").unwrap_or("");
        let webgl = find_param(&hit.query_string, "webglFP").unwrap_or("");
        let audio = find_param(&hit.query_string, "audioFP").unwrap_or("");
        let fp = self
            .fingerprints
            .record_and_check(&hit.address, canvas, webgl, audio);
        hit.stamp(SrvParam::FpObs(fp.observation_count as u32));
        hit.stamp(SrvParam::FpUniq(fp.unique_count));
        hit.stamp(SrvParam::FpRate5m(fp.recent_5m_count));
        if fp.suspicious_variation || fp.extreme_volume {
            hit.stamp(SrvParam::FpAlert);
        }

        // 4. BehaviorTracker.
        let behavior = self.behavior.record_and_check(&hit.address);
        if let Some(subnet_ips) = behavior.subnet_ips {
            hit.stamp(SrvParam::SubnetIps(subnet_ips));
        }
        if let Some(subnet_hits) = behavior.subnet_hits {
            hit.stamp(SrvParam::SubnetHits(subnet_hits));
        }
        hit.stamp(SrvParam::HitsIn15s(behavior.hits_in_15s));
        hit.stamp(SrvParam::LastGapMs(behavior.last_gap_ms));
        if behavior.subnet_alert {
            hit.stamp(SrvParam::SubnetAlert);
        }
        if behavior.rapid_fire {
            hit.stamp(SrvParam::RapidFire);
        }
        if behavior.sub_second_dupe {
            hit.stamp(SrvParam::SubSecDupe);
        }

        // 5. DatacenterMatcher.
        if let Some(provider) = self.datacenter.check(&hit.address) {
            hit.stamp(SrvParam::Dc(provider.to_string()));
        }

        // 6. IpClassifier.
        let classification = ip_classifier::classify(&hit.address);
        hit.stamp(SrvParam::IpType(classification.kind.ordinal()));

        // 7 & 8. GeoCache (non-blocking) + timezone mismatch.
        if classification.geolocatable {
            match self.geo.lookup(&hit.address) {
                GeoLookup::Found(record) => {
                    if let Some(cc) = &record.country_code {
                        hit.stamp(SrvParam::GeoCc(cc.clone()));
                    }
                    if let Some(region) = &record.region {
                        hit.stamp(SrvParam::GeoReg(region.clone()));
                    }
                    if let Some(city) = &record.city {
                        hit.stamp(SrvParam::GeoCity(city.clone()));
                    }
                    if let Some(tz) = &record.timezone {
                        hit.stamp(SrvParam::GeoTz(tz.clone()));
                        if let Some(client_tz) = find_param(&hit.query_string, "tz") {
                            if client_tz != tz {
                                hit.stamp(SrvParam::GeoTzMismatch);
                            }
                        }
                    }
                    if let Some(isp) = &record.isp {
                        hit.stamp(SrvParam::GeoIsp(isp.clone()));
                    }
                    hit.stamp(SrvParam::GeoProxy(record.proxy));
                    hit.stamp(SrvParam::GeoMobile(record.mobile));
                }
                GeoLookup::NotFound => {
                    self.geo.spawn_refill(self.db.clone(), hit.address.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    fn test_hit(address: &str, query_string: &str) -> Hit {
        crate::capture::capture(
            "/12345/0001_SMART.GIF",
            query_string,
            &HeaderMap::new(),
            None,
        )
        .tap_address(address)
    }

    trait TapAddress {
        fn tap_address(self, address: &str) -> Self;
    }

    impl TapAddress for Hit {
        fn tap_address(mut self, address: &str) -> Self {
            self.address = address.to_owned();
            self
        }
    }

    #[test]
    fn stamps_modern_hit_type_and_ip_type_for_public_address() {
        let enricher = EdgeEnricher {
            fingerprints: FingerprintTracker::new(),
            behavior: BehaviorTracker::new(),
            datacenter: DatacenterMatcher::new(),
            geo: Arc::new(GeoCache::new()),
            db: PgPool::connect_lazy("postgres://localhost/test").unwrap(),
        };
        let mut hit = test_hit("8.8.4.4", "sw=1920&sh=1080&canvasFP=abc");
        enricher.enrich(&mut hit);
        assert!(hit.query_string.contains("_srv_hitType=modern"));
        assert!(hit.query_string.contains("_srv_ipType=0"));
        assert!(!hit.query_string.contains("_srv_fpAlert"));
        assert!(!hit.query_string.contains("_srv_rapidFire"));
    }

    #[test]
    fn enrichment_only_appends_never_shrinks_query_string() {
        let enricher = EdgeEnricher {
            fingerprints: FingerprintTracker::new(),
            behavior: BehaviorTracker::new(),
            datacenter: DatacenterMatcher::new(),
            geo: Arc::new(GeoCache::new()),
            db: PgPool::connect_lazy("postgres://localhost/test").unwrap(),
        };
        let mut hit = test_hit("9.9.9.9", "sw=1920");
        let before = hit.query_string.clone();
        enricher.enrich(&mut hit);
        assert!(hit.query_string.len() >= before.len());
        assert!(hit.query_string.starts_with(&before));
    }

    #[test]
    fn three_rapid_requests_stamp_rapid_fire() {
        let enricher = EdgeEnricher {
            fingerprints: FingerprintTracker::new(),
            behavior: BehaviorTracker::new(),
            datacenter: DatacenterMatcher::new(),
            geo: Arc::new(GeoCache::new()),
            db: PgPool::connect_lazy("postgres://localhost/test").unwrap(),
        };
        for _ in 0..2 {
            let mut hit = test_hit("198.51.100.42", "");
            enricher.enrich(&mut hit);
        }
        let mut hit = test_hit("198.51.100.42", "");
        enricher.enrich(&mut hit);
        assert!(hit.query_string.contains("_srv_rapidFire=1"));
        assert!(hit.query_string.contains("_srv_subSecDupe=1"));
    }
}
