//! The [`Hit`] record — the unit of work from HTTP request to persisted row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length (in UTF-16-ish "code units", approximated here as `char`
/// count) retained for `user_agent` and `referrer`. Other fields are not
/// truncated.
pub const TRUNCATE_LEN: usize = 2000;

/// A single pixel hit, captured at the edge and progressively enriched as
/// it flows through the edge and forge pipelines.
///
/// Invariants (see spec §3):
/// - every string field is non-null after capture (empty string permitted)
/// - `query_string` never has a leading `?`
/// - `received_at` is set exactly once, at capture time
/// - enrichers only ever *append* `_srv_*` keys to `query_string`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hit {
    #[serde(rename = "CompanyID")]
    pub company_id: String,
    #[serde(rename = "PiXLID")]
    pub pixel_id: String,
    #[serde(rename = "IPAddress")]
    pub address: String,
    #[serde(rename = "RequestPath")]
    pub request_path: String,
    #[serde(rename = "QueryString")]
    pub query_string: String,
    #[serde(rename = "HeadersJson")]
    pub headers_json: String,
    #[serde(rename = "UserAgent")]
    pub user_agent: String,
    #[serde(rename = "Referer")]
    pub referrer: String,
    #[serde(rename = "ReceivedAt")]
    pub received_at: DateTime<Utc>,
}

impl Hit {
    /// Truncate a string to [`TRUNCATE_LEN`] characters, used for
    /// `user_agent` and `referrer` only.
    #[must_use]
    pub fn truncate_field(value: &str) -> String {
        if value.chars().count() <= TRUNCATE_LEN {
            value.to_owned()
        } else {
            value.chars().take(TRUNCATE_LEN).collect()
        }
    }

    /// Append a server-stamped parameter to `query_string`. Never
    /// overwrites an existing key; enrichers are append-only.
    pub fn stamp(&mut self, param: crate::srv_params::SrvParam) {
        crate::srv_params::append(&mut self.query_string, &param);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_field_leaves_short_strings_alone() {
        assert_eq!(Hit::truncate_field("hello"), "hello");
    }

    #[test]
    fn truncate_field_caps_at_2000_chars() {
        let long = "a".repeat(2500);
        let truncated = Hit::truncate_field(&long);
        assert_eq!(truncated.chars().count(), TRUNCATE_LEN);
    }

    #[test]
    fn round_trip_json_is_stable() {
        let hit = Hit {
            company_id: "12345".into(),
            pixel_id: "0001".into(),
            address: "8.8.4.4".into(),
            request_path: "/12345/0001_SMART.GIF".into(),
            query_string: "sw=1920&sh=1080".into(),
            headers_json: "{}".into(),
            user_agent: "test-agent".into(),
            referrer: String::new(),
            received_at: Utc::now(),
        };
        let encoded = serde_json::to_string(&hit).unwrap();
        let decoded: Hit = serde_json::from_str(&encoded).unwrap();
        assert_eq!(hit, decoded);
        let re_encoded = serde_json::to_string(&decoded).unwrap();
        assert_eq!(encoded, re_encoded);
    }
}
