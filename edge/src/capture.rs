//! Parses an HTTP request into a normalized [`Hit`].

use std::fmt::Write as _;
use std::net::SocketAddr;

use axum::http::{HeaderMap, HeaderValue};
use chrono::Utc;
use pixl_common::qs::{find_param, percent_decode};
use pixl_common::Hit;

/// Header names captured verbatim into `HeadersJson`, per the fixed
/// allowlist in spec §4.1. Client-hint and fetch-metadata headers are
/// included by prefix match, handled separately below.
const ALLOWLIST: &[&str] = &[
    "user-agent",
    "referer",
    "accept-language",
    "dnt",
    "cf-connecting-ip",
    "true-client-ip",
    "x-real-ip",
    "x-forwarded-for",
    "cf-ray",
    "cf-ipcountry",
];

/// IP-extraction priority chain, first non-empty wins.
const IP_HEADER_PRIORITY: &[&str] = &["cf-connecting-ip", "true-client-ip", "x-real-ip"];

/// Parse `/{client}/{campaign}` from a request path. `client` matches
/// `[^/]+`, `campaign` matches `[^_]+` (it stops at the `_SMART.GIF` /
/// `_SMART.js` suffix). Failure yields empty strings, not an error.
#[must_use]
pub fn extract_path_ids(path: &str) -> (String, String) {
    let trimmed = path.trim_start_matches('/');
    let mut segments = trimmed.splitn(2, '/');
    let Some(client) = segments.next().filter(|s| !s.is_empty()) else {
        return (String::new(), String::new());
    };
    let Some(rest) = segments.next() else {
        return (String::new(), String::new());
    };
    let campaign = rest.split('_').next().unwrap_or("");
    if campaign.is_empty() {
        return (client.to_owned(), String::new());
    }
    (client.to_owned(), campaign.to_owned())
}

/// Extract the remote address following the priority chain: proxy
/// headers first (first comma-separated token, trimmed), then the
/// connection peer. An empty final result is permitted.
#[must_use]
pub fn extract_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    for name in IP_HEADER_PRIORITY {
        if let Some(v) = header_str(headers, name) {
            let v = v.trim();
            if !v.is_empty() {
                return v.to_owned();
            }
        }
    }
    if let Some(v) = header_str(headers, "x-forwarded-for") {
        if let Some(first) = v.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_owned();
            }
        }
    }
    peer.map(|p| p.ip().to_string()).unwrap_or_default()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Build `HeadersJson`: a flat JSON object over the allowlist plus any
/// `sec-ch-ua-*` / `sec-fetch-*` headers present, escaped on the fly
/// without an intermediate map.
#[must_use]
pub fn build_headers_json(headers: &HeaderMap) -> String {
    let mut out = String::from("{");
    let mut first = true;

    let mut push = |name: &str, value: &HeaderValue| {
        if let Ok(v) = value.to_str() {
            if !first {
                out.push(',');
            }
            first = false;
            out.push('"');
            escape_json_into(name, &mut out);
            out.push_str("\":\"");
            escape_json_into(v, &mut out);
            out.push('"');
        }
    };

    for name in ALLOWLIST {
        if let Some(value) = headers.get(*name) {
            push(name, value);
        }
    }
    for (name, value) in headers {
        let lower = name.as_str().to_ascii_lowercase();
        if lower.starts_with("sec-ch-ua") || lower.starts_with("sec-fetch") {
            push(&lower, value);
        }
    }

    out.push('}');
    out
}

fn escape_json_into(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
}

/// Build a [`Hit`] from request parts. `query_string` must already have
/// its leading `?` stripped.
#[must_use]
pub fn capture(
    path: &str,
    query_string: &str,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
) -> Hit {
    let (company_id, pixel_id) = extract_path_ids(path);
    let address = extract_address(headers, peer);
    let headers_json = build_headers_json(headers);

    let user_agent = header_str(headers, "user-agent").unwrap_or_default();
    let mut referrer = header_str(headers, "referer").unwrap_or_default().to_owned();

    // Legacy referrer fallback: adopt `ref=` from the query string when
    // the Referer header is absent.
    if referrer.is_empty() {
        if let Some(raw) = find_param(query_string, "ref") {
            referrer = percent_decode(raw);
        }
    }

    Hit {
        company_id,
        pixel_id,
        address,
        request_path: path.to_owned(),
        query_string: query_string.to_owned(),
        headers_json,
        user_agent: Hit::truncate_field(user_agent),
        referrer: Hit::truncate_field(&referrer),
        received_at: Utc::now(),
    }
}

/// Hit-type tag per spec §4.1: modern if `sw` or `canvasFP` is present.
#[must_use]
pub fn is_modern(query_string: &str) -> bool {
    find_param(query_string, "sw").is_some() || find_param(query_string, "canvasFP").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_path_ids_happy_path() {
        let (c, p) = extract_path_ids("/12345/0001_SMART.GIF");
        assert_eq!(c, "12345");
        assert_eq!(p, "0001");
    }

    #[test]
    fn extract_path_ids_handles_missing_campaign() {
        let (c, p) = extract_path_ids("/12345/");
        assert_eq!(c, "12345");
        assert_eq!(p, "");
    }

    #[test]
    fn extract_path_ids_handles_malformed_path() {
        let (c, p) = extract_path_ids("/");
        assert_eq!(c, "");
        assert_eq!(p, "");
    }

    #[test]
    fn extract_address_prefers_cf_connecting_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", "8.8.4.4".parse().unwrap());
        headers.insert("x-forwarded-for", "1.1.1.1, 2.2.2.2".parse().unwrap());
        assert_eq!(extract_address(&headers, None), "8.8.4.4");
    }

    #[test]
    fn extract_address_xff_takes_first_token() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", " 1.1.1.1 , 2.2.2.2".parse().unwrap());
        assert_eq!(extract_address(&headers, None), "1.1.1.1");
    }

    #[test]
    fn extract_address_falls_back_to_peer() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "203.0.113.9:4321".parse().unwrap();
        assert_eq!(extract_address(&headers, Some(peer)), "203.0.113.9");
    }

    #[test]
    fn extract_address_empty_when_nothing_available() {
        let headers = HeaderMap::new();
        assert_eq!(extract_address(&headers, None), "");
    }

    #[test]
    fn is_modern_detects_sw_or_canvas_fp() {
        assert!(is_modern("sw=1920&sh=1080"));
        assert!(is_modern("canvasFP=abc"));
        assert!(!is_modern("tz=America/New_York"));
    }

    #[test]
    fn legacy_referrer_fallback_decodes_ref_param() {
        let headers = HeaderMap::new();
        let hit = capture(
            "/12345/0001_SMART.GIF",
            "ref=https%3A%2F%2Fexample.com%2Fpage",
            &headers,
            None,
        );
        assert_eq!(hit.referrer, "https://example.com/page");
    }

    #[test]
    fn headers_json_escapes_quotes_and_backslashes() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", "Mozilla \"Test\" \\Agent".parse().unwrap());
        let json = build_headers_json(&headers);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["user-agent"], "Mozilla \"Test\" \\Agent");
    }
}
