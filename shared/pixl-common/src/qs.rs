//! Minimal query-string helpers: percent-encoding for `_srv_*` values and
//! a small parser for reading client-sent parameters back out.
//!
//! `HitCapture` preserves unknown client keys verbatim (spec §6); these
//! helpers only ever add encoded values, they never re-encode what is
//! already in the query string.

/// Percent-encode a value for use in a `x-www-form-urlencoded`-style query
/// string component. Keeps the unreserved set (`A-Z a-z 0-9 - _ . ~`)
/// untouched and escapes everything else, including the separators the
/// query string itself uses (`&`, `=`, `#`, `%`, space).
#[must_use]
pub fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Append a `key=value` pair to a query string, inserting the `&`
/// separator only when the string is already non-empty. Never emits a
/// leading `?`.
pub fn append_pair(query_string: &mut String, key: &str, encoded_value: &str) {
    if !query_string.is_empty() {
        query_string.push('&');
    }
    query_string.push_str(key);
    query_string.push('=');
    query_string.push_str(encoded_value);
}

/// Find the first value for `key` in a raw (not necessarily encoded)
/// query string, without allocating a full map. Returns the raw
/// (still percent-encoded) value.
#[must_use]
pub fn find_param<'a>(query_string: &'a str, key: &str) -> Option<&'a str> {
    query_string.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let k = parts.next()?;
        if k == key {
            Some(parts.next().unwrap_or(""))
        } else {
            None
        }
    })
}

/// Minimal percent-decoder sufficient for decoding `ref=` and similar
/// client-supplied values. Invalid escapes are passed through verbatim
/// rather than erroring, matching the "never interpreted as authoritative"
/// posture of client-sent fields (spec §6).
#[must_use]
pub fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(bytes[i]);
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_encode_preserves_unreserved() {
        assert_eq!(percent_encode("abc-123_A.B~C"), "abc-123_A.B~C");
    }

    #[test]
    fn percent_encode_escapes_separators() {
        assert_eq!(percent_encode("a&b=c"), "a%26b%3Dc");
        assert_eq!(percent_encode("50%"), "50%25");
    }

    #[test]
    fn append_pair_no_leading_separator_on_empty() {
        let mut qs = String::new();
        append_pair(&mut qs, "_srv_hitType", "modern");
        assert_eq!(qs, "_srv_hitType=modern");
    }

    #[test]
    fn append_pair_joins_with_ampersand() {
        let mut qs = "sw=1920".to_string();
        append_pair(&mut qs, "_srv_hitType", "modern");
        assert_eq!(qs, "sw=1920&_srv_hitType=modern");
    }

    #[test]
    fn find_param_locates_value() {
        let qs = "sw=1920&ref=https%3A%2F%2Fexample.com&sh=1080";
        assert_eq!(find_param(qs, "ref"), Some("https%3A%2F%2Fexample.com"));
        assert_eq!(find_param(qs, "missing"), None);
    }

    #[test]
    fn percent_decode_round_trips_url() {
        let encoded = "https%3A%2F%2Fexample.com%2Fpage";
        assert_eq!(percent_decode(encoded), "https://example.com/page");
    }
}
