//! Read-only view over the handful of client-reported query-string fields
//! the Tier 2/3 detectors consume. Values are never treated as
//! authoritative — only as signals to weigh against server-derived facts.

use pixl_common::qs::{find_param, percent_decode};

/// Parsed subset of the ~160-key client-sent catalog. Every field is
/// `Option`/defaulted; a missing key is simply absent evidence, not an
/// error.
#[derive(Debug, Clone, Default)]
pub struct ClientFields {
    pub screen_width: Option<u32>,
    pub screen_height: Option<u32>,
    pub timezone: Option<String>,
    pub platform: Option<String>,
    pub mobile: bool,
    pub gpu_renderer: Option<String>,
    pub cpu_cores: Option<u32>,
    pub memory_gb: Option<u32>,
    pub font_count: Option<u32>,
    pub locale: Option<String>,
    pub calendar: Option<String>,
    pub date_format: Option<String>,
    pub number_format: Option<String>,
    pub battery_present: bool,
    pub mouse_moves: Option<u32>,
    pub mouse_path: Option<String>,
    pub canvas_hash: String,
    pub webgl_hash: String,
    pub audio_hash: String,
}

impl ClientFields {
    #[must_use]
    pub fn parse(query_string: &str) -> Self {
        Self {
            screen_width: find_u32(query_string, "sw"),
            screen_height: find_u32(query_string, "sh"),
            timezone: find_string(query_string, "tz"),
            platform: find_string(query_string, "platform"),
            mobile: find_string(query_string, "mobile").as_deref() == Some("1"),
            gpu_renderer: find_string(query_string, "gpu"),
            cpu_cores: find_u32(query_string, "cores"),
            memory_gb: find_u32(query_string, "mem"),
            font_count: find_u32(query_string, "fontCount"),
            locale: find_string(query_string, "locale"),
            calendar: find_string(query_string, "calendar"),
            date_format: find_string(query_string, "dateFmt"),
            number_format: find_string(query_string, "numFmt"),
            battery_present: find_string(query_string, "battery").as_deref() == Some("1"),
            mouse_moves: find_u32(query_string, "mouseMoves"),
            mouse_path: find_string(query_string, "mousePath"),
            canvas_hash: find_string(query_string, "canvasFP").unwrap_or_default(),
            webgl_hash: find_string(query_string, "webglFP").unwrap_or_default(),
            audio_hash: find_string(query_string, "audioFP").unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn resolution_area(&self) -> Option<u64> {
        match (self.screen_width, self.screen_height) {
            (Some(w), Some(h)) => Some(u64::from(w) * u64::from(h)),
            _ => None,
        }
    }
}

fn find_string(query_string: &str, key: &str) -> Option<String> {
    find_param(query_string, key).map(percent_decode).filter(|s| !s.is_empty())
}

fn find_u32(query_string: &str, key: &str) -> Option<u32> {
    find_string(query_string, key).and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_present_fields() {
        let qs = "sw=1920&sh=1080&tz=America%2FNew_York&mobile=1&cores=8";
        let fields = ClientFields::parse(qs);
        assert_eq!(fields.screen_width, Some(1920));
        assert_eq!(fields.screen_height, Some(1080));
        assert_eq!(fields.timezone.as_deref(), Some("America/New_York"));
        assert!(fields.mobile);
        assert_eq!(fields.cpu_cores, Some(8));
    }

    #[test]
    fn missing_fields_default_to_none() {
        let fields = ClientFields::parse("");
        assert_eq!(fields.screen_width, None);
        assert!(!fields.mobile);
        assert!(!fields.battery_present);
    }

    #[test]
    fn resolution_area_requires_both_dimensions() {
        let fields = ClientFields::parse("sw=1920");
        assert_eq!(fields.resolution_area(), None);
        let fields = ClientFields::parse("sw=1920&sh=1080");
        assert_eq!(fields.resolution_area(), Some(1_920 * 1_080));
    }
}
