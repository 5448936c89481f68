//! Tier 1 — library/API calls (spec §4.10 steps 1-6). Each step is
//! independent; a failure in one never blocks the rest from running.

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hickory_resolver::TokioAsyncResolver;
use regex::RegexSet;
use sqlx::PgPool;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

/// Small, explicitly partial catalog of well-known crawler/bot
/// substrings. Not exhaustive — see DESIGN.md for the "partial by
/// design" note.
const BOT_CATALOG: &[(&str, &str)] = &[
    ("googlebot", "Googlebot"),
    ("bingbot", "Bingbot"),
    ("slurp", "Yahoo Slurp"),
    ("duckduckbot", "DuckDuckBot"),
    ("baiduspider", "Baiduspider"),
    ("yandexbot", "YandexBot"),
    ("sogou", "Sogou"),
    ("exabot", "Exabot"),
    ("facebookexternalhit", "Facebook"),
    ("ia_archiver", "Alexa Archiver"),
    ("ahrefsbot", "AhrefsBot"),
    ("semrushbot", "SemrushBot"),
    ("mj12bot", "MJ12bot"),
    ("dotbot", "DotBot"),
    ("petalbot", "PetalBot"),
    ("applebot", "Applebot"),
    ("twitterbot", "Twitterbot"),
    ("linkedinbot", "LinkedInBot"),
    ("curl/", "curl"),
    ("python-requests", "python-requests"),
    ("headlesschrome", "HeadlessChrome"),
    ("phantomjs", "PhantomJS"),
];

#[must_use]
pub fn detect_bot(user_agent: &str) -> Option<&'static str> {
    let lower = user_agent.to_ascii_lowercase();
    BOT_CATALOG
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, name)| *name)
}

/// Parsed User-Agent fields, mirroring `woothee`'s output shape.
#[derive(Debug, Default)]
pub struct UaInfo {
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub device_type: Option<String>,
    pub device_brand: Option<String>,
    pub device_model: Option<String>,
}

#[must_use]
pub fn parse_user_agent(user_agent: &str) -> Option<UaInfo> {
    if user_agent.is_empty() {
        return None;
    }
    let result = woothee::parser::Parser::new().parse(user_agent)?;

    let device_type = match result.category {
        "smartphone" | "mobilephone" => "mobile",
        "tablet" => "tablet",
        "crawler" => "bot",
        "appliance" | "misc spec" => "device",
        _ => "desktop",
    };

    let non_empty = |s: &str| if s.is_empty() { None } else { Some(s.to_string()) };

    Some(UaInfo {
        browser: non_empty(result.name),
        browser_version: non_empty(result.version),
        os: non_empty(result.os),
        os_version: non_empty(result.os_version),
        device_type: Some(device_type.to_string()),
        device_brand: non_empty(result.vendor),
        device_model: extract_device_model(user_agent),
    })
}

/// Second-pass device-model extraction. `woothee` classifies browser/OS/
/// device category but exposes no model field, so this walks the raw UA
/// string for the two patterns that actually carry a model: Android's
/// `Linux; Android <ver>; <model>)` token, and the iOS family name (exact
/// hardware model, e.g. "iPhone15,2", is never present in a default UA).
/// Partial by design, same spirit as [`BOT_CATALOG`] — an unmatched UA
/// simply yields no model rather than a guess.
#[must_use]
fn extract_device_model(user_agent: &str) -> Option<String> {
    if let Some(android_idx) = user_agent.find("Android") {
        let after_android = &user_agent[android_idx..];
        if let Some(semi) = after_android.find(';') {
            let after_version = &after_android[semi + 1..];
            if let Some(end) = after_version.find(')') {
                let candidate = after_version[..end].trim();
                if !candidate.is_empty() && !candidate.eq_ignore_ascii_case("wv") {
                    return Some(candidate.to_string());
                }
            }
        }
    }

    for token in ["iPhone", "iPad", "iPod"] {
        if user_agent.contains(token) {
            return Some(token.to_string());
        }
    }

    None
}

/// Aggregate bot likelihood on a 0-100 scale, combining the three
/// independent signals Tier 1 already collects: a catalog name match,
/// a cloud-hosted reverse-DNS hit, and `woothee`'s own crawler category
/// guess. Weighted, not averaged, so a single strong signal (the catalog
/// match) dominates. Partial by design, same caveat as [`BOT_CATALOG`].
#[must_use]
pub fn bot_score(known_bot: bool, rdns_cloud: bool, ua_is_crawler: bool) -> u8 {
    let mut score: u32 = 0;
    if known_bot {
        score += 60;
    }
    if rdns_cloud {
        score += 25;
    }
    if ua_is_crawler {
        score += 15;
    }
    score.min(100) as u8
}

/// Cloud-hostname regex catalog (spec §4.10 step 3) covering the major
/// providers' reverse-DNS naming conventions.
pub fn cloud_hostname_patterns() -> RegexSet {
    RegexSet::new([
        r"\.amazonaws\.com$",
        r"\.compute\.internal$",
        r"\.googleusercontent\.com$",
        r"\.bc\.googleusercontent\.com$",
        r"\.cloudapp\.azure\.com$",
        r"\.cloudapp\.net$",
        r"\.digitalocean\.com$",
        r"\.akamaitechnologies\.com$",
        r"\.akamaiedge\.net$",
        r"\.cloudflare\.com$",
        r"\.hetzner\.(com|de)$",
        r"\.ovh\.(net|com)$",
        r"\.scaleway\.com$",
    ])
    .expect("cloud hostname catalog is a fixed, valid pattern set")
}

#[must_use]
pub fn is_cloud_hostname(hostname: &str, patterns: &RegexSet) -> bool {
    patterns.is_match(hostname)
}

/// Asynchronously resolves the PTR record for `address` with a 2-second
/// deadline. Returns `None` on timeout, resolution failure, or an
/// unparseable address — never propagates an error to the caller.
pub async fn reverse_dns(resolver: &TokioAsyncResolver, address: &str) -> Option<String> {
    let ip: IpAddr = address.parse().ok()?;
    let lookup = tokio::time::timeout(Duration::from_secs(2), resolver.reverse_lookup(ip)).await;
    match lookup {
        Ok(Ok(names)) => names.iter().next().map(|n| n.to_string().trim_end_matches('.').to_string()),
        Ok(Err(e)) => {
            warn!(address, error = %e, "reverse DNS lookup failed");
            None
        }
        Err(_) => {
            warn!(address, "reverse DNS lookup timed out");
            None
        }
    }
}

/// Offline geo/ASN lookup via bundled `MaxMind`-format databases. Missing
/// database files are a startup warning, not a hard error — lookups then
/// simply return `None` throughout the process lifetime (spec §4.10 step
/// 4).
pub struct OfflineGeo {
    city_db: Option<maxminddb::Reader<Vec<u8>>>,
    asn_db: Option<maxminddb::Reader<Vec<u8>>>,
}

#[derive(Debug, Default, Clone)]
pub struct OfflineGeoResult {
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub asn: Option<String>,
    pub asn_org: Option<String>,
}

impl OfflineGeo {
    pub fn open(city_path: Option<&str>, asn_path: Option<&str>) -> Self {
        let city_db = city_path.and_then(|p| match maxminddb::Reader::open_readfile(p) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(path = p, error = %e, "failed to open MaxMind city database, offline geo disabled for city/region");
                None
            }
        });
        let asn_db = asn_path.and_then(|p| match maxminddb::Reader::open_readfile(p) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(path = p, error = %e, "failed to open MaxMind ASN database, offline geo disabled for ASN");
                None
            }
        });
        Self { city_db, asn_db }
    }

    #[must_use]
    pub fn lookup(&self, address: &str) -> OfflineGeoResult {
        let mut result = OfflineGeoResult::default();
        let Ok(ip) = IpAddr::from_str(address) else {
            return result;
        };

        if let Some(db) = &self.city_db {
            if let Ok(city) = db.lookup::<maxminddb::geoip2::City>(ip) {
                result.country_code = city
                    .country
                    .as_ref()
                    .and_then(|c| c.iso_code)
                    .map(str::to_string);
                result.region = city
                    .subdivisions
                    .as_ref()
                    .and_then(|s| s.first())
                    .and_then(|s| s.names.as_ref())
                    .and_then(|n| n.get("en"))
                    .map(|s| (*s).to_string());
                result.city = city
                    .city
                    .as_ref()
                    .and_then(|c| c.names.as_ref())
                    .and_then(|n| n.get("en"))
                    .map(|s| (*s).to_string());
                if let Some(loc) = city.location {
                    result.latitude = loc.latitude;
                    result.longitude = loc.longitude;
                }
            }
        }

        if let Some(db) = &self.asn_db {
            if let Ok(asn) = db.lookup::<maxminddb::geoip2::Asn>(ip) {
                result.asn = asn.autonomous_system_number.map(|n| format!("AS{n}"));
                result.asn_org = asn.autonomous_system_organization.map(str::to_string);
            }
        }

        result
    }
}

/// Online geo provider client. Throttled to roughly `max_per_minute`
/// requests via a minimum inter-call delay, and deduplicated against an
/// in-memory "known addresses" set refreshed from `online_geo_cache`
/// (spec §4.10 step 5).
pub struct OnlineGeo {
    client: reqwest::Client,
    provider_url: String,
    known: DashMap<String, DateTime<Utc>>,
    last_call_millis: AtomicI64,
    min_interval: Duration,
    max_stale_days: i64,
    dial_lock: AsyncMutex<()>,
}

#[derive(Debug, Default, Clone, serde::Deserialize)]
struct OnlineGeoResponse {
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
    isp: Option<String>,
    #[serde(default)]
    proxy: bool,
    #[serde(default)]
    mobile: bool,
    #[serde(rename = "reverse")]
    reverse_dns: Option<String>,
    #[serde(rename = "as")]
    asn: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct OnlineGeoResult {
    pub country_code: Option<String>,
    pub isp: Option<String>,
    pub proxy: bool,
    pub mobile: bool,
    pub reverse_dns: Option<String>,
    pub asn: Option<String>,
}

impl OnlineGeo {
    #[must_use]
    pub fn new(provider_url: String, max_stale_days: i64, max_per_minute: u32) -> Self {
        let per_request = Duration::from_secs_f64(60.0 / f64::from(max_per_minute.max(1)));
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            provider_url,
            known: DashMap::new(),
            last_call_millis: AtomicI64::new(0),
            min_interval: per_request,
            max_stale_days,
            dial_lock: AsyncMutex::new(()),
        }
    }

    /// Loads the known-address freshness set from persistent storage at
    /// startup.
    pub async fn prime_from_store(&self, pool: &PgPool) {
        let rows = sqlx::query_as::<_, (String, DateTime<Utc>)>(
            "SELECT address, last_checked FROM online_geo_cache",
        )
        .fetch_all(pool)
        .await;
        match rows {
            Ok(rows) => {
                for (address, last_checked) in rows {
                    self.known.insert(address, last_checked);
                }
            }
            Err(e) => warn!(error = %e, "failed to prime online-geo known-address set"),
        }
    }

    fn needs_refresh(&self, address: &str) -> bool {
        match self.known.get(address) {
            None => true,
            Some(ts) => Utc::now().signed_duration_since(*ts).num_days() >= self.max_stale_days,
        }
    }

    async fn throttle(&self) {
        let _guard = self.dial_lock.lock().await;
        let now = Utc::now().timestamp_millis();
        let last = self.last_call_millis.load(Ordering::Acquire);
        let elapsed = Duration::from_millis((now - last).max(0) as u64);
        if elapsed < self.min_interval {
            tokio::time::sleep(self.min_interval - elapsed).await;
        }
        self.last_call_millis.store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    pub async fn lookup(&self, pool: &PgPool, address: &str) -> Option<OnlineGeoResult> {
        if !self.needs_refresh(address) {
            return None;
        }
        self.throttle().await;

        let url = format!("{}/{}", self.provider_url.trim_end_matches('/'), address);
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(address, error = %e, "online geo request failed");
                return None;
            }
        };
        let parsed: OnlineGeoResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(address, error = %e, "online geo response decode failed");
                return None;
            }
        };

        let now = Utc::now();
        self.known.insert(address.to_string(), now);
        if let Err(e) = sqlx::query(
            "INSERT INTO online_geo_cache (address, country_code, isp, proxy, mobile, reverse_dns, asn, last_checked)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (address) DO UPDATE SET
               country_code = EXCLUDED.country_code, isp = EXCLUDED.isp,
               proxy = EXCLUDED.proxy, mobile = EXCLUDED.mobile,
               reverse_dns = EXCLUDED.reverse_dns, asn = EXCLUDED.asn,
               last_checked = EXCLUDED.last_checked",
        )
        .bind(address)
        .bind(&parsed.country_code)
        .bind(&parsed.isp)
        .bind(parsed.proxy)
        .bind(parsed.mobile)
        .bind(&parsed.reverse_dns)
        .bind(&parsed.asn)
        .bind(now)
        .execute(pool)
        .await
        {
            warn!(address, error = %e, "failed to persist online geo result");
        }

        Some(OnlineGeoResult {
            country_code: parsed.country_code,
            isp: parsed.isp,
            proxy: parsed.proxy,
            mobile: parsed.mobile,
            reverse_dns: parsed.reverse_dns,
            asn: parsed.asn,
        })
    }
}

/// RFC 3912 WHOIS client. Only invoked when offline-geo ASN was empty
/// (spec §4.10 step 6). Hand-rolled: the exchange is a single
/// newline-terminated query followed by a plain-text response, which no
/// crate in this corpus has a dependency for.
pub async fn whois_lookup(pool: &PgPool, address: &str, server: &str) -> Option<(Option<String>, Option<String>)> {
    let cached = sqlx::query_as::<_, (Option<String>, Option<String>)>(
        "SELECT asn, organization FROM whois_cache WHERE address = $1",
    )
    .bind(address)
    .fetch_optional(pool)
    .await;
    if let Ok(Some(row)) = cached {
        return Some(row);
    }

    let result = tokio::time::timeout(Duration::from_secs(5), query_whois_server(server, address)).await;
    let text = match result {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(address, error = %e, "WHOIS lookup failed");
            return None;
        }
        Err(_) => {
            warn!(address, "WHOIS lookup timed out");
            return None;
        }
    };

    let (asn, org) = parse_whois_text(&text);
    if let Err(e) = sqlx::query(
        "INSERT INTO whois_cache (address, asn, organization, looked_up_at) VALUES ($1, $2, $3, $4)
         ON CONFLICT (address) DO UPDATE SET asn = EXCLUDED.asn, organization = EXCLUDED.organization, looked_up_at = EXCLUDED.looked_up_at",
    )
    .bind(address)
    .bind(&asn)
    .bind(&org)
    .bind(Utc::now())
    .execute(pool)
    .await
    {
        warn!(address, error = %e, "failed to persist WHOIS result");
    }

    Some((asn, org))
}

async fn query_whois_server(server: &str, address: &str) -> std::io::Result<String> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let mut stream = TcpStream::connect((server, 43)).await?;
    stream.write_all(format!("{address}\r\n").as_bytes()).await?;
    stream.flush().await?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn parse_whois_text(text: &str) -> (Option<String>, Option<String>) {
    let mut asn = None;
    let mut org = None;
    for line in text.lines() {
        let lower = line.to_ascii_lowercase();
        if asn.is_none() && (lower.starts_with("origin") || lower.starts_with("originas")) {
            if let Some(value) = line.split(':').nth(1) {
                asn = Some(value.trim().to_string());
            }
        }
        if org.is_none() && (lower.starts_with("orgname") || lower.starts_with("org-name") || lower.starts_with("netname")) {
            if let Some(value) = line.split(':').nth(1) {
                org = Some(value.trim().to_string());
            }
        }
    }
    (asn, org)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_well_known_crawlers_case_insensitively() {
        assert_eq!(detect_bot("Mozilla/5.0 (compatible; Googlebot/2.1)"), Some("Googlebot"));
        assert_eq!(detect_bot("MOZILLA GOOGLEBOT TEST"), Some("Googlebot"));
    }

    #[test]
    fn ordinary_browser_ua_is_not_a_bot() {
        assert_eq!(
            detect_bot("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36"),
            None
        );
    }

    #[test]
    fn parses_a_desktop_chrome_ua() {
        let ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36";
        let info = parse_user_agent(ua).expect("woothee should classify a common Chrome UA");
        assert_eq!(info.device_type.as_deref(), Some("desktop"));
        assert!(info.browser.is_some());
    }

    #[test]
    fn empty_user_agent_parses_to_none() {
        assert!(parse_user_agent("").is_none());
    }

    #[test]
    fn cloud_hostname_patterns_match_known_providers() {
        let patterns = cloud_hostname_patterns();
        assert!(is_cloud_hostname("ec2-1-2-3-4.compute-1.amazonaws.com", &patterns));
        assert!(is_cloud_hostname("123.bc.googleusercontent.com", &patterns));
        assert!(!is_cloud_hostname("mail.example.com", &patterns));
    }

    #[test]
    fn offline_geo_with_no_databases_returns_empty_result() {
        let geo = OfflineGeo::open(None, None);
        let result = geo.lookup("8.8.8.8");
        assert!(result.country_code.is_none());
        assert!(result.asn.is_none());
    }

    #[test]
    fn parse_whois_text_extracts_asn_and_org() {
        let text = "OrgName: Example Corp\nOriginAS: AS64500\n";
        let (asn, org) = parse_whois_text(text);
        assert_eq!(asn.as_deref(), Some("AS64500"));
        assert_eq!(org.as_deref(), Some("Example Corp"));
    }

    #[test]
    fn android_ua_yields_device_model() {
        let ua = "Mozilla/5.0 (Linux; Android 13; SM-G991B) AppleWebKit/537.36 Chrome/115.0 Mobile Safari/537.36";
        let info = parse_user_agent(ua).expect("woothee should classify an Android Chrome UA");
        assert_eq!(info.device_model.as_deref(), Some("SM-G991B"));
    }

    #[test]
    fn ios_ua_yields_family_name_not_exact_model() {
        let ua = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15";
        assert_eq!(extract_device_model(ua).as_deref(), Some("iPhone"));
    }

    #[test]
    fn bot_score_weighs_catalog_match_highest() {
        assert_eq!(bot_score(true, false, false), 60);
        assert_eq!(bot_score(true, true, true), 100);
        assert_eq!(bot_score(false, true, false), 25);
        assert_eq!(bot_score(false, false, false), 0);
        assert!(bot_score(false, true, true) < 50);
    }
}
