//! Longest-match-free CIDR matching against a periodically refreshed list
//! of cloud-provider ranges.
//!
//! The list is swapped by pointer assignment (spec §9's "atomic pointer to
//! immutable slice" idiom) so request-path readers never take a lock.

use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Deserialize;
use tracing::{debug, warn};

/// One parsed CIDR range, immutable after construction.
#[derive(Debug, Clone)]
pub struct CidrEntry {
    network: Vec<u8>,
    prefix_len: u8,
    provider: Arc<str>,
}

impl CidrEntry {
    #[must_use]
    pub fn new(net: IpAddr, prefix_len: u8, provider: Arc<str>) -> Self {
        let network = match net {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        Self {
            network,
            prefix_len,
            provider,
        }
    }

    /// Bitwise CIDR match per spec §4.3: compare whole bytes up to
    /// `prefix >> 3`, then the remainder bits under a shifted mask.
    /// Families that don't match in byte length never match.
    fn matches(&self, addr_bytes: &[u8]) -> bool {
        if addr_bytes.len() != self.network.len() {
            return false;
        }
        let full_bytes = (self.prefix_len >> 3) as usize;
        let remain_bits = self.prefix_len & 7;

        if full_bytes > addr_bytes.len() {
            return false;
        }
        if addr_bytes[..full_bytes] != self.network[..full_bytes] {
            return false;
        }
        if remain_bits == 0 {
            return true;
        }
        let mask = 0xFFu8 << (8 - remain_bits);
        addr_bytes[full_bytes] & mask == self.network[full_bytes] & mask
    }
}

/// Longest-prefix-agnostic (first-match) CIDR matcher. Spec §4.3 doesn't
/// require true longest-prefix resolution — entries are scanned linearly
/// and the first match wins, which matches the behavior of a flat
/// provider-range feed where ranges don't nest across providers.
pub struct DatacenterMatcher {
    entries: ArcSwap<Vec<CidrEntry>>,
}

impl Default for DatacenterMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl DatacenterMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// `Check(address) -> (matched, providerTag)`.
    #[must_use]
    pub fn check(&self, address: &str) -> Option<Arc<str>> {
        let addr: IpAddr = address.parse().ok()?;
        let bytes: Vec<u8> = match addr {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        let snapshot = self.entries.load();
        snapshot
            .iter()
            .find(|e| e.matches(&bytes))
            .map(|e| Arc::clone(&e.provider))
    }

    /// Replace the CIDR list. If `new_entries` is empty, the previous list
    /// is retained (spec §8 boundary behavior) and the caller should log
    /// the refresh failure itself.
    pub fn replace(&self, new_entries: Vec<CidrEntry>) {
        if new_entries.is_empty() {
            debug!("datacenter matcher: refresh produced zero entries, keeping previous list");
            return;
        }
        self.entries.store(Arc::new(new_entries));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Deserialize)]
struct AwsRangesFeed {
    prefixes: Vec<AwsPrefix>,
    #[serde(default)]
    ipv6_prefixes: Vec<AwsIpv6Prefix>,
}

#[derive(Debug, Deserialize)]
struct AwsPrefix {
    ip_prefix: String,
}

#[derive(Debug, Deserialize)]
struct AwsIpv6Prefix {
    ipv6_prefix: String,
}

#[derive(Debug, Deserialize)]
struct GcpRangesFeed {
    prefixes: Vec<GcpPrefix>,
}

#[derive(Debug, Deserialize)]
struct GcpPrefix {
    #[serde(default)]
    ip_prefix: Option<String>,
    #[serde(default)]
    ipv6_prefix: Option<String>,
}

/// Fetch and parse both upstream feeds, tolerating either failing
/// independently. Returns an empty vec only if both feeds failed or
/// yielded no usable entries — the caller (matcher) treats that as
/// "keep the previous list".
pub async fn fetch_cidr_entries(client: &reqwest::Client, aws_url: &str, gcp_url: &str) -> Vec<CidrEntry> {
    let mut entries = Vec::new();

    match fetch_aws(client, aws_url).await {
        Ok(aws) => entries.extend(aws),
        Err(e) => warn!(error = %e, "AWS IP ranges feed fetch failed"),
    }

    match fetch_gcp(client, gcp_url).await {
        Ok(gcp) => entries.extend(gcp),
        Err(e) => warn!(error = %e, "GCP IP ranges feed fetch failed"),
    }

    entries
}

async fn fetch_aws(client: &reqwest::Client, url: &str) -> anyhow::Result<Vec<CidrEntry>> {
    let feed: AwsRangesFeed = client.get(url).send().await?.json().await?;
    let tag: Arc<str> = Arc::from("AWS");
    let mut out = Vec::with_capacity(feed.prefixes.len() + feed.ipv6_prefixes.len());
    for p in feed.prefixes {
        if let Some(entry) = parse_cidr(&p.ip_prefix, Arc::clone(&tag)) {
            out.push(entry);
        }
    }
    for p in feed.ipv6_prefixes {
        if let Some(entry) = parse_cidr(&p.ipv6_prefix, Arc::clone(&tag)) {
            out.push(entry);
        }
    }
    Ok(out)
}

async fn fetch_gcp(client: &reqwest::Client, url: &str) -> anyhow::Result<Vec<CidrEntry>> {
    let feed: GcpRangesFeed = client.get(url).send().await?.json().await?;
    let tag: Arc<str> = Arc::from("GCP");
    let mut out = Vec::with_capacity(feed.prefixes.len());
    for p in feed.prefixes {
        let cidr = p.ip_prefix.or(p.ipv6_prefix);
        if let Some(cidr) = cidr {
            if let Some(entry) = parse_cidr(&cidr, Arc::clone(&tag)) {
                out.push(entry);
            }
        }
    }
    Ok(out)
}

fn parse_cidr(cidr: &str, provider: Arc<str>) -> Option<CidrEntry> {
    let net: ipnet::IpNet = cidr.parse().ok()?;
    Some(CidrEntry::new(net.addr(), net.prefix_len(), provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(cidr: &str, provider: &str) -> CidrEntry {
        parse_cidr(cidr, Arc::from(provider)).unwrap()
    }

    #[test]
    fn matches_exact_byte_aligned_prefix() {
        let m = DatacenterMatcher::new();
        m.replace(vec![entry("3.0.0.0/8", "AWS")]);
        assert_eq!(m.check("3.5.6.7").as_deref(), Some("AWS"));
        assert_eq!(m.check("4.5.6.7"), None);
    }

    #[test]
    fn matches_non_byte_aligned_prefix() {
        let m = DatacenterMatcher::new();
        m.replace(vec![entry("203.0.112.0/22", "GCP")]);
        assert_eq!(m.check("203.0.115.255").as_deref(), Some("GCP"));
        assert_eq!(m.check("203.0.116.0"), None);
    }

    #[test]
    fn ipv4_and_ipv6_families_never_cross_match() {
        let m = DatacenterMatcher::new();
        m.replace(vec![entry("2600:1f00::/24", "AWS")]);
        assert_eq!(m.check("38.0.0.1"), None);
        assert_eq!(m.check("2600:1f00::1").as_deref(), Some("AWS"));
    }

    #[test]
    fn empty_refresh_retains_previous_list() {
        let m = DatacenterMatcher::new();
        m.replace(vec![entry("3.0.0.0/8", "AWS")]);
        assert_eq!(m.len(), 1);
        m.replace(vec![]);
        assert_eq!(m.len(), 1);
        assert_eq!(m.check("3.1.2.3").as_deref(), Some("AWS"));
    }
}
