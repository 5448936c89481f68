//! Edge process configuration.
//!
//! Loaded from environment variables, following the `Config::from_env()`
//! convention used throughout this codebase.

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address (e.g. "0.0.0.0:8080").
    pub bind_address: String,

    /// Handoff primary queue capacity. Overflow drops the oldest element.
    pub queue_capacity: usize,

    /// Directory failover files are written under.
    pub failover_directory: String,

    /// Handoff endpoint identifier: a Unix domain socket path on this
    /// platform (named pipe on platforms that have one).
    pub endpoint_name: String,

    /// Drain deadline on shutdown, in seconds.
    pub shutdown_timeout_seconds: u64,

    /// CIDR feed refresh interval, in seconds (default: weekly).
    pub cidr_refresh_interval_seconds: u64,

    /// AWS IP ranges feed URL.
    pub aws_ranges_url: String,

    /// GCP IP ranges feed URL.
    pub gcp_ranges_url: String,

    /// `PostgreSQL` connection URL, used only for `GeoCache`'s
    /// read-through refill.
    pub database_url: String,

    /// Loopback port the `/healthz` and `/readyz` endpoints also answer on
    /// when `bind_address` is reused (kept equal to `bind_address` today;
    /// present for configuration-surface parity with the forge process).
    pub health_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_address: env::var("EDGE_BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            queue_capacity: env::var("QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            failover_directory: env::var("FAILOVER_DIRECTORY")
                .unwrap_or_else(|_| "./failover".into()),
            endpoint_name: env::var("ENDPOINT_NAME")
                .unwrap_or_else(|_| "/tmp/smartpixl-handoff.sock".into()),
            shutdown_timeout_seconds: env::var("SHUTDOWN_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            cidr_refresh_interval_seconds: env::var("CIDR_REFRESH_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7 * 24 * 3600),
            aws_ranges_url: env::var("AWS_RANGES_URL")
                .unwrap_or_else(|_| "https://ip-ranges.amazonaws.com/ip-ranges.json".into()),
            gcp_ranges_url: env::var("GCP_RANGES_URL").unwrap_or_else(|_| {
                "https://www.gstatic.com/ipranges/cloud.json".into()
            }),
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            health_port: env::var("HEALTH_PORT").ok().and_then(|v| v.parse().ok()),
        })
    }
}
