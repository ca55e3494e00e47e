//! Configuration management for the verifier service

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

use crate::rate_limit::RateLimitConfig;
use crate::root_signer::parse_address;
use crate::tag_auth::TagAuthenticator;
use crate::types::SignedRoot;

/// Longest accepted rate limit window (one day)
pub const MAX_RATE_LIMIT_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP boundary binds to
    pub listen_addr: String,

    /// AES-128 master key tags are diversified from (hex)
    pub tag_master_key: String,

    /// Application ID mixed into key diversification (hex)
    pub tag_application_id: String,

    /// System identifier mixed into key diversification (hex)
    pub tag_system_identifier: String,

    /// Compressed Groth16 verifying key for the membership circuit
    pub verification_key_path: String,

    /// Circuit generation of the verifying key
    pub circuit_version: u32,

    /// Optional Keccak-256 fingerprint the verifying key must match
    pub verification_key_fingerprint: Option<String>,

    /// Address of the issuer that signs Merkle roots
    pub issuer_address: String,

    /// Signed roots trusted at startup
    pub trusted_roots: Vec<SignedRoot>,

    /// Roots that must never be trusted
    pub revoked_roots: Vec<String>,

    /// Remote trust source serving signed root manifests
    pub trust_source_url: Option<String>,

    /// Trust source refresh interval in seconds
    pub trust_refresh_interval_secs: u64,

    /// Refuse verification once the trusted set is older than this
    pub trust_max_staleness_secs: Option<u64>,

    /// Requests allowed per client per window
    pub rate_limit_max_requests: u32,

    /// Rate limit window in milliseconds
    pub rate_limit_window_ms: i64,

    /// Shared Redis for rate limiting across instances
    pub redis_url: Option<String>,

    /// Upper bound on a single membership proof check
    pub proof_timeout_ms: u64,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let rate_limit = RateLimitConfig::default();
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            tag_master_key: String::new(),
            tag_application_id: String::new(),
            tag_system_identifier: String::new(),
            verification_key_path: "verification_key.bin".to_string(),
            circuit_version: 1,
            verification_key_fingerprint: None,
            issuer_address: String::new(),
            trusted_roots: vec![],
            revoked_roots: vec![],
            trust_source_url: None,
            trust_refresh_interval_secs: 300,
            trust_max_staleness_secs: None,
            rate_limit_max_requests: rate_limit.max_requests,
            rate_limit_window_ms: rate_limit.window_ms,
            redis_url: None,
            proof_timeout_ms: 5_000,
            request_timeout_secs: 30,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.trim().parse().ok())
}

fn env_list(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|value| {
        value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let contents = fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };

        config.apply_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment variables
    fn apply_env(&mut self) {
        if let Ok(addr) = env::var("LISTEN_ADDR") {
            self.listen_addr = addr;
        }

        if let Ok(key) = env::var("TAG_MASTER_KEY") {
            self.tag_master_key = key;
        }

        if let Ok(aid) = env::var("TAG_APPLICATION_ID") {
            self.tag_application_id = aid;
        }

        if let Ok(system_id) = env::var("TAG_SYSTEM_IDENTIFIER") {
            self.tag_system_identifier = system_id;
        }

        if let Ok(path) = env::var("VERIFICATION_KEY_PATH") {
            self.verification_key_path = path;
        }

        if let Some(version) = env_parse("CIRCUIT_VERSION") {
            self.circuit_version = version;
        }

        if let Ok(fingerprint) = env::var("VERIFICATION_KEY_FINGERPRINT") {
            self.verification_key_fingerprint = Some(fingerprint);
        }

        if let Ok(address) = env::var("ISSUER_ADDRESS") {
            self.issuer_address = address;
        }

        if let Some(revoked) = env_list("REVOKED_ROOTS") {
            self.revoked_roots = revoked;
        }

        if let Ok(url) = env::var("TRUST_SOURCE_URL") {
            self.trust_source_url = Some(url);
        }

        if let Some(secs) = env_parse("TRUST_REFRESH_INTERVAL_SECS") {
            self.trust_refresh_interval_secs = secs;
        }

        if let Some(secs) = env_parse("TRUST_MAX_STALENESS_SECS") {
            self.trust_max_staleness_secs = Some(secs);
        }

        if let Some(max) = env_parse("RATE_LIMIT_MAX_REQUESTS") {
            self.rate_limit_max_requests = max;
        }

        if let Some(window) = env_parse("RATE_LIMIT_WINDOW_MS") {
            self.rate_limit_window_ms = window;
        }

        if let Ok(url) = env::var("REDIS_URL") {
            self.redis_url = Some(url);
        }

        if let Some(ms) = env_parse("PROOF_TIMEOUT_MS") {
            self.proof_timeout_ms = ms;
        }

        if let Some(secs) = env_parse("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = secs;
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        TagAuthenticator::from_hex(
            &self.tag_master_key,
            &self.tag_application_id,
            &self.tag_system_identifier,
        )?;

        if self.issuer_address.is_empty() {
            return Err(anyhow::anyhow!("Issuer address is required"));
        }
        parse_address(&self.issuer_address)?;

        if !(1..=MAX_RATE_LIMIT_WINDOW_MS).contains(&self.rate_limit_window_ms) {
            return Err(anyhow::anyhow!(
                "Rate limit window must be between 1 and {} ms",
                MAX_RATE_LIMIT_WINDOW_MS
            ));
        }

        if self.trust_source_url.is_some() && self.trust_refresh_interval_secs == 0 {
            return Err(anyhow::anyhow!("Trust refresh interval must be positive"));
        }

        // Nothing could ever refresh a static set once it goes stale
        if self.trust_max_staleness_secs.is_some() && self.trust_source_url.is_none() {
            return Err(anyhow::anyhow!("Trust max staleness requires a trust source URL"));
        }

        Ok(())
    }

    pub fn proof_timeout(&self) -> Duration {
        Duration::from_millis(self.proof_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.rate_limit_max_requests,
            window_ms: self.rate_limit_window_ms,
        }
    }
}
