//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Upstream site and acquisition filters
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Memory cache and worker pool
    #[serde(default)]
    pub cache: CacheConfig,

    /// Disk overflow cache
    #[serde(default)]
    pub disk: DiskConfig,

    /// Outbound request quota
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Ban detection and cooldown
    #[serde(default)]
    pub ban: BanConfig,

    /// HTTP listener
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.upstream.user_agent.trim().is_empty() {
            return Err(AppError::validation("upstream.user_agent is empty"));
        }
        if !self.upstream.base_url.starts_with("http") {
            return Err(AppError::validation(
                "upstream.base_url must be an http(s) URL",
            ));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(AppError::validation("upstream.timeout_secs must be > 0"));
        }
        if self.upstream.id_length == 0 {
            return Err(AppError::validation("upstream.id_length must be > 0"));
        }
        if self.upstream.max_attempts == 0 {
            return Err(AppError::validation("upstream.max_attempts must be > 0"));
        }
        if self.upstream.max_image_bytes == 0 {
            return Err(AppError::validation("upstream.max_image_bytes must be > 0"));
        }
        if self.cache.max_size == 0 {
            return Err(AppError::validation("cache.max_size must be > 0"));
        }
        if self.cache.worker_count == 0 {
            return Err(AppError::validation("cache.worker_count must be > 0"));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(AppError::validation("rate_limit.max_requests must be > 0"));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(AppError::validation("rate_limit.window_secs must be > 0"));
        }
        if self.ban.interval_secs == 0 {
            return Err(AppError::validation("ban.interval_secs must be > 0"));
        }
        Ok(())
    }
}

/// Upstream site and acquisition filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Site root; pages live at `{base_url}/{id}`
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Accept-Language header for HTTP requests
    #[serde(default = "defaults::accept_language")]
    pub accept_language: String,

    /// Timeout for every outbound request in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Length of generated ids
    #[serde(default = "defaults::id_length")]
    pub id_length: usize,

    /// Random ids tried per `fetch_one_valid` run
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: usize,

    /// Largest accepted image body in bytes
    #[serde(default = "defaults::max_image_bytes")]
    pub max_image_bytes: usize,

    /// Image hosts known to serve placeholders (substring match on host)
    #[serde(default = "defaults::blocked_hosts")]
    pub blocked_hosts: Vec<String>,

    /// URL substrings that mark placeholder images
    #[serde(default = "defaults::bad_url_markers")]
    pub bad_url_markers: Vec<String>,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            user_agent: defaults::user_agent(),
            accept_language: defaults::accept_language(),
            timeout_secs: defaults::timeout(),
            id_length: defaults::id_length(),
            max_attempts: defaults::max_attempts(),
            max_image_bytes: defaults::max_image_bytes(),
            blocked_hosts: defaults::blocked_hosts(),
            bad_url_markers: defaults::bad_url_markers(),
        }
    }
}

/// Memory cache and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Memory cache capacity
    #[serde(default = "defaults::cache_max_size")]
    pub max_size: usize,

    /// Items to acquire synchronously before workers start
    #[serde(default = "defaults::prefill_target")]
    pub prefill_target: usize,

    /// Number of background producers
    #[serde(default = "defaults::worker_count")]
    pub worker_count: usize,

    /// Back-off after a successful iteration in milliseconds
    #[serde(default = "defaults::refill_delay_ok")]
    pub refill_delay_ok_ms: u64,

    /// Back-off after a failed iteration in milliseconds
    #[serde(default = "defaults::refill_delay_fail")]
    pub refill_delay_fail_ms: u64,
}

impl CacheConfig {
    pub fn delay_ok(&self) -> Duration {
        Duration::from_millis(self.refill_delay_ok_ms)
    }

    pub fn delay_fail(&self) -> Duration {
        Duration::from_millis(self.refill_delay_fail_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: defaults::cache_max_size(),
            prefill_target: defaults::prefill_target(),
            worker_count: defaults::worker_count(),
            refill_delay_ok_ms: defaults::refill_delay_ok(),
            refill_delay_fail_ms: defaults::refill_delay_fail(),
        }
    }
}

/// Disk overflow cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Directory holding `<id><ext>` and `<id>.json` pairs
    #[serde(default = "defaults::disk_dir")]
    pub dir: PathBuf,

    /// Maximum number of stored pairs
    #[serde(default = "defaults::disk_max_items")]
    pub max_items: usize,

    /// Worker sleep when memory and disk are both full, in seconds
    #[serde(default = "defaults::idle_sleep")]
    pub idle_sleep_secs: u64,

    /// Claimed files never downloaded within this many seconds are released
    #[serde(default = "defaults::claim_ttl")]
    pub claim_ttl_secs: u64,
}

impl DiskConfig {
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_secs(self.idle_sleep_secs)
    }

    pub fn claim_ttl(&self) -> Duration {
        Duration::from_secs(self.claim_ttl_secs)
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            dir: defaults::disk_dir(),
            max_items: defaults::disk_max_items(),
            idle_sleep_secs: defaults::idle_sleep(),
            claim_ttl_secs: defaults::claim_ttl(),
        }
    }
}

/// Rolling-window request quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    #[serde(default = "defaults::rate_max_requests")]
    pub max_requests: usize,

    /// Window length in seconds
    #[serde(default = "defaults::rate_window")]
    pub window_secs: u64,

    /// Minimum sleep between re-checks in milliseconds
    #[serde(default = "defaults::rate_sleep_slice")]
    pub sleep_slice_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: defaults::rate_max_requests(),
            window_secs: defaults::rate_window(),
            sleep_slice_ms: defaults::rate_sleep_slice(),
        }
    }
}

/// Ban detection and cooldown settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanConfig {
    /// Cooldown after a ban signal in seconds
    #[serde(default = "defaults::ban_interval")]
    pub interval_secs: u64,

    /// Statuses that mean the upstream is blocking us
    #[serde(default = "defaults::ban_status_codes")]
    pub status_codes: Vec<u16>,

    /// Lowercase body phrases that mean the upstream is blocking us
    #[serde(default = "defaults::ban_keywords")]
    pub keywords: Vec<String>,

    /// Longest single sleep while waiting for the cooldown, in seconds
    #[serde(default = "defaults::ban_poll_slice")]
    pub poll_slice_secs: u64,

    /// Sleep after a failed recovery check, in seconds
    #[serde(default = "defaults::ban_recheck_sleep")]
    pub recheck_sleep_secs: u64,
}

impl BanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Whether a status code is a ban signal.
    pub fn is_ban_status(&self, status: u16) -> bool {
        self.status_codes.contains(&status)
    }

    /// First ban phrase found in a page body, if any.
    pub fn find_keyword(&self, body: &str) -> Option<&str> {
        let lowered = body.to_lowercase();
        self.keywords
            .iter()
            .find(|keyword| lowered.contains(&keyword.to_lowercase()))
            .map(String::as_str)
    }
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::ban_interval(),
            status_codes: defaults::ban_status_codes(),
            keywords: defaults::ban_keywords(),
            poll_slice_secs: defaults::ban_poll_slice(),
            recheck_sleep_secs: defaults::ban_recheck_sleep(),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind
    #[serde(default = "defaults::bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::bind(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Upstream defaults
    pub fn base_url() -> String {
        "https://prnt.sc".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36".into()
    }
    pub fn accept_language() -> String {
        "en-US,en;q=0.9,ru;q=0.8".into()
    }
    pub fn timeout() -> u64 {
        5
    }
    pub fn id_length() -> usize {
        6
    }
    pub fn max_attempts() -> usize {
        10
    }
    pub fn max_image_bytes() -> usize {
        5 * 1024 * 1024
    }
    pub fn blocked_hosts() -> Vec<String> {
        vec!["imgur.com".into(), "i.imgur.com".into()]
    }
    pub fn bad_url_markers() -> Vec<String> {
        vec!["image-not-found".into(), "st.prntscr.com".into()]
    }

    // Cache defaults
    pub fn cache_max_size() -> usize {
        20
    }
    pub fn prefill_target() -> usize {
        20
    }
    pub fn worker_count() -> usize {
        4
    }
    pub fn refill_delay_ok() -> u64 {
        300
    }
    pub fn refill_delay_fail() -> u64 {
        1500
    }

    // Disk defaults
    pub fn disk_dir() -> PathBuf {
        PathBuf::from("storage/images")
    }
    pub fn disk_max_items() -> usize {
        1000
    }
    pub fn idle_sleep() -> u64 {
        5
    }
    pub fn claim_ttl() -> u64 {
        10 * 60
    }

    // Rate limit defaults
    pub fn rate_max_requests() -> usize {
        45
    }
    pub fn rate_window() -> u64 {
        60
    }
    pub fn rate_sleep_slice() -> u64 {
        500
    }

    // Ban defaults
    pub fn ban_interval() -> u64 {
        15 * 60
    }
    pub fn ban_status_codes() -> Vec<u16> {
        vec![403, 429, 503]
    }
    pub fn ban_keywords() -> Vec<String> {
        vec![
            "temporarily blocked".into(),
            "access denied".into(),
            "rate limit".into(),
        ]
    }
    pub fn ban_poll_slice() -> u64 {
        5
    }
    pub fn ban_recheck_sleep() -> u64 {
        10
    }

    // Server defaults
    pub fn bind() -> String {
        "0.0.0.0:8000".into()
    }
}
