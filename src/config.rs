//! Explicit configuration struct (spec §6, §9) passed to the coordinator
//! at construction. Never read from a global — callers own a `PipelineConfig`
//! and hand it (usually via `Arc`) to [`crate::pipeline::Coordinator::new`].

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_bytes: u64,
    pub max_pixels: u64,
    pub max_dim: u32,
    pub max_concurrent_downloads: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub retry_max: u32,
    pub top_k: usize,
    pub dedup_threshold: f64,
    pub quality_floor: f64,
    pub jpeg_quality: u8,
    pub allow_hosts: Vec<String>,
    pub deny_extensions: Vec<String>,
    pub require_https: bool,
    pub l1_max_entries: u64,
    pub l1_max_bytes: u64,
    pub l1_ttl: Duration,
    pub l2_url: Option<String>,
    pub l2_ttl: Duration,
    pub cpu_workers: usize,
}

const DEFAULT_ALLOW_HOSTS: &[&str] = &[
    "instagram.com",
    "cdninstagram.com",
    "fbcdn.net",
    "ytimg.com",
    "googleusercontent.com",
    "pstatic.net",
    "kakaocdn.net",
    "cloudfront.net",
    "amazonaws.com",
    "akamaihd.net",
];

const DEFAULT_DENY_EXTS: &[&str] = &[".exe", ".bat", ".sh", ".cmd", ".com"];

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_bytes: 10_485_760,
            max_pixels: 100_000_000,
            max_dim: 1024,
            max_concurrent_downloads: 3,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            retry_max: 3,
            top_k: 3,
            dedup_threshold: 0.85,
            quality_floor: 0.3,
            jpeg_quality: 85,
            allow_hosts: DEFAULT_ALLOW_HOSTS.iter().map(|s| s.to_string()).collect(),
            deny_extensions: DEFAULT_DENY_EXTS.iter().map(|s| s.to_string()).collect(),
            require_https: true,
            l1_max_entries: 100,
            l1_max_bytes: 500 * 1024 * 1024,
            l1_ttl: Duration::from_secs(3600),
            l2_url: None,
            l2_ttl: Duration::from_secs(7 * 24 * 3600),
            cpu_workers: 4,
        }
    }
}

impl PipelineConfig {
    /// Overlay `IMG_*` environment variables (spec §6) on top of the
    /// documented defaults. Unset variables keep their default; a variable
    /// that is set but unparsable is a [`ConfigError`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(v) = env_u64("IMG_MAX_BYTES")? {
            cfg.max_bytes = v;
        }
        if let Some(v) = env_u64("IMG_MAX_PIXELS")? {
            cfg.max_pixels = v;
        }
        if let Some(v) = env_u32("IMG_MAX_DIM")? {
            cfg.max_dim = v;
        }
        if let Some(v) = env_usize("IMG_MAX_CONCURRENT_DL")? {
            cfg.max_concurrent_downloads = v;
        }
        if let Some(v) = env_usize("IMG_CPU_WORKERS")? {
            cfg.cpu_workers = v;
        }
        if let Some(v) = env_millis("IMG_DL_TIMEOUT_CONNECT_MS")? {
            cfg.connect_timeout = v;
        }
        if let Some(v) = env_millis("IMG_DL_TIMEOUT_READ_MS")? {
            cfg.read_timeout = v;
        }
        if let Some(v) = env_millis("IMG_DL_TIMEOUT_WRITE_MS")? {
            cfg.write_timeout = v;
        }
        if let Some(v) = env_u32("IMG_RETRY_MAX")? {
            cfg.retry_max = v;
        }
        if let Some(v) = env_usize("IMG_TOP_K")? {
            cfg.top_k = v;
        }
        if let Some(v) = env_f64("IMG_DEDUP_THRESHOLD")? {
            cfg.dedup_threshold = v;
        }
        if let Some(v) = env_f64("IMG_QUALITY_FLOOR")? {
            cfg.quality_floor = v;
        }
        if let Some(v) = env_u8("IMG_JPEG_QUALITY")? {
            cfg.jpeg_quality = v;
        }
        if let Some(v) = env_csv("IMG_ALLOW_HOSTS") {
            cfg.allow_hosts = v;
        }
        if let Some(v) = env_csv("IMG_DENY_EXTS") {
            cfg.deny_extensions = v;
        }
        if let Ok(v) = env::var("IMG_REQUIRE_HTTPS") {
            cfg.require_https = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        if let Some(v) = env_u64("IMG_L1_MAX_ENTRIES")? {
            cfg.l1_max_entries = v;
        }
        if let Some(v) = env_u64("IMG_L1_MAX_BYTES")? {
            cfg.l1_max_bytes = v;
        }
        if let Some(v) = env_secs("IMG_L1_TTL_SECS")? {
            cfg.l1_ttl = v;
        }
        if let Ok(v) = env::var("IMG_L2_URL") {
            cfg.l2_url = Some(v);
        }
        if let Some(v) = env_secs("IMG_L2_TTL_SECS")? {
            cfg.l2_ttl = v;
        }

        Ok(cfg)
    }
}

fn env_csv(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: v,
            }),
        Err(_) => Ok(None),
    }
}

fn env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    env_parsed(key)
}
fn env_u32(key: &str) -> Result<Option<u32>, ConfigError> {
    env_parsed(key)
}
fn env_u8(key: &str) -> Result<Option<u8>, ConfigError> {
    env_parsed(key)
}
fn env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    env_parsed(key)
}
fn env_f64(key: &str) -> Result<Option<f64>, ConfigError> {
    env_parsed(key)
}
fn env_millis(key: &str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_parsed::<u64>(key)?.map(Duration::from_millis))
}
fn env_secs(key: &str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_parsed::<u64>(key)?.map(Duration::from_secs))
}
