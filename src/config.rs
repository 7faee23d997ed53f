use crate::freshness::{DEFAULT_REFRESH_THRESHOLD, MAX_REFRESH_THRESHOLD, MIN_REFRESH_THRESHOLD};
use crate::resolver::{DEFAULT_RESOLVE_TIMEOUT, DEFAULT_USER_AGENT};
use crate::scanner::{DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default scan interval (5 minutes)
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(300_000);

/// Shortest scan interval accepted
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(30_000);

/// Source store backend selection
#[derive(Clone, Debug, PartialEq)]
pub enum SourceStoreType {
    Memory,
    Valkey,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub is_dev: bool,
    /// Look-ahead window before expiry (default 900s, floor 60s)
    pub refresh_threshold: Duration,
    /// Scan batch size (default 20, clamped to 1..=200)
    pub refresh_batch_size: usize,
    /// Scan interval (default 300000ms, floor 30000ms)
    pub refresh_interval: Duration,
    pub scheduler_enabled: bool,
    /// Bound on a single player endpoint request
    pub resolver_timeout: Duration,
    pub user_agent: String,
    /// Site label recorded on scraped videos
    pub scraper_site: String,
    /// Hosts the scraper accepts; empty means any
    pub scraper_hosts: Vec<String>,
    pub source_store: SourceStoreType,
    /// Valkey/Redis URL (used when source_store = Valkey)
    pub valkey_url: Option<String>,
}

/// Parse an env var, falling back to `default` when unset or invalid.
fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode, provides sensible defaults. In PROD mode, PORT is required.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let is_dev = parse_or("DEV_MODE", false);

        // Port: required in prod, defaults to 3000 in dev
        let port = if is_dev {
            env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?
        } else {
            env::var("PORT")
                .map_err(|_| "PORT is required in production")?
                .parse()?
        };

        let refresh_threshold = Duration::from_secs(parse_or(
            "REFRESH_THRESHOLD_SECONDS",
            DEFAULT_REFRESH_THRESHOLD.as_secs(),
        ))
        .clamp(MIN_REFRESH_THRESHOLD, MAX_REFRESH_THRESHOLD);

        let refresh_batch_size =
            parse_or("REFRESH_BATCH_SIZE", DEFAULT_BATCH_SIZE).clamp(1, MAX_BATCH_SIZE);

        let refresh_interval = Duration::from_millis(parse_or(
            "REFRESH_INTERVAL_MS",
            DEFAULT_REFRESH_INTERVAL.as_millis() as u64,
        ))
        .max(MIN_REFRESH_INTERVAL);

        let scheduler_enabled = parse_or("REFRESH_SCHEDULER_ENABLED", true);

        let resolver_timeout = match parse_or("RESOLVER_TIMEOUT_SECS", 0u64) {
            0 => DEFAULT_RESOLVE_TIMEOUT,
            secs => Duration::from_secs(secs),
        };

        let user_agent = env::var("USER_AGENT")
            .ok()
            .filter(|ua| !ua.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let scraper_site = env::var("SCRAPER_SITE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "default".to_string());

        let scraper_hosts = env::var("SCRAPER_HOSTS")
            .unwrap_or_default()
            .split(',')
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();

        let source_store = match env::var("SOURCE_STORE")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "valkey" | "redis" => SourceStoreType::Valkey,
            _ => SourceStoreType::Memory,
        };
        let valkey_url = env::var("VALKEY_URL").ok();

        Ok(Config {
            port,
            is_dev,
            refresh_threshold,
            refresh_batch_size,
            refresh_interval,
            scheduler_enabled,
            resolver_timeout,
            user_agent,
            scraper_site,
            scraper_hosts,
            source_store,
            valkey_url,
        })
    }

    /// Development configuration with defaults, for tests and local runs.
    pub fn dev() -> Self {
        Config {
            port: 3000,
            is_dev: true,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            refresh_batch_size: DEFAULT_BATCH_SIZE,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            scheduler_enabled: false,
            resolver_timeout: DEFAULT_RESOLVE_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            scraper_site: "default".to_string(),
            scraper_hosts: Vec::new(),
            source_store: SourceStoreType::Memory,
            valkey_url: None,
        }
    }
}
