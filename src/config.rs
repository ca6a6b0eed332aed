use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ScrapeError;
use crate::models::Source;

/// One search page to monitor
#[derive(Debug, Clone, PartialEq)]
pub struct SearchTarget {
    pub site: Source,
    pub url: String,
}

/// Application configuration, read once at process start
#[derive(Debug, Clone)]
pub struct Config {
    pub request_timeout: Duration,
    pub max_requests_per_hour: u32,
    pub scraping_interval: Duration,
    pub use_proxies: bool,
    pub proxy_list: Vec<String>,
    pub debug: bool,
    pub navigation_max_attempts: u32,
    pub navigation_backoff: Duration,
    pub navigation_backoff_max: Duration,
    pub chrome_sandbox: bool,
    pub data_dir: PathBuf,
    pub search_targets: Vec<SearchTarget>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            max_requests_per_hour: 120,
            scraping_interval: Duration::from_secs(5 * 60),
            use_proxies: false,
            proxy_list: Vec::new(),
            debug: false,
            navigation_max_attempts: 3,
            navigation_backoff: Duration::from_millis(500),
            navigation_backoff_max: Duration::from_millis(8000),
            chrome_sandbox: true,
            data_dir: PathBuf::from("data"),
            search_targets: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            request_timeout: Duration::from_secs(
                parse_or(&lookup, "REQUEST_TIMEOUT_SECONDS", defaults.request_timeout.as_secs())?,
            ),
            max_requests_per_hour: parse_or(
                &lookup,
                "MAX_REQUESTS_PER_HOUR",
                defaults.max_requests_per_hour,
            )?,
            scraping_interval: minutes(parse_or(
                &lookup,
                "SCRAPING_INTERVAL_MINUTES",
                defaults.scraping_interval.as_secs() / 60,
            )?)?,
            use_proxies: parse_bool(&lookup, "USE_PROXIES", defaults.use_proxies)?,
            proxy_list: lookup("PROXY_LIST")
                .map(|raw| split_list(&raw, &[',']))
                .unwrap_or_default(),
            debug: parse_bool(&lookup, "DEBUG", defaults.debug)?,
            navigation_max_attempts: parse_or(
                &lookup,
                "NAVIGATION_MAX_ATTEMPTS",
                defaults.navigation_max_attempts,
            )?,
            navigation_backoff: Duration::from_millis(parse_or(
                &lookup,
                "NAVIGATION_BACKOFF_MS",
                defaults.navigation_backoff.as_millis() as u64,
            )?),
            navigation_backoff_max: Duration::from_millis(parse_or(
                &lookup,
                "NAVIGATION_BACKOFF_MAX_MS",
                defaults.navigation_backoff_max.as_millis() as u64,
            )?),
            chrome_sandbox: parse_bool(&lookup, "CHROME_SANDBOX", defaults.chrome_sandbox)?,
            data_dir: lookup("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            search_targets: match lookup("SEARCH_TARGETS") {
                Some(raw) => parse_targets(&raw).context("SEARCH_TARGETS is malformed")?,
                None => Vec::new(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ScrapeError> {
        if self.request_timeout.is_zero() {
            return Err(ScrapeError::Config("REQUEST_TIMEOUT_SECONDS must be greater than 0".into()));
        }
        if self.max_requests_per_hour == 0 {
            return Err(ScrapeError::Config("MAX_REQUESTS_PER_HOUR must be greater than 0".into()));
        }
        if self.scraping_interval.is_zero() {
            return Err(ScrapeError::Config("SCRAPING_INTERVAL_MINUTES must be greater than 0".into()));
        }
        if self.navigation_max_attempts == 0 {
            return Err(ScrapeError::Config("NAVIGATION_MAX_ATTEMPTS must be at least 1".into()));
        }
        if self.navigation_backoff > self.navigation_backoff_max {
            return Err(ScrapeError::Config(
                "NAVIGATION_BACKOFF_MS cannot exceed NAVIGATION_BACKOFF_MAX_MS".into(),
            ));
        }
        if self.use_proxies && self.proxy_list.is_empty() {
            return Err(ScrapeError::Config("USE_PROXIES is set but PROXY_LIST is empty".into()));
        }
        for proxy in &self.proxy_list {
            if !proxy.contains(':') {
                return Err(ScrapeError::Config(format!(
                    "Invalid proxy format '{}', expected 'host:port'",
                    proxy
                )));
            }
        }
        Ok(())
    }

    /// Proxies in effect, empty unless USE_PROXIES is on
    pub fn active_proxies(&self) -> &[String] {
        if self.use_proxies {
            &self.proxy_list
        } else {
            &[]
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        _ => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => anyhow::bail!("{} must be a boolean, got '{}'", key, other),
        },
    }
}

fn minutes(value: u64) -> std::result::Result<Duration, ScrapeError> {
    value
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| ScrapeError::Config(format!("SCRAPING_INTERVAL_MINUTES is too large: {}", value)))
}

fn split_list(raw: &str, separators: &[char]) -> Vec<String> {
    raw.split(separators)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// `leboncoin=https://...;seloger=https://...`, also newline separated
fn parse_targets(raw: &str) -> Result<Vec<SearchTarget>> {
    split_list(raw, &[';', '\n'])
        .into_iter()
        .map(|entry| -> Result<SearchTarget> {
            let (site, url) = entry
                .split_once('=')
                .with_context(|| format!("expected site=url, got '{}'", entry))?;
            let site = Source::from_key(site)
                .with_context(|| format!("unknown site '{}'", site.trim()))?;
            Ok(SearchTarget {
                site,
                url: url.trim().to_string(),
            })
        })
        .collect()
}
