use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Config;
use crate::rate_limit::HOURLY_WINDOW;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Browser launch settings meant to look like an ordinary desktop visitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StealthConfig {
    pub user_agent: String,
    pub accept_language: String,
    pub platform: String,
    pub viewport: Viewport,
    /// Hide `navigator.webdriver` and the AutomationControlled blink feature
    pub disable_automation_flags: bool,
    /// Ceiling for a single page load
    pub request_timeout: Duration,
    /// How long the browser may sit without commands before the driver drops
    /// it. A session can wait out a full rate-limit window between two loads.
    pub idle_timeout: Duration,
    /// `host:port`; when unset the session factory may assign one
    pub proxy: Option<String>,
    pub headless: bool,
    /// Chrome's process sandbox; containers running as root need it off
    pub sandbox: bool,
}

impl Default for StealthConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: "fr-FR,fr;q=0.9,en;q=0.8".to_string(),
            platform: "Win32".to_string(),
            viewport: Viewport {
                width: 1920,
                height: 1080,
            },
            disable_automation_flags: true,
            request_timeout: Duration::from_secs(30),
            idle_timeout: idle_timeout_for(Duration::from_secs(30), Duration::from_secs(8)),
            proxy: None,
            headless: true,
            sandbox: true,
        }
    }
}

impl StealthConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout,
            idle_timeout: idle_timeout_for(config.request_timeout, config.navigation_backoff_max),
            sandbox: config.chrome_sandbox,
            ..Self::default()
        }
    }

    /// Outer bound for one page load: navigation, settling and reading the
    /// document each get the request timeout
    pub fn page_load_budget(&self) -> Duration {
        self.request_timeout.saturating_mul(3)
    }

    /// Extra Chrome switches for this profile
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--lang={}", self.primary_language()),
            "--no-first-run".to_string(),
            "--disable-extensions".to_string(),
            "--mute-audio".to_string(),
        ];
        if self.disable_automation_flags {
            args.push("--disable-blink-features=AutomationControlled".to_string());
        }
        args
    }

    fn primary_language(&self) -> &str {
        self.accept_language
            .split(',')
            .next()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or("fr-FR")
    }
}

/// A rate window plus a few page loads and the longest retry backoff
fn idle_timeout_for(request_timeout: Duration, backoff_max: Duration) -> Duration {
    HOURLY_WINDOW
        .saturating_add(request_timeout.saturating_mul(4))
        .saturating_add(backoff_max)
}

/// Markup of anti-bot interstitials served instead of the requested page
const BLOCK_MARKERS: &[&str] = &[
    "captcha-delivery.com",
    "id=\"px-captcha\"",
    "id=\"challenge-form\"",
    "/cdn-cgi/challenge-platform/",
    "<title>Just a moment...</title>",
];

pub fn looks_blocked(html: &str) -> bool {
    BLOCK_MARKERS.iter().any(|marker| html.contains(marker))
}
