use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::config::Config;

/// Window the configured `max_requests_per_hour` ceiling applies to
pub const HOURLY_WINDOW: Duration = Duration::from_secs(3600);

/// Sliding-window limiter keyed by site origin.
///
/// Each origin keeps the time slots of its last `ceiling` admissions. A caller
/// that finds the window full is handed a reservation at the earliest slot
/// that keeps every rolling window at or under the ceiling, so concurrent
/// callers queue up instead of bursting.
#[derive(Debug)]
pub struct RateLimiter {
    ceiling: usize,
    window: Duration,
    origins: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(ceiling: u32, window: Duration) -> Self {
        Self {
            ceiling: ceiling.max(1) as usize,
            window,
            origins: DashMap::new(),
        }
    }

    pub fn per_hour(ceiling: u32) -> Self {
        Self::new(ceiling, HOURLY_WINDOW)
    }

    pub fn from_config(config: &Config) -> Self {
        Self::per_hour(config.max_requests_per_hour)
    }

    /// Reserve one request slot for `origin`; returns how long to wait before using it
    pub fn admit(&self, origin: &str) -> Duration {
        self.admit_at(origin, Instant::now())
    }

    fn admit_at(&self, origin: &str, now: Instant) -> Duration {
        // Holding the entry locks this origin's shard only
        let mut slots = self.origins.entry(origin.to_string()).or_default();

        while let Some(front) = slots.front() {
            if *front + self.window <= now {
                slots.pop_front();
            } else {
                break;
            }
        }

        let slot = if slots.len() < self.ceiling {
            slots.back().map_or(now, |last| (*last).max(now))
        } else {
            let oldest = slots.pop_front().unwrap_or(now);
            let earliest = (oldest + self.window).max(now);
            slots.back().map_or(earliest, |last| (*last).max(earliest))
        };

        slots.push_back(slot);
        slot.saturating_duration_since(now)
    }

    /// Admit and sleep until the reserved slot
    pub async fn acquire(&self, origin: &str) -> Duration {
        let wait = self.admit(origin);
        if !wait.is_zero() {
            debug!("Rate limit reached for {}, waiting {:?}", origin, wait);
            tokio::time::sleep(wait).await;
        }
        wait
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// `scheme://host[:port]` of a URL, the key the limiter counts against.
/// Unparseable input is used as-is.
pub fn origin_of(raw_url: &str) -> String {
    match Url::parse(raw_url.trim()) {
        Ok(url) => url.origin().ascii_serialization(),
        Err(_) => raw_url.trim().to_string(),
    }
}
