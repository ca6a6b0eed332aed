use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::rate_limit::{origin_of, RateLimiter};
use crate::scrapers::stealth::StealthConfig;

/// A loaded page
#[derive(Debug, Clone, PartialEq)]
pub struct PageContent {
    pub requested_url: String,
    /// Where the page ended up after redirects
    pub final_url: String,
    pub html: String,
}

/// Something that can load pages, one at a time
#[async_trait]
pub trait Navigator: Send {
    async fn navigate(&mut self, url: &str) -> Result<PageContent>;
}

/// One isolated browsing context owned by a single crawl cycle.
///
/// `release` tears down everything the session opened, in reverse order,
/// and may be called any number of times.
#[async_trait]
pub trait BrowserSession: Navigator {
    async fn release(&mut self);

    fn is_released(&self) -> bool;
}

/// Creates fresh sessions; a session is never reused across cycles
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn acquire(&self, stealth: &StealthConfig) -> Result<Box<dyn BrowserSession>>;
}

/// Navigator handed to site adapters: every page load first takes a slot
/// from the rate limiter for the target's origin.
pub struct PacedSession<'a> {
    inner: &'a mut dyn BrowserSession,
    limiter: &'a RateLimiter,
    navigations: usize,
}

impl<'a> PacedSession<'a> {
    pub fn new(inner: &'a mut dyn BrowserSession, limiter: &'a RateLimiter) -> Self {
        Self {
            inner,
            limiter,
            navigations: 0,
        }
    }

    pub fn navigations(&self) -> usize {
        self.navigations
    }
}

#[async_trait]
impl<'a> Navigator for PacedSession<'a> {
    async fn navigate(&mut self, url: &str) -> Result<PageContent> {
        let origin = origin_of(url);
        let waited = self.limiter.acquire(&origin).await;
        if !waited.is_zero() {
            debug!("Waited {:?} for a request slot on {}", waited, origin);
        }

        self.navigations += 1;
        self.inner.navigate(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct EchoSession {
        loads: Vec<String>,
        released: bool,
    }

    #[async_trait]
    impl Navigator for EchoSession {
        async fn navigate(&mut self, url: &str) -> Result<PageContent> {
            self.loads.push(url.to_string());
            Ok(PageContent {
                requested_url: url.to_string(),
                final_url: url.to_string(),
                html: "<html></html>".to_string(),
            })
        }
    }

    #[async_trait]
    impl BrowserSession for EchoSession {
        async fn release(&mut self) {
            self.released = true;
        }

        fn is_released(&self) -> bool {
            self.released
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_session_waits_between_loads_on_same_origin() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let mut inner = EchoSession {
            loads: Vec::new(),
            released: false,
        };
        let start = tokio::time::Instant::now();

        {
            let mut paced = PacedSession::new(&mut inner, &limiter);
            paced.navigate("https://www.leboncoin.fr/recherche?page=1").await.unwrap();
            paced.navigate("https://www.seloger.com/list.htm").await.unwrap();
            assert!(start.elapsed() < Duration::from_secs(1));

            paced.navigate("https://www.leboncoin.fr/recherche?page=2").await.unwrap();
            assert!(start.elapsed() >= Duration::from_secs(60));
            assert_eq!(paced.navigations(), 3);
        }

        assert_eq!(inner.loads.len(), 3);
        assert!(!inner.is_released());
    }
}
