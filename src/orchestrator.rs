//! One crawl cycle per (adapter, search URL).
//!
//! A cycle moves through `Idle -> SessionAcquired -> Listing -> Parsing ->
//! Reconciling -> Reporting -> Released`. The session is released on every
//! exit path, and every problem short of a session that cannot be opened ends
//! up in the returned [`CycleSummary`] rather than as an error.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::ScrapeError;
use crate::fingerprint::FingerprintIndex;
use crate::models::{Classification, Listing, Source};
use crate::rate_limit::RateLimiter;
use crate::scrapers::session::{BrowserSession, PacedSession, SessionFactory};
use crate::scrapers::stealth::StealthConfig;
use crate::scrapers::traits::SiteAdapter;
use crate::scrapers::types::RawCard;
use crate::sink::ListingSink;

/// Bounded retry with exponential backoff for navigation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.navigation_max_attempts.max(1),
            base_delay: config.navigation_backoff,
            max_delay: config.navigation_backoff_max,
        }
    }

    /// Wait after the `attempt`-th failure (1-based): base, 2x base, 4x base, ... capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CycleState {
    Idle,
    SessionAcquired,
    Listing,
    Parsing,
    Reconciling,
    Reporting,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    SessionInit,
    Extraction,
    Sink,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleFailure {
    pub kind: FailureKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CycleOutcome {
    /// Ran to the end; per-item problems are in `failures`
    Completed,
    /// Navigation kept failing after every retry
    Aborted,
    /// No browser session could be opened
    SessionInitFailure,
    Cancelled,
}

/// What one cycle did, for the scheduler to act on
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub source: Source,
    pub search_url: String,
    pub outcome: CycleOutcome,
    pub final_state: CycleState,
    pub cards_found: usize,
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped_malformed: usize,
    pub failures: Vec<CycleFailure>,
    pub elapsed: Duration,
}

impl CycleSummary {
    fn new(source: Source, search_url: &str) -> Self {
        Self {
            source,
            search_url: search_url.to_string(),
            outcome: CycleOutcome::Completed,
            final_state: CycleState::Idle,
            cards_found: 0,
            new: 0,
            updated: 0,
            unchanged: 0,
            skipped_malformed: 0,
            failures: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Listings that made it through parsing and reconciliation
    pub fn processed(&self) -> usize {
        self.new + self.updated + self.unchanged
    }

    pub fn failures_of(&self, kind: FailureKind) -> usize {
        self.failures.iter().filter(|f| f.kind == kind).count()
    }

    fn record(&mut self, classification: Classification) {
        match classification {
            Classification::New => self.new += 1,
            Classification::Updated => self.updated += 1,
            Classification::Unchanged => self.unchanged += 1,
        }
    }

    fn fail(&mut self, kind: FailureKind, detail: impl Into<String>) {
        self.failures.push(CycleFailure {
            kind,
            detail: detail.into(),
        });
    }

    fn advance(&mut self, to: CycleState) {
        debug!("Cycle {} [{}]: {:?} -> {:?}", self.source, self.search_url, self.final_state, to);
        self.final_state = to;
    }
}

/// Drives crawl cycles; cheap to share across concurrent cycles
pub struct ScrapeOrchestrator {
    sessions: Arc<dyn SessionFactory>,
    limiter: Arc<RateLimiter>,
    index: Arc<FingerprintIndex>,
    sink: Arc<dyn ListingSink>,
    stealth: StealthConfig,
    retry: RetryPolicy,
}

impl ScrapeOrchestrator {
    pub fn new(
        config: &Config,
        sessions: Arc<dyn SessionFactory>,
        limiter: Arc<RateLimiter>,
        index: Arc<FingerprintIndex>,
        sink: Arc<dyn ListingSink>,
    ) -> Self {
        Self {
            sessions,
            limiter,
            index,
            sink,
            stealth: StealthConfig::from_config(config),
            retry: RetryPolicy::from_config(config),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_stealth(mut self, stealth: StealthConfig) -> Self {
        self.stealth = stealth;
        self
    }

    pub fn index(&self) -> &Arc<FingerprintIndex> {
        &self.index
    }

    /// Run one full cycle; always returns a summary
    pub async fn run_cycle(&self, adapter: &dyn SiteAdapter, search_url: &str) -> CycleSummary {
        self.run_cycle_until(adapter, search_url, &CancellationToken::new()).await
    }

    /// Like [`run_cycle`](Self::run_cycle), stopping early once `cancel` fires.
    /// The session is still released before this returns.
    pub async fn run_cycle_until(
        &self,
        adapter: &dyn SiteAdapter,
        search_url: &str,
        cancel: &CancellationToken,
    ) -> CycleSummary {
        let started = Instant::now();
        let mut summary = CycleSummary::new(adapter.source(), search_url);

        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.sessions.acquire(&self.stealth) => Some(result),
        };

        let mut session = match acquired {
            Some(Ok(session)) => session,
            Some(Err(e)) => {
                error!("Session init failed for {}: {}", summary.source, e);
                summary.outcome = CycleOutcome::SessionInitFailure;
                summary.fail(FailureKind::SessionInit, e.to_string());
                return self.finish(summary, started);
            }
            None => {
                summary.outcome = CycleOutcome::Cancelled;
                return self.finish(summary, started);
            }
        };
        summary.advance(CycleState::SessionAcquired);

        let cancelled = {
            let crawl = self.crawl(adapter, search_url, session.as_mut(), &mut summary);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => true,
                _ = crawl => false,
            }
        };
        if cancelled {
            warn!(
                "Cycle {} cancelled during {:?}, abandoning remaining work",
                summary.source, summary.final_state
            );
            summary.outcome = CycleOutcome::Cancelled;
        }

        session.release().await;
        self.finish(summary, started)
    }

    async fn crawl(
        &self,
        adapter: &dyn SiteAdapter,
        search_url: &str,
        session: &mut dyn BrowserSession,
        summary: &mut CycleSummary,
    ) {
        summary.advance(CycleState::Listing);
        let cards = match self.list_with_retry(adapter, session, search_url).await {
            Ok(cards) => cards,
            Err((e, attempts)) => {
                if e.is_retryable() {
                    error!("Giving up on {} after {} attempts: {}", search_url, attempts, e);
                    summary.outcome = CycleOutcome::Aborted;
                } else {
                    warn!("Could not list cards on {}: {}", search_url, e);
                }
                summary.fail(FailureKind::Extraction, e.to_string());
                return;
            }
        };
        summary.cards_found = cards.len();

        summary.advance(CycleState::Parsing);
        let listings = self.parse_cards(adapter, &cards, summary);

        summary.advance(CycleState::Reconciling);
        let classified: Vec<(Listing, Classification)> = listings
            .into_iter()
            .map(|mut listing| {
                let classification = self.index.reconcile(&mut listing);
                summary.record(classification);
                (listing, classification)
            })
            .collect();

        summary.advance(CycleState::Reporting);
        for (listing, classification) in &classified {
            if let Err(e) = self.sink.emit(listing, *classification).await {
                warn!("Sink rejected {} listing {}: {}", classification, listing.id, e);
                summary.fail(FailureKind::Sink, format!("{}: {}", listing.id, e));
            }
        }
    }

    async fn list_with_retry(
        &self,
        adapter: &dyn SiteAdapter,
        session: &mut dyn BrowserSession,
        search_url: &str,
    ) -> Result<Vec<RawCard>, (ScrapeError, u32)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut paced = PacedSession::new(&mut *session, &self.limiter);

            match adapter.list_cards(&mut paced, search_url).await {
                Ok(cards) => return Ok(cards),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "Attempt {}/{} on {} failed: {}, retrying in {:?}",
                        attempt, self.retry.max_attempts, search_url, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }

    fn parse_cards(&self, adapter: &dyn SiteAdapter, cards: &[RawCard], summary: &mut CycleSummary) -> Vec<Listing> {
        let mut listings = Vec::with_capacity(cards.len());
        for (idx, card) in cards.iter().enumerate() {
            match adapter.parse_card(card) {
                Some(listing) => listings.push(listing),
                None => {
                    summary.skipped_malformed += 1;
                    warn!("Skipped malformed card {} from {}", idx, summary.search_url);
                }
            }
        }
        listings
    }

    fn finish(&self, mut summary: CycleSummary, started: Instant) -> CycleSummary {
        summary.advance(CycleState::Released);
        summary.elapsed = started.elapsed();
        info!(
            "Cycle finished for {} ({:?}): {} new, {} updated, {} unchanged, {} skipped, {} failures in {:.1?}",
            summary.source,
            summary.outcome,
            summary.new,
            summary.updated,
            summary.unchanged,
            summary.skipped_malformed,
            summary.failures.len(),
            summary.elapsed
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for(40), Duration::from_secs(3));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = Config {
            navigation_max_attempts: 4,
            navigation_backoff: Duration::from_millis(250),
            ..Config::default()
        };
        let policy = RetryPolicy::from_config(&config);

        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = CycleSummary::new(Source::Leboncoin, "https://www.leboncoin.fr/recherche");
        summary.record(Classification::New);
        summary.record(Classification::New);
        summary.record(Classification::Unchanged);
        summary.fail(FailureKind::Sink, "1: disk full");

        assert_eq!(summary.processed(), 3);
        assert_eq!(summary.new, 2);
        assert_eq!(summary.failures_of(FailureKind::Sink), 1);
        assert_eq!(summary.failures_of(FailureKind::Extraction), 0);
    }
}
