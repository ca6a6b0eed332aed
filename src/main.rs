use anyhow::{Context, Result};
use listing_scout::config::{Config, SearchTarget};
use listing_scout::fingerprint::FingerprintIndex;
use listing_scout::logging;
use listing_scout::models::Source;
use listing_scout::orchestrator::{CycleOutcome, ScrapeOrchestrator};
use listing_scout::rate_limit::RateLimiter;
use listing_scout::scrapers::{adapter_for_source, ChromeSessionFactory, SearchParams};
use listing_scout::sink::{FanoutSink, JsonDirSink, ListingSink, LogSink};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize logging
    logging::init(config.debug);

    info!("🏠 Listing Scout - classified ad monitor");
    info!(
        "Interval {:?}, max {} requests/hour per site, timeout {:?}",
        config.scraping_interval, config.max_requests_per_hour, config.request_timeout
    );

    let targets = if config.search_targets.is_empty() {
        let adapter = adapter_for_source(Source::Leboncoin);
        let url = adapter.search_url(&SearchParams::default());
        warn!("SEARCH_TARGETS not set, monitoring default search {}", url);
        vec![SearchTarget {
            site: Source::Leboncoin,
            url,
        }]
    } else {
        config.search_targets.clone()
    };

    let index_path = config.data_dir.join("fingerprints.json");
    let index = FingerprintIndex::load_json(&index_path)
        .await
        .with_context(|| format!("Failed to load {}", index_path.display()))?;
    info!("Loaded {} known listings from {}", index.len(), index_path.display());

    let sinks: Vec<Arc<dyn ListingSink>> = vec![
        Arc::new(LogSink),
        Arc::new(JsonDirSink::new(config.data_dir.join("listings"))),
    ];

    let orchestrator = Arc::new(ScrapeOrchestrator::new(
        &config,
        Arc::new(ChromeSessionFactory::from_config(&config)),
        Arc::new(RateLimiter::from_config(&config)),
        Arc::new(index),
        Arc::new(FanoutSink::new(sinks)),
    ));

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, finishing current cycles...");
        }
        signal_token.cancel();
    });

    let handles: Vec<_> = targets
        .into_iter()
        .map(|target| {
            tokio::spawn(monitor(
                Arc::clone(&orchestrator),
                target,
                config.scraping_interval,
                index_path.clone(),
                shutdown.clone(),
            ))
        })
        .collect();

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Monitor task failed: {}", e);
        }
    }

    orchestrator
        .index()
        .save_json(&index_path)
        .await
        .context("Failed to save fingerprint index")?;
    info!("💾 Saved {} known listings to {}", orchestrator.index().len(), index_path.display());

    Ok(())
}

/// Run cycles for one target until shutdown. Repeated session failures
/// stretch the interval, up to 8x.
async fn monitor(
    orchestrator: Arc<ScrapeOrchestrator>,
    target: SearchTarget,
    interval: Duration,
    index_path: PathBuf,
    shutdown: CancellationToken,
) {
    let adapter = adapter_for_source(target.site);
    let mut init_failures: u32 = 0;

    loop {
        let summary = orchestrator
            .run_cycle_until(adapter.as_ref(), &target.url, &shutdown)
            .await;

        match summary.outcome {
            CycleOutcome::SessionInitFailure => init_failures += 1,
            CycleOutcome::Cancelled => break,
            _ => init_failures = 0,
        }

        if let Err(e) = orchestrator.index().save_json(&index_path).await {
            warn!("Could not save fingerprint index: {}", e);
        }

        let wait = interval.saturating_mul(1u32 << init_failures.min(3));
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    info!("Stopped monitoring {} {}", target.site, target.url);
}
