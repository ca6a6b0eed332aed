use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::{Result, ScrapeError};
use crate::models::{short_digest, Classification, Listing};

/// A listing together with what the index decided about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedListing {
    pub listing: Listing,
    pub classification: Classification,
}

/// Downstream persistence or notification.
///
/// A failed `emit` is reported for that item only; the cycle goes on.
#[async_trait]
pub trait ListingSink: Send + Sync {
    async fn emit(&self, listing: &Listing, classification: Classification) -> Result<()>;
}

/// Writes new and updated listings to the log
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl ListingSink for LogSink {
    async fn emit(&self, listing: &Listing, classification: Classification) -> Result<()> {
        if classification != Classification::Unchanged {
            info!(
                source = %listing.source,
                id = %listing.id,
                price = listing.price,
                "{} listing: {} ({})",
                classification,
                listing.title,
                listing.url
            );
        }
        Ok(())
    }
}

/// Hands classified listings to a consumer over a bounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ClassifiedListing>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ClassifiedListing>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ListingSink for ChannelSink {
    async fn emit(&self, listing: &Listing, classification: Classification) -> Result<()> {
        self.tx
            .send(ClassifiedListing {
                listing: listing.clone(),
                classification,
            })
            .await
            .map_err(|_| ScrapeError::Sink("listing consumer has gone away".to_string()))
    }
}

/// One JSON file per new or updated listing: `<dir>/<source>_<key digest>.json`.
/// The digest covers the whole identity key, so every ad gets its own file.
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub(crate) fn path_for(&self, listing: &Listing) -> Result<PathBuf> {
        let key = serde_json::to_string(&listing.identity_key())?;
        Ok(self.dir.join(format!("{}_{}.json", listing.source, short_digest(&key))))
    }
}

#[async_trait]
impl ListingSink for JsonDirSink {
    async fn emit(&self, listing: &Listing, classification: Classification) -> Result<()> {
        if classification == Classification::Unchanged {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(&ClassifiedListing {
            listing: listing.clone(),
            classification,
        })?;
        tokio::fs::write(self.path_for(listing)?, json).await?;
        Ok(())
    }
}

/// Emits to every inner sink; fails if any of them failed
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ListingSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ListingSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn ListingSink>) {
        self.sinks.push(sink);
    }
}

#[async_trait]
impl ListingSink for FanoutSink {
    async fn emit(&self, listing: &Listing, classification: Classification) -> Result<()> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.emit(listing, classification).await {
                failures.push(e.to_string());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ScrapeError::Sink(failures.join("; ")))
        }
    }
}
