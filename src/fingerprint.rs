//! Listing identity and freshness tracking.
//!
//! The index maps an [`IdentityKey`] to the hash of the listing's mutable
//! fields and decides whether an observation is new, updated or unchanged.
//! Entries are never evicted here; retention belongs to whoever persists
//! the snapshot.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::Result;
use crate::models::{Classification, IdentityKey, Listing};

/// Last known state of one identity key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintEntry {
    pub content_hash: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Deterministic digest of title, price, surface, location and description.
///
/// Photos and timestamps are left out. Fields are length-prefixed so that
/// moving text between two fields changes the hash.
pub fn content_hash(listing: &Listing) -> String {
    let mut hasher = Sha256::new();

    let price = listing.price.to_string();
    let surface = listing
        .surface
        .map(|s| format!("{:.2}", s))
        .unwrap_or_else(|| "-".to_string());
    let fields: [&str; 5] = [
        listing.title.trim(),
        price.as_str(),
        surface.as_str(),
        listing.location.trim(),
        listing.description.trim(),
    ];

    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }

    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Concurrent identity index.
///
/// Reconciliation of one key holds that key's shard lock for the whole
/// read-modify-write; different keys proceed independently.
#[derive(Debug, Default)]
pub struct FingerprintIndex {
    entries: DashMap<IdentityKey, FingerprintEntry>,
}

impl FingerprintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an index from a persisted snapshot
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (IdentityKey, FingerprintEntry)>,
    {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Classify one observation and record it.
    ///
    /// The listing's `first_seen` is replaced by the stored one for known keys
    /// and `last_update` is set to the observation time.
    pub fn reconcile(&self, listing: &mut Listing) -> Classification {
        self.reconcile_at(listing, Utc::now())
    }

    pub(crate) fn reconcile_at(&self, listing: &mut Listing, now: DateTime<Utc>) -> Classification {
        let key = listing.identity_key();
        let hash = content_hash(listing);

        match self.entries.entry(key) {
            Entry::Vacant(vacant) => {
                debug!("New listing {}", vacant.key());
                vacant.insert(FingerprintEntry {
                    content_hash: hash,
                    first_seen: now,
                    last_seen_at: now,
                });
                listing.first_seen = now;
                listing.last_update = now;
                Classification::New
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let seen_at = if now > entry.last_seen_at {
                    now
                } else {
                    entry.last_seen_at + Duration::microseconds(1)
                };
                entry.last_seen_at = seen_at;
                listing.first_seen = entry.first_seen;
                listing.last_update = seen_at;

                if entry.content_hash == hash {
                    Classification::Unchanged
                } else {
                    entry.content_hash = hash;
                    Classification::Updated
                }
            }
        }
    }

    pub fn get(&self, key: &IdentityKey) -> Option<FingerprintEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Point-in-time copy of every entry, for the persistence layer
    pub fn snapshot(&self) -> Vec<(IdentityKey, FingerprintEntry)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Write the snapshot as JSON. The file is replaced by rename, so
    /// concurrent savers never leave a half-written file behind.
    pub async fn save_json(&self, path: &Path) -> Result<()> {
        static SAVE_SEQ: AtomicU64 = AtomicU64::new(0);

        let json = serde_json::to_string_pretty(&self.snapshot())?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let seq = SAVE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}.{}.tmp", std::process::id(), seq));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Load a snapshot written by [`save_json`](Self::save_json); a missing file is an empty index
    pub async fn load_json(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => {
                let entries: Vec<(IdentityKey, FingerprintEntry)> = serde_json::from_str(&json)?;
                Ok(Self::from_entries(entries))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;
    use std::sync::Arc;

    fn listing(id: &str, price: u64) -> Listing {
        let mut listing = Listing::new(
            Source::Leboncoin,
            format!("https://www.leboncoin.fr/ad/ventes_immobilieres/{}", id),
            price,
        );
        listing.title = "Appartement 3 pièces 65 m²".to_string();
        listing.surface = Some(65.0);
        listing.location = "Lyon 69003".to_string();
        listing.description = "Lumineux, proche métro".to_string();
        listing
    }

    #[test]
    fn test_first_observation_is_new_once() {
        let index = FingerprintIndex::new();

        assert_eq!(index.reconcile(&mut listing("1", 250_000)), Classification::New);
        assert_eq!(index.reconcile(&mut listing("1", 250_000)), Classification::Unchanged);
        assert_eq!(index.reconcile(&mut listing("2", 250_000)), Classification::New);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_unchanged_observation_advances_last_seen() {
        let index = FingerprintIndex::new();
        let t0 = Utc::now();

        let mut first = listing("1", 250_000);
        index.reconcile_at(&mut first, t0);
        let key = first.identity_key();
        let before = index.get(&key).unwrap();

        // same clock reading must still move forward
        let mut second = listing("1", 250_000);
        assert_eq!(index.reconcile_at(&mut second, t0), Classification::Unchanged);
        let after = index.get(&key).unwrap();

        assert!(after.last_seen_at > before.last_seen_at);
        assert_eq!(after.content_hash, before.content_hash);
        assert_eq!(second.first_seen, t0);
        assert_eq!(second.last_update, after.last_seen_at);
    }

    #[test]
    fn test_price_or_surface_change_is_update() {
        let index = FingerprintIndex::new();
        let mut original = listing("1", 250_000);
        index.reconcile(&mut original);
        let key = original.identity_key();
        let hash_before = index.get(&key).unwrap().content_hash;

        let mut cheaper = listing("1", 240_000);
        assert_eq!(index.reconcile(&mut cheaper), Classification::Updated);
        let hash_after_price = index.get(&key).unwrap().content_hash;
        assert_ne!(hash_before, hash_after_price);

        let mut bigger = listing("1", 240_000);
        bigger.surface = Some(70.0);
        assert_eq!(index.reconcile(&mut bigger), Classification::Updated);
        assert_ne!(index.get(&key).unwrap().content_hash, hash_after_price);
        assert_eq!(bigger.first_seen, original.first_seen);
    }

    #[test]
    fn test_photos_and_timestamps_do_not_affect_hash() {
        let a = listing("1", 250_000);
        let mut b = a.clone();
        b.photos = vec!["https://img.leboncoin.fr/1.jpg".to_string()];
        b.first_seen = b.first_seen - Duration::days(3);
        b.last_update = Utc::now() + Duration::hours(1);

        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_shifting_text_between_fields_changes_hash() {
        let mut a = listing("1", 250_000);
        a.title = "Maison".to_string();
        a.location = "Nantes".to_string();
        let mut b = a.clone();
        b.title = "MaisonNantes".to_string();
        b.location = String::new();

        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_concurrent_observers_see_one_new() {
        let index = Arc::new(FingerprintIndex::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || index.reconcile(&mut listing("shared", 300_000)))
            })
            .collect();

        let results: Vec<Classification> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let new_count = results.iter().filter(|c| **c == Classification::New).count();

        assert_eq!(new_count, 1);
        assert_eq!(results.len() - new_count, 15);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_through_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index").join("fingerprints.json");

        let index = FingerprintIndex::new();
        let mut seen = listing("1", 250_000);
        index.reconcile(&mut seen);
        index.save_json(&path).await.unwrap();

        let restored = FingerprintIndex::load_json(&path).await.unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.reconcile(&mut listing("1", 250_000)), Classification::Unchanged);

        let missing = FingerprintIndex::load_json(&dir.path().join("absent.json")).await.unwrap();
        assert!(missing.is_empty());
    }
}
