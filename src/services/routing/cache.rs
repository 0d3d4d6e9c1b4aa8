//! Persistent matrix cache
//!
//! One JSON file per matrix fingerprint. Entries past the TTL are ignored on
//! read and deleted there or by an explicit sweep.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::CacheSettings;
use crate::types::Coordinates;

use super::DistanceMatrix;

/// Bumped whenever the wire handling changes in a way that invalidates
/// previously stored matrices.
pub const MATRIX_SERVICE_VERSION: &str = "matrix-v3";

/// Deterministic cache key for a symmetric N×N request.
///
/// Invariant under reordering of the location list: coordinates are rendered
/// at fixed precision and sorted before hashing. The profile and service
/// version participate so a profile switch or a format change miss cleanly.
pub fn fingerprint(locations: &[Coordinates], profile: &str) -> String {
    let mut lines: Vec<String> = locations
        .iter()
        .map(|c| format!("{:.6},{:.6}", c.lat, c.lng))
        .collect();
    lines.sort();

    let mut hasher = Sha256::new();
    hasher.update(lines.join(";"));
    hasher.update("|");
    hasher.update(profile);
    hasher.update("|");
    hasher.update(MATRIX_SERVICE_VERSION);
    hex::encode(hasher.finalize())
}

/// Cache key for an asymmetric request; sources and destinations are hashed
/// as separate sorted blocks so swapping them misses.
pub fn fingerprint_asymmetric(
    sources: &[Coordinates],
    destinations: &[Coordinates],
    profile: &str,
) -> String {
    let render = |coords: &[Coordinates]| {
        let mut lines: Vec<String> = coords
            .iter()
            .map(|c| format!("{:.6},{:.6}", c.lat, c.lng))
            .collect();
        lines.sort();
        lines.join(";")
    };

    let mut hasher = Sha256::new();
    hasher.update("src:");
    hasher.update(render(sources));
    hasher.update("|dst:");
    hasher.update(render(destinations));
    hasher.update("|");
    hasher.update(profile);
    hasher.update("|");
    hasher.update(MATRIX_SERVICE_VERSION);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    created_at: DateTime<Utc>,
    profile: String,
    distances: Vec<Vec<u64>>,
    durations: Vec<Vec<u64>>,
    /// `[lat, lng]` pairs in matrix order
    locations: Vec<[f64; 2]>,
}

/// Filesystem-backed matrix cache.
pub struct MatrixCache {
    directory: PathBuf,
    ttl_seconds: u64,
}

impl MatrixCache {
    /// Build from settings; `None` when caching is disabled.
    pub fn from_settings(settings: &CacheSettings) -> Option<Self> {
        if !settings.enabled {
            return None;
        }
        Some(Self {
            directory: PathBuf::from(&settings.directory),
            ttl_seconds: settings.ttl_seconds,
        })
    }

    pub fn new(directory: impl Into<PathBuf>, ttl_seconds: u64) -> Self {
        Self {
            directory: directory.into(),
            ttl_seconds,
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{}.json", key))
    }

    /// Look up a matrix and remap it to the requested location order.
    ///
    /// The key is order-independent, so the stored row order may differ from
    /// the caller's; the entry's own location list drives the remapping.
    /// Stale or unreadable entries count as misses (stale ones are deleted).
    pub fn load(&self, key: &str, locations: &[Coordinates]) -> Option<DistanceMatrix> {
        let path = self.entry_path(key);
        let raw = std::fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Discarding unreadable cache entry {}: {}", path.display(), err);
                let _ = std::fs::remove_file(&path);
                return None;
            }
        };

        let age = Utc::now().signed_duration_since(entry.created_at);
        if age.num_seconds() < 0 || age.num_seconds() as u64 > self.ttl_seconds {
            debug!("Cache entry {} expired, evicting", key);
            let _ = std::fs::remove_file(&path);
            return None;
        }

        remap(&entry, locations)
    }

    /// Persist a matrix under the given key, atomically.
    pub fn store(&self, key: &str, matrix: &DistanceMatrix, profile: &str) {
        if let Err(err) = self.try_store(key, matrix, profile) {
            warn!("Failed to write matrix cache entry {}: {}", key, err);
        }
    }

    fn try_store(&self, key: &str, matrix: &DistanceMatrix, profile: &str) -> Result<()> {
        std::fs::create_dir_all(&self.directory)
            .with_context(|| format!("Failed to create cache dir {}", self.directory.display()))?;

        let entry = CacheEntry {
            created_at: Utc::now(),
            profile: profile.to_string(),
            distances: matrix.distances.clone(),
            durations: matrix.durations.clone(),
            locations: matrix.locations.iter().map(|c| [c.lat, c.lng]).collect(),
        };

        let payload = serde_json::to_string(&entry).context("Failed to serialize cache entry")?;
        let tmp = self
            .directory
            .join(format!(".{}.{}.tmp", key, Uuid::new_v4().simple()));
        std::fs::write(&tmp, payload)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, self.entry_path(key)).context("Failed to move cache entry in place")?;
        Ok(())
    }

    /// Delete every expired entry; returns how many were removed.
    pub fn sweep(&self) -> Result<usize> {
        let mut removed = 0;
        let entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stale = std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<CacheEntry>(&raw).ok())
                .map(|parsed| {
                    let age = Utc::now().signed_duration_since(parsed.created_at);
                    age.num_seconds() < 0 || age.num_seconds() as u64 > self.ttl_seconds
                })
                // Unparseable files are stale by definition
                .unwrap_or(true);

            if stale && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }

        debug!("Cache sweep removed {} entries", removed);
        Ok(removed)
    }
}

fn remap(entry: &CacheEntry, locations: &[Coordinates]) -> Option<DistanceMatrix> {
    if entry.locations.len() != locations.len() {
        return None;
    }

    // Index of each requested location inside the stored entry.
    let mut mapping = Vec::with_capacity(locations.len());
    let mut used = vec![false; entry.locations.len()];
    for wanted in locations {
        let found = entry.locations.iter().enumerate().position(|(idx, stored)| {
            !used[idx]
                && (stored[0] - wanted.lat).abs() < 1e-6
                && (stored[1] - wanted.lng).abs() < 1e-6
        })?;
        used[found] = true;
        mapping.push(found);
    }

    let n = locations.len();
    let mut distances = vec![vec![0u64; n]; n];
    let mut durations = vec![vec![0u64; n]; n];
    for i in 0..n {
        for j in 0..n {
            distances[i][j] = *entry.distances.get(mapping[i])?.get(mapping[j])?;
            durations[i][j] = *entry.durations.get(mapping[i])?.get(mapping[j])?;
        }
    }

    Some(DistanceMatrix {
        locations: locations.to_vec(),
        distances,
        durations,
    })
}
