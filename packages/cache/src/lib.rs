#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Durable geocode cache.
//!
//! Shared across all resolution attempts and across sessions. Maps the
//! lowercase `"{name}|{address}"` identity key to a resolved coordinate
//! pair. The cache only grows — addresses are assumed static, so entries
//! are never invalidated or expired. Misses are deliberately NOT stored
//! here; the per-session miss ledger lives in the resolver so an
//! unresolvable address gets one more chance next session.
//!
//! Persistence is a single JSON blob under a fixed namespace file, read
//! once at startup and written back on a debounce: writes are coalesced
//! by the background flusher rather than hitting disk per entry, trading
//! an at-most-one-debounce-interval loss window for far less write
//! volume.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use care_map_center_models::{Coordinate, identity_key};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Fixed namespace for the persisted blob. Bump the suffix if the
/// on-disk format ever changes shape.
pub const CACHE_NAMESPACE: &str = "care-map.geocode.v1";

/// Default filename for the persisted blob.
pub const DEFAULT_CACHE_FILENAME: &str = "geocode-cache.json";

/// Errors from cache persistence.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Reading or writing the blob failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing the blob failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The on-disk shape: namespace marker plus the full key → coordinate
/// map.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct CacheFile {
    namespace: String,
    entries: BTreeMap<String, Coordinate>,
}

struct Inner {
    entries: BTreeMap<String, Coordinate>,
    dirty: bool,
}

/// Durable `(name, address)` → coordinate store.
///
/// Cheap to share: wrap in an [`Arc`] and clone the handle everywhere.
/// Concurrent inserts for the same key are race-tolerant — values for
/// one key are expected to be identical, so last-write-wins is fine.
pub struct GeocodeCache {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl GeocodeCache {
    /// Opens the cache, reading the persisted blob once.
    ///
    /// A missing file starts an empty cache. A corrupt or
    /// wrong-namespace file is logged and discarded rather than failing
    /// the pipeline — the cache is an accelerator, not a requirement.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<CacheFile>(&text) {
                Ok(file) if file.namespace == CACHE_NAMESPACE => {
                    log::info!(
                        "Loaded {} cached geocodes from {}",
                        file.entries.len(),
                        path.display()
                    );
                    file.entries
                }
                Ok(file) => {
                    log::warn!(
                        "Ignoring geocode cache with unknown namespace '{}' at {}",
                        file.namespace,
                        path.display()
                    );
                    BTreeMap::new()
                }
                Err(e) => {
                    log::warn!(
                        "Ignoring corrupt geocode cache at {}: {e}",
                        path.display()
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                log::warn!("Failed to read geocode cache at {}: {e}", path.display());
                BTreeMap::new()
            }
        };

        Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner {
                entries,
                dirty: false,
            }),
        }
    }

    /// Opens an in-memory cache that flushes to `path` only when asked.
    /// Used by tests and one-shot runs.
    #[must_use]
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner {
                entries: BTreeMap::new(),
                dirty: false,
            }),
        }
    }

    /// Looks up a cached coordinate by entity name + address.
    #[must_use]
    pub fn get(&self, name: &str, address: &str) -> Option<Coordinate> {
        self.lock().entries.get(&identity_key(name, address)).copied()
    }

    /// Stores a resolved coordinate and marks the blob dirty.
    pub fn insert(&self, name: &str, address: &str, coord: Coordinate) {
        let mut inner = self.lock();
        inner.entries.insert(identity_key(name, address), coord);
        inner.dirty = true;
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if no entries are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the blob to disk if dirty. Atomic: writes a `.tmp`
    /// sibling, then renames over the target.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if serialization or the filesystem write
    /// fails.
    pub fn flush(&self) -> Result<(), CacheError> {
        let snapshot = {
            let mut inner = self.lock();
            if !inner.dirty {
                return Ok(());
            }
            inner.dirty = false;
            inner.entries.clone()
        };

        let file = CacheFile {
            namespace: CACHE_NAMESPACE.to_string(),
            entries: snapshot,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string(&file)?)?;
        std::fs::rename(&tmp, &self.path)?;

        log::debug!(
            "Flushed {} geocode cache entries to {}",
            file.entries.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Spawns the debounced background flusher.
    ///
    /// The flusher wakes every `interval`, writing the blob only when
    /// dirty. Stop it with [`FlusherHandle::shutdown`] (final flush) or
    /// [`FlusherHandle::abort`] (no flush — used on cancellation).
    #[must_use]
    pub fn spawn_flusher(self: &Arc<Self>, interval: Duration) -> FlusherHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let cache = Arc::clone(self);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        if let Err(e) = cache.flush() {
                            log::warn!("Geocode cache flush failed: {e}");
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        FlusherHandle {
            stop: stop_tx,
            handle,
            cache: Arc::clone(self),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Handle to the background flusher task.
pub struct FlusherHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
    cache: Arc<GeocodeCache>,
}

impl FlusherHandle {
    /// Stops the flusher and performs one final flush.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
        if let Err(e) = self.cache.flush() {
            log::warn!("Final geocode cache flush failed: {e}");
        }
    }

    /// Stops the flusher without flushing pending writes. Used when a
    /// run is canceled and its timers must be cleared immediately.
    pub fn abort(self) {
        let _ = self.stop.send(true);
        self.handle.abort();
    }
}
