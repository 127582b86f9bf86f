//! Bounded worker-pool scheduler for pending geocode tasks.
//!
//! A small fixed number of workers pull from a shared queue until
//! empty; each paces itself between network calls. Results accumulate
//! in a write buffer that is flushed to the entity store on a debounce
//! timer — never one state update per result — so downstream
//! re-render/re-index cost stays proportional to flushes, not results.
//!
//! A claimed-ID set shared across runs prevents two overlapping
//! scheduler runs (e.g. triggered by a view switch) from geocoding the
//! same entity twice. On cancellation, unprocessed claims are released
//! so the superseding run can take them over.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use care_map_center_models::{Center, Coordinate, GeocodeTask};
use tokio::sync::mpsc;

use crate::CancelToken;
use crate::chain::{CoordinateResolver, Resolution};

/// Hard ceiling on worker count. Public geocoding backends rate-limit
/// aggressively, so more parallelism buys nothing.
const MAX_WORKERS: usize = 3;

/// Tuning knobs for one scheduler run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Requested worker count; clamped to [`MAX_WORKERS`] and to the
    /// queue size.
    pub concurrency: usize,
    /// Fixed pause a worker takes after each network-touching task.
    pub pacing: Duration,
    /// Debounce interval for flushing buffered results to the store.
    pub flush_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: MAX_WORKERS,
            pacing: Duration::from_millis(120),
            flush_interval: Duration::from_millis(250),
        }
    }
}

/// Where resolved coordinates are applied.
///
/// One batch call per debounce flush. Implementations must tolerate an
/// entity ID they no longer know (the visible set may have changed).
#[async_trait]
pub trait CenterStore: Send + Sync {
    /// Applies a batch of `(entity_id, coordinate)` updates.
    async fn apply_coordinates(&self, updates: &[(String, Coordinate)]);
}

/// In-memory [`CenterStore`] over a list of entities. Used by the CLI
/// and by tests.
#[derive(Default)]
pub struct MemoryStore {
    centers: Mutex<Vec<Center>>,
    flushes: Mutex<usize>,
}

impl MemoryStore {
    /// Creates a store seeded with entities.
    #[must_use]
    pub fn new(centers: Vec<Center>) -> Self {
        Self {
            centers: Mutex::new(centers),
            flushes: Mutex::new(0),
        }
    }

    /// Snapshot of the current entities.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Center> {
        lock(&self.centers).clone()
    }

    /// How many batch flushes the store has received.
    #[must_use]
    pub fn flush_count(&self) -> usize {
        *lock(&self.flushes)
    }
}

#[async_trait]
impl CenterStore for MemoryStore {
    async fn apply_coordinates(&self, updates: &[(String, Coordinate)]) {
        let mut centers = lock(&self.centers);
        for (id, coord) in updates {
            if let Some(center) = centers.iter_mut().find(|c| &c.id == id) {
                center.set_coordinate(*coord);
            }
        }
        *lock(&self.flushes) += 1;
    }
}

/// Outcome of one scheduler run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Tasks that produced a coordinate (cache hit or geocoded).
    pub resolved: usize,
    /// Tasks that exhausted the fallback chain.
    pub unresolved: usize,
    /// Tasks skipped because another run already claimed them.
    pub skipped: usize,
    /// Whether the run was canceled before draining the queue.
    pub canceled: bool,
}

/// Drains geocode task queues against a shared [`CoordinateResolver`].
pub struct Scheduler {
    resolver: Arc<CoordinateResolver>,
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl Scheduler {
    /// Creates a scheduler. The claimed set lives as long as the
    /// scheduler, spanning every run it executes.
    #[must_use]
    pub fn new(resolver: Arc<CoordinateResolver>) -> Self {
        Self {
            resolver,
            claimed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Runs the worker pool over `tasks`, applying results to `store`.
    ///
    /// Exactly one worker processes each task. Already-claimed tasks
    /// are skipped. Cancellation stops workers at their next
    /// checkpoint, discards the pending flush buffer, and releases
    /// claims for tasks that never ran.
    pub async fn run(
        &self,
        tasks: Vec<GeocodeTask>,
        store: Arc<dyn CenterStore>,
        config: &SchedulerConfig,
        cancel: &CancelToken,
    ) -> RunReport {
        let mut report = RunReport::default();

        // Claim phase: filter out entities another run already owns.
        let mut queue = VecDeque::new();
        {
            let mut claimed = lock(&self.claimed);
            for task in tasks {
                if claimed.insert(task.entity_id.clone()) {
                    queue.push_back(task);
                } else {
                    report.skipped += 1;
                }
            }
        }

        if queue.is_empty() {
            return report;
        }

        let run_claims: Vec<String> = queue.iter().map(|t| t.entity_id.clone()).collect();
        let workers = config.concurrency.clamp(1, MAX_WORKERS).min(queue.len());
        log::info!(
            "Scheduling {} geocode tasks across {workers} workers",
            queue.len()
        );

        let queue = Arc::new(Mutex::new(queue));
        let processed = Arc::new(Mutex::new(HashSet::<String>::new()));
        let (tx, rx) = mpsc::unbounded_channel::<(String, Coordinate)>();

        let flusher = spawn_flusher(rx, store, config.flush_interval, cancel.clone());

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let processed = Arc::clone(&processed);
            let resolver = Arc::clone(&self.resolver);
            let tx = tx.clone();
            let cancel = cancel.clone();
            let pacing = config.pacing;

            handles.push(tokio::spawn(async move {
                let mut resolved = 0_usize;
                let mut unresolved = 0_usize;

                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let Some(task) = lock(&queue).pop_front() else {
                        break;
                    };

                    let resolution = resolver.resolve(&task.title, &task.address, None).await;
                    match resolution {
                        Resolution::CacheHit(coord) | Resolution::Geocoded(coord) => {
                            resolved += 1;
                            // Send fails only when the flusher is gone;
                            // nothing useful to do with the result then.
                            let _ = tx.send((task.entity_id.clone(), coord));
                        }
                        Resolution::Unresolved | Resolution::KnownMiss => unresolved += 1,
                        Resolution::AlreadyResolved => {}
                    }
                    lock(&processed).insert(task.entity_id);

                    if resolution.used_network() {
                        tokio::time::sleep(pacing).await;
                    }
                }

                (resolved, unresolved)
            }));
        }
        drop(tx);

        for handle in handles {
            if let Ok((resolved, unresolved)) = handle.await {
                report.resolved += resolved;
                report.unresolved += unresolved;
            }
        }

        let _ = flusher.await;

        if cancel.is_cancelled() {
            report.canceled = true;
            // Release claims the canceled run never processed so the
            // superseding run can take them.
            let processed = lock(&processed);
            let mut claimed = lock(&self.claimed);
            for id in &run_claims {
                if !processed.contains(id) {
                    claimed.remove(id);
                }
            }
        }

        report
    }
}

/// Debounced flusher: buffers results and writes them to the store in
/// batches when the queue goes quiet, plus one final flush when the
/// workers finish. A canceled run's pending buffer is discarded —
/// timers are cleared, already-applied batches stay.
fn spawn_flusher(
    mut rx: mpsc::UnboundedReceiver<(String, Coordinate)>,
    store: Arc<dyn CenterStore>,
    flush_interval: Duration,
    cancel: CancelToken,
) -> tokio::task::JoinHandle<usize> {
    tokio::spawn(async move {
        let mut buffer: Vec<(String, Coordinate)> = Vec::new();
        let mut applied = 0_usize;

        loop {
            match tokio::time::timeout(flush_interval, rx.recv()).await {
                Ok(Some(update)) => buffer.push(update),
                Ok(None) => break,
                Err(_) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if !buffer.is_empty() {
                        applied += buffer.len();
                        store.apply_coordinates(&buffer).await;
                        buffer.clear();
                    }
                }
            }
        }

        if !cancel.is_cancelled() && !buffer.is_empty() {
            applied += buffer.len();
            store.apply_coordinates(&buffer).await;
        }

        applied
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
