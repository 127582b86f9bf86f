#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Coordinate resolution: the per-entity fallback chain and the
//! bounded worker-pool scheduler that drives it.
//!
//! The chain ([`chain`]) tries, in order: cache hit → structured
//! address geocoding (one retry) → free-text keyword search. The
//! scheduler ([`scheduler`]) drains a shared task queue with a small
//! fixed number of workers, each pacing itself between calls — public
//! geocoding backends rate-limit aggressively — and flushes resolved
//! coordinates back to the entity store in debounced batches rather
//! than one update per result.
//!
//! Every run is cancelable: cancellation stops workers at their next
//! checkpoint, clears the pending flush, and releases unprocessed
//! claims so a newer run can pick them up.

pub mod chain;
pub mod scheduler;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use chain::{CoordinateResolver, Resolution};
pub use scheduler::{CenterStore, MemoryStore, RunReport, Scheduler, SchedulerConfig};

/// Cooperative cancellation flag shared between a run's workers,
/// flusher, and the caller.
///
/// Checked at worker checkpoints (before each queue pop) and by the
/// flusher before every write. Cancellation is a clean early exit,
/// never an error surfaced to the end user.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a live (non-canceled) token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation to every holder of this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`Self::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
