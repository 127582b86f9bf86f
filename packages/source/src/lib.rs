#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Dataset catalog, record normalization, and quality merge.
//!
//! The loading pipeline runs catalog → normalize → dedup:
//!
//! 1. [`catalog`] lists the available raw JSON dataset files, filters
//!    them by the kind's filename patterns, and fetches each document.
//! 2. [`normalize`] turns every raw record into a canonical
//!    [`care_map_center_models::Center`], driven entirely by the
//!    per-kind TOML profiles in `profiles/` — the extractor itself is
//!    schema-agnostic by design.
//! 3. [`dedup`] merges duplicates across overlapping datasets, keeping
//!    the highest-quality variant per `(name, address)` identity.
//!
//! A dataset that fails to load contributes zero entities and a logged
//! warning; it never fails the whole pipeline.

pub mod catalog;
pub mod dedup;
pub mod normalize;
pub mod pipeline;
pub mod profile;

pub use dedup::dedup;
pub use normalize::Normalizer;
pub use pipeline::{LoadOutcome, load_centers};
pub use profile::KindProfile;

/// Errors that can occur during dataset loading and normalization.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A kind profile is malformed.
    #[error("Profile error: {message}")]
    Profile {
        /// Description of what went wrong.
        message: String,
    },

    /// A dataset file is missing or not valid JSON. Non-fatal: the
    /// pipeline logs it and continues with zero entities from that
    /// dataset.
    #[error("Dataset '{name}' failed to load: {message}")]
    Dataset {
        /// Dataset file name.
        name: String,
        /// Description of the failure.
        message: String,
    },
}
