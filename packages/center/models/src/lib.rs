#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Canonical service-center entity model and the shared types that flow
//! through the normalization and coordinate-resolution pipeline.
//!
//! Every dataset — regardless of shape, language, or field naming — is
//! normalized into a [`Center`]. Coordinates are optional at creation
//! time: entities with an address but no coordinates are handed to the
//! resolver, which mutates `lat`/`lng` in place (the only fields that
//! change after creation).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Which family of datasets an entity came from.
///
/// The kind selects the extraction vocabulary, the specialty-inference
/// rule set, and the dataset filename patterns.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CenterKind {
    /// Counseling offices (psychological, youth, family).
    Counseling,
    /// Child-care centers and daycare facilities.
    ChildCare,
}

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lng: f64,
}

impl Coordinate {
    /// Returns `true` if the pair lies within valid WGS84 ranges and is
    /// not the (0, 0) null island placeholder some datasets emit.
    #[must_use]
    pub fn is_valid(lat: f64, lng: f64) -> bool {
        lat != 0.0
            && lng != 0.0
            && lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng)
    }
}

/// An uncategorized source field preserved on the entity.
///
/// Nothing that coerces to non-empty text is dropped during
/// normalization — fields that don't map to a named attribute land here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraField {
    /// The source key, as found in the raw record.
    pub label: String,
    /// The coerced display value.
    pub value: String,
}

/// A normalized service-location entity.
///
/// Invariant: a `Center` always has a non-empty `address` or a
/// coordinate pair — records with neither are discarded at
/// normalization time since they can never be displayed or geocoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Center {
    /// Stable identifier: `"{dataset_tag}-{ordinal}-{seq}"`. Unique even
    /// when source serial numbers collide across datasets.
    pub id: String,
    /// Which dataset family produced this entity.
    pub kind: CenterKind,
    /// Display name. Never empty (a fallback label is assigned).
    pub name: String,
    /// Street or lot address. May be empty when coordinates are present.
    pub address: String,
    /// Contact phone number, empty if absent.
    pub phone: String,
    /// Homepage URL, if the dataset provides one.
    pub homepage_url: Option<String>,
    /// Operating hours, free text.
    pub hours: String,
    /// Average rating; 0 if the dataset has none.
    pub rating: f64,
    /// Number of reviews; 0 if the dataset has none.
    pub review_count: u32,
    /// Pre-rendered distance label ("1.2km"), empty if absent.
    pub distance_label: String,
    /// Canonical specialty tags. Never empty after normalization.
    pub specialties: BTreeSet<String>,
    /// Latitude, resolved lazily for address-only entities.
    pub lat: Option<f64>,
    /// Longitude, resolved lazily for address-only entities.
    pub lng: Option<f64>,
    /// Ordered, rendering-ready key facts (region, capacity, operator
    /// type).
    pub meta_lines: Vec<String>,
    /// Introduction text.
    pub intro: Option<String>,
    /// Program / service description.
    pub programs: Option<String>,
    /// How to apply or register.
    pub apply_method: Option<String>,
    /// Staff / expert introduction.
    pub expert_intro: Option<String>,
    /// Reservation link, if any.
    pub reservation_url: Option<String>,
    /// Reservation instructions, if any.
    pub reservation_text: Option<String>,
    /// Everything else, coerced to text, coordinate-like keys excluded.
    pub extras: Vec<ExtraField>,
    /// Retained source record for audit display, coordinate fields
    /// stripped.
    pub raw: serde_json::Value,
}

impl Center {
    /// Case-insensitive identity key used for deduplication and the
    /// geocode cache: `"{name}|{address}"`, lowercased.
    #[must_use]
    pub fn identity_key(&self) -> String {
        identity_key(&self.name, &self.address)
    }

    /// Returns `true` once both coordinates are present.
    #[must_use]
    pub const fn has_coordinates(&self) -> bool {
        self.lat.is_some() && self.lng.is_some()
    }

    /// Returns the coordinate pair, if resolved.
    #[must_use]
    pub fn coordinate(&self) -> Option<Coordinate> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Coordinate { lat, lng }),
            _ => None,
        }
    }

    /// Applies a resolved coordinate in place. This is the only
    /// post-creation mutation an entity ever receives.
    pub const fn set_coordinate(&mut self, coord: Coordinate) {
        self.lat = Some(coord.lat);
        self.lng = Some(coord.lng);
    }

    /// Heuristic richness score used to pick a winner among duplicate
    /// entities. Coordinates dominate: when the same institution appears
    /// in two overlapping datasets, the coordinate-bearing version must
    /// always win.
    #[must_use]
    pub fn quality_score(&self) -> u32 {
        let mut score = 0;
        if self.has_coordinates() {
            score += 100;
        }
        if self.homepage_url.is_some() {
            score += 5;
        }
        for present in [
            !self.phone.is_empty(),
            !self.address.is_empty(),
            self.intro.is_some(),
            self.programs.is_some(),
            self.apply_method.is_some(),
        ] {
            if present {
                score += 2;
            }
        }
        score += u32::try_from(self.meta_lines.len()).unwrap_or(u32::MAX);
        score += u32::try_from(self.extras.len().min(10)).unwrap_or(10);
        score
    }
}

/// Builds the case-insensitive `"{name}|{address}"` identity key.
#[must_use]
pub fn identity_key(name: &str, address: &str) -> String {
    format!(
        "{}|{}",
        name.trim().to_lowercase(),
        address.trim().to_lowercase()
    )
}

/// A unit of pending geocoding work for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeTask {
    /// The entity whose coordinates are being resolved.
    pub entity_id: String,
    /// Address to geocode.
    pub address: String,
    /// Entity name, used for the keyword-search fallback.
    pub title: String,
    /// Dataset tag the entity came from.
    pub dataset_tag: String,
}

/// A map point produced by the streaming ingestion client.
///
/// Not tied to a [`Center`] identity — stream points are deduplicated
/// within one ingestion run by a rounded-coordinate + title key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMarkerPoint {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lng: f64,
    /// Display title.
    pub title: String,
    /// Source URL, if known.
    pub url: Option<String>,
}

impl StreamMarkerPoint {
    /// Dedup key: coordinates rounded to ~1m precision plus the title.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        format!("{:.5}:{:.5}:{}", self.lat, self.lng, self.title)
    }
}
