#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Map marker reconciliation over a plain rendering surface.
//!
//! The pipeline knows nothing about any map SDK: it talks to a
//! [`MarkerSurface`] and nothing else. The renderer keeps rendering
//! cost proportional to *new* results, not total entity count — when
//! the visible identity set is unchanged and entities merely gained
//! coordinates (the background resolver flushed a batch), only the new
//! markers are added. A change to the identity set itself (filter or
//! search changed what is visible) clears and rebuilds everything and
//! refits the viewport.
//!
//! [`cluster_markers`] groups coordinate-bearing entities into grid
//! cells so large result sets stay visually and computationally
//! manageable.

use std::collections::HashSet;

use care_map_center_models::Center;

/// Geographic bounding box of a set of entities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Southernmost latitude.
    pub min_lat: f64,
    /// Westernmost longitude.
    pub min_lng: f64,
    /// Northernmost latitude.
    pub max_lat: f64,
    /// Easternmost longitude.
    pub max_lng: f64,
}

impl Bounds {
    /// Computes the bounds covering every coordinate-bearing entity.
    /// `None` when nothing has coordinates yet.
    #[must_use]
    pub fn from_centers(centers: &[&Center]) -> Option<Self> {
        let mut bounds: Option<Self> = None;
        for center in centers {
            let (Some(lat), Some(lng)) = (center.lat, center.lng) else {
                continue;
            };
            bounds = Some(match bounds {
                None => Self {
                    min_lat: lat,
                    min_lng: lng,
                    max_lat: lat,
                    max_lng: lng,
                },
                Some(b) => Self {
                    min_lat: b.min_lat.min(lat),
                    min_lng: b.min_lng.min(lng),
                    max_lat: b.max_lat.max(lat),
                    max_lng: b.max_lng.max(lng),
                },
            });
        }
        bounds
    }
}

/// The rendering seam: implementable over any map library.
pub trait MarkerSurface {
    /// Adds one marker for a coordinate-bearing entity.
    fn add_marker(&mut self, center: &Center);
    /// Clears every marker and renders the given entities from scratch.
    fn rebuild(&mut self, centers: &[&Center]);
    /// Fits the viewport to the given bounds.
    fn fit_bounds(&mut self, bounds: Bounds);
}

/// Incremental marker reconciler.
#[derive(Debug, Default)]
pub struct MarkerRenderer {
    /// IDs of currently-visible entities (with or without markers).
    identity: HashSet<String>,
    /// IDs that currently have a rendered marker.
    rendered: HashSet<String>,
}

impl MarkerRenderer {
    /// Creates a renderer with nothing rendered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciles the visible entity set against the surface.
    ///
    /// Full rebuild (plus viewport refit) when the identity set
    /// changed; add-only diff when the same set gained coordinates.
    pub fn sync(&mut self, visible: &[&Center], surface: &mut dyn MarkerSurface) {
        let identity: HashSet<String> = visible.iter().map(|c| c.id.clone()).collect();

        if identity == self.identity {
            // Incremental: add markers only for newly-located entities.
            let mut added = 0_usize;
            for center in visible {
                if center.has_coordinates() && !self.rendered.contains(&center.id) {
                    surface.add_marker(center);
                    self.rendered.insert(center.id.clone());
                    added += 1;
                }
            }
            if added > 0 {
                log::debug!("Added {added} markers incrementally");
            }
            return;
        }

        // Identity change: clear and rebuild everything visible.
        let located: Vec<&Center> = visible
            .iter()
            .copied()
            .filter(|c| c.has_coordinates())
            .collect();
        surface.rebuild(&located);
        if let Some(bounds) = Bounds::from_centers(&located) {
            surface.fit_bounds(bounds);
        }

        self.identity = identity;
        self.rendered = located.iter().map(|c| c.id.clone()).collect();
        log::debug!(
            "Rebuilt {} markers for {} visible entities",
            self.rendered.len(),
            self.identity.len()
        );
    }
}

/// One grid cluster of nearby markers.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Centroid latitude of the clustered markers.
    pub lat: f64,
    /// Centroid longitude of the clustered markers.
    pub lng: f64,
    /// Entity IDs in this cluster.
    pub ids: Vec<String>,
}

impl Cluster {
    /// Number of markers in the cluster.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.ids.len()
    }
}

/// Groups coordinate-bearing entities into grid cells of `cell_deg`
/// degrees. Clusters are ordered by cell for deterministic output.
#[must_use]
pub fn cluster_markers(centers: &[&Center], cell_deg: f64) -> Vec<Cluster> {
    use std::collections::BTreeMap;

    #[allow(clippy::cast_possible_truncation)]
    let cell_of = |v: f64| (v / cell_deg).floor() as i64;

    let mut cells: BTreeMap<(i64, i64), Vec<&Center>> = BTreeMap::new();
    for center in centers {
        let (Some(lat), Some(lng)) = (center.lat, center.lng) else {
            continue;
        };
        cells.entry((cell_of(lat), cell_of(lng))).or_default().push(center);
    }

    cells
        .into_values()
        .map(|members| {
            #[allow(clippy::cast_precision_loss)]
            let n = members.len() as f64;
            let lat = members.iter().filter_map(|c| c.lat).sum::<f64>() / n;
            let lng = members.iter().filter_map(|c| c.lng).sum::<f64>() / n;
            Cluster {
                lat,
                lng,
                ids: members.iter().map(|c| c.id.clone()).collect(),
            }
        })
        .collect()
}
