#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geocoding service clients for the coordinate fallback chain.
//!
//! Two external capabilities are wrapped here, behind traits so the
//! resolver can be tested without a network:
//!
//! 1. **Structured address lookup** ([`address`]) — address string in,
//!    status code plus at most one x/y result out.
//! 2. **Free-text place search** ([`places`]) — keyword query in, a
//!    ranked list out, of which only the first result is used.
//!
//! Public geocoding backends rate-limit aggressively, so callers are
//! responsible for pacing between calls; the clients themselves only
//! retry a transient failure once (see [`retry`]).

pub mod address;
pub mod places;
pub mod retry;

use async_trait::async_trait;
use thiserror::Error;

/// A resolved point with an optional canonical label from the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedPoint {
    /// Latitude (WGS84).
    pub lat: f64,
    /// Longitude (WGS84).
    pub lng: f64,
    /// Matched/canonical place label, when the provider returns one.
    pub label: Option<String>,
}

/// Errors from geocoding operations.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// The provider reported a non-OK status code.
    #[error("Provider status: {code}")]
    Status {
        /// The provider's status code string.
        code: String,
    },
}

/// Structured address → coordinate lookup.
#[async_trait]
pub trait AddressGeocoder: Send + Sync {
    /// Geocodes one address string. `Ok(None)` means the provider had
    /// no match (a miss, not an error).
    async fn geocode_address(
        &self,
        address: &str,
    ) -> Result<Option<GeocodedPoint>, GeocodeError>;
}

/// Free-text keyword → place lookup.
#[async_trait]
pub trait PlaceSearcher: Send + Sync {
    /// Searches places by keyword; only the first ranked result is
    /// returned. `Ok(None)` means no match.
    async fn search_place(&self, query: &str) -> Result<Option<GeocodedPoint>, GeocodeError>;
}

/// HTTP implementation of both service traits.
#[derive(Debug, Clone)]
pub struct HttpGeocodeService {
    client: reqwest::Client,
    address_url: String,
    places_url: String,
}

impl HttpGeocodeService {
    /// Creates a service client from the two endpoint base URLs.
    #[must_use]
    pub const fn new(client: reqwest::Client, address_url: String, places_url: String) -> Self {
        Self {
            client,
            address_url,
            places_url,
        }
    }
}

#[async_trait]
impl AddressGeocoder for HttpGeocodeService {
    async fn geocode_address(
        &self,
        address: &str,
    ) -> Result<Option<GeocodedPoint>, GeocodeError> {
        address::geocode_address(&self.client, &self.address_url, address).await
    }
}

#[async_trait]
impl PlaceSearcher for HttpGeocodeService {
    async fn search_place(&self, query: &str) -> Result<Option<GeocodedPoint>, GeocodeError> {
        places::search_place(&self.client, &self.places_url, query).await
    }
}

/// Parses an x/y pair that may be serialized as strings or numbers.
/// `x` is longitude, `y` is latitude.
pub(crate) fn parse_xy(value: &serde_json::Value) -> Option<(f64, f64)> {
    let coord = |field: &str| {
        value.get(field).and_then(|v| {
            v.as_f64()
                .or_else(|| v.as_str().and_then(|s| s.parse::<f64>().ok()))
        })
    };
    let x = coord("x")?;
    let y = coord("y")?;
    (x.is_finite() && y.is_finite()).then_some((x, y))
}
