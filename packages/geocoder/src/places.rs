//! Free-text place search client.
//!
//! Used as the last network strategy in the fallback chain, after the
//! structured address lookup has missed twice. The service returns a
//! ranked list of places; only the first result is used.

use crate::{GeocodeError, GeocodedPoint, parse_xy, retry};

/// Searches places by free-text keyword.
///
/// The caller is responsible for pacing between calls.
///
/// # Errors
///
/// Returns [`GeocodeError`] if the HTTP request fails, the response is
/// not valid JSON, or the provider reports an error status.
pub async fn search_place(
    client: &reqwest::Client,
    base_url: &str,
    query: &str,
) -> Result<Option<GeocodedPoint>, GeocodeError> {
    let body = retry::send_json(|| client.get(base_url).query(&[("query", query)])).await?;
    parse_response(&body)
}

/// Parses the keyword-search response.
///
/// Shape: `{"status": "OK", "places": [{"x": ..., "y": ..., "name": ...}, ...]}`.
/// The list is ranked; everything past the first entry is ignored.
fn parse_response(body: &serde_json::Value) -> Result<Option<GeocodedPoint>, GeocodeError> {
    let status = body
        .get("status")
        .and_then(|s| s.as_str())
        .ok_or_else(|| GeocodeError::Parse {
            message: "missing status in place response".to_string(),
        })?;

    match status {
        "OK" => {}
        "NOT_FOUND" | "ZERO_RESULTS" => return Ok(None),
        other => {
            return Err(GeocodeError::Status {
                code: other.to_string(),
            });
        }
    }

    let places = body
        .get("places")
        .and_then(|p| p.as_array())
        .ok_or_else(|| GeocodeError::Parse {
            message: "places is not an array".to_string(),
        })?;

    let Some(first) = places.first() else {
        return Ok(None);
    };

    let Some((x, y)) = parse_xy(first) else {
        return Err(GeocodeError::Parse {
            message: "missing x/y in place result".to_string(),
        });
    };

    Ok(Some(GeocodedPoint {
        lat: y,
        lng: x,
        label: first
            .get("name")
            .and_then(|n| n.as_str())
            .map(String::from),
    }))
}
