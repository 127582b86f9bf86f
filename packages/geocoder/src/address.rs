//! Structured address geocoder client.
//!
//! The service takes one address string and answers with a status code
//! and, on success, a single result carrying x/y coordinates (x is
//! longitude, y is latitude; either may be serialized as a string or a
//! number depending on the deployment).

use crate::{GeocodeError, GeocodedPoint, parse_xy, retry};

/// Geocodes a single address string.
///
/// The caller is responsible for pacing between calls — public
/// deployments of the address service rate-limit aggressively.
///
/// # Errors
///
/// Returns [`GeocodeError`] if the HTTP request fails, the response is
/// not valid JSON, or the provider reports an error status.
pub async fn geocode_address(
    client: &reqwest::Client,
    base_url: &str,
    address: &str,
) -> Result<Option<GeocodedPoint>, GeocodeError> {
    let body = retry::send_json(|| client.get(base_url).query(&[("address", address)])).await?;
    parse_response(&body)
}

/// Parses the structured-lookup response.
///
/// Shape: `{"status": "OK", "result": {"x": ..., "y": ..., "label": ...}}`.
/// `NOT_FOUND` / `ZERO_RESULTS` are misses, not errors.
fn parse_response(body: &serde_json::Value) -> Result<Option<GeocodedPoint>, GeocodeError> {
    let status = body
        .get("status")
        .and_then(|s| s.as_str())
        .ok_or_else(|| GeocodeError::Parse {
            message: "missing status in address response".to_string(),
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

    let Some(result) = body.get("result") else {
        return Ok(None);
    };

    let Some((x, y)) = parse_xy(result) else {
        return Err(GeocodeError::Parse {
            message: "missing x/y in address result".to_string(),
        });
    };

    Ok(Some(GeocodedPoint {
        lat: y,
        lng: x,
        label: result
            .get("label")
            .and_then(|l| l.as_str())
            .map(String::from),
    }))
}
