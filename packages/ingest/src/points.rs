//! Marker and geocode-task extraction from arbitrary stream payloads.
//!
//! Per-URL results are unconstrained JSON. Extraction escalates:
//! rows with valid coordinates become direct markers; address-bearing
//! rows without coordinates become geocode tasks; and when a payload
//! yields neither (or the URL failed outright) the caller falls back
//! to a keyword search seeded from the URL host or declared title.

use care_map_center_models::{Coordinate, GeocodeTask, StreamMarkerPoint};
use care_map_extract::{collect_candidates, extract_number, extract_text, unwrap_records};
use serde_json::Value;

/// Dataset tag stamped on geocode tasks created from stream rows.
pub const STREAM_TAG: &str = "stream";

/// Generic coordinate vocabularies — stream feeds are not kind-scoped,
/// so these cover the common English and Korean namings.
const LAT_KEYS: &[&str] = &["lat", "latitude", "위도", "y"];
const LNG_KEYS: &[&str] = &["lng", "lon", "longitude", "경도", "x"];
const TITLE_KEYS: &[&str] = &["title", "name", "명칭", "기관명", "시설명", "장소명"];
const URL_KEYS: &[&str] = &["url", "link", "homepage", "홈페이지"];
const ADDRESS_KEYS: &[&str] = &["도로명주소", "주소", "소재지", "address", "addr"];

/// Containers worth flattening in stream rows (location/geometry
/// blocks are common in map-ish feeds).
const CONTAINER_KEYS: &[&str] = &[
    "basicInfo",
    "기본정보",
    "info",
    "detail",
    "location",
    "geo",
    "coords",
    "position",
];

fn containers() -> Vec<String> {
    CONTAINER_KEYS.iter().map(|s| (*s).to_string()).collect()
}

/// Extracts direct markers: every row with a valid coordinate pair.
#[must_use]
pub fn extract_markers(json: &Value, source_url: &str) -> Vec<StreamMarkerPoint> {
    let containers = containers();
    let mut markers = Vec::new();

    for row in unwrap_records(json) {
        let candidates = collect_candidates(row, &containers);
        if candidates.is_empty() {
            continue;
        }

        let lat = extract_number(&candidates, LAT_KEYS);
        let lng = extract_number(&candidates, LNG_KEYS);
        let (Some(lat), Some(lng)) = (lat, lng) else {
            continue;
        };
        if !Coordinate::is_valid(lat, lng) {
            continue;
        }

        markers.push(StreamMarkerPoint {
            lat,
            lng,
            title: extract_text(&candidates, TITLE_KEYS)
                .unwrap_or_else(|| host_name(source_url)),
            url: extract_text(&candidates, URL_KEYS).or_else(|| Some(source_url.to_string())),
        });
    }

    markers
}

/// Extracts geocode tasks: address-bearing rows without coordinates.
///
/// `counter` numbers synthetic entity IDs across the whole ingestion
/// run so tasks from different URLs never collide.
#[must_use]
pub fn extract_geocode_tasks(
    json: &Value,
    source_url: &str,
    counter: &mut usize,
) -> Vec<GeocodeTask> {
    let containers = containers();
    let mut tasks = Vec::new();

    for row in unwrap_records(json) {
        let candidates = collect_candidates(row, &containers);
        if candidates.is_empty() {
            continue;
        }

        // Rows with valid coordinates were already emitted as markers.
        let lat = extract_number(&candidates, LAT_KEYS);
        let lng = extract_number(&candidates, LNG_KEYS);
        if let (Some(lat), Some(lng)) = (lat, lng)
            && Coordinate::is_valid(lat, lng)
        {
            continue;
        }

        let Some(address) = extract_text(&candidates, ADDRESS_KEYS) else {
            continue;
        };

        tasks.push(GeocodeTask {
            entity_id: format!("{STREAM_TAG}-{counter}"),
            address,
            title: extract_text(&candidates, TITLE_KEYS).unwrap_or_else(|| host_name(source_url)),
            dataset_tag: STREAM_TAG.to_string(),
        });
        *counter += 1;
    }

    tasks
}

/// Builds the last-resort keyword query for a URL: the declared title
/// when present, the host name otherwise.
#[must_use]
pub fn keyword_seed(url: &str, title: Option<&str>) -> String {
    match title {
        Some(t) if !t.trim().is_empty() => t.trim().to_string(),
        _ => host_name(url),
    }
}

/// Extracts the host name from a URL without a full URL parser:
/// strips the scheme, userinfo, port, and path, then a leading `www.`.
fn host_name(url: &str) -> String {
    let rest = url.split("://").nth(1).unwrap_or(url);
    let rest = rest.rsplit('@').next().unwrap_or(rest);
    let host = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(rest)
        .split(':')
        .next()
        .unwrap_or(rest);
    host.strip_prefix("www.").unwrap_or(host).to_string()
}
