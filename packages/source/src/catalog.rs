//! Dataset catalog: listing, filtering, and fetching raw JSON
//! documents.
//!
//! The catalog endpoint returns the available dataset file names; the
//! pipeline filters that list by the kind's filename patterns before
//! loading. Each dataset is one raw JSON document of unconstrained
//! shape — a bare array of records, an object wrapping the array under
//! a common key, or a single object.

use serde_json::Value;

use crate::SourceError;
use crate::profile::KindProfile;

/// Catalog index file listing the available datasets.
const INDEX_FILE: &str = "index.json";

/// Fetches the list of available dataset file names.
///
/// Accepts either a bare JSON array of strings or an object wrapping
/// the array under `files` or `datasets`.
///
/// # Errors
///
/// Returns [`SourceError`] if the request fails or the listing is not
/// valid JSON.
pub async fn list_datasets(
    client: &reqwest::Client,
    base_url: &str,
) -> Result<Vec<String>, SourceError> {
    let url = format!("{}/{INDEX_FILE}", base_url.trim_end_matches('/'));
    let doc: Value = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let list = match &doc {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map
            .get("files")
            .or_else(|| map.get("datasets"))
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice),
        _ => &[],
    };

    Ok(list
        .iter()
        .filter_map(Value::as_str)
        .map(String::from)
        .collect())
}

/// Filters a dataset listing down to the files belonging to a kind.
#[must_use]
pub fn filter_for_kind(names: &[String], profile: &KindProfile) -> Vec<String> {
    names
        .iter()
        .filter(|name| profile.matches_filename(name))
        .cloned()
        .collect()
}

/// Fetches one raw dataset document.
///
/// # Errors
///
/// Returns [`SourceError::Dataset`] (non-fatal — callers log it and
/// continue) if the file is missing or not valid JSON.
pub async fn fetch_dataset(
    client: &reqwest::Client,
    base_url: &str,
    name: &str,
) -> Result<Value, SourceError> {
    let url = format!("{}/{name}", base_url.trim_end_matches('/'));
    let response = client
        .get(&url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| SourceError::Dataset {
            name: name.to_string(),
            message: e.to_string(),
        })?;

    response.json().await.map_err(|e| SourceError::Dataset {
        name: name.to_string(),
        message: format!("invalid JSON: {e}"),
    })
}

/// Derives the dataset tag used in entity IDs from the filename:
/// the stem, lowercased, with non-alphanumerics collapsed to `_`.
#[must_use]
pub fn dataset_tag(filename: &str) -> String {
    let stem = filename
        .rsplit('/')
        .next()
        .unwrap_or(filename)
        .trim_end_matches(".json");
    let mut tag = String::with_capacity(stem.len());
    let mut last_sep = false;
    for ch in stem.chars() {
        if ch.is_alphanumeric() {
            tag.extend(ch.to_lowercase());
            last_sep = false;
        } else if !last_sep {
            tag.push('_');
            last_sep = true;
        }
    }
    tag.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use care_map_center_models::CenterKind;

    use super::*;

    #[test]
    fn filters_listing_by_kind_patterns() {
        let profile = KindProfile::builtin(CenterKind::Counseling).unwrap();
        let names = vec![
            "seoul_counsel_2024.json".to_string(),
            "busan_daycare.json".to_string(),
            "전국심리지원센터.json".to_string(),
        ];
        let filtered = filter_for_kind(&names, &profile);
        assert_eq!(
            filtered,
            vec![
                "seoul_counsel_2024.json".to_string(),
                "전국심리지원센터.json".to_string()
            ]
        );
    }

    #[test]
    fn derives_tags_from_filenames() {
        assert_eq!(dataset_tag("seoul_counsel_2024.json"), "seoul_counsel_2024");
        assert_eq!(dataset_tag("data/Busan Daycare.json"), "busan_daycare");
        assert_eq!(dataset_tag("전국심리지원센터.json"), "전국심리지원센터");
    }
}
