//! One reusable loading pipeline: catalog → normalize → dedup.
//!
//! Both center kinds (and any caller — CLI, background refresh) consume
//! this single entry point rather than duplicating the pipeline per
//! call site. A dataset that fails to load is logged and skipped; the
//! pipeline only fails outright when the catalog listing itself is
//! unreachable.

use care_map_center_models::{Center, CenterKind};
use care_map_extract::unwrap_records;

use crate::SourceError;
use crate::catalog;
use crate::dedup::dedup;
use crate::normalize::Normalizer;

/// Result of one pipeline run.
#[derive(Debug)]
pub struct LoadOutcome {
    /// Normalized, deduplicated entities.
    pub centers: Vec<Center>,
    /// Datasets successfully loaded.
    pub datasets_loaded: usize,
    /// Datasets that failed to load (missing, invalid JSON).
    pub datasets_failed: usize,
    /// Raw records seen across all datasets.
    pub records_seen: usize,
    /// Records discarded (no address, no coordinates, or denylisted).
    pub records_discarded: usize,
}

/// Loads, normalizes, and deduplicates every dataset of one kind.
///
/// # Errors
///
/// Returns [`SourceError`] if the catalog listing cannot be fetched or
/// the kind profile is invalid. Individual dataset failures are logged
/// and counted, never propagated.
pub async fn load_centers(
    client: &reqwest::Client,
    base_url: &str,
    kind: CenterKind,
) -> Result<LoadOutcome, SourceError> {
    let normalizer = Normalizer::new(kind)?;

    let names = catalog::list_datasets(client, base_url).await?;
    let selected = catalog::filter_for_kind(&names, normalizer.profile());
    log::info!(
        "[{kind}] {} of {} catalog datasets match",
        selected.len(),
        names.len()
    );

    let mut centers = Vec::new();
    let mut datasets_loaded = 0;
    let mut datasets_failed = 0;
    let mut records_seen = 0;
    let mut records_discarded = 0;
    let mut seq = 0;

    for name in &selected {
        let doc = match catalog::fetch_dataset(client, base_url, name).await {
            Ok(doc) => doc,
            Err(e) => {
                // Non-fatal: the dataset contributes zero entities.
                log::warn!("{e}");
                datasets_failed += 1;
                continue;
            }
        };

        let tag = catalog::dataset_tag(name);
        let records = unwrap_records(&doc);
        let mut kept = 0;

        for (ordinal, record) in records.iter().enumerate() {
            records_seen += 1;
            if let Some(center) = normalizer.normalize(record, ordinal, Some(&tag), seq) {
                centers.push(center);
                kept += 1;
            } else {
                records_discarded += 1;
            }
            seq += 1;
        }

        log::info!("[{kind}] {name}: {kept}/{} records kept", records.len());
        datasets_loaded += 1;
    }

    let before = centers.len();
    let centers = dedup(centers);
    log::info!(
        "[{kind}] {} entities after merging {} duplicates",
        centers.len(),
        before - centers.len()
    );

    Ok(LoadOutcome {
        centers,
        datasets_loaded,
        datasets_failed,
        records_seen,
        records_discarded,
    })
}

/// Normalizes the records of one already-fetched document. Used by
/// callers that obtain documents out of band (tests, file loads).
///
/// # Errors
///
/// Returns [`SourceError::Profile`] if the kind profile is invalid.
pub fn normalize_document(
    doc: &serde_json::Value,
    kind: CenterKind,
    tag: &str,
) -> Result<Vec<Center>, SourceError> {
    let normalizer = Normalizer::new(kind)?;
    let centers = unwrap_records(doc)
        .iter()
        .enumerate()
        .filter_map(|(ordinal, record)| normalizer.normalize(record, ordinal, Some(tag), ordinal))
        .collect();
    Ok(centers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_a_wrapped_document() {
        let doc = serde_json::json!({
            "records": [
                {"명칭": "한울상담센터", "주소": "서울 강북구 1"},
                {"명칭": "주소없는센터"},
                {"명칭": "좌표센터", "위도": 37.1, "경도": 127.1}
            ]
        });
        let centers = normalize_document(&doc, CenterKind::Counseling, "test").unwrap();
        assert_eq!(centers.len(), 2);
        assert_eq!(centers[0].id, "test-0-0");
        assert_eq!(centers[1].id, "test-2-2");
    }
}
