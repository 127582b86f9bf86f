//! Duplicate merge across overlapping datasets.
//!
//! The same institution routinely appears in two public datasets — a
//! city feed and a ministry feed — usually with different field
//! coverage. Entities are grouped by the case-insensitive
//! `(name, address)` identity key and only the highest-quality variant
//! per group survives. Coordinates dominate the quality score, so the
//! coordinate-bearing version always wins regardless of input order.

use std::collections::HashMap;

use care_map_center_models::Center;

/// Merges duplicates, keeping the strictly-higher-scored entity per
/// identity key. Ties keep the first seen. Input order is preserved
/// for the surviving entities, which keeps output deterministic.
#[must_use]
pub fn dedup(centers: Vec<Center>) -> Vec<Center> {
    let mut kept: Vec<Center> = Vec::with_capacity(centers.len());
    let mut index_by_key: HashMap<String, usize> = HashMap::with_capacity(centers.len());

    for center in centers {
        let key = center.identity_key();
        match index_by_key.get(&key) {
            Some(&i) => {
                if center.quality_score() > kept[i].quality_score() {
                    kept[i] = center;
                }
            }
            None => {
                index_by_key.insert(key, kept.len());
                kept.push(center);
            }
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use care_map_center_models::{CenterKind, Coordinate};

    use super::*;

    fn center(name: &str, address: &str) -> Center {
        Center {
            id: format!("t-{name}-{address}"),
            kind: CenterKind::Counseling,
            name: name.to_string(),
            address: address.to_string(),
            phone: String::new(),
            homepage_url: None,
            hours: String::new(),
            rating: 0.0,
            review_count: 0,
            distance_label: String::new(),
            specialties: BTreeSet::new(),
            lat: None,
            lng: None,
            meta_lines: Vec::new(),
            intro: None,
            programs: None,
            apply_method: None,
            expert_intro: None,
            reservation_url: None,
            reservation_text: None,
            extras: Vec::new(),
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn coordinate_bearing_duplicate_wins_regardless_of_order() {
        let plain = center("마음상담소", "서울 중구 1");
        let mut located = center("마음상담소", "서울 중구 1");
        located.set_coordinate(Coordinate {
            lat: 37.56,
            lng: 126.98,
        });

        let forward = dedup(vec![plain.clone(), located.clone()]);
        assert_eq!(forward.len(), 1);
        assert!(forward[0].has_coordinates());

        let backward = dedup(vec![located, plain]);
        assert_eq!(backward.len(), 1);
        assert!(backward[0].has_coordinates());
    }

    #[test]
    fn identity_key_is_case_and_whitespace_insensitive() {
        let a = center("Dream Center", "12 Main St");
        let b = center("DREAM CENTER", " 12 Main St ");
        assert_eq!(dedup(vec![a, b]).len(), 1);
    }

    #[test]
    fn ties_keep_first_seen() {
        let mut first = center("쌍둥이상담소", "부산 2");
        first.id = "first".to_string();
        let mut second = center("쌍둥이상담소", "부산 2");
        second.id = "second".to_string();

        let out = dedup(vec![first, second]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "first");
    }

    #[test]
    fn is_idempotent() {
        let mut a = center("a", "1");
        a.phone = "02-1".to_string();
        let b = center("a", "1");
        let c = center("b", "2");

        let once = dedup(vec![a, b, c]);
        let twice = dedup(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn output_never_contains_duplicate_keys() {
        let centers = vec![
            center("x", "1"),
            center("X", "1"),
            center("y", "2"),
            center("x", "1"),
        ];
        let out = dedup(centers);
        let mut keys: Vec<String> = out.iter().map(Center::identity_key).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), out.len());
    }

    #[test]
    fn distinct_addresses_are_not_merged() {
        let out = dedup(vec![center("같은이름", "주소 1"), center("같은이름", "주소 2")]);
        assert_eq!(out.len(), 2);
    }
}
