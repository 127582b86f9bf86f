//! Raw record → canonical [`Center`] normalization.
//!
//! One [`Normalizer`] per kind, built from a [`KindProfile`]. Every
//! named field is extracted via the candidate-map search in
//! [`care_map_extract`]; whatever doesn't map to a named field is
//! preserved in the extras bag so no information is lost. A record
//! survives normalization only if it has a non-empty address or a
//! valid coordinate pair — anything else can never be displayed or
//! geocoded.

use std::collections::{BTreeSet, HashSet};

use care_map_center_models::{Center, CenterKind, Coordinate, ExtraField};
use care_map_extract::{
    FieldValue, coerce_text, collect_candidates, extract_entry, extract_entry_by_pattern,
};
use regex::Regex;
use serde_json::{Map, Value};

use crate::SourceError;
use crate::profile::KindProfile;

/// Keys that look like coordinates. Excluded from the extras bag and
/// stripped from the retained raw record — stale source coordinates
/// must never shadow resolved ones in audit display.
const COORDINATE_KEY_PATTERN: &str = r"(?i)lat|lng|lon|coord|위도|경도|좌표|^[xy]$";

/// Characters that split an explicit specialty field into tags.
const SPECIALTY_SEPARATORS: &[char] = &[',', '/', '·', '|'];

/// Builds canonical entities from raw records, driven by a kind
/// profile.
pub struct Normalizer {
    kind: CenterKind,
    profile: KindProfile,
    name_pattern: Option<Regex>,
    address_pattern: Option<Regex>,
    phone_pattern: Option<Regex>,
    hours_pattern: Option<Regex>,
    coordinate_keys: Regex,
}

impl Normalizer {
    /// Creates a normalizer with the built-in profile for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Profile`] if the built-in profile fails
    /// to parse.
    pub fn new(kind: CenterKind) -> Result<Self, SourceError> {
        Self::with_profile(kind, KindProfile::builtin(kind)?)
    }

    /// Creates a normalizer with a caller-supplied profile.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Profile`] if a regex fallback in the
    /// profile fails to compile.
    pub fn with_profile(kind: CenterKind, profile: KindProfile) -> Result<Self, SourceError> {
        let name_pattern = compile(profile.fields.name_pattern.as_deref())?;
        let address_pattern = compile(profile.fields.address_pattern.as_deref())?;
        let phone_pattern = compile(profile.fields.phone_pattern.as_deref())?;
        let hours_pattern = compile(profile.fields.hours_pattern.as_deref())?;
        let coordinate_keys =
            Regex::new(COORDINATE_KEY_PATTERN).map_err(|e| SourceError::Profile {
                message: e.to_string(),
            })?;

        Ok(Self {
            kind,
            profile,
            name_pattern,
            address_pattern,
            phone_pattern,
            hours_pattern,
            coordinate_keys,
        })
    }

    /// Returns the profile backing this normalizer.
    #[must_use]
    pub const fn profile(&self) -> &KindProfile {
        &self.profile
    }

    /// Normalizes one raw record.
    ///
    /// `ordinal` is the row position within its dataset, `seq` a
    /// pipeline-global sequence index; together with the dataset tag
    /// they form an ID that stays unique even when source serial
    /// numbers collide across datasets.
    ///
    /// Returns `None` when the record has neither a usable address nor
    /// valid coordinates, or matches the denylist.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn normalize(
        &self,
        raw: &Value,
        ordinal: usize,
        dataset_tag: Option<&str>,
        seq: usize,
    ) -> Option<Center> {
        let candidates = collect_candidates(raw, &self.profile.container_keys);
        if candidates.is_empty() {
            return None;
        }

        let fields = &self.profile.fields;
        let mut consumed: HashSet<String> = HashSet::new();

        // ── Coordinates ──────────────────────────────────────────
        let lat = pick(&candidates, &fields.lat, None, &mut consumed).and_then(|v| v.as_number());
        let lng = pick(&candidates, &fields.lng, None, &mut consumed).and_then(|v| v.as_number());

        let coordinate = match (lat, lng) {
            (Some(lat), Some(lng)) if Coordinate::is_valid(lat, lng) => {
                Some(Coordinate { lat, lng })
            }
            _ => None,
        };

        // ── Identity fields ──────────────────────────────────────
        let address = pick(
            &candidates,
            &fields.address,
            self.address_pattern.as_ref(),
            &mut consumed,
        )
        .map(FieldValue::into_text)
        .unwrap_or_default();

        if address.is_empty() && coordinate.is_none() {
            return None;
        }

        let name = pick(
            &candidates,
            &fields.name,
            self.name_pattern.as_ref(),
            &mut consumed,
        )
        .map_or_else(|| self.profile.fallback_name.clone(), FieldValue::into_text);

        let phone = pick(
            &candidates,
            &fields.phone,
            self.phone_pattern.as_ref(),
            &mut consumed,
        )
        .map(FieldValue::into_text)
        .unwrap_or_default();

        if self
            .profile
            .denylist
            .iter()
            .any(|rule| rule.matches(&name, &phone, &address))
        {
            log::debug!("Dropping denylisted row '{name}' ({phone})");
            return None;
        }

        // ── Descriptive fields ───────────────────────────────────
        let homepage_url =
            pick(&candidates, &fields.homepage, None, &mut consumed).map(FieldValue::into_text);
        let hours = pick(
            &candidates,
            &fields.hours,
            self.hours_pattern.as_ref(),
            &mut consumed,
        )
        .map(FieldValue::into_text)
        .unwrap_or_default();

        let rating = pick(&candidates, &fields.rating, None, &mut consumed)
            .and_then(|v| v.as_number())
            .map_or(0.0, |n| n.max(0.0));

        let review_count = pick(&candidates, &fields.review_count, None, &mut consumed)
            .and_then(|v| v.as_number())
            .map_or(0, |n| {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let count = n.max(0.0) as u32;
                count
            });

        let distance_label =
            pick(&candidates, &fields.distance, None, &mut consumed)
                .map(FieldValue::into_text)
                .unwrap_or_default();

        let intro =
            pick(&candidates, &fields.intro, None, &mut consumed).map(FieldValue::into_text);
        let programs =
            pick(&candidates, &fields.programs, None, &mut consumed).map(FieldValue::into_text);
        let apply_method =
            pick(&candidates, &fields.apply_method, None, &mut consumed).map(FieldValue::into_text);
        let expert_intro =
            pick(&candidates, &fields.expert_intro, None, &mut consumed).map(FieldValue::into_text);
        let reservation_url = pick(&candidates, &fields.reservation_url, None, &mut consumed)
            .map(FieldValue::into_text);
        let reservation_text = pick(&candidates, &fields.reservation_text, None, &mut consumed)
            .map(FieldValue::into_text);

        // ── Specialties ──────────────────────────────────────────
        let specialties = self.specialties(
            &candidates,
            &name,
            &address,
            programs.as_deref(),
            &mut consumed,
        );

        // ── Meta lines ───────────────────────────────────────────
        let mut meta_lines = Vec::with_capacity(self.profile.meta_lines.len());
        for rule in &self.profile.meta_lines {
            if let Some((key, value)) = extract_entry(&candidates, &rule.keys) {
                consumed.insert(key);
                meta_lines.push(format!("{}: {}", rule.label, value.into_text()));
            }
        }

        // ── Extras: everything else, nothing silently dropped ────
        let extras = self.collect_extras(&candidates, &consumed);

        let tag = dataset_tag.unwrap_or(&self.profile.dataset_tag);

        Some(Center {
            id: format!("{tag}-{ordinal}-{seq}"),
            kind: self.kind,
            name,
            address,
            phone,
            homepage_url,
            hours,
            rating,
            review_count,
            distance_label,
            specialties,
            lat: coordinate.map(|c| c.lat),
            lng: coordinate.map(|c| c.lng),
            meta_lines,
            intro,
            programs,
            apply_method,
            expert_intro,
            reservation_url,
            reservation_text,
            extras,
            raw: self.strip_coordinates(raw),
        })
    }

    /// Explicit specialty field → substring inference → default tag.
    fn specialties(
        &self,
        candidates: &[&Map<String, Value>],
        name: &str,
        address: &str,
        programs: Option<&str>,
        consumed: &mut HashSet<String>,
    ) -> BTreeSet<String> {
        let mut tags = BTreeSet::new();

        if let Some((key, value)) = extract_entry(candidates, &self.profile.fields.specialty) {
            consumed.insert(key);
            for part in value.into_text().split(SPECIALTY_SEPARATORS) {
                let part = part.trim();
                if !part.is_empty() {
                    tags.insert(part.to_string());
                }
            }
        }

        if tags.is_empty() {
            let mut haystack = format!("{name} {address}");
            if let Some(p) = programs {
                haystack.push(' ');
                haystack.push_str(p);
            }
            for key in &self.profile.specialty_rules.keys {
                if let Some((matched, value)) = extract_entry(candidates, &[key.clone()]) {
                    consumed.insert(matched);
                    haystack.push(' ');
                    haystack.push_str(&value.into_text());
                }
            }
            for rule in &self.profile.specialty_rules.rules {
                if haystack.contains(&rule.contains) {
                    tags.insert(rule.tag.clone());
                }
            }
        }

        if tags.is_empty() {
            tags.insert(self.profile.specialty_rules.default_tag.clone());
        }

        tags
    }

    /// Collects the catch-all extras: every key not already surfaced,
    /// not coordinate-like, and not a known container, coerced to text.
    fn collect_extras(
        &self,
        candidates: &[&Map<String, Value>],
        consumed: &HashSet<String>,
    ) -> Vec<ExtraField> {
        let mut extras = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for candidate in candidates {
            for (key, value) in *candidate {
                if consumed.contains(key)
                    || seen.contains(key)
                    || self.is_coordinate_key(key)
                    || self.profile.container_keys.contains(key)
                {
                    continue;
                }
                if let Some(text) = coerce_text(value) {
                    seen.insert(key.clone());
                    extras.push(ExtraField {
                        label: key.clone(),
                        value: text,
                    });
                }
            }
        }

        extras
    }

    fn is_coordinate_key(&self, key: &str) -> bool {
        self.coordinate_keys.is_match(key)
            || self.profile.fields.lat.iter().any(|k| k == key)
            || self.profile.fields.lng.iter().any(|k| k == key)
    }

    /// Clones the raw record with coordinate fields removed, at the top
    /// level and inside known containers.
    fn strip_coordinates(&self, raw: &Value) -> Value {
        let mut cloned = raw.clone();
        if let Value::Object(map) = &mut cloned {
            for key in &self.profile.container_keys {
                if let Some(Value::Object(inner)) = map.get_mut(key) {
                    let coordinate_free: Map<String, Value> = inner
                        .iter()
                        .filter(|(k, _)| !self.is_coordinate_key(k))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    *inner = coordinate_free;
                }
            }
            let top: Map<String, Value> = map
                .iter()
                .filter(|(k, _)| !self.is_coordinate_key(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            *map = top;
        }
        cloned
    }
}

/// Exact-key extraction with an optional regex fallback; records the
/// matched key so extras can exclude it.
fn pick(
    candidates: &[&Map<String, Value>],
    keys: &[String],
    pattern: Option<&Regex>,
    consumed: &mut HashSet<String>,
) -> Option<FieldValue> {
    let entry = extract_entry(candidates, keys)
        .or_else(|| pattern.and_then(|p| extract_entry_by_pattern(candidates, p)));
    entry.map(|(key, value)| {
        consumed.insert(key);
        value
    })
}

fn compile(pattern: Option<&str>) -> Result<Option<Regex>, SourceError> {
    pattern
        .map(|p| {
            Regex::new(p).map_err(|e| SourceError::Profile {
                message: format!("bad regex '{p}': {e}"),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        Normalizer::new(CenterKind::Counseling).unwrap()
    }

    fn childcare() -> Normalizer {
        Normalizer::new(CenterKind::ChildCare).unwrap()
    }

    #[test]
    fn normalizes_record_with_address_only() {
        let raw = serde_json::json!({
            "명칭": "서울아동상담센터",
            "도로명주소": "서울특별시 중구 세종대로 110",
            "전화번호": "02-123-4567"
        });
        let center = normalizer().normalize(&raw, 0, Some("seoul"), 0).unwrap();
        assert_eq!(center.name, "서울아동상담센터");
        assert_eq!(center.address, "서울특별시 중구 세종대로 110");
        assert!(!center.has_coordinates());
        assert_eq!(center.id, "seoul-0-0");
    }

    #[test]
    fn normalizes_record_with_coordinates_only() {
        let raw = serde_json::json!({
            "명칭": "위치만 있는 센터",
            "위도": 37.5665,
            "경도": 126.9780
        });
        let center = normalizer().normalize(&raw, 3, None, 7).unwrap();
        assert!(center.has_coordinates());
        assert!(center.address.is_empty());
        assert_eq!(center.id, "counsel-3-7");
    }

    #[test]
    fn discards_record_with_neither_address_nor_coordinates() {
        let raw = serde_json::json!({"명칭": "유령 센터", "전화번호": "02-1-2"});
        assert!(normalizer().normalize(&raw, 0, None, 0).is_none());
    }

    #[test]
    fn out_of_range_coordinates_are_treated_as_absent() {
        let raw = serde_json::json!({
            "명칭": "좌표 오류 센터",
            "주소": "부산광역시 해운대구 1",
            "위도": 370.5,
            "경도": 126.9
        });
        let center = normalizer().normalize(&raw, 0, None, 0).unwrap();
        assert!(!center.has_coordinates());
        assert_eq!(center.address, "부산광역시 해운대구 1");
    }

    #[test]
    fn string_coordinates_parse() {
        let raw = serde_json::json!({
            "명칭": "문자 좌표 센터",
            "위도": "35.1796",
            "경도": "129.0756"
        });
        let center = normalizer().normalize(&raw, 0, None, 0).unwrap();
        assert!((center.lat.unwrap() - 35.1796).abs() < 1e-6);
    }

    #[test]
    fn denylisted_row_is_dropped() {
        let raw = serde_json::json!({
            "명칭": "한빛심리상담센터",
            "전화번호": "02-000-0000",
            "주소": "서울시 어딘가"
        });
        assert!(normalizer().normalize(&raw, 0, None, 0).is_none());

        // Same name with a different phone survives.
        let ok = serde_json::json!({
            "명칭": "한빛심리상담센터",
            "전화번호": "02-555-1234",
            "주소": "서울시 어딘가"
        });
        assert!(normalizer().normalize(&ok, 0, None, 0).is_some());
    }

    #[test]
    fn missing_name_gets_fallback_label() {
        let raw = serde_json::json!({"주소": "대구광역시 수성구 2"});
        let center = normalizer().normalize(&raw, 0, None, 0).unwrap();
        assert_eq!(center.name, "이름 미확인 상담기관");
    }

    #[test]
    fn explicit_specialty_field_is_split_into_tags() {
        let raw = serde_json::json!({
            "명칭": "분야 센터",
            "주소": "인천 1",
            "전문분야": "아동상담, 놀이치료 / 가족상담"
        });
        let center = normalizer().normalize(&raw, 0, None, 0).unwrap();
        assert!(center.specialties.contains("아동상담"));
        assert!(center.specialties.contains("놀이치료"));
        assert!(center.specialties.contains("가족상담"));
    }

    #[test]
    fn specialties_are_inferred_from_free_text() {
        let raw = serde_json::json!({
            "명칭": "해솔청소년상담복지센터",
            "주소": "광주 북구 3"
        });
        let center = normalizer().normalize(&raw, 0, None, 0).unwrap();
        assert!(center.specialties.contains("청소년상담"));
    }

    #[test]
    fn specialty_default_keeps_set_non_empty() {
        let raw = serde_json::json!({"명칭": "이름만 센터", "주소": "대전 유성구 4"});
        let center = normalizer().normalize(&raw, 0, None, 0).unwrap();
        assert_eq!(
            center.specialties.iter().collect::<Vec<_>>(),
            vec!["종합상담"]
        );
    }

    #[test]
    fn childcare_kind_uses_its_own_vocabulary() {
        let raw = serde_json::json!({
            "어린이집명": "푸른숲어린이집",
            "도로명주소": "경기도 성남시 분당구 5",
            "정원": 92,
            "운영형태": "국공립"
        });
        let center = childcare().normalize(&raw, 0, None, 0).unwrap();
        assert_eq!(center.kind, CenterKind::ChildCare);
        assert_eq!(center.name, "푸른숲어린이집");
        assert!(center.meta_lines.iter().any(|l| l == "정원: 92"));
        assert!(center.specialties.contains("국공립"));
    }

    #[test]
    fn extracts_fields_from_nested_containers() {
        let raw = serde_json::json!({
            "명칭": "중첩 센터",
            "기본정보": {
                "주소": "울산 남구 6",
                "전화번호": "052-123-4567"
            }
        });
        let center = normalizer().normalize(&raw, 0, None, 0).unwrap();
        assert_eq!(center.address, "울산 남구 6");
        assert_eq!(center.phone, "052-123-4567");
    }

    #[test]
    fn unmapped_fields_land_in_extras() {
        let raw = serde_json::json!({
            "명칭": "여분 센터",
            "주소": "세종시 7",
            "주차가능": true,
            "부설기관": ["도서관", "놀이방"]
        });
        let center = normalizer().normalize(&raw, 0, None, 0).unwrap();
        let labels: Vec<&str> = center.extras.iter().map(|e| e.label.as_str()).collect();
        assert!(labels.contains(&"주차가능"));
        assert!(labels.contains(&"부설기관"));
        let parking = center
            .extras
            .iter()
            .find(|e| e.label == "주차가능")
            .unwrap();
        assert_eq!(parking.value, "true");
    }

    #[test]
    fn extras_exclude_surfaced_and_coordinate_keys() {
        let raw = serde_json::json!({
            "명칭": "깔끔 센터",
            "주소": "제주시 8",
            "위도": 33.4996,
            "경도": 126.5312,
            "x좌표": 955_000.1
        });
        let center = normalizer().normalize(&raw, 0, None, 0).unwrap();
        assert!(center.extras.is_empty());
    }

    #[test]
    fn raw_record_is_retained_without_coordinate_fields() {
        let raw = serde_json::json!({
            "명칭": "감사 센터",
            "주소": "춘천시 9",
            "위도": 37.8813,
            "경도": 127.7298,
            "기본정보": {"lat": 37.8813, "비고": "유지"}
        });
        let center = normalizer().normalize(&raw, 0, None, 0).unwrap();
        assert!(center.raw.get("위도").is_none());
        assert!(center.raw.get("경도").is_none());
        assert!(center.raw.get("명칭").is_some());
        assert!(center.raw["기본정보"].get("lat").is_none());
        assert_eq!(center.raw["기본정보"]["비고"], "유지");
    }

    #[test]
    fn rating_and_review_count_default_to_zero() {
        let raw = serde_json::json!({"명칭": "신규 센터", "주소": "포항시 10"});
        let center = normalizer().normalize(&raw, 0, None, 0).unwrap();
        assert!(center.rating.abs() < f64::EPSILON);
        assert_eq!(center.review_count, 0);
    }
}
