#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Schema-agnostic field extraction over arbitrarily-shaped JSON records.
//!
//! Public datasets name the same concept inconsistently ("주소" vs
//! "도로명주소" vs "address") and often bury it inside nested
//! sub-objects ("basic info" blocks, review containers). This crate
//! provides the two primitives the normalizer is built from:
//!
//! - [`collect_candidates`] — flattens a raw record into an ordered list
//!   of candidate maps to search (the record itself first, then known
//!   nested containers, then containers nested one level inside those).
//! - [`extract`] / [`extract_by_pattern`] — first-match lookup across
//!   the candidate maps, by exact key priority list or by a regex over
//!   key names when the exact vocabulary is unknown.
//!
//! Value coercion never silently drops data: anything that renders to
//! non-empty text is usable, so unmapped fields can be preserved in the
//! entity's catch-all extras bag.

use regex::Regex;
use serde_json::{Map, Value};

/// Separator used when joining array elements into display text.
pub const ARRAY_SEPARATOR: &str = ", ";

/// Separator used between `key: value` pairs when rendering a nested
/// object as display text.
pub const PAIR_SEPARATOR: &str = " / ";

/// A value extracted from a raw record: the original number when the
/// JSON value was numeric, display text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Trimmed, non-empty text.
    Text(String),
    /// A finite JSON number.
    Number(f64),
}

impl FieldValue {
    /// Renders the value as display text.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => format_number(n),
        }
    }

    /// Returns the numeric value, parsing text if it looks numeric.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }
}

/// Renders an f64 without a trailing `.0` for whole numbers.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

/// Flattens a raw record into an ordered list of candidate maps.
///
/// Order is fixed: the outer record first, then each known nested
/// container (in `container_keys` order), then containers nested one
/// level inside those. Later extraction walks this list front to back,
/// so outer-record fields always win over nested ones.
#[must_use]
pub fn collect_candidates<'a>(
    record: &'a Value,
    container_keys: &[String],
) -> Vec<&'a Map<String, Value>> {
    let mut candidates = Vec::new();

    let Some(outer) = record.as_object() else {
        return candidates;
    };
    candidates.push(outer);

    let mut nested: Vec<&Map<String, Value>> = Vec::new();
    for key in container_keys {
        if let Some(inner) = outer.get(key).and_then(Value::as_object) {
            nested.push(inner);
        }
    }

    for inner in &nested {
        candidates.push(inner);
    }

    // One more level: containers inside the known containers (some
    // datasets wrap the useful block twice, e.g. info.basicInfo).
    for inner in nested {
        for key in container_keys {
            if let Some(deep) = inner.get(key).and_then(Value::as_object) {
                candidates.push(deep);
            }
        }
    }

    candidates
}

/// Coerces a JSON value to display text.
///
/// Rules: strings trim and are kept if non-empty; numbers must be
/// finite; booleans render as literal `true`/`false` tokens; arrays
/// join their coerced elements with [`ARRAY_SEPARATOR`]; nested objects
/// render as `"key: value / key: value"` pairs. Returns `None` for
/// null, non-finite numbers, and anything that coerces to empty text.
#[must_use]
pub fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => {
            let f = n.as_f64()?;
            f.is_finite().then(|| format_number(f))
        }
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(coerce_text).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(ARRAY_SEPARATOR))
            }
        }
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .filter_map(|(k, v)| coerce_text(v).map(|text| format!("{k}: {text}")))
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(PAIR_SEPARATOR))
            }
        }
    }
}

/// Coerces a JSON value to a [`FieldValue`], preserving numbers.
fn coerce(value: &Value) -> Option<FieldValue> {
    if let Value::Number(n) = value {
        let f = n.as_f64()?;
        return f.is_finite().then_some(FieldValue::Number(f));
    }
    coerce_text(value).map(FieldValue::Text)
}

/// Tries each key (in order) against each candidate map (in priority
/// order); the first non-empty coercible value wins.
#[must_use]
pub fn extract<S: AsRef<str>>(
    candidates: &[&Map<String, Value>],
    keys: &[S],
) -> Option<FieldValue> {
    extract_entry(candidates, keys).map(|(_, field)| field)
}

/// Like [`extract`], but also reports which key matched, so callers can
/// exclude already-surfaced keys from the catch-all extras bag.
#[must_use]
pub fn extract_entry<S: AsRef<str>>(
    candidates: &[&Map<String, Value>],
    keys: &[S],
) -> Option<(String, FieldValue)> {
    for candidate in candidates {
        for key in keys {
            if let Some(value) = candidate.get(key.as_ref())
                && let Some(field) = coerce(value)
            {
                return Some((key.as_ref().to_string(), field));
            }
        }
    }
    None
}

/// Regex-based variant of [`extract`] for when exact key names are
/// unknown. Within each candidate map, keys are tried in map order.
#[must_use]
pub fn extract_by_pattern(
    candidates: &[&Map<String, Value>],
    pattern: &Regex,
) -> Option<FieldValue> {
    extract_entry_by_pattern(candidates, pattern).map(|(_, field)| field)
}

/// Like [`extract_by_pattern`], but also reports which key matched.
#[must_use]
pub fn extract_entry_by_pattern(
    candidates: &[&Map<String, Value>],
    pattern: &Regex,
) -> Option<(String, FieldValue)> {
    for candidate in candidates {
        for (key, value) in *candidate {
            if pattern.is_match(key)
                && let Some(field) = coerce(value)
            {
                return Some((key.clone(), field));
            }
        }
    }
    None
}

/// Convenience wrapper: [`extract`] rendered to display text.
#[must_use]
pub fn extract_text<S: AsRef<str>>(
    candidates: &[&Map<String, Value>],
    keys: &[S],
) -> Option<String> {
    extract(candidates, keys).map(FieldValue::into_text)
}

/// Convenience wrapper: [`extract`] coerced to a finite number (numeric
/// text parses too — many datasets serialize coordinates as strings).
#[must_use]
pub fn extract_number<S: AsRef<str>>(
    candidates: &[&Map<String, Value>],
    keys: &[S],
) -> Option<f64> {
    extract(candidates, keys).and_then(|v| v.as_number())
}

/// Common wrapper keys under which APIs nest their record arrays.
const WRAPPER_KEYS: &[&str] = &[
    "records", "data", "items", "rows", "list", "result", "results", "body",
];

/// Unwraps a raw JSON document into its record list.
///
/// Handles the three shapes public datasets actually ship: a bare array
/// of records, an object wrapping the array under one of several common
/// keys, or a single record object.
#[must_use]
pub fn unwrap_records(doc: &Value) -> Vec<&Value> {
    match doc {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => {
            for key in WRAPPER_KEYS {
                match map.get(*key) {
                    Some(Value::Array(items)) => return items.iter().collect(),
                    // Some feeds wrap twice: {"result": {"records": [...]}}
                    Some(inner @ Value::Object(_)) => {
                        let nested = unwrap_records(inner);
                        if !nested.is_empty() {
                            return nested;
                        }
                    }
                    _ => {}
                }
            }
            vec![doc]
        }
        _ => Vec::new(),
    }
}
