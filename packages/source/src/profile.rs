//! Per-kind extraction profiles, loaded from TOML.
//!
//! A [`KindProfile`] captures everything dataset-specific about a
//! center kind in serializable config: key-priority vocabularies, the
//! regex fallbacks, nested-container names, meta-line rules, the
//! specialty-inference rule set, and the denylist of known-bad rows.
//! The built-in profiles are compiled in via `include_str!`, but any
//! TOML with the same shape can be supplied instead — the rules are
//! data, not code, and are not assumed exhaustive.

use care_map_center_models::CenterKind;
use serde::Deserialize;

use crate::SourceError;

/// A complete extraction profile for one center kind.
#[derive(Debug, Clone, Deserialize)]
pub struct KindProfile {
    /// Default dataset tag used in entity IDs when none is derived from
    /// the dataset filename.
    pub dataset_tag: String,
    /// Label assigned when a record has no usable name field.
    pub fallback_name: String,
    /// Case-insensitive substrings that select this kind's dataset
    /// files from the catalog listing.
    pub filename_patterns: Vec<String>,
    /// Keys of nested sub-objects worth flattening into the candidate
    /// list (basic-info blocks, review containers).
    pub container_keys: Vec<String>,
    /// Field key vocabularies.
    pub fields: FieldKeys,
    /// Ordered rendering-ready key facts.
    #[serde(default)]
    pub meta_lines: Vec<MetaLineRule>,
    /// Specialty inference configuration.
    pub specialty_rules: SpecialtyRules,
    /// Known-bad rows dropped at normalization time.
    #[serde(default)]
    pub denylist: Vec<DenyRule>,
}

/// Key-priority lists (and regex fallbacks) for each named field.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldKeys {
    /// Entity name keys.
    pub name: Vec<String>,
    /// Regex fallback for the name field.
    pub name_pattern: Option<String>,
    /// Address keys.
    pub address: Vec<String>,
    /// Regex fallback for the address field.
    pub address_pattern: Option<String>,
    /// Phone keys.
    pub phone: Vec<String>,
    /// Regex fallback for the phone field.
    pub phone_pattern: Option<String>,
    /// Homepage URL keys.
    pub homepage: Vec<String>,
    /// Operating-hours keys.
    pub hours: Vec<String>,
    /// Regex fallback for the hours field.
    pub hours_pattern: Option<String>,
    /// Rating keys.
    pub rating: Vec<String>,
    /// Review-count keys.
    pub review_count: Vec<String>,
    /// Distance-label keys.
    pub distance: Vec<String>,
    /// Latitude keys.
    pub lat: Vec<String>,
    /// Longitude keys.
    pub lng: Vec<String>,
    /// Introduction-text keys.
    pub intro: Vec<String>,
    /// Program-description keys.
    pub programs: Vec<String>,
    /// Application-method keys.
    pub apply_method: Vec<String>,
    /// Expert/staff-introduction keys.
    pub expert_intro: Vec<String>,
    /// Reservation-link keys.
    pub reservation_url: Vec<String>,
    /// Reservation-instructions keys.
    pub reservation_text: Vec<String>,
    /// Explicit specialty keys.
    pub specialty: Vec<String>,
}

/// One ordered meta line: a display label plus the keys that feed it.
#[derive(Debug, Clone, Deserialize)]
pub struct MetaLineRule {
    /// Display label (e.g. "지역", "정원").
    pub label: String,
    /// Source keys, tried in order.
    pub keys: Vec<String>,
}

/// Specialty inference: substring rules over free text, plus the
/// default tag assigned when nothing matches (the UI never shows an
/// entity with zero specialties).
#[derive(Debug, Clone, Deserialize)]
pub struct SpecialtyRules {
    /// Tag assigned when no explicit field and no rule matches.
    pub default_tag: String,
    /// Extra free-text keys to include in the scanned haystack beyond
    /// name + address + programs.
    #[serde(default)]
    pub keys: Vec<String>,
    /// Ordered substring rules.
    #[serde(default)]
    pub rules: Vec<SpecialtyRule>,
}

/// One substring → tag rule.
#[derive(Debug, Clone, Deserialize)]
pub struct SpecialtyRule {
    /// Substring to search for in the haystack.
    pub contains: String,
    /// Canonical tag emitted on match.
    pub tag: String,
}

/// A known-bad row signature: exact name plus a phone or address match.
#[derive(Debug, Clone, Deserialize)]
pub struct DenyRule {
    /// Exact entity name.
    pub name: String,
    /// Exact phone signature, if the bad row is keyed by phone.
    pub phone: Option<String>,
    /// Exact address signature, if keyed by address.
    pub address: Option<String>,
}

impl DenyRule {
    /// Returns `true` when a normalized record matches this signature.
    #[must_use]
    pub fn matches(&self, name: &str, phone: &str, address: &str) -> bool {
        if name != self.name {
            return false;
        }
        match (&self.phone, &self.address) {
            (Some(p), _) if p == phone => true,
            (_, Some(a)) if a == address => true,
            (None, None) => true,
            _ => false,
        }
    }
}

impl KindProfile {
    /// Parses a profile from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Profile`] if the TOML is malformed or
    /// missing required fields.
    pub fn from_toml(toml_str: &str) -> Result<Self, SourceError> {
        toml::de::from_str(toml_str).map_err(|e| SourceError::Profile {
            message: e.to_string(),
        })
    }

    /// Loads the built-in profile for a kind.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Profile`] if the compiled-in TOML fails
    /// to parse (a build-time mistake, caught by the tests below).
    pub fn builtin(kind: CenterKind) -> Result<Self, SourceError> {
        let toml_str = match kind {
            CenterKind::Counseling => include_str!("../profiles/counseling.toml"),
            CenterKind::ChildCare => include_str!("../profiles/childcare.toml"),
        };
        Self::from_toml(toml_str)
    }

    /// Returns `true` if a dataset filename belongs to this kind.
    #[must_use]
    pub fn matches_filename(&self, filename: &str) -> bool {
        let lower = filename.to_lowercase();
        self.filename_patterns
            .iter()
            .any(|p| lower.contains(&p.to_lowercase()))
    }
}
