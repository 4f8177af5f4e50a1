//! Change detection: does freshly fetched data warrant a new version?
//!
//! Cheapest discriminating check first. The allow-listed core fields are
//! compared after normalization; when they match, the whole normalized
//! documents are compared as well, so metadata outside the allow-list can
//! still produce a snapshot. An extra snapshot is preferred over a missed one.

use crate::compare::{normalize::canonical_string, rules::ComparisonRules};
use serde::Serialize;
use serde_json::{Map, Value};

/// Outcome of comparing fetched data with the latest stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDecision {
    /// Nothing stored yet for this workflow.
    Bootstrap,
    /// One of the core fields differs.
    StructuralChange,
    /// Core fields match but the rest of the normalized document differs.
    DocumentChange,
    Unchanged,
    /// Fetch failed or returned nothing; no decision can be made.
    Unavailable,
}

impl ChangeDecision {
    pub fn should_create_version(self) -> bool {
        matches!(
            self,
            Self::Bootstrap | Self::StructuralChange | Self::DocumentChange
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::StructuralChange => "structural_change",
            Self::DocumentChange => "document_change",
            Self::Unchanged => "unchanged",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Copy of `doc` restricted to the core fields that are present.
pub fn extract_core_fields(doc: &Value, rules: &ComparisonRules) -> Value {
    let mut core = Map::new();
    if let Value::Object(map) = doc {
        for field in &rules.core_fields {
            if let Some(value) = map.get(field) {
                core.insert(field.clone(), value.clone());
            }
        }
    }
    Value::Object(core)
}

/// Classify the difference between `current` (fetched) and `latest` (stored).
pub fn detect_change(
    current: Option<&Value>,
    latest: Option<&Value>,
    rules: &ComparisonRules,
) -> ChangeDecision {
    let current = match current {
        Some(value) if !value.is_null() => value,
        _ => return ChangeDecision::Unavailable,
    };
    let latest = match latest {
        Some(value) => value,
        None => return ChangeDecision::Bootstrap,
    };

    let current_core = canonical_string(&extract_core_fields(current, rules), rules);
    let latest_core = canonical_string(&extract_core_fields(latest, rules), rules);
    if current_core != latest_core {
        return ChangeDecision::StructuralChange;
    }

    if canonical_string(current, rules) != canonical_string(latest, rules) {
        return ChangeDecision::DocumentChange;
    }

    ChangeDecision::Unchanged
}

/// Yes/no form of [`detect_change`].
pub fn should_create_version(
    current: Option<&Value>,
    latest: Option<&Value>,
    rules: &ComparisonRules,
) -> bool {
    detect_change(current, latest, rules).should_create_version()
}
