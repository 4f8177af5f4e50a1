//! Field tables driving normalization, change detection and diffing
//!
//! The algorithms never hard-code field names; they receive a
//! `ComparisonRules` value. `ComparisonRules::default()` is the current
//! table set (see `RULES_VERSION`), and callers can extend it without
//! touching algorithm code.

/// Bumped whenever one of the default tables changes.
pub const RULES_VERSION: u32 = 1;

/// Keys stripped at every nesting level before comparison.
pub const VOLATILE_FIELDS: &[&str] = &[
    // timestamps
    "updatedAt",
    "createdAt",
    "lastModified",
    "lastUpdated",
    "modifiedAt",
    "insertedAt",
    "lastExecutedAt",
    "lastRunAt",
    "lastSyncedAt",
    "timestamp",
    // system / internal identifiers
    "id",
    "portalId",
    "revision",
    "revisionId",
    "etag",
    "hash",
    "migrationStatus",
    "originalAuthorUserId",
    "updatedBy",
    "creationSource",
    "updateSource",
    // runtime / execution metrics
    "executionCount",
    "enrolledCount",
    "activeCount",
    "statistics",
    "stats",
    "performance",
    "metrics",
    "lastExecution",
];

/// Allow-list of functional fields compared by the structural check.
pub const CORE_FIELDS: &[&str] = &[
    "name",
    "type",
    "enabled",
    "actions",
    "triggers",
    "enrollmentTriggers",
    "enrollmentCriteria",
    "reEnrollmentTriggerSets",
    "segmentCriteria",
    "goalCriteria",
    "suppressionCriteria",
    "unenrollmentSetting",
    "onlyExecOnBizDays",
    "onlyEnrollsManually",
    "contactFilters",
    "listFilters",
    "propertyFilters",
    "eventFilters",
    "formFilters",
    "pageFilters",
    "emailFilters",
];

/// Top-level scalar fields reported by the structural differ.
pub const DIFF_SCALAR_FIELDS: &[&str] = &["name", "enabled"];

/// Top-level blocks diffed as a whole (no sub-field diffing).
pub const DIFF_BLOCK_FIELDS: &[&str] = &["enrollmentTriggers", "goals"];

/// Action keys tried, in order, to match an action across two versions.
pub const ACTION_ID_KEYS: &[&str] = &["id", "actionId"];

/// Action-type keys used when an action carries no explicit id.
pub const ACTION_TYPE_KEYS: &[&str] = &["actionTypeId"];

/// Action properties compared one by one when an action exists on both sides.
pub const ACTION_COMPARE_FIELDS: &[&str] = &[
    "type",
    "actionTypeId",
    "delayMillis",
    "propertyName",
    "newValue",
    "subject",
    "body",
    "recipients",
    "settings",
    "filters",
    "conditions",
];

/// Subset of `ACTION_COMPARE_FIELDS` compared through their canonical
/// serialized form, so nested key order never matters.
pub const ACTION_DEEP_FIELDS: &[&str] = &["settings", "filters"];

/// A complete set of tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonRules {
    pub volatile_fields: Vec<String>,
    pub core_fields: Vec<String>,
    pub diff_scalar_fields: Vec<String>,
    pub diff_block_fields: Vec<String>,
    pub action_id_keys: Vec<String>,
    pub action_type_keys: Vec<String>,
    pub action_compare_fields: Vec<String>,
    pub action_deep_fields: Vec<String>,
}

fn owned(table: &[&str]) -> Vec<String> {
    table.iter().map(|s| s.to_string()).collect()
}

impl Default for ComparisonRules {
    fn default() -> Self {
        Self {
            volatile_fields: owned(VOLATILE_FIELDS),
            core_fields: owned(CORE_FIELDS),
            diff_scalar_fields: owned(DIFF_SCALAR_FIELDS),
            diff_block_fields: owned(DIFF_BLOCK_FIELDS),
            action_id_keys: owned(ACTION_ID_KEYS),
            action_type_keys: owned(ACTION_TYPE_KEYS),
            action_compare_fields: owned(ACTION_COMPARE_FIELDS),
            action_deep_fields: owned(ACTION_DEEP_FIELDS),
        }
    }
}

impl ComparisonRules {
    pub fn is_volatile(&self, key: &str) -> bool {
        self.volatile_fields.iter().any(|field| field == key)
    }

    /// Adds extra volatile keys, ignoring ones already present.
    pub fn with_volatile_fields<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in extra {
            let field = field.into();
            if !self.is_volatile(&field) {
                self.volatile_fields.push(field);
            }
        }
        self
    }

    /// Adds extra core fields, ignoring ones already present.
    pub fn with_core_fields<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in extra {
            let field = field.into();
            if !self.core_fields.contains(&field) {
                self.core_fields.push(field);
            }
        }
        self
    }
}
