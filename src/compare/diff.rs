//! Structural differ for displaying what changed between two versions
//!
//! Scalars (`name`, `enabled`) are compared directly, actions are matched by
//! identity and compared property by property, and opaque blocks
//! (`enrollmentTriggers`, `goals`) are compared as a whole. The differ never
//! fails: malformed input becomes a single synthetic `comparison_error`
//! entry.

use crate::compare::{normalize::sorted_string, rules::ComparisonRules};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Field name used for the synthetic entry produced on malformed input.
pub const COMPARISON_ERROR_FIELD: &str = "comparison_error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// One field-level or action-level difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub kind: ChangeKind,
    /// `name`, `enabled`, `enrollmentTriggers`, `actions[<key>]`, ...
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
    pub description: String,
    /// Only filled for modified actions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_properties: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDiff {
    pub added: Vec<DiffEntry>,
    pub modified: Vec<DiffEntry>,
    pub removed: Vec<DiffEntry>,
}

impl WorkflowDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn total_changes(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    pub fn has_comparison_error(&self) -> bool {
        self.modified
            .iter()
            .any(|entry| entry.field == COMPARISON_ERROR_FIELD)
    }

    fn comparison_error(reason: &str) -> Self {
        Self {
            modified: vec![DiffEntry {
                kind: ChangeKind::Modified,
                field: COMPARISON_ERROR_FIELD.to_string(),
                old_value: Value::Null,
                new_value: Value::Null,
                description: format!("Unable to compare versions: {}", reason),
                changed_properties: Vec::new(),
            }],
            ..Self::default()
        }
    }

    fn push(&mut self, entry: DiffEntry) {
        match entry.kind {
            ChangeKind::Added => self.added.push(entry),
            ChangeKind::Removed => self.removed.push(entry),
            ChangeKind::Modified => self.modified.push(entry),
        }
    }
}

/// Compute the differences going from `old` to `new`.
pub fn diff(old: &Value, new: &Value, rules: &ComparisonRules) -> WorkflowDiff {
    match try_diff(old, new, rules) {
        Ok(result) => result,
        Err(reason) => {
            tracing::warn!("⚠️ Workflow comparison failed: {}", reason);
            WorkflowDiff::comparison_error(&reason)
        }
    }
}

fn try_diff(old: &Value, new: &Value, rules: &ComparisonRules) -> Result<WorkflowDiff, String> {
    let empty = Map::new();
    let old_doc = as_document(old, "previous", &empty)?;
    let new_doc = as_document(new, "current", &empty)?;

    let mut result = WorkflowDiff::default();

    for field in &rules.diff_scalar_fields {
        let before = old_doc.get(field).unwrap_or(&Value::Null);
        let after = new_doc.get(field).unwrap_or(&Value::Null);
        if before != after {
            result.push(DiffEntry {
                kind: ChangeKind::Modified,
                field: field.clone(),
                old_value: before.clone(),
                new_value: after.clone(),
                description: format!("'{}' changed from {} to {}", field, before, after),
                changed_properties: Vec::new(),
            });
        }
    }

    diff_actions(old_doc, new_doc, rules, &mut result)?;

    for field in &rules.diff_block_fields {
        let before = old_doc.get(field).unwrap_or(&Value::Null);
        let after = new_doc.get(field).unwrap_or(&Value::Null);
        if sorted_string(before) != sorted_string(after) {
            result.push(DiffEntry {
                kind: ChangeKind::Modified,
                field: field.clone(),
                old_value: before.clone(),
                new_value: after.clone(),
                description: format!("'{}' changed", field),
                changed_properties: Vec::new(),
            });
        }
    }

    Ok(result)
}

fn as_document<'a>(
    value: &'a Value,
    side: &str,
    empty: &'a Map<String, Value>,
) -> Result<&'a Map<String, Value>, String> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(empty),
        other => Err(format!(
            "{} document is a {} instead of an object",
            side,
            json_kind(other)
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Actions keyed by identity, in document order.
struct KeyedActions<'a> {
    order: Vec<(String, &'a Value)>,
    index: HashMap<String, usize>,
}

impl<'a> KeyedActions<'a> {
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.index.get(key).map(|&i| self.order[i].1)
    }
}

fn keyed_actions<'a>(
    doc: &'a Map<String, Value>,
    side: &str,
    rules: &ComparisonRules,
) -> Result<KeyedActions<'a>, String> {
    let actions: &[Value] = match doc.get("actions") {
        None | Some(Value::Null) => &[],
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(format!(
                "{} 'actions' is a {} instead of an array",
                side,
                json_kind(other)
            ))
        }
    };

    let mut keyed = KeyedActions {
        order: Vec::with_capacity(actions.len()),
        index: HashMap::with_capacity(actions.len()),
    };
    let mut occurrences: HashMap<String, usize> = HashMap::new();

    for action in actions {
        let base = action_key(action, rules);
        let seen = occurrences.entry(base.clone()).or_insert(0);
        *seen += 1;
        // Identical keys on one side stay distinct instead of overwriting.
        let key = if *seen == 1 {
            base
        } else {
            format!("{}#{}", base, seen)
        };
        keyed.index.insert(key.clone(), keyed.order.len());
        keyed.order.push((key, action));
    }

    Ok(keyed)
}

/// Identity of an action: explicit id, then action type, then its own JSON.
pub fn action_key(action: &Value, rules: &ComparisonRules) -> String {
    if let Some(id) = first_present(action, &rules.action_id_keys) {
        return format!("id:{}", scalar_text(id));
    }
    if let Some(type_id) = first_present(action, &rules.action_type_keys) {
        return format!("type:{}", scalar_text(type_id));
    }
    format!("json:{}", sorted_string(action))
}

fn first_present<'a>(action: &'a Value, keys: &[String]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| action.get(key))
        .find(|value| !value.is_null())
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn action_label(key: &str, action: &Value) -> String {
    match action.get("type").and_then(Value::as_str) {
        Some(kind) => format!("{} ({})", kind, key),
        None => key.to_string(),
    }
}

fn diff_actions(
    old_doc: &Map<String, Value>,
    new_doc: &Map<String, Value>,
    rules: &ComparisonRules,
    result: &mut WorkflowDiff,
) -> Result<(), String> {
    let old_actions = keyed_actions(old_doc, "previous", rules)?;
    let new_actions = keyed_actions(new_doc, "current", rules)?;

    for (key, action) in &old_actions.order {
        if new_actions.get(key).is_none() {
            result.push(DiffEntry {
                kind: ChangeKind::Removed,
                field: format!("actions[{}]", key),
                old_value: (*action).clone(),
                new_value: Value::Null,
                description: format!("Action {} removed", action_label(key, action)),
                changed_properties: Vec::new(),
            });
        }
    }

    for (key, action) in &new_actions.order {
        match old_actions.get(key) {
            None => result.push(DiffEntry {
                kind: ChangeKind::Added,
                field: format!("actions[{}]", key),
                old_value: Value::Null,
                new_value: (*action).clone(),
                description: format!("Action {} added", action_label(key, action)),
                changed_properties: Vec::new(),
            }),
            Some(previous) => {
                let changed = changed_action_properties(previous, action, rules);
                if !changed.is_empty() {
                    result.push(DiffEntry {
                        kind: ChangeKind::Modified,
                        field: format!("actions[{}]", key),
                        old_value: previous.clone(),
                        new_value: (*action).clone(),
                        description: format!(
                            "Action {} modified: {}",
                            action_label(key, action),
                            changed.join(", ")
                        ),
                        changed_properties: changed,
                    });
                }
            }
        }
    }

    Ok(())
}

fn changed_action_properties(old: &Value, new: &Value, rules: &ComparisonRules) -> Vec<String> {
    rules
        .action_compare_fields
        .iter()
        .filter(|field| {
            let before = old.get(field.as_str()).unwrap_or(&Value::Null);
            let after = new.get(field.as_str()).unwrap_or(&Value::Null);
            if rules.action_deep_fields.contains(*field) {
                sorted_string(before) != sorted_string(after)
            } else {
                before != after
            }
        })
        .cloned()
        .collect()
}
