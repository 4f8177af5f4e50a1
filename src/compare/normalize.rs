//! Workflow document normalization
//!
//! Produces the canonical form two documents are compared in: volatile keys
//! removed at every level, object keys in alphabetical order, array order
//! untouched. The input is never mutated.

use crate::compare::rules::ComparisonRules;
use serde_json::{Map, Value};

/// Canonicalize `doc` using the given field tables.
pub fn normalize(doc: &Value, rules: &ComparisonRules) -> Value {
    match doc {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map
                .iter()
                .filter(|(key, _)| !rules.is_volatile(key))
                .collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            let mut normalized = Map::new();
            for (key, value) in entries {
                normalized.insert(key.clone(), normalize(value, rules));
            }
            Value::Object(normalized)
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| normalize(item, rules)).collect()),
        scalar => scalar.clone(),
    }
}

/// Normalize and serialize; equal strings mean semantically equal documents.
pub fn canonical_string(doc: &Value, rules: &ComparisonRules) -> String {
    normalize(doc, rules).to_string()
}

/// Serialize with sorted keys but without dropping any field.
pub fn sorted_string(doc: &Value) -> String {
    sort_keys(doc).to_string()
}

fn sort_keys(doc: &Value) -> Value {
    match doc {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), sort_keys(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        scalar => scalar.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules() -> ComparisonRules {
        ComparisonRules::default()
    }

    fn sample() -> Value {
        json!({
            "name": "Welcome series",
            "id": 4411,
            "portalId": 99,
            "updatedAt": 1700000000000u64,
            "enabled": true,
            "actions": [
                { "id": "a1", "type": "DELAY", "delayMillis": 3600000, "createdAt": 1 },
                { "type": "EMAIL", "settings": { "z": 1, "a": { "revision": 3, "keep": true } } }
            ],
            "statistics": { "enrolled": 10 }
        })
    }

    #[test]
    fn strips_volatile_keys_at_every_level() {
        let normalized = normalize(&sample(), &rules());

        assert_eq!(
            normalized,
            json!({
                "actions": [
                    { "delayMillis": 3600000, "type": "DELAY" },
                    { "settings": { "a": { "keep": true }, "z": 1 }, "type": "EMAIL" }
                ],
                "enabled": true,
                "name": "Welcome series"
            })
        );
    }

    #[test]
    fn keeps_unknown_keys() {
        let doc = json!({ "customFlag": "x", "nested": { "anotherUnknown": 1 } });
        assert_eq!(normalize(&doc, &rules()), doc);
    }

    #[test]
    fn does_not_mutate_input() {
        let doc = sample();
        let before = doc.clone();
        let _ = normalize(&doc, &rules());
        assert_eq!(doc, before);
    }

    #[test]
    fn is_idempotent() {
        let once = normalize(&sample(), &rules());
        let twice = normalize(&once, &rules());
        assert_eq!(once, twice);
        assert_eq!(canonical_string(&once, &rules()), canonical_string(&twice, &rules()));
    }

    #[test]
    fn ignores_key_order() {
        let a: Value =
            serde_json::from_str(r#"{"b":{"y":2,"x":1},"a":[{"q":1,"p":2}],"updatedAt":5}"#).unwrap();
        let b: Value =
            serde_json::from_str(r#"{"a":[{"p":2,"q":1}],"updatedAt":9,"b":{"x":1,"y":2}}"#).unwrap();

        assert_eq!(canonical_string(&a, &rules()), canonical_string(&b, &rules()));
    }

    #[test]
    fn canonical_output_is_alphabetical() {
        let doc = json!({ "zeta": 1, "alpha": { "d": 1, "c": 2 } });
        assert_eq!(canonical_string(&doc, &rules()), r#"{"alpha":{"c":2,"d":1},"zeta":1}"#);
    }

    #[test]
    fn array_order_is_significant() {
        let a = json!({ "actions": [{ "type": "A" }, { "type": "B" }] });
        let b = json!({ "actions": [{ "type": "B" }, { "type": "A" }] });
        assert_ne!(canonical_string(&a, &rules()), canonical_string(&b, &rules()));
    }

    #[test]
    fn extended_rules_strip_extra_keys() {
        let custom = rules().with_volatile_fields(["syncToken"]);
        let doc = json!({ "name": "n", "syncToken": "abc" });
        assert_eq!(normalize(&doc, &custom), json!({ "name": "n" }));
    }

    #[test]
    fn sorted_string_keeps_volatile_keys() {
        let doc = json!({ "updatedAt": 1, "name": "n" });
        assert_eq!(sorted_string(&doc), r#"{"name":"n","updatedAt":1}"#);
    }
}
