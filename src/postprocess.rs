//! Cleanup of the entity records returned by the LLM.

use serde_json::Value;
use std::collections::HashSet;

use crate::error::PostProcessError;
use crate::json::to_pretty_json;

/// Placeholder the LLM writes for a value it could not find.
pub const NAN_SENTINEL: &str = "NaN";
pub const RECORDS_KEY: &str = "invoices";
const ENTITY_FIELD: usize = 2;

fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s == NAN_SENTINEL,
        _ => false,
    }
}

/// Parse the raw LLM answer, drop records without a key field, deduplicate
/// and add a canonical-entity copy of every record that names a different
/// entity. Other top-level keys pass through untouched.
pub fn post_process(raw: &str, canonical_entity: &str) -> Result<String, PostProcessError> {
    let normalized = raw.replace('(', "[").replace(')', "]");
    let mut root: Value = serde_json::from_str(&normalized)?;
    let records = root
        .get(RECORDS_KEY)
        .and_then(Value::as_array)
        .ok_or(PostProcessError::MissingKey(RECORDS_KEY))?;

    let canonical = Value::String(canonical_entity.to_string());
    let mut seen = HashSet::new();
    let mut cleaned: Vec<Value> = Vec::with_capacity(records.len());
    let mut emit = |record: Vec<Value>, out: &mut Vec<Value>| -> Result<(), PostProcessError> {
        let record = Value::Array(record);
        if seen.insert(serde_json::to_string(&record)?) {
            out.push(record);
        }
        Ok(())
    };

    for (index, record) in records.iter().enumerate() {
        let fields = record
            .as_array()
            .ok_or(PostProcessError::NotAList { index })?;
        if fields.len() <= ENTITY_FIELD {
            return Err(PostProcessError::TooShort {
                index,
                len: fields.len(),
            });
        }
        if is_missing(&fields[0]) {
            continue;
        }

        let mut fields = fields.clone();
        if is_missing(&fields[ENTITY_FIELD]) {
            fields[ENTITY_FIELD] = canonical.clone();
        }
        let reconciled = (fields[ENTITY_FIELD] != canonical).then(|| {
            let mut copy = fields.clone();
            copy[ENTITY_FIELD] = canonical.clone();
            copy
        });
        emit(fields, &mut cleaned)?;
        if let Some(copy) = reconciled {
            emit(copy, &mut cleaned)?;
        }
    }

    root[RECORDS_KEY] = Value::Array(cleaned);
    Ok(to_pretty_json(&root)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(output: &str) -> Value {
        let parsed: Value = serde_json::from_str(output).unwrap();
        parsed[RECORDS_KEY].clone()
    }

    #[test]
    fn duplicate_nan_entities_collapse_to_canonical() {
        let out = post_process(
            r#"{"invoices": [("INV1","100","NaN"), ("INV1","100","NaN")]}"#,
            "ACME",
        )
        .unwrap();
        assert_eq!(records(&out), json!([["INV1", "100", "ACME"]]));
    }

    #[test]
    fn disagreeing_entity_keeps_both_views() {
        let out = post_process(r#"{"invoices": [("INV2","50","OTHER")]}"#, "ACME").unwrap();
        assert_eq!(
            records(&out),
            json!([["INV2", "50", "OTHER"], ["INV2", "50", "ACME"]])
        );
    }

    #[test]
    fn reconciled_copy_is_not_duplicated() {
        let out = post_process(
            r#"{"invoices": [["INV3","9","ACME","EUR"], ["INV3","9","OTHER","EUR"]]}"#,
            "ACME",
        )
        .unwrap();
        assert_eq!(
            records(&out),
            json!([["INV3", "9", "ACME", "EUR"], ["INV3", "9", "OTHER", "EUR"]])
        );
    }

    #[test]
    fn records_without_key_field_are_dropped() {
        let out = post_process(
            r#"{"invoices": [["NaN","1","ACME"], [null,"2","ACME"], ["INV4","3","ACME"]]}"#,
            "ACME",
        )
        .unwrap();
        assert_eq!(records(&out), json!([["INV4", "3", "ACME"]]));
    }

    #[test]
    fn other_keys_survive_and_output_is_indented() {
        let out = post_process(
            r#"{"vendor": "Société Générale", "invoices": [], "currency": "EUR"}"#,
            "ACME",
        )
        .unwrap();
        assert_eq!(
            out,
            "{\n    \"vendor\": \"Société Générale\",\n    \"invoices\": [],\n    \"currency\": \"EUR\"\n}"
        );
    }

    #[test]
    fn malformed_output_is_an_error() {
        assert!(matches!(
            post_process(r#"{"invoices": [["INV1","100""#, "ACME"),
            Err(PostProcessError::Json(_))
        ));
        assert!(matches!(
            post_process(r#"{"rows": []}"#, "ACME"),
            Err(PostProcessError::MissingKey("invoices"))
        ));
        assert!(matches!(
            post_process(r#"{"invoices": ["INV1"]}"#, "ACME"),
            Err(PostProcessError::NotAList { index: 0 })
        ));
        assert!(matches!(
            post_process(r#"{"invoices": [["INV1","100"]]}"#, "ACME"),
            Err(PostProcessError::TooShort { index: 0, len: 2 })
        ));
    }
}
