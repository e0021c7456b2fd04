//! Pattern extraction from structured document output.
//!
//! A processed document arrives as a JSON object. Each field contributes a
//! field-shape observation (`field:<path>:<type>`), numeric fields add an
//! amount-range observation (`amount:<path>:<bucket>`), and short string
//! values add a concept observation (`concept:<normalized text>`). The
//! resulting keys are plain token strings so the store can fuzzy-merge them
//! by token overlap.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::{
    error::{Error, Result},
    keywords::tokenize,
    store::PatternObservation,
};

/// A string value longer than this is treated as prose, not a concept label.
const MAX_CONCEPT_LEN: usize = 48;

/// Nested objects are flattened with dotted paths down to this depth.
const MAX_DEPTH: usize = 3;

/// Extract pattern observations from a document's structured output.
///
/// The top-level value must be a JSON object; anything else is malformed
/// and yields [`Error::Parse`]. An empty object yields no observations.
pub fn extract_patterns(document_data: &Value, confidence: f32) -> Result<Vec<PatternObservation>> {
    let Some(object) = document_data.as_object() else {
        return Err(Error::Parse(format!(
            "document data must be a JSON object, got {}",
            json_type(document_data)
        )));
    };

    let mut observations = Vec::new();
    collect(object, "", 0, confidence, &mut observations);
    Ok(observations)
}

fn collect(
    object: &serde_json::Map<String, Value>,
    prefix: &str,
    depth: usize,
    confidence: f32,
    out: &mut Vec<PatternObservation>,
) {
    for (name, value) in object {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };

        out.push(PatternObservation {
            key: format!("field:{path}:{}", json_type(value)),
            confidence,
            metadata: BTreeMap::new(),
        });

        match value {
            Value::Number(n) => {
                if let Some(amount) = n.as_f64() {
                    let mut metadata = BTreeMap::new();
                    metadata.insert("last_value".to_string(), value.clone());
                    out.push(PatternObservation {
                        key: format!("amount:{path}:{}", amount_bucket(amount)),
                        confidence,
                        metadata,
                    });
                }
            }
            Value::String(s) => {
                if let Some(concept) = normalize_concept(s) {
                    out.push(PatternObservation {
                        key: format!("concept:{concept}"),
                        confidence,
                        metadata: BTreeMap::new(),
                    });
                }
            }
            Value::Object(nested) if depth + 1 < MAX_DEPTH => {
                collect(nested, &path, depth + 1, confidence, out);
            }
            _ => {}
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Order-of-magnitude bucket for a monetary or numeric value, so that
/// recurring amounts in the same range reinforce one pattern instead of
/// producing one pattern per exact value.
fn amount_bucket(amount: f64) -> String {
    if amount == 0.0 {
        return "zero".to_string();
    }
    let sign = if amount < 0.0 { "neg_" } else { "" };
    let magnitude = amount.abs();
    let bucket = if magnitude < 1.0 {
        "sub_1"
    } else if magnitude < 10.0 {
        "1_10"
    } else if magnitude < 100.0 {
        "10_100"
    } else if magnitude < 1_000.0 {
        "100_1k"
    } else if magnitude < 10_000.0 {
        "1k_10k"
    } else if magnitude < 100_000.0 {
        "10k_100k"
    } else {
        "100k_plus"
    };
    format!("{sign}{bucket}")
}

/// Normalize a short string value into a concept key, or `None` when the
/// value reads as prose or carries no usable tokens.
fn normalize_concept(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_CONCEPT_LEN {
        return None;
    }
    let tokens = tokenize(trimmed);
    if tokens.is_empty() {
        return None;
    }
    Some(tokens.join(" "))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn keys(observations: &[PatternObservation]) -> Vec<&str> {
        observations.iter().map(|o| o.key.as_str()).collect()
    }

    #[test]
    fn rejects_non_object_data() {
        for value in [json!(null), json!(42), json!("text"), json!([1, 2])] {
            let err = extract_patterns(&value, 0.5).unwrap_err();
            assert!(matches!(err, Error::Parse(_)), "{value}");
        }
    }

    #[test]
    fn empty_object_yields_nothing() {
        assert!(extract_patterns(&json!({}), 0.5).unwrap().is_empty());
    }

    #[test]
    fn field_shapes_for_every_top_level_field() {
        let data = json!({
            "employee_name": "Jane Doe",
            "net_salary": 2100.50,
            "is_final": true,
            "deductions": [1, 2],
        });
        let observations = extract_patterns(&data, 0.5).unwrap();
        let keys = keys(&observations);
        assert!(keys.contains(&"field:employee_name:string"));
        assert!(keys.contains(&"field:net_salary:number"));
        assert!(keys.contains(&"field:is_final:boolean"));
        assert!(keys.contains(&"field:deductions:array"));
    }

    #[test]
    fn numbers_add_amount_ranges() {
        let data = json!({"net_salary": 2100.0, "tax_rate": 0.21, "gross": 0});
        let observations = extract_patterns(&data, 0.5).unwrap();
        let keys = keys(&observations);
        assert!(keys.contains(&"amount:net_salary:1k_10k"));
        assert!(keys.contains(&"amount:tax_rate:sub_1"));
        assert!(keys.contains(&"amount:gross:zero"));
    }

    #[test]
    fn amount_observation_remembers_last_value() {
        let data = json!({"net_salary": 2100.0});
        let observations = extract_patterns(&data, 0.5).unwrap();
        let amount = observations
            .iter()
            .find(|o| o.key.starts_with("amount:"))
            .unwrap();
        assert_eq!(amount.metadata.get("last_value"), Some(&json!(2100.0)));
    }

    #[test]
    fn short_strings_become_concepts() {
        let data = json!({"category": "Pension Contribution"});
        let observations = extract_patterns(&data, 0.5).unwrap();
        assert!(keys(&observations).contains(&"concept:pension contribution"));
    }

    #[test]
    fn prose_strings_are_not_concepts() {
        let long = "a".repeat(MAX_CONCEPT_LEN + 1);
        let data = json!({"notes": long, "empty": "  ", "punct": "---"});
        let observations = extract_patterns(&data, 0.5).unwrap();
        assert!(!keys(&observations).iter().any(|k| k.starts_with("concept:")));
    }

    #[test]
    fn nested_objects_use_dotted_paths() {
        let data = json!({
            "employer": {"name": "Acme", "address": {"city": "Berlin"}}
        });
        let observations = extract_patterns(&data, 0.5).unwrap();
        let keys = keys(&observations);
        assert!(keys.contains(&"field:employer:object"));
        assert!(keys.contains(&"field:employer.name:string"));
        assert!(keys.contains(&"field:employer.address:object"));
        assert!(keys.contains(&"field:employer.address.city:string"));
    }

    #[test]
    fn recursion_stops_at_depth_limit() {
        let data = json!({"a": {"b": {"c": {"d": 1}}}});
        let observations = extract_patterns(&data, 0.5).unwrap();
        let keys = keys(&observations);
        assert!(keys.contains(&"field:a.b.c:object"));
        assert!(!keys.iter().any(|k| k.contains("a.b.c.d")));
    }

    #[test]
    fn confidence_is_carried_through() {
        let data = json!({"net_salary": 2100.0});
        let observations = extract_patterns(&data, 0.8).unwrap();
        assert!(observations.iter().all(|o| o.confidence == 0.8));
    }

    #[test]
    fn amount_buckets_cover_magnitudes() {
        assert_eq!(amount_bucket(0.0), "zero");
        assert_eq!(amount_bucket(0.5), "sub_1");
        assert_eq!(amount_bucket(5.0), "1_10");
        assert_eq!(amount_bucket(50.0), "10_100");
        assert_eq!(amount_bucket(500.0), "100_1k");
        assert_eq!(amount_bucket(5_000.0), "1k_10k");
        assert_eq!(amount_bucket(50_000.0), "10k_100k");
        assert_eq!(amount_bucket(5_000_000.0), "100k_plus");
        assert_eq!(amount_bucket(-2_100.0), "neg_1k_10k");
    }
}
