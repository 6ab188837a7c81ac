//! Cross-agent conflict detection
//!
//! Agents that make technology choices report them under a `decisions`
//! object (`{"primary_datastore": "postgresql", ...}`). Two outputs conflict
//! when they name different values on the same axis. String values compare
//! case- and whitespace-insensitively.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::domain::{AnnotationKind, ReviewAnnotation};

fn normalized(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_lowercase()),
        other => other.clone(),
    }
}

/// One annotation per decision axis with more than one distinct value
///
/// Output is ordered by axis name.
pub fn detect_conflicts<'a>(outputs: impl IntoIterator<Item = (&'a str, &'a Value)>) -> Vec<ReviewAnnotation> {
    let mut axes: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
    for (step_id, output) in outputs {
        let Some(decisions) = output.get("decisions").and_then(Value::as_object) else {
            continue;
        };
        for (axis, value) in decisions {
            if value.is_null() {
                continue;
            }
            axes.entry(axis.clone())
                .or_default()
                .insert(step_id.to_string(), value.clone());
        }
    }

    axes.into_iter()
        .filter_map(|(axis, values)| {
            let mut distinct: Vec<Value> = Vec::new();
            for value in values.values().map(normalized) {
                if !distinct.contains(&value) {
                    distinct.push(value);
                }
            }
            if distinct.len() < 2 {
                return None;
            }
            let summary = values
                .iter()
                .map(|(step, value)| format!("{}={}", step, value))
                .collect::<Vec<_>>()
                .join(", ");
            Some(ReviewAnnotation {
                kind: AnnotationKind::ConflictDetected,
                message: format!("agents disagree on {}: {}", axis, summary),
                axis: Some(axis),
                values,
            })
        })
        .collect()
}
