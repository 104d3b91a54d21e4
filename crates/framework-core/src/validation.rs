//! Output validation against a plugin's declared contract.
use serde_json::{Map, Value};

use crate::plugin::{OutputContract, OutputType};

/// Merges run options into a dict template.
///
/// Only template keys survive; a template value is replaced when the options
/// supply the same key.
pub fn merge_template(template: &Map<String, Value>, options: &Map<String, Value>) -> Map<String, Value> {
    template
        .iter()
        .map(|(key, default)| {
            let value = options.get(key).cloned().unwrap_or_else(|| default.clone());
            (key.clone(), value)
        })
        .collect()
}

/// Checks `value` against `contract`, returning a readable reason on mismatch.
///
/// Dict templates are compared key by key: the key sets must be equal and
/// every key pinned to a non-null value (after merging options) must come
/// back with that value.
pub fn validate_output(
    contract: &OutputContract,
    value: &Value,
    options: &Map<String, Value>,
) -> Result<(), String> {
    if !contract.output_type.matches(value) {
        return Err(format!(
            "returned {:?}, expected {:?}",
            OutputType::of(value),
            contract.output_type
        ));
    }

    let Some(template) = &contract.value else {
        return Ok(());
    };

    match (template, value) {
        (Value::Object(template), Value::Object(result)) => {
            validate_dict(&merge_template(template, options), result)
        }
        (expected, actual) if expected == actual => Ok(()),
        (expected, actual) => Err(format!("returned {}, expected {}", actual, expected)),
    }
}

fn validate_dict(expected: &Map<String, Value>, result: &Map<String, Value>) -> Result<(), String> {
    let mut missing: Vec<&str> = expected
        .keys()
        .filter(|k| !result.contains_key(*k))
        .map(String::as_str)
        .collect();
    let mut unexpected: Vec<&str> = result
        .keys()
        .filter(|k| !expected.contains_key(*k))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() || !unexpected.is_empty() {
        missing.sort_unstable();
        unexpected.sort_unstable();
        return Err(format!(
            "key mismatch: missing [{}], unexpected [{}]",
            missing.join(", "),
            unexpected.join(", ")
        ));
    }

    for (key, pinned) in expected {
        if pinned.is_null() {
            continue;
        }
        if result.get(key) != Some(pinned) {
            return Err(format!(
                "value mismatch for '{}': returned {}, expected {}",
                key,
                result.get(key).unwrap_or(&Value::Null),
                pinned
            ));
        }
    }
    Ok(())
}
