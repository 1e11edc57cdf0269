//! Structural JSON comparison for body matching.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Strictness of a JSON body comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    /// Identical structure: same object keys, arrays in the same order.
    Strict,
    /// Expected fields must be present; extra fields and array items are
    /// ignored and array order does not matter.
    #[default]
    OnlyMatchingFields,
}

const IGNORE: &str = "${json-unit.ignore}";
const ANY_STRING: &str = "${json-unit.any-string}";
const ANY_NUMBER: &str = "${json-unit.any-number}";
const ANY_BOOLEAN: &str = "${json-unit.any-boolean}";

/// Compare `actual` against `expected` under the given strictness.
pub fn json_matches(expected: &Value, actual: &Value, match_type: MatchType) -> bool {
    if let Value::String(s) = expected {
        match s.as_str() {
            IGNORE => return true,
            ANY_STRING => return actual.is_string(),
            ANY_NUMBER => return actual.is_number(),
            ANY_BOOLEAN => return actual.is_boolean(),
            _ => {}
        }
    }

    match (expected, actual) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Object(expected), Value::Object(actual)) => {
            if match_type == MatchType::Strict && expected.len() != actual.len() {
                return false;
            }
            expected.iter().all(|(key, value)| match actual.get(key) {
                Some(found) => json_matches(value, found, match_type),
                None => value.as_str() == Some(IGNORE),
            })
        }
        (Value::Array(expected), Value::Array(actual)) => match match_type {
            MatchType::Strict => {
                expected.len() == actual.len()
                    && expected
                        .iter()
                        .zip(actual)
                        .all(|(e, a)| json_matches(e, a, match_type))
            }
            MatchType::OnlyMatchingFields => {
                let mut used = vec![false; actual.len()];
                assign_distinct(expected, actual, &mut used, match_type)
            }
        },
        _ => false,
    }
}

/// Backtracking assignment of each expected item to a distinct actual item.
fn assign_distinct(
    expected: &[Value],
    actual: &[Value],
    used: &mut [bool],
    match_type: MatchType,
) -> bool {
    let Some((first, rest)) = expected.split_first() else {
        return true;
    };
    for (index, candidate) in actual.iter().enumerate() {
        if used[index] || !json_matches(first, candidate, match_type) {
            continue;
        }
        used[index] = true;
        if assign_distinct(rest, actual, used, match_type) {
            return true;
        }
        used[index] = false;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strict_requires_identical_structure() {
        let expected = json!({"a": 1, "b": [1, 2]});
        assert!(json_matches(&expected, &json!({"b": [1, 2], "a": 1.0}), MatchType::Strict));
        assert!(!json_matches(&expected, &json!({"a": 1, "b": [2, 1]}), MatchType::Strict));
        assert!(!json_matches(&expected, &json!({"a": 1, "b": [1, 2], "c": 3}), MatchType::Strict));
    }

    #[test]
    fn test_lenient_ignores_extra_fields_and_order() {
        let expected = json!({"user": {"name": "ann"}, "tags": ["x", "y"]});
        let actual = json!({"user": {"name": "ann", "age": 3}, "tags": ["y", "z", "x"], "id": 9});
        assert!(json_matches(&expected, &actual, MatchType::OnlyMatchingFields));
        assert!(!json_matches(&expected, &json!({"user": {"name": "bob"}, "tags": ["x", "y"]}), MatchType::OnlyMatchingFields));
    }

    #[test]
    fn test_lenient_arrays_do_not_reuse_items() {
        let expected = json!([1, 1]);
        assert!(!json_matches(&expected, &json!([1, 2]), MatchType::OnlyMatchingFields));
        assert!(json_matches(&expected, &json!([1, 2, 1]), MatchType::OnlyMatchingFields));
    }

    #[test]
    fn test_lenient_array_assignment_backtracks() {
        let expected = json!([{"a": 1}, {"a": 1, "b": 2}]);
        let actual = json!([{"a": 1, "b": 2}, {"a": 1}]);
        assert!(json_matches(&expected, &actual, MatchType::OnlyMatchingFields));
    }

    #[test]
    fn test_placeholders() {
        let expected = json!({
            "id": "${json-unit.any-number}",
            "name": "${json-unit.any-string}",
            "flag": "${json-unit.any-boolean}",
            "meta": "${json-unit.ignore}"
        });
        let actual = json!({"id": 4, "name": "x", "flag": false, "meta": {"z": 1}});
        assert!(json_matches(&expected, &actual, MatchType::Strict));

        let missing_ignored = json!({"id": 4, "name": "x", "flag": true});
        assert!(json_matches(&expected, &missing_ignored, MatchType::OnlyMatchingFields));

        let wrong_kind = json!({"id": "4", "name": "x", "flag": true, "meta": null});
        assert!(!json_matches(&expected, &wrong_kind, MatchType::OnlyMatchingFields));
    }
}
