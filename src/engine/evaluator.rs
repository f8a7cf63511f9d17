//! Condition evaluation over discovered items.
//!
//! A leaf evaluates one field-operator-expected triple; boolean nodes fold
//! child verdicts. ERROR means "could not be evaluated" and is kept distinct
//! from FAIL throughout: a missing field under any operator other than the
//! existence pair is ERROR, never FAIL.

use crate::catalog::model::{ConditionNode, FieldCondition, Operator};
use crate::engine::resolver::FieldPath;
use crate::engine::value::{FieldMap, Resolved, Value};

/// Outcome of evaluating a condition against one item
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Pass,
    Fail,
    Error(String),
}

impl Verdict {
    fn from_bool(pass: bool) -> Verdict {
        if pass { Verdict::Pass } else { Verdict::Fail }
    }
}

/// Evaluate a condition tree against one item's fields
pub fn evaluate(node: &ConditionNode, fields: &FieldMap) -> Verdict {
    match node {
        ConditionNode::All { all } => fold_all(all, fields),
        ConditionNode::Any { any } => fold_any(any, fields),
        ConditionNode::Not { not } => match evaluate(not, fields) {
            Verdict::Pass => Verdict::Fail,
            Verdict::Fail => Verdict::Pass,
            err @ Verdict::Error(_) => err,
        },
        ConditionNode::Leaf(leaf) => evaluate_leaf(leaf, fields),
    }
}

/// AND fold: FAIL wins over ERROR, ERROR wins over PASS
fn fold_all(children: &[ConditionNode], fields: &FieldMap) -> Verdict {
    let mut error: Option<Verdict> = None;

    for child in children {
        match evaluate(child, fields) {
            Verdict::Pass => {}
            Verdict::Fail => return Verdict::Fail,
            err @ Verdict::Error(_) => {
                if error.is_none() {
                    error = Some(err);
                }
            }
        }
    }

    error.unwrap_or(Verdict::Pass)
}

/// OR fold: PASS wins; ERROR surfaces only when no child passed
fn fold_any(children: &[ConditionNode], fields: &FieldMap) -> Verdict {
    let mut error: Option<Verdict> = None;

    for child in children {
        match evaluate(child, fields) {
            Verdict::Pass => return Verdict::Pass,
            Verdict::Fail => {}
            err @ Verdict::Error(_) => {
                if error.is_none() {
                    error = Some(err);
                }
            }
        }
    }

    error.unwrap_or(Verdict::Fail)
}

/// Evaluate a single field condition
pub fn evaluate_leaf(leaf: &FieldCondition, fields: &FieldMap) -> Verdict {
    let path = match FieldPath::parse(&leaf.path) {
        Ok(path) => path,
        Err(e) => return Verdict::Error(e.to_string()),
    };

    let resolved = path.resolve_in_map(fields);

    match leaf.operator {
        Operator::Exists => {
            // Absent and present-but-empty both count as missing here
            let present = matches!(&resolved, Resolved::Present(v) if !v.is_empty());
            Verdict::from_bool(present)
        }
        Operator::NotExists => {
            let present = matches!(&resolved, Resolved::Present(v) if !v.is_empty());
            Verdict::from_bool(!present)
        }
        _ => {
            let value = match resolved {
                Resolved::Present(value) => value,
                Resolved::Absent => {
                    return Verdict::Error(format!("field '{}' is absent", leaf.path));
                }
            };

            apply_operator(leaf, &value)
        }
    }
}

fn apply_operator(leaf: &FieldCondition, value: &Value) -> Verdict {
    match leaf.operator {
        Operator::Equals => Verdict::from_bool(Some(value) == leaf.expected.as_ref()),
        Operator::NotEquals => Verdict::from_bool(Some(value) != leaf.expected.as_ref()),
        Operator::Contains => contains(leaf, value).map(Verdict::from_bool).unwrap_or_else(
            |detail| Verdict::Error(detail),
        ),
        Operator::NotContains => contains(leaf, value)
            .map(|c| Verdict::from_bool(!c))
            .unwrap_or_else(|detail| Verdict::Error(detail)),
        Operator::Gt => numeric(leaf, value, |a, b| a > b),
        Operator::Gte => numeric(leaf, value, |a, b| a >= b),
        Operator::Lt => numeric(leaf, value, |a, b| a < b),
        Operator::Lte => numeric(leaf, value, |a, b| a <= b),
        Operator::In => membership(leaf, value).map(Verdict::from_bool).unwrap_or_else(
            |detail| Verdict::Error(detail),
        ),
        Operator::NotIn => membership(leaf, value)
            .map(|m| Verdict::from_bool(!m))
            .unwrap_or_else(|detail| Verdict::Error(detail)),
        Operator::IsEmpty => emptiness(leaf, value).map(Verdict::from_bool).unwrap_or_else(
            |detail| Verdict::Error(detail),
        ),
        Operator::IsNotEmpty => emptiness(leaf, value)
            .map(|e| Verdict::from_bool(!e))
            .unwrap_or_else(|detail| Verdict::Error(detail)),
        // Handled before apply_operator
        Operator::Exists | Operator::NotExists => unreachable!(),
    }
}

/// Substring test for strings, membership for lists, key membership for maps
fn contains(leaf: &FieldCondition, value: &Value) -> Result<bool, String> {
    let expected = leaf
        .expected
        .as_ref()
        .ok_or_else(|| format!("operator '{}' requires 'expected'", leaf.operator.as_str()))?;

    match value {
        Value::String(s) => Ok(s.contains(&expected.to_string())),
        Value::List(items) => Ok(items.contains(expected)),
        Value::Map(map) => Ok(map.contains_key(&expected.to_string())),
        other => Err(format!(
            "operator '{}' not applicable to {} value at '{}'",
            leaf.operator.as_str(),
            other.type_name(),
            leaf.path
        )),
    }
}

fn numeric(leaf: &FieldCondition, value: &Value, cmp: fn(f64, f64) -> bool) -> Verdict {
    let left = match value.as_number() {
        Some(n) => n,
        None => {
            return Verdict::Error(format!(
                "operator '{}' requires a numeric field, got {} at '{}'",
                leaf.operator.as_str(),
                value.type_name(),
                leaf.path
            ));
        }
    };

    let right = match leaf.expected.as_ref().and_then(Value::as_number) {
        Some(n) => n,
        None => {
            return Verdict::Error(format!(
                "operator '{}' requires a numeric 'expected' for '{}'",
                leaf.operator.as_str(),
                leaf.path
            ));
        }
    };

    Verdict::from_bool(cmp(left, right))
}

fn membership(leaf: &FieldCondition, value: &Value) -> Result<bool, String> {
    match leaf.expected.as_ref() {
        Some(Value::List(expected)) => Ok(expected.contains(value)),
        Some(other) => Err(format!(
            "operator '{}' requires a list 'expected', got {}",
            leaf.operator.as_str(),
            other.type_name()
        )),
        None => Err(format!(
            "operator '{}' requires 'expected'",
            leaf.operator.as_str()
        )),
    }
}

/// Present empty collection/string test; scalars are never empty
fn emptiness(leaf: &FieldCondition, value: &Value) -> Result<bool, String> {
    match value {
        Value::String(_) | Value::List(_) | Value::Map(_) | Value::Null => Ok(value.is_empty()),
        other => Err(format!(
            "operator '{}' not applicable to {} value at '{}'",
            leaf.operator.as_str(),
            other.type_name(),
            leaf.path
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn fields(pairs: &[(&str, Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn leaf(path: &str, operator: Operator, expected: Option<Value>) -> FieldCondition {
        FieldCondition {
            path: path.to_string(),
            operator,
            expected,
        }
    }

    #[test]
    fn test_equals_pass_and_fail() {
        let item = fields(&[("versioning_status", Value::from("Enabled"))]);

        let condition = leaf("versioning_status", Operator::Equals, Some("Enabled".into()));
        assert_eq!(evaluate_leaf(&condition, &item), Verdict::Pass);

        let condition = leaf("versioning_status", Operator::Equals, Some("Suspended".into()));
        assert_eq!(evaluate_leaf(&condition, &item), Verdict::Fail);
    }

    #[test]
    fn test_equals_cross_type_is_fail_not_error() {
        let item = fields(&[("count", Value::Number(1.0))]);

        let condition = leaf("count", Operator::Equals, Some("1".into()));
        assert_eq!(evaluate_leaf(&condition, &item), Verdict::Fail);

        let condition = leaf("count", Operator::NotEquals, Some("1".into()));
        assert_eq!(evaluate_leaf(&condition, &item), Verdict::Pass);
    }

    #[test]
    fn test_absent_field_is_error_for_non_existence_operators() {
        let item = fields(&[]);

        for operator in [
            Operator::Equals,
            Operator::NotEquals,
            Operator::Contains,
            Operator::Gt,
            Operator::In,
            Operator::IsEmpty,
            Operator::IsNotEmpty,
        ] {
            let condition = leaf("missing", operator, Some(Value::List(vec!["x".into()])));
            assert!(
                matches!(evaluate_leaf(&condition, &item), Verdict::Error(_)),
                "operator {:?} on absent field must be ERROR",
                operator
            );
        }
    }

    #[test]
    fn test_exists_on_absent_is_fail_not_error() {
        let item = fields(&[]);
        let condition = leaf("missing", Operator::Exists, None);
        assert_eq!(evaluate_leaf(&condition, &item), Verdict::Fail);

        let condition = leaf("missing", Operator::NotExists, None);
        assert_eq!(evaluate_leaf(&condition, &item), Verdict::Pass);
    }

    #[test]
    fn test_exists_treats_empty_as_missing() {
        let item = fields(&[("tags", Value::List(Vec::new()))]);
        let condition = leaf("tags", Operator::Exists, None);
        assert_eq!(evaluate_leaf(&condition, &item), Verdict::Fail);

        let item = fields(&[("tags", Value::List(vec!["a".into()]))]);
        let condition = leaf("tags", Operator::Exists, None);
        assert_eq!(evaluate_leaf(&condition, &item), Verdict::Pass);
    }

    #[test]
    fn test_contains_string_list_map() {
        let item = fields(&[
            ("policy", Value::from("allow s3:GetObject on *")),
            ("tags", Value::List(vec!["prod".into(), "team-a".into()])),
            (
                "labels",
                Value::Map(fields(&[("env", Value::from("prod"))])),
            ),
        ]);

        assert_eq!(
            evaluate_leaf(&leaf("policy", Operator::Contains, Some("GetObject".into())), &item),
            Verdict::Pass
        );
        assert_eq!(
            evaluate_leaf(&leaf("tags", Operator::Contains, Some("prod".into())), &item),
            Verdict::Pass
        );
        assert_eq!(
            evaluate_leaf(&leaf("labels", Operator::Contains, Some("env".into())), &item),
            Verdict::Pass
        );
        assert_eq!(
            evaluate_leaf(&leaf("tags", Operator::NotContains, Some("dev".into())), &item),
            Verdict::Pass
        );
    }

    #[test]
    fn test_numeric_comparisons() {
        let item = fields(&[("retention_days", Value::Number(30.0))]);

        assert_eq!(
            evaluate_leaf(&leaf("retention_days", Operator::Gte, Some(Value::Number(30.0))), &item),
            Verdict::Pass
        );
        assert_eq!(
            evaluate_leaf(&leaf("retention_days", Operator::Gt, Some(Value::Number(30.0))), &item),
            Verdict::Fail
        );
        assert_eq!(
            evaluate_leaf(&leaf("retention_days", Operator::Lt, Some(Value::Number(90.0))), &item),
            Verdict::Pass
        );
    }

    #[test]
    fn test_numeric_on_non_numeric_is_error() {
        let item = fields(&[("retention_days", Value::from("thirty"))]);
        let verdict = evaluate_leaf(&leaf("retention_days", Operator::Gt, Some(Value::Number(7.0))), &item);
        assert!(matches!(verdict, Verdict::Error(_)));

        let item = fields(&[("retention_days", Value::Number(30.0))]);
        let verdict = evaluate_leaf(
            &leaf("retention_days", Operator::Gt, Some("seven".into())),
            &item,
        );
        assert!(matches!(verdict, Verdict::Error(_)));
    }

    #[test]
    fn test_in_and_not_in() {
        let item = fields(&[("tls_version", Value::from("1.2"))]);
        let allowed = Value::List(vec!["1.2".into(), "1.3".into()]);

        assert_eq!(
            evaluate_leaf(&leaf("tls_version", Operator::In, Some(allowed.clone())), &item),
            Verdict::Pass
        );
        assert_eq!(
            evaluate_leaf(&leaf("tls_version", Operator::NotIn, Some(allowed)), &item),
            Verdict::Fail
        );
    }

    #[test]
    fn test_is_empty_semantics() {
        let item = fields(&[("rules", Value::List(Vec::new()))]);
        assert_eq!(
            evaluate_leaf(&leaf("rules", Operator::IsEmpty, None), &item),
            Verdict::Pass
        );
        assert_eq!(
            evaluate_leaf(&leaf("rules", Operator::IsNotEmpty, None), &item),
            Verdict::Fail
        );

        // Absent is not empty, it is an evaluation error
        let verdict = evaluate_leaf(&leaf("missing", Operator::IsEmpty, None), &fields(&[]));
        assert!(matches!(verdict, Verdict::Error(_)));
    }

    #[test]
    fn test_and_fold_fail_beats_error() {
        let item = fields(&[("status", Value::from("Suspended"))]);

        let node = ConditionNode::All {
            all: vec![
                ConditionNode::Leaf(leaf("status", Operator::Equals, Some("Enabled".into()))),
                ConditionNode::Leaf(leaf("missing", Operator::Equals, Some("x".into()))),
            ],
        };

        assert_eq!(evaluate(&node, &item), Verdict::Fail);
    }

    #[test]
    fn test_and_fold_error_beats_pass() {
        let item = fields(&[("status", Value::from("Enabled"))]);

        let node = ConditionNode::All {
            all: vec![
                ConditionNode::Leaf(leaf("status", Operator::Equals, Some("Enabled".into()))),
                ConditionNode::Leaf(leaf("missing", Operator::Equals, Some("x".into()))),
            ],
        };

        assert!(matches!(evaluate(&node, &item), Verdict::Error(_)));
    }

    #[test]
    fn test_and_fold_all_pass() {
        let item = fields(&[
            ("status", Value::from("Enabled")),
            ("mfa", Value::Bool(true)),
        ]);

        let node = ConditionNode::All {
            all: vec![
                ConditionNode::Leaf(leaf("status", Operator::Equals, Some("Enabled".into()))),
                ConditionNode::Leaf(leaf("mfa", Operator::Equals, Some(true.into()))),
            ],
        };

        assert_eq!(evaluate(&node, &item), Verdict::Pass);
    }

    #[test]
    fn test_or_fold_pass_beats_error() {
        let item = fields(&[("status", Value::from("Enabled"))]);

        let node = ConditionNode::Any {
            any: vec![
                ConditionNode::Leaf(leaf("missing", Operator::Equals, Some("x".into()))),
                ConditionNode::Leaf(leaf("status", Operator::Equals, Some("Enabled".into()))),
            ],
        };

        assert_eq!(evaluate(&node, &item), Verdict::Pass);
    }

    #[test]
    fn test_or_fold_error_surfaces_without_pass() {
        let item = fields(&[("status", Value::from("Suspended"))]);

        let node = ConditionNode::Any {
            any: vec![
                ConditionNode::Leaf(leaf("missing", Operator::Equals, Some("x".into()))),
                ConditionNode::Leaf(leaf("status", Operator::Equals, Some("Enabled".into()))),
            ],
        };

        assert!(matches!(evaluate(&node, &item), Verdict::Error(_)));
    }

    #[test]
    fn test_not_inverts_pass_fail_and_keeps_error() {
        let item = fields(&[("status", Value::from("Enabled"))]);

        let node = ConditionNode::Not {
            not: Box::new(ConditionNode::Leaf(leaf(
                "status",
                Operator::Equals,
                Some("Enabled".into()),
            ))),
        };
        assert_eq!(evaluate(&node, &item), Verdict::Fail);

        let node = ConditionNode::Not {
            not: Box::new(ConditionNode::Leaf(leaf(
                "missing",
                Operator::Equals,
                Some("x".into()),
            ))),
        };
        assert!(matches!(evaluate(&node, &item), Verdict::Error(_)));
    }
}
