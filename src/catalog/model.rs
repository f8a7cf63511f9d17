use crate::engine::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a service's resources live per-region or once per account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceScope {
    Global,
    Regional,
}

impl ServiceScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceScope::Global => "global",
            ServiceScope::Regional => "regional",
        }
    }
}

/// One provider API call made by a discovery step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    /// Provider action name, e.g. `storage.ListBuckets`
    pub action: String,

    /// Parameter templates; string values may contain `{{path}}` placeholders
    /// resolved against the parent item's fields
    #[serde(default)]
    pub params: BTreeMap<String, Value>,

    /// Whether the action pages its results via a continuation token
    #[serde(default)]
    pub paginated: bool,
}

/// Projection from a raw call response into emitted items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emit {
    /// Expression selecting the iterable to fan out over; absent means the
    /// whole response becomes a single synthetic item
    #[serde(default)]
    pub items: Option<String>,

    /// Loop-variable name the selected elements are bound to
    #[serde(default = "default_loop_var", rename = "as")]
    pub loop_var: String,

    /// Output-field name -> path expression
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

fn default_loop_var() -> String {
    "item".to_string()
}

/// One node in a service's resource-enumeration graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryStep {
    /// Unique id within the service
    pub discovery_id: String,

    /// Parent step to fan out from; absent means this is a root step
    #[serde(default)]
    pub for_each: Option<String>,

    pub calls: Vec<Call>,

    pub emit: Emit,
}

/// Comparison operator of a condition leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Exists,
    NotExists,
    Contains,
    NotContains,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    IsEmpty,
    IsNotEmpty,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::Exists => "exists",
            Operator::NotExists => "not_exists",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::IsEmpty => "is_empty",
            Operator::IsNotEmpty => "is_not_empty",
        }
    }

    /// Whether the operator needs an `expected` operand
    pub fn requires_expected(&self) -> bool {
        !matches!(
            self,
            Operator::Exists
                | Operator::NotExists
                | Operator::IsEmpty
                | Operator::IsNotEmpty
        )
    }
}

/// A single field-operator-expected triple
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldCondition {
    pub path: String,
    pub operator: Operator,
    #[serde(default)]
    pub expected: Option<Value>,
}

/// Boolean condition tree combining field conditions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    All { all: Vec<ConditionNode> },
    Any { any: Vec<ConditionNode> },
    Not { not: Box<ConditionNode> },
    Leaf(FieldCondition),
}

/// Severity of a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

/// A declarative compliance check evaluated per discovered item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDefinition {
    /// Globally unique rule identifier
    pub rule_id: String,

    pub title: String,

    pub severity: Severity,

    /// Discovery step whose items this check runs over
    pub for_each: String,

    pub condition: ConditionNode,
}

/// One service's rule-definition document. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub service: String,

    pub scope: ServiceScope,

    #[serde(default)]
    pub discovery: Vec<DiscoveryStep>,

    #[serde(default)]
    pub checks: Vec<CheckDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_service_definition() {
        let yaml = r#"
service: storage
scope: regional
discovery:
  - discovery_id: buckets
    calls:
      - action: storage.ListBuckets
        paginated: true
    emit:
      items: buckets
      as: bucket
      fields:
        name: bucket.name
  - discovery_id: bucket_versioning
    for_each: buckets
    calls:
      - action: storage.GetBucketVersioning
        params:
          bucket: "{{name}}"
    emit:
      fields:
        versioning_status: status
checks:
  - rule_id: storage.bucket.versioning_enabled
    title: Bucket versioning should be enabled
    severity: high
    for_each: bucket_versioning
    condition:
      path: versioning_status
      operator: equals
      expected: Enabled
"#;

        let def: ServiceDefinition = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(def.service, "storage");
        assert_eq!(def.scope, ServiceScope::Regional);
        assert_eq!(def.discovery.len(), 2);
        assert_eq!(def.discovery[0].emit.loop_var, "bucket");
        assert_eq!(def.discovery[1].for_each.as_deref(), Some("buckets"));
        assert!(def.discovery[0].calls[0].paginated);

        let check = &def.checks[0];
        assert_eq!(check.severity, Severity::High);
        match &check.condition {
            ConditionNode::Leaf(leaf) => {
                assert_eq!(leaf.operator, Operator::Equals);
                assert_eq!(leaf.expected, Some(Value::String("Enabled".to_string())));
            }
            other => panic!("expected leaf condition, got {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_nested_condition_tree() {
        let yaml = r#"
any:
  - path: encryption.enabled
    operator: equals
    expected: true
  - all:
      - path: kms_key
        operator: exists
      - not:
          path: kms_key
          operator: equals
          expected: ""
"#;

        let node: ConditionNode = serde_yaml::from_str(yaml).unwrap();

        match node {
            ConditionNode::Any { any } => {
                assert_eq!(any.len(), 2);
                assert!(matches!(&any[1], ConditionNode::All { .. }));
            }
            other => panic!("expected any node, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let yaml = r#"
path: status
operator: matches_regex
expected: x
"#;
        let parsed: Result<FieldCondition, _> = serde_yaml::from_str(yaml);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_default_loop_var() {
        let yaml = r#"
fields:
  status: status
"#;
        let emit: Emit = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(emit.loop_var, "item");
        assert!(emit.items.is_none());
    }
}
