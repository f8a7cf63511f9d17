use crate::catalog::model::Severity;
use crate::exceptions::Exception;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// Final status of one (check, item) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Fail,
    Error,
    Skipped,
}

/// One compliance verdict. Immutable; an exception override produces a new
/// result instead of mutating the evaluated one.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub rule_id: String,
    pub title: String,
    pub severity: Severity,
    pub account: String,
    pub region: String,
    pub service: String,
    pub resource: String,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CheckResult {
    /// Produce the final, suppressed version of this result
    pub fn skipped_by(&self, exception: &Exception) -> CheckResult {
        CheckResult {
            status: CheckStatus::Skipped,
            detail: Some(format!(
                "suppressed by exception '{}': {}",
                exception.id, exception.reason
            )),
            ..self.clone()
        }
    }
}

/// Disposition of one discovery step within one scan unit, reported so
/// incomplete or failed discovery is never silent
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub account: String,
    pub region: String,
    pub service: String,
    pub step_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The only mutable shared resource of a scan: a concurrency-safe append
/// sink. Sorting and grouping happen at read time, never relying on arrival
/// order.
#[derive(Debug, Default)]
pub struct ResultSink {
    results: Mutex<Vec<CheckResult>>,
    steps: Mutex<Vec<StepRecord>>,
}

impl ResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, results: Vec<CheckResult>) {
        self.results.lock().unwrap().extend(results);
    }

    pub fn append_steps(&self, records: Vec<StepRecord>) {
        self.steps.lock().unwrap().extend(records);
    }

    /// Drain the sink, sorted by (account, region, service, rule_id,
    /// resource)
    pub fn drain(self) -> (Vec<CheckResult>, Vec<StepRecord>) {
        let mut results = self.results.into_inner().unwrap();
        results.sort_by(|a, b| {
            (&a.account, &a.region, &a.service, &a.rule_id, &a.resource).cmp(&(
                &b.account, &b.region, &b.service, &b.rule_id, &b.resource,
            ))
        });

        let mut steps = self.steps.into_inner().unwrap();
        steps.sort_by(|a, b| {
            (&a.account, &a.region, &a.service, &a.step_id).cmp(&(
                &b.account, &b.region, &b.service, &b.step_id,
            ))
        });

        (results, steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exceptions::ExceptionEffect;
    use std::collections::BTreeMap;

    fn result(rule_id: &str, resource: &str, status: CheckStatus) -> CheckResult {
        CheckResult {
            rule_id: rule_id.to_string(),
            title: "t".to_string(),
            severity: Severity::High,
            account: "acct-1".to_string(),
            region: "us-east-1".to_string(),
            service: "storage".to_string(),
            resource: resource.to_string(),
            status,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_skipped_by_produces_new_result() {
        let original = result("storage.x", "b2", CheckStatus::Fail);
        let exception = Exception {
            id: "EXC-001".to_string(),
            rule_id: "storage.x".to_string(),
            selector: BTreeMap::new(),
            effect: ExceptionEffect::Skip,
            reason: "accepted risk".to_string(),
            expires_at: None,
        };

        let skipped = original.skipped_by(&exception);

        assert_eq!(original.status, CheckStatus::Fail);
        assert_eq!(skipped.status, CheckStatus::Skipped);
        assert!(skipped.detail.as_deref().unwrap().contains("EXC-001"));
    }

    #[test]
    fn test_sink_sorts_at_read_time() {
        let sink = ResultSink::new();
        sink.append(vec![result("storage.b", "r2", CheckStatus::Pass)]);
        sink.append(vec![result("storage.a", "r1", CheckStatus::Fail)]);
        sink.append(vec![result("storage.a", "r0", CheckStatus::Pass)]);

        let (results, _) = sink.drain();
        let order: Vec<(&str, &str)> = results
            .iter()
            .map(|r| (r.rule_id.as_str(), r.resource.as_str()))
            .collect();

        assert_eq!(
            order,
            vec![("storage.a", "r0"), ("storage.a", "r1"), ("storage.b", "r2")]
        );
    }
}
