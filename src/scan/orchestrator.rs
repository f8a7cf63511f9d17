//! Scan orchestration across accounts, regions, and services.
//!
//! Units of work are the cross-product of {accounts} x {applicable scopes}
//! x {selected services}, dispatched onto bounded worker tasks. The result
//! sink is the only shared mutable state; everything else is read-only for
//! the scan's lifetime.

use crate::catalog::loader::Catalog;
use crate::catalog::model::{CheckDefinition, ServiceDefinition};
use crate::engine::evaluator::{self, Verdict};
use crate::engine::executor::{DiscoveryExecutor, ExecutorConfig, StepStatus};
use crate::exceptions::{ExceptionSet, ExceptionTarget};
use crate::provider::ProviderClient;
use crate::scan::context::{ScanConfig, ScanContext, ScanFilters};
use crate::scan::error::{ScanError, ScanResult};
use crate::scan::report::ScanReport;
use crate::scan::results::{CheckResult, CheckStatus, ResultSink, StepRecord};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Drives a full scan over an injected provider
pub struct Scanner {
    catalog: Arc<Catalog>,
    exceptions: Arc<ExceptionSet>,
    provider: Arc<dyn ProviderClient>,
}

impl Scanner {
    pub fn new(
        catalog: Arc<Catalog>,
        exceptions: Arc<ExceptionSet>,
        provider: Arc<dyn ProviderClient>,
    ) -> Self {
        Self {
            catalog,
            exceptions,
            provider,
        }
    }

    /// Run the scan. Returns `Err` only for fatal failures (authentication,
    /// worker loss); per-call and per-step errors land in the report.
    pub async fn run(&self, config: &ScanConfig) -> ScanResult<ScanReport> {
        let scan_start = Utc::now();

        // Credential failure is fatal before any work is dispatched
        for account in &config.accounts {
            self.provider
                .verify_access(account)
                .await
                .map_err(|e| ScanError::Authentication(e.to_string()))?;
        }

        let deadline = config.timeout.map(|t| Instant::now() + t);
        let sink = Arc::new(ResultSink::new());
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_units.max(1)));
        let mut handles = Vec::new();

        for account in &config.accounts {
            for service in self.catalog.services() {
                if !config.filters.allows_service(&service.service) {
                    continue;
                }

                for region in config.scopes_for(service) {
                    let context = ScanContext::new(account, &region, &service.service);

                    // The deadline stops new dispatches; undispatched units
                    // are reported incomplete, never silently omitted
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        sink.append_steps(incomplete_records(service, &context));
                        continue;
                    }

                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("semaphore closed");

                    let unit = ScanUnit {
                        provider: self.provider.clone(),
                        exceptions: self.exceptions.clone(),
                        service: service.clone(),
                        context,
                        executor_config: ExecutorConfig {
                            fan_out_limit: config.fan_out_limit,
                            max_retries: config.max_retries,
                            retry_base: config.retry_base,
                            deadline,
                        },
                        filters: config.filters.clone(),
                        scan_start,
                    };

                    let sink = sink.clone();
                    handles.push(tokio::spawn(async move {
                        let outcome = unit.run().await;
                        drop(permit);

                        match outcome {
                            Ok((results, steps)) => {
                                sink.append(results);
                                sink.append_steps(steps);
                                Ok(())
                            }
                            Err(e) => Err(e),
                        }
                    }));
                }
            }
        }

        let mut fatal: Option<ScanError> = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    fatal.get_or_insert(ScanError::Internal(format!("scan worker lost: {}", e)));
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        let sink = Arc::try_unwrap(sink)
            .map_err(|_| ScanError::Internal("result sink still shared".to_string()))?;
        let (results, steps) = sink.drain();

        Ok(ScanReport::build(scan_start, results, steps))
    }
}

/// Everything one spawned unit task owns
struct ScanUnit {
    provider: Arc<dyn ProviderClient>,
    exceptions: Arc<ExceptionSet>,
    service: ServiceDefinition,
    context: ScanContext,
    executor_config: ExecutorConfig,
    filters: ScanFilters,
    scan_start: DateTime<Utc>,
}

impl ScanUnit {
    /// Discovery, then evaluation, then exception matching, for one
    /// (account, region, service) coordinate
    async fn run(&self) -> ScanResult<(Vec<CheckResult>, Vec<StepRecord>)> {
        let executor = DiscoveryExecutor::new(
            self.provider.as_ref(),
            &self.context.account,
            &self.context.region,
            &self.executor_config,
        );
        let outcome = executor.execute(&self.service).await?;

        let mut results = Vec::new();

        for check in &self.service.checks {
            if !self.filters.allows_rule(&check.rule_id) {
                continue;
            }

            match outcome.status_of(&check.for_each) {
                Some(StepStatus::Failed(detail)) => {
                    results.push(self.result(check, "-", CheckStatus::Error, Some(detail.clone())));
                    continue;
                }
                Some(StepStatus::SkippedUpstream(detail)) => {
                    results.push(self.result(
                        check,
                        "-",
                        CheckStatus::Skipped,
                        Some(detail.clone()),
                    ));
                    continue;
                }
                _ => {}
            }

            // Each isolated fan-out failure surfaces as one ERROR result,
            // named after the parent item it occurred for
            for failure in outcome.failures_for(&check.for_each) {
                results.push(self.result(
                    check,
                    &failure.parent_resource,
                    CheckStatus::Error,
                    Some(failure.detail.clone()),
                ));
            }

            for item in outcome.items_for(&check.for_each) {
                let (status, detail) = match evaluator::evaluate(&check.condition, &item.fields) {
                    Verdict::Pass => (CheckStatus::Pass, None),
                    Verdict::Fail => (CheckStatus::Fail, None),
                    Verdict::Error(detail) => (CheckStatus::Error, Some(detail)),
                };

                results.push(self.result(check, &item.resource_name(), status, detail));
            }
        }

        let results = results
            .into_iter()
            .map(|result| self.apply_exceptions(result))
            .collect();

        let steps = self.step_records(&outcome);
        Ok((results, steps))
    }

    fn result(
        &self,
        check: &CheckDefinition,
        resource: &str,
        status: CheckStatus,
        detail: Option<String>,
    ) -> CheckResult {
        CheckResult {
            rule_id: check.rule_id.clone(),
            title: check.title.clone(),
            severity: check.severity,
            account: self.context.account.clone(),
            region: self.context.region.clone(),
            service: self.context.service.clone(),
            resource: resource.to_string(),
            status,
            detail,
            timestamp: Utc::now(),
        }
    }

    fn apply_exceptions(&self, result: CheckResult) -> CheckResult {
        let target = ExceptionTarget {
            account: &result.account,
            region: &result.region,
            service: &result.service,
            resource: &result.resource,
        };

        match self
            .exceptions
            .match_for(&result.rule_id, &target, self.scan_start)
        {
            Some(exception) => result.skipped_by(exception),
            None => result,
        }
    }

    fn step_records(
        &self,
        outcome: &crate::engine::executor::DiscoveryOutcome,
    ) -> Vec<StepRecord> {
        outcome
            .step_status
            .iter()
            .map(|(step_id, status)| {
                let detail = match status {
                    StepStatus::Failed(d) | StepStatus::SkippedUpstream(d) => Some(d.clone()),
                    _ => None,
                };

                StepRecord {
                    account: self.context.account.clone(),
                    region: self.context.region.clone(),
                    service: self.context.service.clone(),
                    step_id: step_id.clone(),
                    status: status.as_str().to_string(),
                    detail,
                }
            })
            .collect()
    }
}

fn incomplete_records(service: &ServiceDefinition, context: &ScanContext) -> Vec<StepRecord> {
    service
        .discovery
        .iter()
        .map(|step| StepRecord {
            account: context.account.clone(),
            region: context.region.clone(),
            service: context.service.clone(),
            step_id: step.discovery_id.clone(),
            status: "incomplete".to_string(),
            detail: Some("scan deadline reached before dispatch".to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::value::Value;
    use crate::exceptions::Exception;
    use crate::provider::{CallParams, CallResponse, MockProvider, ProviderError};
    use futures::future::BoxFuture;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const STORAGE: &str = r#"
service: storage
scope: regional
discovery:
  - discovery_id: buckets
    calls:
      - action: storage.ListBuckets
    emit:
      items: buckets
      as: bucket
      fields:
        name: bucket.name
        versioning_status: bucket.versioning_status
checks:
  - rule_id: storage.bucket.versioning_enabled
    title: Bucket versioning should be enabled
    severity: high
    for_each: buckets
    condition:
      path: versioning_status
      operator: equals
      expected: Enabled
"#;

    fn catalog() -> Arc<Catalog> {
        let definition: ServiceDefinition = serde_yaml::from_str(STORAGE).unwrap();
        Arc::new(Catalog::from_services(vec![definition]).unwrap())
    }

    fn config() -> ScanConfig {
        ScanConfig {
            accounts: vec!["acct-1".to_string()],
            regions: vec!["us-east-1".to_string()],
            ..ScanConfig::default()
        }
    }

    fn scanner(provider: MockProvider, exceptions: ExceptionSet) -> Scanner {
        Scanner::new(catalog(), Arc::new(exceptions), Arc::new(provider))
    }

    const TWO_BUCKETS: &str = r#"{"buckets": [
        {"name": "b1", "versioning_status": "Enabled"},
        {"name": "b2", "versioning_status": "Suspended"}
    ]}"#;

    #[tokio::test]
    async fn test_scan_produces_pass_and_fail() {
        let provider = MockProvider::new().respond_json("storage.ListBuckets", TWO_BUCKETS);

        let report = scanner(provider, ExceptionSet::empty())
            .run(&config())
            .await
            .unwrap();

        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.passed, 1);
        assert_eq!(report.summary.failed, 1);

        let results = &report.accounts[0].regions[0].services[0].results;
        assert_eq!(results[0].resource, "b1");
        assert_eq!(results[0].status, CheckStatus::Pass);
        assert_eq!(results[1].resource, "b2");
        assert_eq!(results[1].status, CheckStatus::Fail);
    }

    #[tokio::test]
    async fn test_matching_exception_skips_result() {
        let provider = MockProvider::new().respond_json("storage.ListBuckets", TWO_BUCKETS);

        let exceptions = ExceptionSet::from_exceptions(vec![Exception {
            id: "EXC-001".to_string(),
            rule_id: "storage.bucket.versioning_enabled".to_string(),
            selector: [("resource".to_string(), "b2".to_string())]
                .into_iter()
                .collect::<BTreeMap<_, _>>(),
            effect: Default::default(),
            reason: "accepted risk".to_string(),
            expires_at: Some(Utc::now() + chrono::Duration::days(30)),
        }])
        .unwrap();

        let report = scanner(provider, exceptions).run(&config()).await.unwrap();

        assert_eq!(report.summary.passed, 1);
        assert_eq!(report.summary.failed, 0);
        assert_eq!(report.summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_expired_exception_changes_nothing() {
        let provider = MockProvider::new().respond_json("storage.ListBuckets", TWO_BUCKETS);

        let exceptions = ExceptionSet::from_exceptions(vec![Exception {
            id: "EXC-001".to_string(),
            rule_id: "storage.bucket.versioning_enabled".to_string(),
            selector: BTreeMap::new(),
            effect: Default::default(),
            reason: "expired".to_string(),
            expires_at: Some(Utc::now() - chrono::Duration::days(1)),
        }])
        .unwrap();

        let report = scanner(provider, exceptions).run(&config()).await.unwrap();

        assert_eq!(report.summary.skipped, 0);
        assert_eq!(report.summary.failed, 1);
    }

    #[tokio::test]
    async fn test_zero_items_yields_zero_results_and_success() {
        let provider =
            MockProvider::new().respond_json("storage.ListBuckets", r#"{"buckets": []}"#);

        let report = scanner(provider, ExceptionSet::empty())
            .run(&config())
            .await
            .unwrap();

        assert_eq!(report.summary.total, 0);
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_scan() {
        let provider = MockProvider::failing_auth("bad credentials");

        let err = scanner(provider, ExceptionSet::empty())
            .run(&config())
            .await
            .unwrap_err();

        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_failed_root_step_yields_error_result() {
        let provider = MockProvider::new().respond(
            "storage.ListBuckets",
            Err(ProviderError::Other("boom".into())),
        );

        let report = scanner(provider, ExceptionSet::empty())
            .run(&config())
            .await
            .unwrap();

        assert_eq!(report.summary.errors, 1);
        let service = &report.accounts[0].regions[0].services[0];
        assert_eq!(service.results[0].status, CheckStatus::Error);
        assert_eq!(service.steps[0].status, "failed");
    }

    #[tokio::test]
    async fn test_regional_service_runs_once_per_region() {
        let provider = MockProvider::new().respond(
            "storage.ListBuckets",
            Ok(CallResponse::new(crate::engine::value::Value::from_json(
                &serde_json::json!({"buckets": [{"name": "b1", "versioning_status": "Enabled"}]}),
            ))),
        );

        let mut config = config();
        config.regions = vec!["us-east-1".to_string(), "eu-west-1".to_string()];

        let report = scanner(provider, ExceptionSet::empty())
            .run(&config)
            .await
            .unwrap();

        assert_eq!(report.summary.total, 2);
        assert_eq!(report.accounts[0].regions.len(), 2);
        // Read-time sorting groups regions alphabetically
        assert_eq!(report.accounts[0].regions[0].region, "eu-west-1");
    }

    /// Answers every call after a fixed delay, tracking peak concurrency
    struct CountingProvider {
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl CountingProvider {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    impl ProviderClient for CountingProvider {
        fn call<'a>(
            &'a self,
            _account: &'a str,
            _region: &'a str,
            _action: &'a str,
            _params: &'a CallParams,
            _page_token: Option<&'a str>,
        ) -> BoxFuture<'a, Result<CallResponse, ProviderError>> {
            Box::pin(async move {
                let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);

                Ok(CallResponse::new(Value::from_json(&serde_json::json!({
                    "buckets": [{"name": "b1", "versioning_status": "Enabled"}]
                }))))
            })
        }

        fn verify_access<'a>(
            &'a self,
            _account: &'a str,
        ) -> BoxFuture<'a, Result<(), ProviderError>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn test_max_parallel_units_bounds_concurrent_units() {
        let provider = Arc::new(CountingProvider::new(Duration::from_millis(10)));

        let mut config = config();
        config.regions = (1..=6).map(|n| format!("region-{}", n)).collect();
        config.max_parallel_units = 2;

        let scanner = Scanner::new(catalog(), Arc::new(ExceptionSet::empty()), provider.clone());
        let report = scanner.run(&config).await.unwrap();

        // Every unit ran, but never more than two at once
        assert_eq!(report.summary.total, 6);
        assert!(provider.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_global_service_runs_once() {
        let yaml = STORAGE.replace("scope: regional", "scope: global");
        let definition: ServiceDefinition = serde_yaml::from_str(&yaml).unwrap();
        let catalog = Arc::new(Catalog::from_services(vec![definition]).unwrap());

        let provider = MockProvider::new().respond_json(
            "storage.ListBuckets",
            r#"{"buckets": [{"name": "b1", "versioning_status": "Enabled"}]}"#,
        );

        let mut config = config();
        config.regions = vec!["us-east-1".to_string(), "eu-west-1".to_string()];

        let scanner = Scanner::new(catalog, Arc::new(ExceptionSet::empty()), Arc::new(provider));
        let report = scanner.run(&config).await.unwrap();

        assert_eq!(report.summary.total, 1);
        assert_eq!(report.accounts[0].regions[0].region, "global");
    }

    #[tokio::test]
    async fn test_rule_filter_is_intersective() {
        let provider = MockProvider::new().respond_json("storage.ListBuckets", TWO_BUCKETS);

        let mut config = config();
        config.filters = ScanFilters {
            services: vec!["storage".to_string()],
            rules: vec!["storage.bucket.some_other_rule".to_string()],
        };

        let report = scanner(provider, ExceptionSet::empty())
            .run(&config)
            .await
            .unwrap();

        // Service passes its filter but no rule does
        assert_eq!(report.summary.total, 0);
    }

    #[tokio::test]
    async fn test_service_filter_skips_unit_entirely() {
        let provider = MockProvider::new();

        let mut config = config();
        config.filters.services = vec!["compute".to_string()];

        let report = scanner(provider, ExceptionSet::empty())
            .run(&config)
            .await
            .unwrap();

        assert_eq!(report.summary.total, 0);
        assert!(report.accounts.is_empty());
    }
}
