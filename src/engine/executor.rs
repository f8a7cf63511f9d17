//! Discovery graph execution.
//!
//! Steps run in declaration order, which load-time validation guarantees is
//! a valid topological order (a step's parent must be declared before it).
//! A child step starts only after its parent step has produced all of its
//! items, pagination included. Fan-out invocations within a step run
//! concurrently under a per-step bound; each invocation's failure is
//! isolated to that invocation.

use crate::catalog::model::{Call, DiscoveryStep, Emit, ServiceDefinition};
use crate::engine::resolver::{FieldPath, render_params};
use crate::engine::value::{FieldMap, Resolved, Value};
use crate::provider::{CallParams, CallResponse, ProviderClient, ProviderError};
use crate::scan::error::ScanError;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// One discovered resource instance's field snapshot. Immutable after
/// emission; a child item starts from its parent's fields, so ancestor
/// fields stay addressable from checks and grandchildren.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub fields: FieldMap,
}

impl Item {
    pub fn new(fields: FieldMap) -> Self {
        Self { fields }
    }

    /// Resource identifier used in results: `name`, then `id`, then
    /// `resource_id`, then a placeholder
    pub fn resource_name(&self) -> String {
        for key in ["name", "id", "resource_id"] {
            if let Some(value) = self.fields.get(key) {
                if !value.is_empty() {
                    return value.to_string();
                }
            }
        }

        "-".to_string()
    }
}

/// Final disposition of one discovery step within a scan unit
#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    Completed,
    /// The step failed as a whole; its children are skipped
    Failed(String),
    /// Never invoked because an upstream step failed
    SkippedUpstream(String),
    /// Abandoned because the scan deadline was reached
    Incomplete,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Completed => "completed",
            StepStatus::Failed(_) => "failed",
            StepStatus::SkippedUpstream(_) => "skipped_upstream",
            StepStatus::Incomplete => "incomplete",
        }
    }
}

/// A single fan-out invocation that failed; siblings were unaffected
#[derive(Debug, Clone)]
pub struct InvocationFailure {
    pub step_id: String,
    pub parent_resource: String,
    pub detail: String,
}

/// Everything one executor run produced for one service in one scan unit
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    /// Step id -> items, in parent-item order
    pub items: BTreeMap<String, Vec<Item>>,
    pub step_status: BTreeMap<String, StepStatus>,
    pub invocation_failures: Vec<InvocationFailure>,
}

impl DiscoveryOutcome {
    pub fn items_for(&self, step_id: &str) -> &[Item] {
        self.items.get(step_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn status_of(&self, step_id: &str) -> Option<&StepStatus> {
        self.step_status.get(step_id)
    }

    pub fn failures_for(&self, step_id: &str) -> impl Iterator<Item = &InvocationFailure> {
        self.invocation_failures
            .iter()
            .filter(move |f| f.step_id == step_id)
    }
}

/// Tuning knobs for one executor run
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Bound on concurrent fan-out invocations within a single step
    pub fan_out_limit: usize,
    /// Retries for transient provider errors, per call
    pub max_retries: u32,
    /// Base backoff delay; grows linearly with the attempt number
    pub retry_base: Duration,
    /// Global scan deadline; reached means no new calls are issued
    pub deadline: Option<Instant>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            fan_out_limit: 8,
            max_retries: 2,
            retry_base: Duration::from_millis(200),
            deadline: None,
        }
    }
}

impl ExecutorConfig {
    fn deadline_reached(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Executes all discovery steps of one service for one (account, region)
pub struct DiscoveryExecutor<'a> {
    provider: &'a dyn ProviderClient,
    account: &'a str,
    region: &'a str,
    config: &'a ExecutorConfig,
}

/// What one fan-out invocation produced
struct InvocationOutcome {
    items: Vec<Item>,
    failure: Option<String>,
    fatal: Option<ProviderError>,
    parent_resource: String,
    /// The deadline cut this invocation's work short
    truncated: bool,
}

impl InvocationOutcome {
    fn failed(detail: String, parent_resource: String) -> Self {
        Self {
            items: Vec::new(),
            failure: Some(detail),
            fatal: None,
            parent_resource,
            truncated: false,
        }
    }

    fn aborted(err: ProviderError, parent_resource: String) -> Self {
        Self {
            items: Vec::new(),
            failure: None,
            fatal: Some(err),
            parent_resource,
            truncated: false,
        }
    }

    fn cut_short(parent_resource: String) -> Self {
        Self {
            items: Vec::new(),
            failure: None,
            fatal: None,
            parent_resource,
            truncated: true,
        }
    }
}

impl<'a> DiscoveryExecutor<'a> {
    pub fn new(
        provider: &'a dyn ProviderClient,
        account: &'a str,
        region: &'a str,
        config: &'a ExecutorConfig,
    ) -> Self {
        Self {
            provider,
            account,
            region,
            config,
        }
    }

    /// Run every step of the service. Only authentication-class failures
    /// escalate to `Err`; everything else is recorded in the outcome.
    pub async fn execute(&self, service: &ServiceDefinition) -> Result<DiscoveryOutcome, ScanError> {
        let mut outcome = DiscoveryOutcome::default();

        for step in &service.discovery {
            if self.config.deadline_reached() {
                outcome
                    .step_status
                    .insert(step.discovery_id.clone(), StepStatus::Incomplete);
                continue;
            }

            // Upstream disposition decides whether this step runs at all
            if let Some(parent_id) = &step.for_each {
                match outcome.step_status.get(parent_id) {
                    Some(StepStatus::Failed(_)) | Some(StepStatus::SkippedUpstream(_)) => {
                        outcome.step_status.insert(
                            step.discovery_id.clone(),
                            StepStatus::SkippedUpstream(format!(
                                "upstream step '{}' did not complete",
                                parent_id
                            )),
                        );
                        continue;
                    }
                    _ => {}
                }
            }

            let parents: Vec<Item> = match &step.for_each {
                // Root steps run exactly once, against an empty parent
                None => vec![Item::new(FieldMap::new())],
                Some(parent_id) => outcome.items_for(parent_id).to_vec(),
            };

            // Zero parent items is not an error: the step completes empty
            if parents.is_empty() {
                outcome.items.insert(step.discovery_id.clone(), Vec::new());
                outcome
                    .step_status
                    .insert(step.discovery_id.clone(), StepStatus::Completed);
                continue;
            }

            self.run_step(step, parents, &mut outcome).await?;
        }

        Ok(outcome)
    }

    async fn run_step(
        &self,
        step: &DiscoveryStep,
        parents: Vec<Item>,
        outcome: &mut DiscoveryOutcome,
    ) -> Result<(), ScanError> {
        let is_root = step.for_each.is_none();
        let limit = self.config.fan_out_limit.max(1);
        let semaphore = Arc::new(Semaphore::new(limit));

        let mut dispatched = Vec::new();
        let mut abandoned = false;

        for parent in parents {
            // The deadline stops new dispatches; in-flight work finishes
            if self.config.deadline_reached() {
                abandoned = true;
                break;
            }

            let semaphore = semaphore.clone();
            dispatched.push(async move {
                // Closed only on drop, which cannot happen while we hold it
                let _permit = semaphore.acquire().await.expect("semaphore closed");

                // The deadline may have arrived while this invocation was
                // queued behind the fan-out bound
                if self.config.deadline_reached() {
                    return InvocationOutcome::cut_short(parent.resource_name());
                }

                self.invoke(step, parent).await
            });
        }

        let mut items = Vec::new();
        let mut fatal: Option<ProviderError> = None;
        let mut whole_step_failure: Option<String> = None;

        for invocation in join_all(dispatched).await {
            abandoned |= invocation.truncated;

            if let Some(err) = invocation.fatal {
                fatal.get_or_insert(err);
                continue;
            }

            if let Some(detail) = invocation.failure {
                if is_root {
                    whole_step_failure.get_or_insert(detail);
                } else {
                    outcome.invocation_failures.push(InvocationFailure {
                        step_id: step.discovery_id.clone(),
                        parent_resource: invocation.parent_resource,
                        detail,
                    });
                }
                continue;
            }

            items.extend(invocation.items);
        }

        if let Some(err) = fatal {
            return Err(ScanError::Authentication(err.to_string()));
        }

        let status = if let Some(detail) = whole_step_failure {
            StepStatus::Failed(detail)
        } else if abandoned {
            StepStatus::Incomplete
        } else {
            StepStatus::Completed
        };

        outcome.items.insert(step.discovery_id.clone(), items);
        outcome.step_status.insert(step.discovery_id.clone(), status);

        Ok(())
    }

    /// One fan-out invocation: render params, run every call (with
    /// pagination), project responses into items
    async fn invoke(&self, step: &DiscoveryStep, parent: Item) -> InvocationOutcome {
        let parent_resource = parent.resource_name();

        let mut items = Vec::new();
        let mut truncated = false;

        for call in &step.calls {
            // The deadline stops new calls even mid-invocation
            if self.config.deadline_reached() {
                truncated = true;
                break;
            }

            let params = match render_params(&call.params, &parent.fields) {
                Ok(params) => params,
                Err(e) => return InvocationOutcome::failed(e.to_string(), parent_resource),
            };

            let (responses, pages_cut_short) = match self.paginate(call, &params).await {
                Ok(pages) => pages,
                Err(e) if e.is_fatal() => {
                    return InvocationOutcome::aborted(e, parent_resource);
                }
                // Benign: nothing of this type exists in this scope
                Err(e) if e.is_benign() => (Vec::new(), false),
                Err(e) => return InvocationOutcome::failed(e.to_string(), parent_resource),
            };

            truncated |= pages_cut_short;

            for response in &responses {
                match project_items(&step.emit, response, &parent.fields) {
                    Ok(emitted) => items.extend(emitted),
                    Err(detail) => return InvocationOutcome::failed(detail, parent_resource),
                }
            }
        }

        InvocationOutcome {
            items,
            failure: None,
            fatal: None,
            parent_resource,
            truncated,
        }
    }

    /// Loop over pagination tokens until none remain, concatenating pages.
    /// The boolean is true when the deadline cut the loop short; partial
    /// pages are kept and the caller reports the step incomplete.
    async fn paginate(
        &self,
        call: &Call,
        params: &CallParams,
    ) -> Result<(Vec<CallResponse>, bool), ProviderError> {
        let mut responses = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let response = self
                .call_with_retry(&call.action, params, token.as_deref())
                .await?;

            token = response.next_page_token.clone();
            responses.push(response);

            if !call.paginated || token.is_none() {
                return Ok((responses, false));
            }

            if self.config.deadline_reached() {
                return Ok((responses, true));
            }
        }
    }

    async fn call_with_retry(
        &self,
        action: &str,
        params: &CallParams,
        page_token: Option<&str>,
    ) -> Result<CallResponse, ProviderError> {
        let mut attempt: u32 = 0;

        loop {
            match self
                .provider
                .call(self.account, self.region, action, params, page_token)
                .await
            {
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    tokio::time::sleep(self.config.retry_base * attempt).await;
                }
                other => return other,
            }
        }
    }
}

/// Project one raw response into items per the emit block, merging the
/// parent's fields in as a read-only prefix
fn project_items(emit: &Emit, response: &CallResponse, parent_fields: &FieldMap) -> Result<Vec<Item>, String> {
    let response_fields = match &response.body {
        Value::Map(map) => map.clone(),
        _ => FieldMap::new(),
    };

    let elements: Vec<Value> = match &emit.items {
        None => vec![response.body.clone()],
        Some(expression) => {
            // Validated at load time
            let path = FieldPath::parse(expression).map_err(|e| e.to_string())?;
            match path.resolve_in_value(&response.body) {
                Resolved::Absent => Vec::new(),
                Resolved::Present(Value::List(list)) => list,
                Resolved::Present(other) => {
                    return Err(format!(
                        "emit items '{}' selected a {} value, expected a list",
                        expression,
                        other.type_name()
                    ));
                }
            }
        }
    };

    let mut items = Vec::new();

    for element in elements {
        let mut loop_layer = FieldMap::new();
        loop_layer.insert(emit.loop_var.clone(), element);

        let layers: Vec<&FieldMap> = vec![&loop_layer, &response_fields, parent_fields];

        // Ancestor fields first, then this step's own projection on top
        let mut fields = parent_fields.clone();

        for (name, expression) in &emit.fields {
            let path = FieldPath::parse(expression).map_err(|e| e.to_string())?;
            if let Resolved::Present(value) = path.resolve(&layers) {
                fields.insert(name.clone(), value);
            }
        }

        items.push(Item::new(fields));
    }

    Ok(items)
}
