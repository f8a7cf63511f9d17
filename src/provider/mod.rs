//! Narrow provider-call capability consumed by the discovery graph executor.
//!
//! Each cloud platform is a different implementation of the one `call`
//! interface, injected into the engine; the engine never knows which one it
//! is talking to.

pub mod fixture;

use crate::engine::value::Value;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;

pub use fixture::FixtureProvider;

/// Parameters of one provider call, already rendered
pub type CallParams = BTreeMap<String, Value>;

/// Structured response of one provider call page
#[derive(Debug, Clone)]
pub struct CallResponse {
    pub body: Value,
    /// Continuation token when the action pages its results
    pub next_page_token: Option<String>,
}

impl CallResponse {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            next_page_token: None,
        }
    }

    pub fn with_next_page(body: Value, token: impl Into<String>) -> Self {
        Self {
            body,
            next_page_token: Some(token.into()),
        }
    }
}

/// Failure classes of a provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// No such resource, or the service/API is disabled for this scope.
    /// Benign: produces zero items, not an error.
    NotFound(String),

    /// Throttling or other transient failure; retried a bounded number of
    /// times before becoming an error
    Transient(String),

    /// Credential/authorization failure; aborts the entire scan
    Authentication(String),

    /// Anything else; isolates the invocation it occurred in
    Other(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ProviderError::Transient(msg) => write!(f, "Transient failure: {}", msg),
            ProviderError::Authentication(msg) => write!(f, "Authentication failed: {}", msg),
            ProviderError::Other(msg) => write!(f, "Provider error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    pub fn is_benign(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ProviderError::Authentication(_))
    }
}

/// The one capability a cloud platform must provide: call an action with
/// parameters inside an account/region coordinate and get a structured,
/// possibly paginated response.
///
/// `BoxFuture` keeps the trait object-safe so providers can be injected as
/// `Arc<dyn ProviderClient>`.
pub trait ProviderClient: Send + Sync {
    /// Invoke one action. `page_token` is the continuation token from the
    /// previous page, if any.
    fn call<'a>(
        &'a self,
        account: &'a str,
        region: &'a str,
        action: &'a str,
        params: &'a CallParams,
        page_token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<CallResponse, ProviderError>>;

    /// Verify credentials for an account before any scan work is dispatched
    fn verify_access<'a>(&'a self, account: &'a str) -> BoxFuture<'a, Result<(), ProviderError>>;
}

/// Scripted in-memory provider for tests: responses keyed by action (and
/// optionally a discriminating parameter value), with recorded call log.
#[allow(dead_code)]
pub struct MockProvider {
    responses: std::sync::Mutex<BTreeMap<String, Vec<Result<CallResponse, ProviderError>>>>,
    calls: std::sync::Mutex<Vec<String>>,
    auth_failure: Option<String>,
}

#[allow(dead_code)]
impl MockProvider {
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(BTreeMap::new()),
            calls: std::sync::Mutex::new(Vec::new()),
            auth_failure: None,
        }
    }

    pub fn failing_auth(message: &str) -> Self {
        Self {
            responses: std::sync::Mutex::new(BTreeMap::new()),
            calls: std::sync::Mutex::new(Vec::new()),
            auth_failure: Some(message.to_string()),
        }
    }

    /// Script a response for an action. Keys may be either the bare action
    /// name or `action:param_value` to discriminate fan-out invocations.
    pub fn respond(self, key: &str, response: Result<CallResponse, ProviderError>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push(response);
        self
    }

    /// Script a JSON response body for an action
    pub fn respond_json(self, key: &str, json: &str) -> Self {
        let body = Value::from_json(&serde_json::from_str(json).expect("invalid mock JSON"));
        self.respond(key, Ok(CallResponse::new(body)))
    }

    /// Actions called so far, in call order
    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn lookup(&self, action: &str, params: &CallParams) -> Result<CallResponse, ProviderError> {
        let mut responses = self.responses.lock().unwrap();

        // Param-discriminated keys take precedence over the bare action
        for value in params.values() {
            let key = format!("{}:{}", action, value);
            if let Some(sequence) = responses.get_mut(&key) {
                return Self::take(action, sequence);
            }
        }

        match responses.get_mut(action) {
            Some(sequence) => Self::take(action, sequence),
            None => Err(ProviderError::NotFound(format!(
                "no scripted response for '{}'",
                action
            ))),
        }
    }

    /// Scripted sequences are consumed front-to-back; the last entry repeats
    /// so identical fan-out calls keep working.
    fn take(
        action: &str,
        sequence: &mut Vec<Result<CallResponse, ProviderError>>,
    ) -> Result<CallResponse, ProviderError> {
        if sequence.is_empty() {
            return Err(ProviderError::NotFound(format!(
                "scripted responses for '{}' exhausted",
                action
            )));
        }

        if sequence.len() > 1 {
            sequence.remove(0)
        } else {
            sequence[0].clone()
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderClient for MockProvider {
    fn call<'a>(
        &'a self,
        _account: &'a str,
        _region: &'a str,
        action: &'a str,
        params: &'a CallParams,
        _page_token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<CallResponse, ProviderError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(action.to_string());
            self.lookup(action, params)
        })
    }

    fn verify_access<'a>(&'a self, _account: &'a str) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            match &self.auth_failure {
                Some(message) => Err(ProviderError::Authentication(message.clone())),
                None => Ok(()),
            }
        })
    }
}
