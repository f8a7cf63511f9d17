use crate::catalog::model::{ServiceDefinition, ServiceScope};
use std::time::Duration;

/// Synthetic scope id used for global services, which run once per account
pub const GLOBAL_SCOPE: &str = "global";

/// Caller-supplied selection filters. All filters are intersective: a unit
/// runs only if it passes every active one; an empty list means "no filter".
#[derive(Debug, Clone, Default)]
pub struct ScanFilters {
    pub services: Vec<String>,
    pub rules: Vec<String>,
}

impl ScanFilters {
    pub fn allows_service(&self, service: &str) -> bool {
        self.services.is_empty() || self.services.iter().any(|s| s == service)
    }

    pub fn allows_rule(&self, rule_id: &str) -> bool {
        self.rules.is_empty() || self.rules.iter().any(|r| r == rule_id)
    }
}

/// Full configuration of one scan run
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub accounts: Vec<String>,
    /// Regions regional services run in; global services ignore this
    pub regions: Vec<String>,
    pub filters: ScanFilters,
    /// Bound on concurrent (account, region, service) units
    pub max_parallel_units: usize,
    /// Bound on concurrent fan-out invocations within a single step
    pub fan_out_limit: usize,
    pub max_retries: u32,
    pub retry_base: Duration,
    /// Global scan deadline
    pub timeout: Option<Duration>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            regions: Vec::new(),
            filters: ScanFilters::default(),
            max_parallel_units: 4,
            fan_out_limit: 8,
            max_retries: 2,
            retry_base: Duration::from_millis(200),
            timeout: None,
        }
    }
}

impl ScanConfig {
    /// Scopes a service runs in: once under the synthetic global scope, or
    /// once per selected region
    pub fn scopes_for(&self, service: &ServiceDefinition) -> Vec<String> {
        match service.scope {
            ServiceScope::Global => vec![GLOBAL_SCOPE.to_string()],
            ServiceScope::Regional => self.regions.clone(),
        }
    }
}

/// The cross-product coordinate one unit of work runs under. Created per
/// unit, discarded when it completes.
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub account: String,
    pub region: String,
    pub service: String,
}

impl ScanContext {
    pub fn new(
        account: impl Into<String>,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
            service: service.into(),
        }
    }
}
