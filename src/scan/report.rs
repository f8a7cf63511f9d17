use crate::scan::results::{CheckResult, CheckStatus, StepRecord};
use crate::traits::Output;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-level verdict counts
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
}

impl Summary {
    fn add(&mut self, status: CheckStatus) {
        self.total += 1;
        match status {
            CheckStatus::Pass => self.passed += 1,
            CheckStatus::Fail => self.failed += 1,
            CheckStatus::Error => self.errors += 1,
            CheckStatus::Skipped => self.skipped += 1,
        }
    }
}

/// One service's results within one (account, region) unit
#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub service: String,
    pub summary: Summary,
    pub results: Vec<CheckResult>,
    /// Discovery dispositions, including incomplete and failed steps
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionReport {
    pub region: String,
    pub summary: Summary,
    pub services: Vec<ServiceReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountReport {
    pub account: String,
    pub summary: Summary,
    pub regions: Vec<RegionReport>,
}

/// Complete scan report: account -> region -> service -> results
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: Summary,
    pub accounts: Vec<AccountReport>,
}

impl ScanReport {
    /// Build the hierarchy from sorted sink output. Input must already be
    /// sorted by (account, region, service, rule_id, resource).
    pub fn build(
        started_at: DateTime<Utc>,
        results: Vec<CheckResult>,
        steps: Vec<StepRecord>,
    ) -> ScanReport {
        let mut report = ScanReport {
            started_at,
            finished_at: Utc::now(),
            summary: Summary::default(),
            accounts: Vec::new(),
        };

        for result in results {
            report.summary.add(result.status);

            let account = match report.accounts.last_mut() {
                Some(a) if a.account == result.account => a,
                _ => {
                    report.accounts.push(AccountReport {
                        account: result.account.clone(),
                        summary: Summary::default(),
                        regions: Vec::new(),
                    });
                    report.accounts.last_mut().unwrap()
                }
            };
            account.summary.add(result.status);

            let region = match account.regions.last_mut() {
                Some(r) if r.region == result.region => r,
                _ => {
                    account.regions.push(RegionReport {
                        region: result.region.clone(),
                        summary: Summary::default(),
                        services: Vec::new(),
                    });
                    account.regions.last_mut().unwrap()
                }
            };
            region.summary.add(result.status);

            let service = match region.services.last_mut() {
                Some(s) if s.service == result.service => s,
                _ => {
                    region.services.push(ServiceReport {
                        service: result.service.clone(),
                        summary: Summary::default(),
                        results: Vec::new(),
                        steps: Vec::new(),
                    });
                    region.services.last_mut().unwrap()
                }
            };
            service.summary.add(result.status);
            service.results.push(result);
        }

        for step in steps {
            report.attach_step(step);
        }

        report
    }

    /// File a step record under its service section, creating empty
    /// sections for units that produced dispositions but no results
    fn attach_step(&mut self, step: StepRecord) {
        let account = match self.accounts.iter_mut().find(|a| a.account == step.account) {
            Some(a) => a,
            None => {
                self.accounts.push(AccountReport {
                    account: step.account.clone(),
                    summary: Summary::default(),
                    regions: Vec::new(),
                });
                self.accounts.last_mut().unwrap()
            }
        };

        let region = match account.regions.iter_mut().find(|r| r.region == step.region) {
            Some(r) => r,
            None => {
                account.regions.push(RegionReport {
                    region: step.region.clone(),
                    summary: Summary::default(),
                    services: Vec::new(),
                });
                account.regions.last_mut().unwrap()
            }
        };

        let service = match region.services.iter_mut().find(|s| s.service == step.service) {
            Some(s) => s,
            None => {
                region.services.push(ServiceReport {
                    service: step.service.clone(),
                    summary: Summary::default(),
                    results: Vec::new(),
                    steps: Vec::new(),
                });
                region.services.last_mut().unwrap()
            }
        };

        service.steps.push(step);
    }

    /// Format the report as pretty JSON
    pub fn format_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| anyhow::anyhow!("JSON error: {}", e))
    }

    /// Print the per-level summaries to the terminal
    pub fn print_summary(&self, output: &dyn Output) {
        output.section("Scan Results");

        for account in &self.accounts {
            output.subsection(&format!("Account {}", account.account));

            for region in &account.regions {
                for service in &region.services {
                    let line = format!(
                        "{}/{}: {} passed, {} failed, {} errors, {} skipped",
                        region.region,
                        service.service,
                        service.summary.passed,
                        service.summary.failed,
                        service.summary.errors,
                        service.summary.skipped
                    );

                    if service.summary.failed > 0 || service.summary.errors > 0 {
                        output.warning(&line);
                    } else {
                        output.info(&line);
                    }

                    for step in &service.steps {
                        if step.status != "completed" {
                            output.dimmed(&format!(
                                "  step {} {}{}",
                                step.step_id,
                                step.status,
                                step.detail
                                    .as_deref()
                                    .map(|d| format!(": {}", d))
                                    .unwrap_or_default()
                            ));
                        }
                    }
                }
            }
        }

        output.blank();
        output.key_value("Total", &self.summary.total.to_string());
        output.key_value("Passed", &self.summary.passed.to_string());
        output.key_value("Failed", &self.summary.failed.to_string());
        output.key_value("Errors", &self.summary.errors.to_string());
        output.key_value("Skipped", &self.summary.skipped.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::Severity;

    fn result(account: &str, region: &str, service: &str, rule: &str, status: CheckStatus) -> CheckResult {
        CheckResult {
            rule_id: rule.to_string(),
            title: "t".to_string(),
            severity: Severity::Medium,
            account: account.to_string(),
            region: region.to_string(),
            service: service.to_string(),
            resource: "r".to_string(),
            status,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_build_hierarchy_and_counts() {
        let results = vec![
            result("acct-1", "eu-west-1", "storage", "storage.a", CheckStatus::Pass),
            result("acct-1", "us-east-1", "compute", "compute.a", CheckStatus::Fail),
            result("acct-1", "us-east-1", "storage", "storage.a", CheckStatus::Pass),
            result("acct-2", "us-east-1", "storage", "storage.a", CheckStatus::Skipped),
        ];

        let report = ScanReport::build(Utc::now(), results, Vec::new());

        assert_eq!(report.summary.total, 4);
        assert_eq!(report.summary.passed, 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.skipped, 1);

        assert_eq!(report.accounts.len(), 2);
        let acct1 = &report.accounts[0];
        assert_eq!(acct1.account, "acct-1");
        assert_eq!(acct1.regions.len(), 2);
        assert_eq!(acct1.regions[1].services.len(), 2);
    }

    #[test]
    fn test_step_record_creates_empty_section() {
        let steps = vec![StepRecord {
            account: "acct-1".to_string(),
            region: "us-east-1".to_string(),
            service: "storage".to_string(),
            step_id: "buckets".to_string(),
            status: "incomplete".to_string(),
            detail: None,
        }];

        let report = ScanReport::build(Utc::now(), Vec::new(), steps);

        assert_eq!(report.summary.total, 0);
        let service = &report.accounts[0].regions[0].services[0];
        assert_eq!(service.steps[0].status, "incomplete");
        assert!(service.results.is_empty());
    }

    #[test]
    fn test_format_json() {
        let results = vec![result(
            "acct-1",
            "us-east-1",
            "storage",
            "storage.a",
            CheckStatus::Pass,
        )];
        let report = ScanReport::build(Utc::now(), results, Vec::new());

        let json = report.format_json().unwrap();
        assert!(json.contains("\"account\": \"acct-1\""));
        assert!(json.contains("\"status\": \"PASS\""));
    }
}
