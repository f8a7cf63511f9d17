//! Catalog loading and fail-fast validation.
//!
//! Every rule-definition document is validated before any provider call is
//! made: dangling or forward step references, duplicate ids, conditions
//! missing their operand, and unparseable expressions all reject the catalog
//! as a whole.

use crate::catalog::model::{CheckDefinition, ConditionNode, DiscoveryStep, ServiceDefinition};
use crate::engine::resolver::FieldPath;
use crate::engine::value::Value;
use crate::scan::error::{ScanError, ScanResult};
use crate::traits::FileSystem;
use std::collections::HashSet;
use std::path::Path;

const MAX_CATALOG_DEPTH: usize = 6;

/// The full set of loaded service definitions. Read-only for the scan's
/// lifetime.
#[derive(Debug, Clone)]
pub struct Catalog {
    services: Vec<ServiceDefinition>,
}

impl Catalog {
    /// Load and validate every `.yaml`/`.yml` document under a directory tree
    pub fn load_dir(fs: &dyn FileSystem, dir: &Path) -> ScanResult<Catalog> {
        if !fs.is_dir(dir) {
            return Err(ScanError::DocumentParse {
                path: dir.display().to_string(),
                detail: "catalog path is not a directory".to_string(),
            });
        }

        let mut paths: Vec<_> = fs
            .walk_dir(dir, MAX_CATALOG_DEPTH)
            .map_err(|e| ScanError::DocumentParse {
                path: dir.display().to_string(),
                detail: e.to_string(),
            })?
            .into_iter()
            .filter(|p| fs.is_file(p) && is_catalog_file(p))
            .collect();
        paths.sort();

        let mut services = Vec::new();
        for path in paths {
            services.push(Self::load_file(fs, &path)?);
        }

        Self::from_services(services)
    }

    /// Load and validate a single rule-definition document
    pub fn load_file(fs: &dyn FileSystem, path: &Path) -> ScanResult<ServiceDefinition> {
        let contents = fs
            .read_to_string(path)
            .map_err(|e| ScanError::DocumentParse {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?;

        let definition: ServiceDefinition =
            serde_yaml::from_str(&contents).map_err(|e| ScanError::DocumentParse {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?;

        validate_service(&definition)?;
        Ok(definition)
    }

    /// Build a catalog from already-parsed definitions, validating each and
    /// rejecting duplicate service names and duplicate rule ids
    pub fn from_services(services: Vec<ServiceDefinition>) -> ScanResult<Catalog> {
        let mut service_names = HashSet::new();
        let mut rule_ids = HashSet::new();

        for definition in &services {
            validate_service(definition)?;

            if !service_names.insert(definition.service.clone()) {
                return Err(ScanError::CatalogValidation {
                    service: definition.service.clone(),
                    detail: "duplicate service definition".to_string(),
                });
            }

            for check in &definition.checks {
                if !rule_ids.insert(check.rule_id.clone()) {
                    return Err(ScanError::CatalogValidation {
                        service: definition.service.clone(),
                        detail: format!("duplicate rule_id '{}'", check.rule_id),
                    });
                }
            }
        }

        Ok(Catalog { services })
    }

    pub fn services(&self) -> &[ServiceDefinition] {
        &self.services
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

fn is_catalog_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == "yaml" || ext == "yml")
        .unwrap_or(false)
}

/// Validate one service definition. A step's parent must be declared before
/// it, which also makes cycles unrepresentable.
pub fn validate_service(definition: &ServiceDefinition) -> ScanResult<()> {
    let service = &definition.service;

    if service.trim().is_empty() {
        return Err(ScanError::CatalogValidation {
            service: service.clone(),
            detail: "service name is empty".to_string(),
        });
    }

    let mut seen_steps: HashSet<&str> = HashSet::new();

    for step in &definition.discovery {
        if !seen_steps.insert(step.discovery_id.as_str()) {
            return Err(ScanError::CatalogValidation {
                service: service.clone(),
                detail: format!("duplicate discovery_id '{}'", step.discovery_id),
            });
        }

        if let Some(parent) = &step.for_each {
            if parent == &step.discovery_id {
                return Err(ScanError::CatalogValidation {
                    service: service.clone(),
                    detail: format!("step '{}' references itself", step.discovery_id),
                });
            }

            // seen_steps already contains this step's own id, checked above
            if !seen_steps.contains(parent.as_str()) {
                return Err(ScanError::CatalogValidation {
                    service: service.clone(),
                    detail: format!(
                        "step '{}' references unknown or later step '{}'",
                        step.discovery_id, parent
                    ),
                });
            }
        }

        validate_step(service, step)?;
    }

    let mut seen_rules: HashSet<&str> = HashSet::new();
    for check in &definition.checks {
        if !seen_rules.insert(check.rule_id.as_str()) {
            return Err(ScanError::CatalogValidation {
                service: service.clone(),
                detail: format!("duplicate rule_id '{}'", check.rule_id),
            });
        }

        if !seen_steps.contains(check.for_each.as_str()) {
            return Err(ScanError::CatalogValidation {
                service: service.clone(),
                detail: format!(
                    "check '{}' references unknown step '{}'",
                    check.rule_id, check.for_each
                ),
            });
        }

        validate_condition(service, check, &check.condition)?;
    }

    Ok(())
}

fn validate_step(service: &str, step: &DiscoveryStep) -> ScanResult<()> {
    if step.calls.is_empty() {
        return Err(ScanError::CatalogValidation {
            service: service.to_string(),
            detail: format!("step '{}' has no calls", step.discovery_id),
        });
    }

    for call in &step.calls {
        if call.action.trim().is_empty() {
            return Err(ScanError::CatalogValidation {
                service: service.to_string(),
                detail: format!("step '{}' has a call without an action", step.discovery_id),
            });
        }

        for (name, template) in &call.params {
            if let Value::String(text) = template {
                validate_template(service, &step.discovery_id, name, text)?;
            }
        }
    }

    if let Some(items) = &step.emit.items {
        FieldPath::parse(items).map_err(|e| ScanError::CatalogValidation {
            service: service.to_string(),
            detail: format!("step '{}' emit items: {}", step.discovery_id, e),
        })?;
    }

    for (field, expression) in &step.emit.fields {
        FieldPath::parse(expression).map_err(|e| ScanError::CatalogValidation {
            service: service.to_string(),
            detail: format!(
                "step '{}' emit field '{}': {}",
                step.discovery_id, field, e
            ),
        })?;
    }

    Ok(())
}

fn validate_template(service: &str, step: &str, param: &str, text: &str) -> ScanResult<()> {
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| ScanError::CatalogValidation {
            service: service.to_string(),
            detail: format!("step '{}' param '{}': unterminated placeholder", step, param),
        })?;

        FieldPath::parse(after[..end].trim()).map_err(|e| ScanError::CatalogValidation {
            service: service.to_string(),
            detail: format!("step '{}' param '{}': {}", step, param, e),
        })?;

        rest = &after[end + 2..];
    }

    Ok(())
}

fn validate_condition(
    service: &str,
    check: &CheckDefinition,
    node: &ConditionNode,
) -> ScanResult<()> {
    match node {
        ConditionNode::All { all } => {
            if all.is_empty() {
                return Err(ScanError::CatalogValidation {
                    service: service.to_string(),
                    detail: format!("check '{}' has an empty 'all' node", check.rule_id),
                });
            }
            for child in all {
                validate_condition(service, check, child)?;
            }
            Ok(())
        }
        ConditionNode::Any { any } => {
            if any.is_empty() {
                return Err(ScanError::CatalogValidation {
                    service: service.to_string(),
                    detail: format!("check '{}' has an empty 'any' node", check.rule_id),
                });
            }
            for child in any {
                validate_condition(service, check, child)?;
            }
            Ok(())
        }
        ConditionNode::Not { not } => validate_condition(service, check, not),
        ConditionNode::Leaf(leaf) => {
            FieldPath::parse(&leaf.path).map_err(|e| ScanError::CatalogValidation {
                service: service.to_string(),
                detail: format!("check '{}': {}", check.rule_id, e),
            })?;

            if leaf.operator.requires_expected() && leaf.expected.is_none() {
                return Err(ScanError::CatalogValidation {
                    service: service.to_string(),
                    detail: format!(
                        "check '{}': operator '{}' requires 'expected'",
                        check.rule_id,
                        leaf.operator.as_str()
                    ),
                });
            }

            Ok(())
        }
    }
}
