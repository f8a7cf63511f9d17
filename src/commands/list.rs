use crate::catalog::Catalog;
use crate::context::Context;
use anyhow::{Context as AnyhowContext, Result};
use std::path::Path;

/// Handles the 'list' command - shows the catalog's services and checks
pub struct ListCommand;

impl ListCommand {
    pub fn execute(ctx: &Context, catalog_dir: &Path, service_filter: Option<&str>) -> Result<()> {
        let catalog =
            Catalog::load_dir(ctx.fs.as_ref(), catalog_dir).context("Failed to load catalog")?;

        ctx.output.section("Rule Catalog");

        for service in catalog.services() {
            if service_filter.is_some_and(|f| f != service.service) {
                continue;
            }

            ctx.output.subsection(&format!(
                "{} ({} scope, {} discovery steps)",
                service.service,
                service.scope.as_str(),
                service.discovery.len()
            ));

            for check in &service.checks {
                ctx.output
                    .key_value(
                        &check.rule_id,
                        &format!("[{}] {}", check.severity.as_str(), check.title),
                    );
            }
        }

        Ok(())
    }
}
