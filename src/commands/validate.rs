use crate::catalog::Catalog;
use crate::context::Context;
use crate::exceptions::ExceptionSet;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Handles the 'validate' command - checks catalog and exception documents
/// without scanning anything. Returns exit code 1 when a document does not
/// validate, 0 otherwise.
pub struct ValidateCommand;

impl ValidateCommand {
    pub fn execute(
        ctx: &Context,
        catalog_dir: &Path,
        exceptions_file: Option<&PathBuf>,
    ) -> Result<i32> {
        let catalog = match Catalog::load_dir(ctx.fs.as_ref(), catalog_dir) {
            Ok(catalog) => catalog,
            Err(e) => {
                ctx.output
                    .error(&format!("Catalog validation failed: {:#}", e));
                return Ok(1);
            }
        };

        let check_count: usize = catalog.services().iter().map(|s| s.checks.len()).sum();
        ctx.output.success(&format!(
            "Catalog is valid: {} services, {} checks",
            catalog.services().len(),
            check_count
        ));

        if let Some(path) = exceptions_file {
            match ExceptionSet::load_file(ctx.fs.as_ref(), path) {
                Ok(exceptions) => ctx.output.success(&format!(
                    "Exceptions are valid: {} entries",
                    exceptions.len()
                )),
                Err(e) => {
                    ctx.output
                        .error(&format!("Exception validation failed: {:#}", e));
                    return Ok(1);
                }
            }
        }

        Ok(0)
    }
}
