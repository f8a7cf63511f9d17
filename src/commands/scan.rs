use crate::catalog::Catalog;
use crate::context::Context;
use crate::exceptions::ExceptionSet;
use crate::provider::{FixtureProvider, ProviderClient};
use crate::scan::report::ScanReport;
use crate::scan::{ScanConfig, ScanFilters, Scanner};
use anyhow::{Result, bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// All inputs of one scan invocation, as collected from the CLI
pub struct ScanOptions {
    pub catalog_dir: PathBuf,
    pub exceptions_file: Option<PathBuf>,
    pub fixtures_dir: PathBuf,
    pub accounts: Vec<String>,
    pub regions: Vec<String>,
    pub services: Vec<String>,
    pub rules: Vec<String>,
    pub max_parallel: usize,
    pub fan_out_limit: usize,
    pub timeout_secs: Option<u64>,
    pub output_file: Option<PathBuf>,
}

/// Handles the 'scan' command - runs the full compliance scan
pub struct ScanCommand;

impl ScanCommand {
    /// Execute the scan command. Returns the process exit code: 0 when the
    /// scan completed (individual FAIL/ERROR verdicts are findings, not
    /// process failures), 1 when the catalog or exception documents do not
    /// validate. Fatal failures bubble as `Err` and exit with code 2.
    pub async fn execute(ctx: &Context, options: &ScanOptions) -> Result<i32> {
        if options.accounts.is_empty() {
            bail!("At least one --account is required");
        }

        let catalog = match Catalog::load_dir(ctx.fs.as_ref(), &options.catalog_dir) {
            Ok(catalog) => catalog,
            Err(e) => {
                ctx.output
                    .error(&format!("Failed to load rule catalog: {:#}", e));
                return Ok(1);
            }
        };

        if catalog.is_empty() {
            ctx.output.error(&format!(
                "No service definitions found in {:?}",
                options.catalog_dir
            ));
            return Ok(1);
        }

        let exceptions = match &options.exceptions_file {
            Some(path) => match ExceptionSet::load_file(ctx.fs.as_ref(), path) {
                Ok(exceptions) => exceptions,
                Err(e) => {
                    ctx.output
                        .error(&format!("Failed to load exceptions: {:#}", e));
                    return Ok(1);
                }
            },
            None => ExceptionSet::empty(),
        };

        let provider: Arc<dyn ProviderClient> = Arc::new(FixtureProvider::new(
            ctx.fs.clone(),
            options.fixtures_dir.clone(),
        ));

        let config = ScanConfig {
            accounts: options.accounts.clone(),
            regions: options.regions.clone(),
            filters: ScanFilters {
                services: options.services.clone(),
                rules: options.rules.clone(),
            },
            max_parallel_units: options.max_parallel,
            fan_out_limit: options.fan_out_limit,
            timeout: options.timeout_secs.map(Duration::from_secs),
            ..ScanConfig::default()
        };

        let scanner = Scanner::new(Arc::new(catalog), Arc::new(exceptions), provider);
        let report = scanner
            .run(&config)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        report.print_summary(ctx.output.as_ref());

        if let Some(path) = &options.output_file {
            Self::write_report(ctx, &report, path)?;
        }

        Ok(0)
    }

    fn write_report(ctx: &Context, report: &ScanReport, path: &Path) -> Result<()> {
        let json = report.format_json()?;
        ctx.fs.write(path, &json)?;
        ctx.output
            .success(&format!("Report written to {}", path.display()));
        Ok(())
    }
}
