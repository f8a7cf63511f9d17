mod catalog;
mod commands;
mod context;
mod engine;
mod exceptions;
mod output;
mod provider;
mod scan;
mod traits;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{ListCommand, ScanCommand, ScanOptions, ValidateCommand};
use context::Context;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "cloudcheck")]
#[command(about = "Declarative compliance scanning for cloud resource inventories", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a compliance scan
    Scan {
        /// Directory containing rule-definition documents
        #[arg(short, long, default_value = "catalog")]
        catalog: PathBuf,

        /// Exception document to apply to findings
        #[arg(short, long)]
        exceptions: Option<PathBuf>,

        /// Directory of recorded provider responses to scan against
        #[arg(short, long, default_value = "fixtures")]
        fixtures: PathBuf,

        /// Account to scan (repeatable)
        #[arg(short, long = "account", required = true)]
        accounts: Vec<String>,

        /// Region to scan regional services in (repeatable)
        #[arg(short, long = "region")]
        regions: Vec<String>,

        /// Only scan these services (repeatable)
        #[arg(long = "service")]
        services: Vec<String>,

        /// Only evaluate these rule ids (repeatable)
        #[arg(long = "rule")]
        rules: Vec<String>,

        /// Maximum concurrent (account, region, service) scan units
        #[arg(long, default_value_t = 4)]
        max_parallel: usize,

        /// Maximum concurrent fan-out calls within a discovery step
        #[arg(long, default_value_t = 8)]
        fan_out_limit: usize,

        /// Abort discovery after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Write the full JSON report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate catalog and exception documents without scanning
    Validate {
        /// Directory containing rule-definition documents
        #[arg(short, long, default_value = "catalog")]
        catalog: PathBuf,

        /// Exception document to validate as well
        #[arg(short, long)]
        exceptions: Option<PathBuf>,
    },

    /// List the services and checks in the catalog
    List {
        /// Directory containing rule-definition documents
        #[arg(short, long, default_value = "catalog")]
        catalog: PathBuf,

        /// Only show this service
        #[arg(short, long)]
        service: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let ctx = Context::new();

    match run(&ctx, cli.command).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            ctx.output.error(&format!("{:#}", e));
            ExitCode::from(2)
        }
    }
}

async fn run(ctx: &Context, command: Commands) -> Result<u8> {
    match command {
        Commands::Scan {
            catalog,
            exceptions,
            fixtures,
            accounts,
            regions,
            services,
            rules,
            max_parallel,
            fan_out_limit,
            timeout_secs,
            output,
        } => {
            let options = ScanOptions {
                catalog_dir: catalog,
                exceptions_file: exceptions,
                fixtures_dir: fixtures,
                accounts,
                regions,
                services,
                rules,
                max_parallel,
                fan_out_limit,
                timeout_secs,
                output_file: output,
            };

            let code = ScanCommand::execute(ctx, &options).await?;
            Ok(code as u8)
        }
        Commands::Validate {
            catalog,
            exceptions,
        } => {
            let code = ValidateCommand::execute(ctx, &catalog, exceptions.as_ref())?;
            Ok(code as u8)
        }
        Commands::List { catalog, service } => {
            ListCommand::execute(ctx, &catalog, service.as_deref())?;
            Ok(0)
        }
    }
}
