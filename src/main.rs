//! LPAR DR Sync
//!
//! Brings the managed systems listed in the configuration to DR readiness:
//! discovers partitions from captured HMC output, reconciles the host
//! objects of the nominal and PRA arrays, and verifies both sites agree.
//!
//! Runs are dry by default; `--apply` lets the arrays be mutated.
//! Exit status is 0 when every system is ready, 2 when any is blocked.

use anyhow::{anyhow, Context};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lpar_dr_sync::config::ArrayConfig;
use lpar_dr_sync::orchestrator::report_schema;
use lpar_dr_sync::{
    DrConfig, HmcDumpInventory, JsonFileArray, Orchestrator, RunReport, Site, StorageStateSourceRef,
    SystemSession, SystemTarget,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// LPAR DR Sync - cross-site reconciliation of partition storage identities
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "LPAR_DR_CONFIG", default_value = "lpar-dr-sync.yaml")]
    config: PathBuf,

    /// Only process this managed system
    #[arg(short, long, env = "LPAR_DR_MANAGED_SYSTEM")]
    managed_system: Option<String>,

    /// Mutate the arrays (runs are dry by default)
    #[arg(long)]
    apply: bool,

    /// Print the reports as JSON instead of a summary
    #[arg(long)]
    json: bool,

    /// Write the JSON reports to this file
    #[arg(long, env = "LPAR_DR_REPORT_FILE")]
    report_file: Option<PathBuf>,

    /// Write Prometheus metrics to this file
    #[arg(long, env = "LPAR_DR_METRICS_FILE")]
    metrics_file: Option<PathBuf>,

    /// Print the JSON schema of the reports and exit
    #[arg(long)]
    print_schema: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every processed system is ready
async fn run(args: Args) -> anyhow::Result<bool> {
    if args.print_schema {
        println!("{}", report_schema()?);
        return Ok(true);
    }

    let mut config = DrConfig::load(&args.config)
        .with_context(|| format!("loading configuration {}", args.config.display()))?;
    if args.apply {
        config.dry_run = false;
    }

    info!("Starting LPAR DR Sync");
    info!("  Version: {}", lpar_dr_sync::VERSION);
    info!("  Mode: {}", if config.dry_run { "dry-run" } else { "apply" });
    info!("  Console: {} {}", config.console.name, config.console.endpoint);

    let dump_dir = config
        .console
        .dump_dir
        .clone()
        .context("console.dump_dir is required")?;
    let orchestrator = Orchestrator::new(config.orchestrator_config())?;

    let targets: Vec<SystemTarget> = match &args.managed_system {
        Some(name) if config.systems.is_empty() => vec![SystemTarget::new(name)],
        Some(name) => vec![config
            .system(name)
            .cloned()
            .ok_or_else(|| anyhow!("managed system {} is not configured", name))?],
        None if config.systems.is_empty() => {
            let console = HmcDumpInventory::new(&config.console.name, &dump_dir);
            orchestrator
                .managed_systems(&console)
                .await
                .context("listing managed systems")?
        }
        None => config.systems.clone(),
    };
    if targets.is_empty() {
        warn!("No managed systems to process");
    }

    // Both arrays are shared by every run; each system gets its own console
    let nominal = open_array(config.arrays.get(Site::Nominal)).await?;
    let pra = open_array(config.arrays.get(Site::Pra)).await?;
    let runs = targets
        .into_iter()
        .map(|target| {
            let session = SystemSession {
                inventory: Arc::new(HmcDumpInventory::new(&config.console.name, &dump_dir)),
                nominal: nominal.clone(),
                pra: pra.clone(),
            };
            (target, session)
        })
        .collect();

    let reports = orchestrator
        .run_all(runs)
        .await
        .into_iter()
        .collect::<lpar_dr_sync::Result<Vec<RunReport>>>()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print!("{}", report);
        }
    }

    if let Some(path) = &args.report_file {
        std::fs::write(path, serde_json::to_string_pretty(&reports)?)
            .with_context(|| format!("writing report {}", path.display()))?;
    }
    if let Some(path) = &args.metrics_file {
        std::fs::write(path, orchestrator.metrics().render()?)
            .with_context(|| format!("writing metrics {}", path.display()))?;
    }

    let blocked = reports.iter().filter(|r| !r.is_ready()).count();
    if blocked > 0 {
        warn!("{} of {} managed systems blocked", blocked, reports.len());
    } else {
        info!("All {} managed systems ready for activation", reports.len());
    }

    Ok(blocked == 0)
}

async fn open_array(array: &ArrayConfig) -> anyhow::Result<StorageStateSourceRef> {
    let path = array
        .state_file
        .as_ref()
        .with_context(|| format!("array {} has no state_file", array.name))?;
    if !array.endpoint.is_empty() {
        info!("  Array {}: {} (state {})", array.name, array.endpoint, path.display());
    }

    let opened = JsonFileArray::open(&array.name, path)
        .await
        .with_context(|| format!("opening array {}", array.name))?;
    Ok(Arc::new(opened))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Reports go to stdout, logs to stderr
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
