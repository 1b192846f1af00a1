//! mongo-mysql-migrate CLI - MongoDB to MySQL migration with foreign-key rewriting.

use clap::{Parser, Subcommand};
use mongo_mysql_migrate::{
    Config, MigrateError, MigrationPlan, MigrationResult, Orchestrator, ProgressUpdate,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mongo-mysql-migrate")]
#[command(about = "MongoDB to MySQL migration with foreign-key rewriting")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a migration
    Run {
        /// Override the batch size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Dry run: read and transform everything, write nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate row counts between source and target
    Validate,

    /// Test database connections
    HealthCheck,

    /// Show the validated migration order
    Plan,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            batch_size,
            dry_run,
        } => {
            if let Some(n) = batch_size {
                config.migration.batch_size = Some(n);
            }

            let cancel_token = setup_signal_handler();

            let mut orchestrator = if dry_run {
                Orchestrator::new_dry_run(config).await?
            } else {
                Orchestrator::new(config).await?
            };

            let printer = if cli.progress {
                let (tx, rx) = mpsc::channel(64);
                orchestrator = orchestrator.with_progress(tx);
                Some(tokio::spawn(print_progress(rx)))
            } else {
                None
            };

            let result = orchestrator.run(cancel_token, dry_run).await?;

            if let Some(printer) = printer {
                printer.await.ok();
            }

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                print_summary(&result);
            }

            Ok(result.exit_code())
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config).await?;
            let results = orchestrator.validate().await?;
            let all_match = results.iter().all(|r| r.matches);

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!("Validation Results:");
                for r in &results {
                    println!(
                        "  {} {:<12} source={} target={}",
                        if r.matches { "OK      " } else { "MISMATCH" },
                        r.table,
                        r.source_count,
                        r.target_count
                    );
                }
            }

            if !cli.output_json {
                if all_match {
                    println!("Validation completed successfully");
                } else {
                    println!("Validation completed with mismatches");
                }
            }
            Ok(0)
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source ({}): {} ({}ms)",
                    result.source_type,
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target ({}): {} ({}ms)",
                    result.target_type,
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::pool("Health check failed", "pinging stores"));
            }
            Ok(0)
        }

        Commands::Plan => {
            let plan = MigrationPlan::from_config(&config.migration)?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(plan.jobs())?);
            } else {
                println!("Migration plan ({} entity types):", plan.jobs().len());
                for job in plan.jobs() {
                    println!(
                        "  {}. {:<12} {} -> {}",
                        job.ordinal + 1,
                        job.entity,
                        job.collection,
                        job.table
                    );
                }
            }
            Ok(0)
        }
    }
}

fn print_summary(result: &MigrationResult) {
    let status_msg = if result.dry_run {
        "Dry run finished"
    } else {
        "Migration finished"
    };
    println!("\n{}: {:?}", status_msg, result.status);
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!("  Documents: {}", result.documents_processed);
    println!("  Written: {}", result.records_written);
    println!("  Dropped: {}", result.records_dropped);
    for e in &result.entities {
        println!(
            "    {:<12} {:?}: {} written, {} dropped, {} placeholders, {} identifiers",
            e.entity, e.status, e.written, e.dropped, e.placeholders, e.identifiers
        );
    }
    if let Some(ref err) = result.error {
        println!("  Error: {}", err);
    }
}

async fn print_progress(mut rx: mpsc::Receiver<ProgressUpdate>) {
    while let Some(update) = rx.recv().await {
        match serde_json::to_string(&update) {
            Ok(line) => eprintln!("{}", line),
            Err(e) => warn!("Failed to serialize progress update: {}", e),
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Cancel the returned token on SIGINT (Ctrl-C) or SIGTERM.
/// The running batch completes before the migration stops.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to install {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!("\nReceived {}. Finishing the current batch...", name);
            token.cancel();
        });
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing the current batch...");
            token.cancel();
        }
    });

    cancel_token
}
