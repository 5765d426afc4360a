//! legacy-migrate CLI - runs configured table migrations into PostgreSQL.

use clap::{Parser, Subcommand};
use legacy_migrate::{
    drivers, Config, MigrateError, MigrationRunner, PgTarget, SourceConnector,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "legacy-migrate")]
#[command(about = "Migrate legacy relational tables into a PostgreSQL schema")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "migration.yaml", global = true)]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long, global = true)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info", global = true)]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured table migrations in order
    Run {
        /// Only migrate these tables (source name or target type); repeatable
        #[arg(long = "table", value_name = "NAME")]
        tables: Vec<String>,
    },

    /// Check the configuration and print the migration plan without connecting
    Validate,

    /// Test source and target connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?} (hash {})", cli.config, config.hash());

    match cli.command {
        Commands::Run { tables } => {
            let source: Arc<dyn SourceConnector> = Arc::from(drivers::connector(&config.source)?);
            let target = Arc::new(PgTarget::connect(&config.target).await?);

            let mut runner = MigrationRunner::from_config(&config, source, target.clone(), target)?
                .only(tables.as_slice())?;
            let mut ctx = config.context()?;
            let summaries = runner.run(&mut ctx).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                println!("\nMigration completed!");
                println!("  Run ID: {}", ctx.run_id());
                for summary in &summaries {
                    println!("  {}", summary);
                }
                let failed: u64 = summaries.iter().map(|s| s.rows_failed).sum();
                let batches: u64 = summaries.iter().map(|s| s.batches_failed).sum();
                if failed > 0 || batches > 0 {
                    println!(
                        "  {} row(s) and {} backfill batch(es) failed; see the log for details",
                        failed, batches
                    );
                }
            }
        }

        Commands::Validate => {
            // Building the connector and pool checks URLs and TLS settings
            // without opening a connection.
            let source: Arc<dyn SourceConnector> = Arc::from(drivers::connector(&config.source)?);
            let target = Arc::new(PgTarget::new(&config.target)?);
            let plans =
                MigrationRunner::from_config(&config, source, target.clone(), target)?.plan()?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&plans)?);
            } else {
                println!("Configuration is valid. Migration plan:");
                for (i, plan) in plans.iter().enumerate() {
                    println!("  {}. {}", i + 1, plan);
                }
            }
        }

        Commands::HealthCheck => {
            let started = Instant::now();
            let source = match drivers::connector(&config.source) {
                Ok(connector) => match connector.connect().await {
                    Ok(conn) => conn.close().await,
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };
            let source_ms = started.elapsed().as_millis() as u64;

            let started = Instant::now();
            let target = match PgTarget::new(&config.target) {
                Ok(pg) => pg.health_check().await,
                Err(e) => Err(e),
            };
            let target_ms = started.elapsed().as_millis() as u64;

            let healthy = source.is_ok() && target.is_ok();

            if cli.output_json {
                let result = serde_json::json!({
                    "source_connected": source.is_ok(),
                    "source_latency_ms": source_ms,
                    "source_error": source.as_ref().err().map(|e| e.to_string()),
                    "target_connected": target.is_ok(),
                    "target_latency_ms": target_ms,
                    "target_error": target.as_ref().err().map(|e| e.to_string()),
                    "healthy": healthy,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source ({}): {} ({}ms)",
                    config.source.driver,
                    if source.is_ok() { "OK" } else { "FAILED" },
                    source_ms
                );
                if let Err(ref err) = source {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (PostgreSQL): {} ({}ms)",
                    if target.is_ok() { "OK" } else { "FAILED" },
                    target_ms
                );
                if let Err(ref err) = target {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            source?;
            target?;
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };

    // RUST_LOG, when set, wins over --verbosity.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
