//! logpump - stream live logs to connected consumers
//!
//! Usage:
//!     logpump --config <path>
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use logpump::config::{Config, load_config};
use logpump::metrics::{MetricsCollector, MetricsServer};
use logpump::pump::ConsolePump;
use logpump::server::ConsoleListener;
use logpump::shutdown::DeadSignal;
use logpump::util::init_logging;

/// Stream live logs to connected consumers.
#[derive(Parser, Debug)]
#[command(name = "logpump")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| {
        format!(
            "failed to load configuration from '{}'",
            cli.config.display()
        )
    })?;

    if cli.validate {
        println!("Configuration is valid.");
        println!("  Console: {} ({:?})", config.console.listen, config.console.message_kind);
        if config.metrics.enabled {
            println!("  Metrics: {}{}", config.metrics.address, config.metrics.path);
        }
        println!(
            "  Shutdown grace period: {}",
            humantime::format_duration(config.shutdown.grace_period)
        );
        return Ok(());
    }

    // CLI overrides config
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);

    let metrics = MetricsCollector::new();
    let pump = ConsolePump::with_metrics(config.console.message_kind, metrics.clone());

    init_logging(log_level, &config.global.log_format, Some(pump.clone()));

    info!(
        config_path = %cli.config.display(),
        console = %config.console.listen,
        metrics_enabled = config.metrics.enabled,
        "logpump starting"
    );

    run(config, pump, metrics)
}

/// Run the servers with the given configuration.
fn run(config: Config, pump: ConsolePump, metrics: MetricsCollector) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async { run_async(config, pump, metrics).await })
}

/// Async entry point.
async fn run_async(config: Config, pump: ConsolePump, metrics: MetricsCollector) -> Result<()> {
    let signal = Arc::new(DeadSignal::new());
    let mut handles = Vec::new();

    let console = ConsoleListener::bind(config.console.listen, pump)
        .await
        .with_context(|| format!("failed to bind console listener on {}", config.console.listen))?;
    handles.push(tokio::spawn(console.run(Arc::clone(&signal))));

    if config.metrics.enabled {
        let server = MetricsServer::bind(
            config.metrics.address,
            config.metrics.path.clone(),
            config.metrics.cache_ttl,
            metrics,
        )
        .await
        .with_context(|| format!("failed to bind metrics server on {}", config.metrics.address))?;
        handles.push(tokio::spawn(server.run(Arc::clone(&signal))));
    }

    info!("logpump is running");
    info!("press Ctrl+C to stop");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("received shutdown signal");
        }
        Err(e) => {
            error!(error = %e, "failed to listen for shutdown signal");
        }
    }

    let grace = config.shutdown.grace_period;
    if let Err(e) = signal.close_within("ctrl-c", grace).await {
        warn!(error = %e, "forcing shutdown with workers still running");
        for handle in &handles {
            handle.abort();
        }
    }

    for handle in handles {
        let _ = handle.await;
    }

    info!("logpump shut down complete");
    Ok(())
}
