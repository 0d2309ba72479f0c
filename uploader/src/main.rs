mod config;

use clap::{Parser, Subcommand};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{Config, LoggingConfig, MetricsConfig};

const DEFAULT_LOG_LEVEL: &str = "info";
const METRICS_PREFIX: &str = "uploader";

#[derive(Parser)]
#[command(name = "uploader", about = "Relays droplet and build artifact uploads")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the upload relay
    Run {
        #[arg(long)]
        config: PathBuf,
    },
    /// Load and validate a config file, then exit
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Run { config } => run(&config),
        CliCommand::CheckConfig { config } => check_config(&config),
    }
}

fn load_config(path: &std::path::Path) -> Option<Config> {
    match Config::from_file(path) {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            None
        }
    }
}

fn check_config(path: &std::path::Path) -> ExitCode {
    let Some(config) = load_config(path) else {
        return ExitCode::FAILURE;
    };
    match config.relay.validate() {
        Ok(()) => {
            println!("{}: ok", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            ExitCode::FAILURE
        }
    }
}

fn run(path: &std::path::Path) -> ExitCode {
    let Some(config) = load_config(path) else {
        return ExitCode::FAILURE;
    };

    // Both outbound and inbound TLS go through rustls with ring.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let logging = config.common.logging.unwrap_or_default();
    let _sentry = init_logging(&logging);

    if let Some(metrics) = &config.common.metrics
        && let Err(e) = init_metrics(metrics)
    {
        tracing::error!(error = %e, "failed to set up metrics");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("starting uploader");
    match runtime.block_on(relay::run(config.relay, relay::shutdown::shutdown_signal())) {
        Ok(()) => {
            tracing::info!("uploader stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = &e as &dyn std::error::Error, "uploader failed");
            ExitCode::FAILURE
        }
    }
}

/// The returned guard flushes pending Sentry events when dropped.
fn init_logging(logging: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let guard = logging.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(logging.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), Box<dyn std::error::Error>> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(METRICS_PREFIX))?;
    metrics::set_global_recorder(recorder).map_err(|e| e.to_string())?;
    shared::metrics_defs::describe_all(relay::metrics_defs::ALL_METRICS);
    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "reporting metrics to statsd"
    );
    Ok(())
}
