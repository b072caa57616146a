use clap::{Parser, Subcommand, ValueEnum};
use ingest::Pipeline;
use ingest::locks::Source;
use metrics_exporter_statsd::StatsdBuilder;
use std::error::Error;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod config;

use config::{Config, LoggingConfig, MetricsConfig};

const METRICS_PREFIX: &str = "covid19";

#[derive(Parser)]
#[command(version, about = "Refreshes normalized COVID-19 case data for India")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, short, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Fetch upstream data and update the store
    Refresh {
        #[arg(value_enum, default_value_t = Target::All)]
        target: Target,
    },
    /// Load and validate the config file, then exit
    CheckConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum Target {
    Official,
    Testing,
    Hospitals,
    PatientDb,
    All,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;

    let _sentry = init_tracing(&config.logging)?;
    if let Some(metrics) = &config.metrics {
        init_metrics(metrics)?;
    }

    match cli.command {
        CliCommand::CheckConfig => {
            tracing::info!(path = %cli.config.display(), "Config is valid");
            Ok(())
        }
        CliCommand::Refresh { target } => {
            let pipeline = Pipeline::from_config(&config.ingest)?;
            if refresh(&pipeline, target).await {
                Ok(())
            } else {
                std::process::exit(1);
            }
        }
    }
}

/// Runs the requested refresh and prints a structured error payload for each
/// failed source. Returns whether every source succeeded.
async fn refresh(pipeline: &Pipeline, target: Target) -> bool {
    let results = match target {
        Target::Official => vec![(Source::Official, pipeline.refresh_official().await.map(drop))],
        Target::Testing => vec![(Source::Testing, pipeline.refresh_testing().await.map(drop))],
        Target::Hospitals => vec![(
            Source::HospitalBeds,
            pipeline.refresh_hospital_beds().await.map(drop),
        )],
        Target::PatientDb => vec![(
            Source::PatientDb,
            pipeline.refresh_patient_db().await.map(drop),
        )],
        Target::All => pipeline.refresh_all().await,
    };

    let mut ok = true;
    for (source, result) in results {
        if let Err(err) = result {
            ok = false;
            let payload = serde_json::json!({
                "source": source.as_str(),
                "error": err.payload(),
            });
            println!("{payload}");
        }
    }
    ok
}

fn init_tracing(logging: &LoggingConfig) -> Result<Option<sentry::ClientInitGuard>, Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.level))?;

    let sentry = logging.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    let sentry_layer = sentry
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .try_init()?;

    Ok(sentry)
}

fn init_metrics(config: &MetricsConfig) -> Result<(), Box<dyn Error>> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(METRICS_PREFIX))?;
    metrics::set_global_recorder(recorder)
        .map_err(|e| format!("could not install metrics recorder: {e}"))?;

    shared::metrics_defs::describe_all(ingest::metrics_defs::ALL_METRICS);
    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Metrics reporting to statsd"
    );
    Ok(())
}
