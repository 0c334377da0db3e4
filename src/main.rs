use anyhow::Result;
use clap::{Parser, Subcommand};
use gatewatch::api::AppState;
use gatewatch::config::{GatewatchConfig, LoggingConfig};
use gatewatch::storage;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "gatewatch",
    about = "Access-log analytics backend for security-monitoring dashboards",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file (overrides GATEWATCH_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print granted/denied counts per timestamp as JSON
    Counts,

    /// Print the seasonal-trend decomposition of granted counts as JSON
    Decompose {
        /// Seasonal period in observations (overrides config)
        #[arg(long)]
        period: Option<usize>,
    },

    /// Train on stored history and print P(granted) for an hour of day
    Predict {
        /// Hour of day, 0-23
        #[arg(long, allow_negative_numbers = true)]
        hour: i64,
    },

    /// Print the first/last event and the number of days covered
    Span,

    /// Record a single access event
    Ingest {
        /// Event time (UTC), e.g. "2024-03-01 14:05:00"
        #[arg(long)]
        timestamp: String,

        /// Status label, e.g. "Acceso permitido"
        #[arg(long)]
        status: String,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_state(config: &GatewatchConfig) -> Result<AppState> {
    let pool = storage::open_pool(&config.database.path.to_string_lossy())?;
    AppState::new(Arc::new(storage::SqliteEventSource::new(pool)), config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = GatewatchConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting gatewatch daemon");
            gatewatch::serve(&config).await?;
        }
        Commands::Counts => {
            let state = open_state(&config)?;
            let aggregation = state.access_counts()?;
            print_json(&aggregation)?;
        }
        Commands::Decompose { period } => {
            let state = open_state(&config)?;
            let result = state.decomposition(period)?;
            print_json(&result)?;
        }
        Commands::Predict { hour } => {
            gatewatch::analysis::model::validate_hour(hour)?;
            let state = open_state(&config)?;
            state.retrain()?;
            let probability = state.estimator.predict(hour)?;
            print_json(&serde_json::json!({ "hour": hour, "probability": probability }))?;
        }
        Commands::Span => {
            let state = open_state(&config)?;
            print_json(&state.observation_span()?)?;
        }
        Commands::Ingest { timestamp, status } => {
            let offset = config.analytics.offset()?;
            let parsed = gatewatch::analysis::aggregator::parse_timestamp(&timestamp, offset)?;
            let occurred_at = storage::stored_timestamp(&parsed);
            let pool = storage::open_pool(&config.database.path.to_string_lossy())?;
            let id = storage::insert_event(&pool, &occurred_at, &status)?;
            tracing::info!(id, %occurred_at, %status, "Recorded access event");
            println!("Recorded event {}.", id);
        }
    }

    Ok(())
}
