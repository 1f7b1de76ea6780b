// ABOUTME: Entry point for the devstate binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and serves the HTTP API or dumps a log file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use devstate_core::DeviceStateRecord;
use devstate_server::{AppState, DevstateConfig, create_router};
use devstate_store::{LogError, LogReader, Schema, Value};

#[derive(Debug, Parser)]
#[command(name = "devstate", version, about = "Device-state persistence engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API (the default).
    Serve {
        /// Storage root; overrides DEVSTATE_ROOT.
        #[arg(long)]
        root: Option<PathBuf>,
        /// Listen address; overrides DEVSTATE_BIND.
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Print a log file's header and records as JSON lines.
    Dump {
        /// Path to a device_state_*.avro file.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "devstate=debug,devstate_store=debug,devstate_server=debug,tower_http=debug",
                )
            }),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve {
        root: None,
        bind: None,
    }) {
        Command::Serve { root, bind } => serve(root, bind).await,
        Command::Dump { file } => dump(&file),
    }
}

async fn serve(root: Option<PathBuf>, bind: Option<SocketAddr>) -> anyhow::Result<()> {
    let mut config = DevstateConfig::from_env().context("invalid configuration")?;
    if let Some(root) = root {
        config.root = root;
    }
    if let Some(bind) = bind {
        config.bind = bind;
    }

    std::fs::create_dir_all(&config.root)
        .with_context(|| format!("failed to create storage root {}", config.root.display()))?;

    let state = Arc::new(AppState::new(config.engine_config()));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(
        "devstate listening on {} (root {}, codec {})",
        config.bind,
        config.root.display(),
        config.codec.name()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("devstate shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

fn dump(file: &Path) -> anyhow::Result<()> {
    let reader =
        LogReader::open(file).with_context(|| format!("failed to read {}", file.display()))?;
    let header = reader.header();

    println!(
        "{}",
        serde_json::json!({
            "schema": serde_json::to_value(&header.schema)?,
            "codec": header.codec.name(),
            "creator": header.creator(),
        })
    );

    match reader.records::<DeviceStateRecord>() {
        Ok(records) => {
            for record in records {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Err(LogError::SchemaMismatch(_)) => {
            for values in reader.values()? {
                println!("{}", datum_json(&header.schema, values));
            }
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// A datum as a JSON object keyed by field name. Bytes become arrays of
/// numbers.
fn datum_json(schema: &Schema, values: Vec<Value>) -> serde_json::Value {
    let fields = schema
        .fields
        .iter()
        .zip(values)
        .map(|(field, value)| {
            let json = match value {
                Value::Boolean(b) => serde_json::Value::from(b),
                Value::Int(n) => serde_json::Value::from(n),
                Value::Long(n) => serde_json::Value::from(n),
                Value::String(s) => serde_json::Value::from(s),
                Value::Bytes(b) => serde_json::Value::from(b),
            };
            (field.name.clone(), json)
        })
        .collect();
    serde_json::Value::Object(fields)
}
