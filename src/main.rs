use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use clap::{Parser, Subcommand};
use hooktrigger::config::{DEFAULT_CONFIG_PATH, load_config};
use hooktrigger::local::LocalGitProvider;
use hooktrigger::logging::setup_logging;
use hooktrigger::{Dispatch, Engine, EngineConfig, EngineError, GitProvider, ProviderKind};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Webhook trigger engine for workflow orchestration
#[derive(Parser, Debug)]
#[command(name = "hooktrigger")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "HOOKTRIGGER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a recorded webhook payload against the local repositories
    Trigger {
        #[arg(long, default_value = "github")]
        provider: ProviderKind,
        /// Event type, as the provider sends it in its event header
        #[arg(long)]
        event: String,
        /// JSON body of the delivery
        #[arg(long)]
        payload: PathBuf,
    },
    /// Register the configured webhooks, check their health, then clean up
    Diagnose,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config: EngineConfig = match load_config(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let _guard = match setup_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging: {}", e);
            std::process::exit(1);
        }
    };
    info!("Using config at {:?}", args.config);

    let root = config.local_root.clone().unwrap_or_else(|| PathBuf::from("."));
    let result = match args.command {
        Command::Trigger {
            provider,
            event,
            payload,
        } => run_trigger(config, root, provider, &event, &payload).await,
        Command::Diagnose => run_diagnose(config, root).await,
    };

    if let Err(e) = result {
        error!(error = %e, "command failed");
        std::process::exit(1);
    }
}

async fn run_trigger(
    config: EngineConfig,
    root: PathBuf,
    kind: ProviderKind,
    event: &str,
    payload: &Path,
) -> Result<(), EngineError> {
    let body = tokio::fs::read(payload).await?;
    let provider = Arc::new(
        LocalGitProvider::new(root)
            .with_kind(kind)
            .with_webhook_url(config.webhook_url.clone()),
    );

    let mut headers = HeaderMap::new();
    let name = HeaderName::from_bytes(kind.event_header().as_bytes())
        .map_err(|e| EngineError::Config(format!("bad header name: {}", e)))?;
    let value = HeaderValue::from_str(event)
        .map_err(|e| EngineError::InvalidPayload(format!("bad event name '{}': {}", event, e)))?;
    headers.insert(name, value);

    let inbound = provider.handle_payload(&headers, &body)?;
    let engine = Engine::new(config, provider);
    match engine.dispatch(inbound).await? {
        Dispatch::Ping { hook_id } => info!(hook_id, "ping payload, nothing to run"),
        Dispatch::Batches(batches) => println!("{}", serde_json::to_string_pretty(&batches)?),
    }
    Ok(())
}

async fn run_diagnose(config: EngineConfig, root: PathBuf) -> Result<(), EngineError> {
    let provider = Arc::new(
        LocalGitProvider::new(root)
            .with_kind(config.provider)
            .with_webhook_url(config.webhook_url.clone()),
    );
    let (ping_tx, ping_rx) = mpsc::unbounded_channel();
    provider.set_ping_sink(ping_tx);

    let engine = Engine::new(config, provider);
    let listener = engine.registry().spawn_ping_listener(ping_rx);
    let result = engine.run_health_check().await;
    listener.abort();
    if result.is_ok() {
        info!(org = %engine.config().org_name, "all webhooks healthy");
    }
    result
}
