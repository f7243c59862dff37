/*
newsmill - single-binary main.rs
This binary starts the Rocket control server and owns the generator engine in the same process.
*/

use anyhow::{Context, Result};
use clap::Parser;
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use common::init_db_pool;

use newsmill::engine::{Engine, EngineSettings};
use newsmill::events::{BroadcastLayer, EventBroadcaster};
use newsmill::ingestion::build_client;
use newsmill::llm::remote::RemoteLlmProvider;
use newsmill::llm::{LlmGateway, LlmProvider};
use newsmill::registry::SourceRegistry;
use newsmill::server::{launch_control_server, AppState};
use newsmill::storage::SqliteSink;

#[derive(Parser, Debug)]
#[command(name = "newsmill", about = "Newsmill essay-material generator + control server")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Start the generator right away instead of waiting for POST /api/v1/generator/start
    #[arg(long)]
    autostart: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logging: console output plus the in-process broadcaster behind the log stream.
    // Default history sizes until the configuration is loaded.
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let bootstrap_events = EventBroadcaster::default();
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(BroadcastLayer::new(bootstrap_events.clone()))
        .init();

    // Resolve config paths
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("failed to load configuration: {:#}", e);
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    bootstrap_events.resize(&config.events);

    let db_pool = init_db_pool(&config.database.path)
        .await
        .with_context(|| format!("failed to open database at {}", config.database.path))?;
    info!(db_path = %config.database.path, "database ready");

    let sink = SqliteSink::new(db_pool);
    sink.ensure_schema().await?;

    let provider = create_llm_provider(&config)?;
    let llm_cfg = config.llm.as_ref();
    let gateway = LlmGateway::new(provider, CancellationToken::new())
        .with_call_timeout(llm_cfg.and_then(|l| l.call_timeout_seconds))
        .with_max_parse_retries(llm_cfg.and_then(|l| l.max_parse_retries));

    let client = build_client(&config.user_agent(), config.fetch_timeout_seconds())?;
    let registry = SourceRegistry::from_config(&config.sources, client)?;

    let engine = Arc::new(Engine::new(
        Arc::new(registry),
        gateway,
        Arc::new(sink),
        EngineSettings::from_config(&config),
    ));

    if args.autostart {
        if let Err(e) = engine.start().await {
            error!("autostart failed: {}", e);
        }
    }

    let state = AppState::new(engine.clone(), bootstrap_events);
    if let Err(e) = launch_control_server(state, config.server.as_ref()).await {
        error!("control server failed: {:#}", e);
    }

    // Rocket has returned (ctrl-c or failure): stop the generator before exiting.
    if engine.is_running().await {
        if let Err(e) = engine.stop().await {
            error!("failed to stop generator: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Create the LLM provider selected by `[llm] adapter`.
fn create_llm_provider(config: &Config) -> Result<Arc<dyn LlmProvider>> {
    let llm_config = config
        .llm
        .as_ref()
        .context("missing [llm] section in configuration")?;
    let adapter = llm_config.adapter.as_deref().unwrap_or("remote");
    match adapter {
        "remote" => {
            let remote = llm_config
                .remote
                .as_ref()
                .context("remote adapter selected but no [llm.remote] section found")?;
            let provider = RemoteLlmProvider::from_config(remote)?;
            info!(model = provider.model(), "LLM provider initialized: remote");
            Ok(Arc::new(provider))
        }
        _ => anyhow::bail!("Unknown LLM adapter type: {}", adapter),
    }
}
