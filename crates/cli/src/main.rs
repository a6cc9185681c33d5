mod echo;

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    clap::{Parser, Subcommand},
    secrecy::SecretString,
    tokio_util::sync::CancellationToken,
    tracing::{error, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    courier_api::ApiClient,
    courier_config::CourierConfig,
    courier_pipeline::{
        FileAuditStore, NullSessionFactory, Pipeline, PipelineConfig, StateStore,
        sender::SenderConfig, workers::WorkerConfig,
    },
};

#[derive(Parser)]
#[command(name = "courier", about = "Courier — long-poll bot message courier")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file path (overrides discovery).
    #[arg(long, global = true, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    /// API credential (overrides the config file).
    #[arg(long, global = true, env = "COURIER_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Data directory for the cursor, backlog, and audit files.
    #[arg(long, global = true, env = "COURIER_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the delivery pipeline (default when no subcommand is given).
    Run,
    /// Check the credential and print the bot identity.
    Identity,
    /// Send a one-off message, chunked if needed.
    Send {
        /// Destination chat id.
        #[arg(long)]
        to: String,
        #[arg(short, long)]
        message: String,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<CourierConfig> {
    let mut cfg = match &cli.config {
        Some(path) => courier_config::load_config(path)?,
        None => courier_config::discover_and_load(),
    };
    if let Some(token) = &cli.token {
        cfg.api.token = Some(SecretString::new(token.clone()));
    }
    if let Some(dir) = &cli.data_dir {
        cfg.storage.data_dir = Some(dir.clone());
    }
    Ok(cfg)
}

fn build_client(cfg: &CourierConfig) -> anyhow::Result<ApiClient> {
    let token = cfg.api.token.clone().ok_or_else(|| {
        anyhow::anyhow!(
            "API token required: set COURIER_API_TOKEN or api.token in courier.toml"
        )
    })?;
    let poll_timeout = Duration::from_secs(cfg.api.poll_timeout_secs);
    let client = match &cfg.api.endpoint {
        Some(endpoint) => ApiClient::with_endpoint(endpoint, &token, poll_timeout)?,
        None => ApiClient::new(&token, poll_timeout)?,
    };
    Ok(client)
}

fn data_dir(cfg: &CourierConfig) -> PathBuf {
    if let Some(dir) = &cfg.storage.data_dir {
        return dir.clone();
    }
    directories::ProjectDirs::from("", "", "courier")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".courier"))
}

fn pipeline_config(cfg: &CourierConfig) -> PipelineConfig {
    let p = &cfg.pipeline;
    PipelineConfig {
        worker: WorkerConfig {
            max_workers: p.max_workers,
            batch_threshold: p.batch_threshold,
            scale_tick: Duration::from_millis(p.scale_tick_ms),
            recv_timeout: Duration::from_millis(p.worker_recv_timeout_ms),
            keep_alive_idle: Duration::from_secs(p.keep_alive_idle_secs),
        },
        sender: SenderConfig {
            send_interval: Duration::from_millis(p.send_interval_ms),
            per_destination_interval: Duration::from_millis(p.per_destination_interval_ms),
            max_attempts: p.max_send_attempts,
        },
        audit_queue_capacity: p.audit_queue_capacity,
        audit_flush_grace: Duration::from_secs(p.audit_flush_grace_secs),
    }
}

async fn run_pipeline(cfg: CourierConfig) -> anyhow::Result<()> {
    let dir = data_dir(&cfg);
    let pipeline = Pipeline {
        client: Arc::new(build_client(&cfg)?),
        store: Arc::new(StateStore::new(&dir)),
        audit_store: Arc::new(FileAuditStore::new(dir.join("audit.jsonl"))),
        interpreter: Arc::new(echo::EchoInterpreter),
        sessions: Arc::new(NullSessionFactory),
        config: pipeline_config(&cfg),
    };

    let shutdown = CancellationToken::new();
    let handle = pipeline.start(shutdown.clone()).await?;

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal.cancel();
        }
    });

    let report = handle.wait().await?;
    if !report.clean() {
        for (phase, e) in report.errors() {
            error!(phase = ?phase, error = e, "shutdown phase reported an error");
        }
        anyhow::bail!("pipeline stopped with errors");
    }
    Ok(())
}

async fn print_identity(cfg: &CourierConfig) -> anyhow::Result<()> {
    let client = build_client(cfg)?;
    let identity = client.identity().await?;
    println!("id:       {}", identity.id);
    println!(
        "username: {}",
        identity.username.as_deref().unwrap_or("(none)")
    );
    Ok(())
}

async fn send_once(cfg: &CourierConfig, to: &str, message: &str) -> anyhow::Result<()> {
    let client = build_client(cfg)?;
    let chunks = courier_api::chunk_text(message, courier_api::MAX_MESSAGE_LEN);
    let count = chunks.len();
    for chunk in chunks {
        client.send_message(to, &chunk, None).await?;
    }
    info!(to, chunks = count, "message sent");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let cfg = load_config(&cli)?;
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_pipeline(cfg).await,
        Commands::Identity => print_identity(&cfg).await,
        Commands::Send { to, message } => send_once(&cfg, &to, &message).await,
    }
}
