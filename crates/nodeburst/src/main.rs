use clap::{Parser, ValueEnum};
use nodeburst_client::{ApiClient, ApiClientConfig, Informer, InformerConfig};
use nodeburst_scheduler::{BackoffConfig, Controller, PoolConfig, SchedulerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long to wait for tasks after the stop signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "nodeburst",
    about = "Secondary Kubernetes scheduler that overflows application groups onto burst nodes"
)]
struct Cli {
    /// Handle pods whose spec.schedulerName equals this value
    #[arg(long, env = "NODEBURST_SCHEDULER_NAME", default_value = "nodeburst-scheduler")]
    scheduler_name: String,

    /// Scheduled pods per application group before new pods go to burst nodes
    #[arg(long, env = "NODEBURST_BURST_THRESHOLD", default_value_t = 2, allow_negative_numbers = true)]
    burst_threshold: i64,

    /// Node forming the burst pool (repeatable or comma-separated)
    #[arg(long = "burst-node", env = "NODEBURST_BURST_NODES", value_delimiter = ',')]
    burst_nodes: Vec<String>,

    /// Label key that defines application groups
    #[arg(long, env = "NODEBURST_APP_LABEL", default_value = "app")]
    app_label: String,

    /// Only watch pods in this namespace
    #[arg(long, env = "NODEBURST_NAMESPACE")]
    namespace: Option<String>,

    /// Number of concurrent workers
    #[arg(long, env = "NODEBURST_WORKERS", default_value_t = 2)]
    workers: usize,

    /// First retry delay for a failed pod, in milliseconds
    #[arg(long, env = "NODEBURST_BACKOFF_BASE_MS", default_value_t = 5)]
    backoff_base_ms: u64,

    /// Retry delay cap, in seconds
    #[arg(long, env = "NODEBURST_BACKOFF_MAX_SECS", default_value_t = 1000)]
    backoff_max_secs: u64,

    /// Give up if the cache has not synced within this many seconds
    #[arg(long, env = "NODEBURST_CACHE_SYNC_TIMEOUT_SECS", default_value_t = 60)]
    cache_sync_timeout_secs: u64,

    /// API server URL; defaults to the in-cluster service address
    #[arg(long, env = "NODEBURST_API_URL")]
    api_url: Option<String>,

    /// Bearer token file
    #[arg(long, env = "NODEBURST_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// CA bundle used to verify the API server
    #[arg(long, env = "NODEBURST_CA_FILE")]
    ca_file: Option<PathBuf>,

    /// Log output format
    #[arg(long, env = "NODEBURST_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

impl Cli {
    fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            scheduler_name: self.scheduler_name.clone(),
            burst_threshold: self.burst_threshold,
            app_label: self.app_label.clone(),
            pools: PoolConfig::new(self.burst_nodes.iter().cloned()),
            workers: self.workers,
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(self.backoff_base_ms),
                max_delay: Duration::from_secs(self.backoff_max_secs),
            },
            cache_sync_timeout: Duration::from_secs(self.cache_sync_timeout_secs),
        }
    }

    fn client_config(&self) -> miette::Result<ApiClientConfig> {
        let mut config = match &self.api_url {
            Some(url) => ApiClientConfig::new(url.clone()),
            None => ApiClientConfig::in_cluster()?,
        };
        if let Some(token_file) = &self.token_file {
            config.token_file = Some(token_file.clone());
        }
        if let Some(ca_file) = &self.ca_file {
            config.ca_file = Some(ca_file.clone());
        }
        Ok(config)
    }

    fn informer_config(&self) -> InformerConfig {
        InformerConfig {
            namespace: self.namespace.clone(),
            label_key: self.app_label.clone(),
            ..Default::default()
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    run(cli).await
}

async fn run(cli: Cli) -> miette::Result<()> {
    let config = cli.scheduler_config();
    if config.pools.burst_nodes().next().is_none() {
        warn!("No --burst-node given; groups past the threshold will wait for capacity");
    }

    let client_config = cli.client_config()?;
    info!("Connecting to API server at {}", client_config.base_url);
    let api = Arc::new(ApiClient::with_config(&client_config)?);
    let informer = Arc::new(Informer::new(api.clone(), cli.informer_config()));
    let controller = Controller::new(config, informer.clone(), api)?;

    let token = CancellationToken::new();

    let informer_handle = {
        let informer = informer.clone();
        let token = token.clone();
        tokio::spawn(async move { informer.run(token).await })
    };

    let mut controller_handle = {
        let token = token.clone();
        tokio::spawn(async move { controller.run(token).await })
    };

    // The controller only returns early when startup fails
    let early_exit = tokio::select! {
        signal = shutdown_signal() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down gracefully...");
            None
        }
        joined = &mut controller_handle => Some(joined),
    };

    token.cancel();

    let controller_result = match early_exit {
        Some(joined) => joined.map_err(|e| miette::miette!("Controller task failed: {}", e)),
        None => join_within(controller_handle, SHUTDOWN_TIMEOUT, "Controller").await,
    };

    if let Err(e) = join_within(informer_handle, SHUTDOWN_TIMEOUT, "Informer").await {
        warn!("{}", e);
    }

    controller_result??;
    info!("Shutdown complete");

    Ok(())
}

/// Wait for a spawned task, giving up after `limit`
async fn join_within<T>(
    handle: JoinHandle<T>,
    limit: Duration,
    task: &str,
) -> miette::Result<T> {
    match tokio::time::timeout(limit, handle).await {
        Ok(joined) => joined.map_err(|e| miette::miette!("{} task failed: {}", task, e)),
        Err(_) => Err(miette::miette!("{} did not stop within {:?}", task, limit)),
    }
}

/// Resolve on ctrl-c, or SIGTERM on unix
async fn shutdown_signal() -> miette::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())
            .map_err(|e| miette::miette!("Failed to install SIGTERM handler: {}", e))?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;
            }
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))
    }
}
