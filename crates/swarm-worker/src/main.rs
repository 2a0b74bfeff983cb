use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use swarm_worker::config::WorkerConfig;
use swarm_worker::handlers::HandlerRegistry;
use swarm_worker::queue::HttpQueueClient;
use swarm_worker::runtime::WorkerRuntime;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "swarm-worker")]
#[command(version)]
#[command(about = "Automation worker for a shared task queue", long_about = None)]
struct Args {
    /// TOML config file
    ///
    /// Can also be set via SWARM_CONFIG environment variable
    #[arg(short, long, env = "SWARM_CONFIG")]
    config: Option<PathBuf>,

    /// Queue service base URL (overrides config and SWARM_QUEUE_URL)
    #[arg(long)]
    queue_url: Option<String>,

    /// WebSocket push endpoint
    #[arg(long)]
    push_url: Option<String>,

    /// Worker name reported at registration
    #[arg(long)]
    name: Option<String>,

    /// Comma-separated capability tags, e.g. `web-scrape,form-fill`
    #[arg(long, value_delimiter = ',')]
    capabilities: Option<Vec<String>>,

    #[arg(long)]
    poll_interval_secs: Option<u64>,

    #[arg(long)]
    heartbeat_interval_secs: Option<u64>,
}

impl Args {
    fn apply(self, config: &mut WorkerConfig) {
        if let Some(url) = self.queue_url {
            config.queue_url = url;
        }
        if let Some(url) = self.push_url {
            config.push_url = Some(url);
        }
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(caps) = self.capabilities {
            config.capabilities = caps;
        }
        if let Some(secs) = self.poll_interval_secs {
            config.poll_interval_secs = secs;
        }
        if let Some(secs) = self.heartbeat_interval_secs {
            config.heartbeat_interval_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = WorkerConfig::load(args.config.as_deref()).context("Failed to load config")?;
    args.apply(&mut config);
    config.validate().context("Invalid worker config")?;

    info!(
        queue = %config.queue_url,
        push = config.push_url.as_deref().unwrap_or("-"),
        name = %config.name,
        capabilities = ?config.capabilities,
        proxies = config.proxies.len(),
        agents = config.agents.len(),
        "Swarm worker starting"
    );

    let queue = HttpQueueClient::new(config.queue_url.clone(), config.request_timeout())
        .context("Failed to build queue client")?;
    let resolver = Arc::new(config.resolver().context("Failed to build consensus resolver")?);
    let handlers = HandlerRegistry::standard(resolver);

    let handle = WorkerRuntime::new(config, Arc::new(queue), handlers)
        .start()
        .await
        .context("Worker failed to start")?;
    info!(worker_id = %handle.worker_id(), "Worker running; Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    let stats = handle.stop().await;
    info!(
        completed = stats.completed,
        failed = stats.failed,
        claim_misses = stats.claim_misses,
        "Shutdown complete"
    );
    Ok(())
}
