//! dnsrelay - a caching DNS forwarder that learns A records from its upstream

pub mod channel;
pub mod codec;
pub mod config;
pub mod engine;
pub mod forwarder;
pub mod metrics;
pub mod pending;
pub mod store;
pub mod types;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Local-time timestamps instead of the subscriber's default UTC
struct LocalTimer;
impl fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[derive(Parser, Debug)]
#[command(name = "dnsrelay")]
#[command(about = "A caching DNS forwarder", long_about = None)]
struct Args {
    /// Corefile-style configuration with a single `relay` block
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address, `:port`, `ip:port` or `ip`
    #[arg(long)]
    listen: Option<String>,

    /// Upstream resolver, `ip:port` or `ip`
    #[arg(long)]
    upstream: Option<String>,

    /// Record store file
    #[arg(long)]
    store: Option<String>,

    /// Never answer from the store, always relay upstream
    #[arg(long)]
    forward_only: bool,
}

fn main() -> Result<()> {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cores)
        .thread_name("dnsrelay-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

fn load_config(args: &Args) -> Result<config::RelayConfig> {
    let mut cfg = match &args.config {
        Some(path) => config::RelayConfig::load(path)?,
        None => config::RelayConfig::default(),
    };
    if let Some(listen) = &args.listen { cfg.listen = config::parse_listen_addr(listen)?; }
    if let Some(upstream) = &args.upstream { cfg.upstream = config::parse_upstream_addr(upstream)?; }
    if let Some(store) = &args.store { cfg.store_path = store.into(); }
    if args.forward_only { cfg.forward_only = true; }
    Ok(cfg)
}

async fn async_main() -> Result<()> {
    let args = Args::parse();
    let cfg = load_config(&args)?;

    std::fs::create_dir_all(&cfg.log_dir)?;
    let file_appender = RollingFileAppender::new(
        cfg.log_dir.join("dnsrelay.log"),
        RollingConditionBasic::new().daily(),
        30,
    )?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_timer(LocalTimer))
        .with(fmt::layer().with_writer(std::io::stdout).with_timer(LocalTimer))
        .init();

    info!("Starting dnsrelay version {}", env!("CARGO_PKG_VERSION"));

    let socket = channel::bind(cfg.listen).await?;
    info!("Listening on UDP {}", socket.local_addr()?);

    let shutdown = CancellationToken::new();
    if let Some(addr) = cfg.metrics {
        tokio::spawn(metrics::serve(addr, shutdown.clone()));
    }

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                signal_token.cancel();
            }
            Err(e) => tracing::warn!("Cannot listen for interrupts: {}", e),
        }
    });

    let engine = Arc::new(engine::ResolutionEngine::new(&cfg, Arc::new(socket)));
    engine.run(shutdown).await
}
