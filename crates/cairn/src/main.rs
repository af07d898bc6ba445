// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Cairn: a clustered object store control plane.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cairn_api::metrics::init_metrics;
use cairn_api::{create_router, Cluster};
use cairn_core::{Config, LogFormat};
use cairn_storage::metrics::{init_storage_metrics, start_storage_metrics_collector};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => run_server(args).await,
        Commands::Version => {
            println!("cairn {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run_server(args: cli::ServeArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = Some(data_dir);
    }

    init_logging(&config)?;

    let cluster = Arc::new(Cluster::new(&config).context("Failed to initialize cluster")?);

    if config.metrics.enabled {
        init_metrics();
        init_storage_metrics();

        let metrics_addr: std::net::SocketAddr =
            format!("{}:{}", config.metrics.bind, config.metrics.port)
                .parse()
                .context("Invalid metrics bind address")?;

        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
            .context("Failed to install Prometheus exporter")?;

        start_storage_metrics_collector(
            Arc::clone(cluster.tracker()),
            Duration::from_secs(config.storage.metrics_interval_secs.max(1)),
        );
        info!("Metrics endpoint listening on http://{}/metrics", metrics_addr);
    }

    print_banner(&config, &cluster);
    cluster.start();

    let app = create_router(Arc::clone(&cluster), 0, config.logging.log_requests);
    let addr = config.server.bind;
    let listener = TcpListener::bind(addr).await.context("Failed to bind to address")?;

    info!("Server listening on http://{}", addr);
    println!("\n  Ready to accept connections.\n");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cluster.stop().await;
    info!("Server shutdown complete");
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    let result = match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry().with(filter).with(fmt_layer.json()).try_init()
        }
        LogFormat::Pretty => tracing_subscriber::registry().with(filter).with(fmt_layer).try_init(),
    };
    result.context("Failed to initialize logging")
}

fn print_banner(config: &Config, cluster: &Cluster) {
    let smap = cluster.get_cluster_info();
    let data_dir = config
        .storage
        .data_dir
        .as_ref()
        .map_or_else(|| "in-memory".to_string(), |d| d.display().to_string());

    println!(
        r#"
   ____        _
  / ___|__ _  (_)_ __ _ __
 | |   / _` | | | '__| '_ \
 | |__| (_| | | | |  | | | |
  \____\__,_| |_|_|  |_| |_|   v{}

  Endpoint:    http://{}
  Cluster:     {} (smap v{})
  Primary:     {}
  Proxies:     {}
  Targets:     {}
  Data Dir:    {}
"#,
        env!("CARGO_PKG_VERSION"),
        config.server.bind,
        smap.uuid(),
        smap.version(),
        smap.primary().map_or("none", |p| p.id.as_str()),
        smap.pmap().len(),
        smap.tmap().len(),
        data_dir,
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
