// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tap_config::{CONFIG_ENV, Config, DEFAULT_CONFIG_PATH};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tapd", version, about = "Transparent LLM capture proxy")]
struct Args {
    /// Config file path. Falls back to $TAP_CONFIG, then ./tap.toml,
    /// then built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the proxy bind address.
    #[arg(long)]
    proxy_listen: Option<String>,

    /// Override the query-service bind address.
    #[arg(long)]
    query_listen: Option<String>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

fn load_config(args: &Args) -> Result<Config> {
    if let Some(path) = &args.config {
        return Config::load(path).with_context(|| format!("load {}", path.display()));
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Config::load(&path).with_context(|| format!("load {path}"));
    }
    if std::path::Path::new(DEFAULT_CONFIG_PATH).exists() {
        return Config::load(DEFAULT_CONFIG_PATH).context("load tap.toml");
    }
    Ok(Config::default())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("tap=debug,tap_proxy=debug,tap_worker=debug,tapd=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = load_config(&args)?;
    if let Some(listen) = args.proxy_listen {
        config.proxy.listen = listen;
    }
    if let Some(listen) = args.query_listen {
        config.query.listen = listen;
    }
    config.validate().context("validate config")?;
    for warning in config.warnings() {
        warn!("config: {warning}");
    }

    let components = tap_daemon::build(&config).context("build components")?;

    let proxy_listener = tokio::net::TcpListener::bind(&config.proxy.listen)
        .await
        .with_context(|| format!("bind proxy {}", config.proxy.listen))?;
    let query_listener = tokio::net::TcpListener::bind(&config.query.listen)
        .await
        .with_context(|| format!("bind query {}", config.query.listen))?;

    info!(
        proxy = %config.proxy.listen,
        query = %config.query.listen,
        upstream = %config.proxy.upstream,
        provider = %config.proxy.provider,
        "tapd listening"
    );

    let proxy_server = axum::serve(proxy_listener, components.proxy_router.clone())
        .with_graceful_shutdown(shutdown_signal());
    let query_server = axum::serve(query_listener, components.query_router.clone())
        .with_graceful_shutdown(shutdown_signal());

    let (proxy_result, query_result) =
        tokio::join!(async { proxy_server.await }, async { query_server.await });
    proxy_result.context("proxy server")?;
    query_result.context("query server")?;

    info!("ingress stopped, draining");
    tap_daemon::teardown(components).await;
    Ok(())
}
