mod cli;
mod server;

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use clap::Parser;
use eyre::WrapErr;

use walletd_core::cache::DurableCache;
use walletd_core::status::TrackerConfig;
use walletd_core::transport::ReqwestTransport;
use walletd_core::{Wallet, WalletConfig};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let cache = DurableCache::open(&args.cache_dir)
        .wrap_err_with(|| format!("open cache directory {}", args.cache_dir.display()))?;
    tracing::info!(
        path = %args.cache_dir.display(),
        entries = cache.len(),
        "loaded explorer cache"
    );

    let transport = ReqwestTransport::new(args.requests_per_second).wrap_err("build HTTP client")?;
    if let Some(rps) = args.requests_per_second {
        tracing::info!(rps, "outbound explorer requests are rate limited");
    }

    let config = WalletConfig {
        tracker: TrackerConfig {
            retry_delay: Duration::from_millis(args.status_retry_delay_ms),
            ..TrackerConfig::default()
        },
        ..WalletConfig::default()
    };
    let wallet = Wallet::new(Arc::new(transport), Arc::new(cache), config);

    let origin = HeaderValue::from_str(&args.cors_origin)
        .wrap_err_with(|| format!("invalid CORS origin `{}`", args.cors_origin))?;

    let state = server::AppState {
        wallet,
        default_network: args.network,
        offline_default: args.offline,
    };
    let router = server::build_router(state, origin);

    if args.bind == "0.0.0.0" {
        tracing::warn!("server is bound to 0.0.0.0 and is reachable from the network");
    }
    if args.offline {
        tracing::info!("offline mode: lookups are served from cache by default");
    }

    let bind_addr = format!("{}:{}", args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .wrap_err("bind TCP listener")?;

    tracing::info!(network = %args.network, "listening on {bind_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("run HTTP server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
