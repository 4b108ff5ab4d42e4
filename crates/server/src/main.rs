//! `scepd-server` — thin entry point for the SCEP HTTP service.
//!
//! All routing and dispatch logic lives in `scepd_service::create_router` and `scepd_core`. This
//! binary is responsible only for: CLI parsing, env config loading, `CaHandle`/`AppState` wiring,
//! server binding, and graceful shutdown.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use scepd_core::dispatcher::DispatcherConfig;
use scepd_core::keystore::{BootstrapPolicy, CaHandle, FileCaStore};
use scepd_core::signer::IssuancePolicy;
use scepd_service::{create_router, AppState, Config};

#[derive(Parser)]
#[command(
    name = "scepd-server",
    version = env!("CARGO_PKG_VERSION"),
    about = "scepd — a Simple Certificate Enrollment Protocol server"
)]
struct Cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    Cli::parse();

    let config = Config::from_env()?;

    tracing::info!(
        bind_addr = %config.bind_addr,
        ca_root = %config.ca_root,
        "scepd-server v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let store = FileCaStore::new(&config.ca_root);
    let ca = CaHandle::open(
        &store,
        &BootstrapPolicy {
            key_bits: config.ca_key_bits,
            common_name: config.ca_common_name.clone(),
            lifetime_days: config.ca_lifetime_days,
        },
    )?;

    let state = AppState {
        ca: Arc::new(ca),
        store: Arc::new(store),
        dispatcher_config: Arc::new(DispatcherConfig {
            force_degenerate_for_single_cert: config.force_degenerate_for_single_cert,
            issuance_policy: IssuancePolicy {
                device_cert_lifetime_days: config.device_cert_lifetime_days,
            },
            challenge: config.challenge.clone(),
        }),
    };

    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(bind_addr = %config.bind_addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining connections...");
}
