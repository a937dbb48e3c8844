//! Prelude cluster gateway.
//!
//! One process, three cooperating pieces: the pool autoscaler keeps
//! claims open against the pool, the authenticator seals each bound
//! claim with fresh credentials, and the HTTP surface assigns sealed
//! claims to users. They share no in-process state beyond the admin
//! session set; all coordination runs through labels on the claims.

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use prelude_gateway::authenticator::AuthenticatorWorker;
use prelude_gateway::autoscaler::AutoscalerWorker;
use prelude_gateway::config::Config;
use prelude_gateway::hub::HubClient;
use prelude_gateway::state::AppState;
use prelude_gateway::api;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting prelude gateway");

    let config = Config::load()?;
    info!(
        pool = %config.cluster_pool,
        lifetime = %config.cluster_lifetime,
        listen_addr = %config.listen_addr,
        "Configuration loaded"
    );
    if config.recaptcha_secret.is_some() {
        info!("Captcha verification enabled");
    } else {
        info!("Captcha verification disabled");
    }
    if config.admin_password.is_some() {
        info!("Admin authentication enabled");
    } else {
        info!("Admin authentication disabled");
    }

    let hub = match HubClient::connect(config.kubeconfig.as_deref()).await {
        Ok(hub) => hub,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Failed to build hub client");
            return Err(e);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            shutdown_signal().await;
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    let autoscaler = AutoscalerWorker::new(
        hub.clone(),
        config.cluster_pool.clone(),
        config.claim_prefix.clone(),
        config.scale_policy(),
    );
    let autoscaler_handle = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move {
            if let Err(e) = autoscaler.run(shutdown).await {
                error!(error = %format!("{e:#}"), "Autoscaler stopped");
            }
        }
    });

    let authenticator = AuthenticatorWorker::new(hub.clone(), config.cluster_pool.clone());
    let authenticator_handle = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move {
            authenticator.run(shutdown).await;
        }
    });

    let listen_addr = config.listen_addr;
    let state = AppState::new(hub, config);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, "Listening for connections");

    let mut http_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = http_shutdown.changed().await;
        })
        .await?;

    // The server only returns once shutdown was signaled; wait for the
    // loops to drain their watch cycles.
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(autoscaler_handle, authenticator_handle);

    info!("Gateway shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install interrupt handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
