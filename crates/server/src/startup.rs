//! Server startup: loader wiring, HTTP listener and shutdown.

use std::sync::Arc;

use tracing::{info, warn};

use casestats_core::Config;
use casestats_loader::CaseLoader;

use crate::router;
use crate::state::AppState;

/// Build `AppState` around a loader wired from `config`.
pub fn build_app_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let loader = CaseLoader::from_config(config)?;
    info!(
        loader = %loader.name(),
        upstream = %loader.upstream(),
        auth = config.auth.mode(),
        "case loader created"
    );
    Ok(Arc::new(AppState {
        loader,
        config: config.clone(),
    }))
}

/// Run the HTTP server until ctrl-c / SIGTERM, then stop the loader.
pub async fn serve(config: &Config) -> anyhow::Result<()> {
    config.validate()?;
    config.log_summary();

    let state = build_app_state(config)?;

    // Health stays red until the first load completes; the listener itself
    // comes up as soon as the first connection attempt has been made.
    state.loader.init().await?;
    info!(readiness = %state.loader.readiness(), "first upstream connection attempt made");

    let app = router::build_router(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, shutting down loader");
    if let Err(e) = state.loader.shutdown().await {
        warn!(error = %e, "loader did not shut down cleanly");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
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
    info!("shutdown signal received");
}
