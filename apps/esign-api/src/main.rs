//! E-Sign API server

use anyhow::Result;
use esign_api::{router, AppState};
use esign_core::{CompletionWorker, EsignConfig, LogNotifier, NotificationRelay};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("esign_api=info".parse()?)
                .add_directive("esign_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    info!("Initializing E-Sign API...");
    let config = EsignConfig::load()?;
    let state = Arc::new(AppState::new(&config).await?);

    // Background completion and notification
    let _completion = CompletionWorker::spawn(state.service.clone());
    let _relay = NotificationRelay::spawn(
        state.service.events(),
        Arc::new(LogNotifier),
        state.service.store(),
    );

    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Starting E-Sign API on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
