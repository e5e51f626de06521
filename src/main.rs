use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voicebroker::{
    backend::BackendBridge,
    config::BrokerConfig,
    recognizer::build_recognizer,
    web::{self, routes::AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BrokerConfig::init()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log.filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting voicebroker v{}", env!("CARGO_PKG_VERSION"));
    info!(backend_url = %config.server.backend_url, "backend bridge configuration loaded");

    let recognizer = Arc::new(build_recognizer(config.recognizer.strict_model)?);

    // Backend Bridge: process-wide, one live connection, shared by every
    // session.
    let bridge = BackendBridge::start(config.server.backend_url.clone(), config.backend.clone());

    let state = AppState {
        config: Arc::new(config.clone()),
        bridge: bridge.clone(),
        recognizer,
    };
    let app = web::create_router(state);

    let listener = TcpListener::bind(&config.server.client_bind).await?;
    info!(addr = %config.server.client_bind, "client link listening");

    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "client link server error");
        }
    });

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");

    server_task.abort();
    bridge.stop().await;
    info!("voicebroker shut down");
    Ok(())
}
