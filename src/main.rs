use axum::http;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use keyword_datasource::config::{ConnectionConfig, ServerConfig};
use keyword_datasource::store::PgDatasourceFactory;
use keyword_datasource::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::parse();

    let default_settings = config.default_settings()?;
    match &default_settings {
        Some(settings) => match ConnectionConfig::from_json(settings) {
            Ok(conn) => info!(
                "Default datasource {}:{}/{} (metadata table {})",
                conn.server, conn.port, conn.database, conn.metatable
            ),
            Err(e) => error!("Default datasource settings are unusable: {}", e),
        },
        None => warn!("No default datasource settings - requests must carry their own"),
    }

    let factory = PgDatasourceFactory::new(config.max_connections, &config.value_column)?;
    let state = AppState::new(factory, default_settings, config.query_timeout());

    let mut cors = CorsLayer::new()
        .allow_methods(vec![http::Method::GET, http::Method::POST])
        .allow_headers(vec![http::header::CONTENT_TYPE])
        .allow_credentials(false);
    if let Some(origin) = &config.cors_origin {
        cors = cors.allow_origin(origin.parse::<http::HeaderValue>()?);
    } else {
        cors = cors.allow_origin(Any);
    }

    let app = router(state.clone()).layer(cors);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!("listening on {}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.registry().shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
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
                error!("failed to install signal handler: {}", e);
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

    info!("Shutdown signal received, starting graceful shutdown...");
}
