mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use duet_api::state::{AppState, AppStateInner};
use duet_gateway::Gateway;
use duet_gateway::connection;
use duet_gateway::handshake::HandshakeParams;

use crate::config::Config;

#[derive(Clone)]
struct ServerState {
    gateway: Gateway,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duet=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(duet_db::Database::open(&config.db_path)?);

    // Shared state: one registry for the whole process
    let gateway = Gateway::new(db.clone(), config.jwt_secret.clone());
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        gateway: gateway.clone(),
        upload_dir: config.upload_dir.clone(),
        allow_mock_login: config.allow_mock_login,
    });

    let ws_route = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(ServerState {
            gateway: gateway.clone(),
        });

    let app = duet_api::router(app_state)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Duet server listening on {}", config.addr);
    if config.allow_mock_login {
        info!("Legacy mock-key login is enabled");
    }

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(gateway))
        .await?;

    info!("Duet server stopped");
    Ok(())
}

/// Realtime handshake. Token from `Authorization: Bearer` or `?token=`,
/// conversation from `?conversationId=`; checks run after the upgrade.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(params): Query<HandshakeParams>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let header_token = bearer.map(|TypedHeader(Authorization(b))| b.token().to_string());
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.gateway, header_token, params)
    })
}

/// Resolves on Ctrl-C or SIGTERM, after closing every live connection.
async fn shutdown_signal(gateway: Gateway) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining live connections");
    gateway.shutdown().await;
}
