pub mod auth;
pub mod conversations;
pub mod error;
pub mod files;
pub mod messages;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::services::ServeDir;

use crate::middleware::require_auth;
use crate::state::AppState;

/// REST routes. The realtime `/ws` route is mounted by the server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/messages",
            get(messages::get_messages_flat).post(messages::send_message_flat),
        )
        .route(
            "/upload",
            post(files::upload_file).layer(DefaultBodyLimit::max(files::MAX_UPLOAD_SIZE)),
        )
        .layer(axum::middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest_service(files::UPLOAD_URL_PREFIX, ServeDir::new(&state.upload_dir))
        .with_state(state)
}
