use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use duet_gateway::token::verify_token;

use crate::error::ApiError;
use crate::state::AppState;

/// Extract and validate JWT from Authorization header. Inserts the
/// `Claims` into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let claims =
        verify_token(state.gateway.jwt_secret(), token).map_err(|_| ApiError::Unauthorized)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
