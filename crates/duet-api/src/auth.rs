use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;
use uuid::Uuid;

use duet_db::is_constraint_violation;
use duet_db::models::UserRow;
use duet_gateway::store::run_blocking;
use duet_gateway::token::issue_token;
use duet_types::api::{AuthResponse, LoginRequest, RegisterRequest};

use crate::error::ApiError;
use crate::state::AppState;

/// Stored for users created through the mock-key path. Not a valid PHC
/// string, so password login for them always fails.
const NO_PASSWORD: &str = "!";

fn valid_username(username: &str) -> bool {
    (3..=32).contains(&username.len())
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !valid_username(&req.username) {
        return Err(ApiError::BadRequest("username must be 3-32 characters"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest("password must be at least 8 characters"));
    }

    let db = state.db.clone();
    let username = req.username.clone();
    if run_blocking(move || db.get_user_by_username(&username)).await?.is_some() {
        return Err(ApiError::Conflict("username taken"));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))?
        .to_string();

    let user_id = Uuid::new_v4();
    let db = state.db.clone();
    let username = req.username.clone();
    run_blocking(move || db.create_user(&user_id.to_string(), &username, &password_hash))
        .await
        .map_err(|e| {
            // Lost a race with another registration for the same name
            if is_constraint_violation(&e) {
                ApiError::Conflict("username taken")
            } else {
                ApiError::Internal(e)
            }
        })?;

    info!("Registered user {} ({})", req.username, user_id);
    let token = issue_token(state.gateway.jwt_secret(), user_id, &req.username)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id,
            username: req.username,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = match req {
        LoginRequest::Password { username, password } => {
            let db = state.db.clone();
            let user = run_blocking(move || db.get_user_by_username(&username))
                .await?
                .ok_or(ApiError::Unauthorized)?;

            let parsed_hash = PasswordHash::new(&user.password).map_err(|_| ApiError::Unauthorized)?;
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed_hash)
                .map_err(|_| ApiError::Unauthorized)?;
            user
        }
        LoginRequest::MockKey { mock_key } => {
            if !state.allow_mock_login {
                return Err(ApiError::Unauthorized);
            }
            if !valid_username(&mock_key) {
                return Err(ApiError::BadRequest("mockKey must be 3-32 characters"));
            }
            mock_user(&state, mock_key).await?
        }
    };

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Corrupt user id '{}': {}", user.id, e)))?;
    let token = issue_token(state.gateway.jwt_secret(), user_id, &user.username)?;

    Ok(Json(AuthResponse {
        user_id,
        username: user.username,
        token,
    }))
}

/// The legacy mock key is a username; the user is created on first use.
async fn mock_user(state: &AppState, username: String) -> Result<UserRow, ApiError> {
    let db = state.db.clone();
    let user = run_blocking(move || {
        if let Some(user) = db.get_user_by_username(&username)? {
            return Ok(user);
        }
        let id = Uuid::new_v4().to_string();
        // A concurrent first login may win the insert; fall through to the lookup
        if let Err(e) = db.create_user(&id, &username, NO_PASSWORD) {
            if !is_constraint_violation(&e) {
                return Err(e);
            }
        }
        db.get_user_by_username(&username)?
            .ok_or_else(|| anyhow::anyhow!("mock user {} vanished", username))
    })
    .await?;
    Ok(user)
}
