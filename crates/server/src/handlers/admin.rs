//! Administrative endpoints.

use crate::auth::require_auth;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::parse_node_id;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use silo_core::hash::hash_token;
use silo_core::preauth::random_id;
use silo_metadata::models::{TokenRow, UserRow};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Maximum request body size for admin endpoints (1 MiB).
const MAX_ADMIN_BODY_SIZE: usize = 1024 * 1024;

/// Length of generated API token secrets (alphanumeric, ~285 bits).
const TOKEN_SECRET_LEN: usize = 48;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /v1/health - Health check.
///
/// This endpoint is intentionally unauthenticated to support:
/// - Kubernetes liveness/readiness probes
/// - Load balancer health checks
///
/// Returns only non-sensitive information (status and version).
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;
    state.storage.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

/// Create user request.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub fullname: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    /// Token lifetime; `None` for a token that never expires.
    pub expires_in_secs: Option<u64>,
    pub description: Option<String>,
}

/// Create user response. The secret is only ever returned here.
#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub user_id: String,
    pub username: String,
    pub token_id: String,
    pub token_secret: String,
    pub expires_at: Option<String>,
}

/// Token info response.
#[derive(Debug, Serialize)]
pub struct TokenInfo {
    pub token_id: String,
    pub expires_at: Option<String>,
    pub revoked_at: Option<String>,
    pub created_at: String,
    pub last_used_at: Option<String>,
    pub description: Option<String>,
}

fn format_time(ts: OffsetDateTime) -> ApiResult<String> {
    ts.format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format timestamp: {e}")))
}

impl TokenInfo {
    fn from_row(row: TokenRow) -> ApiResult<Self> {
        Ok(Self {
            token_id: row.token_id.to_string(),
            expires_at: row.expires_at.map(format_time).transpose()?,
            revoked_at: row.revoked_at.map(format_time).transpose()?,
            created_at: format_time(row.created_at)?,
            last_used_at: row.last_used_at.map(format_time).transpose()?,
            description: row.description,
        })
    }
}

/// POST /v1/admin/users - Register a user and issue an API token.
///
/// A username that already exists (for instance one registered implicitly
/// through an ACL grant) keeps its user ID and receives a fresh token.
pub async fn create_user(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<CreateUserResponse>)> {
    require_auth(&req)?.require_admin()?;

    let body: CreateUserRequest = {
        let bytes = axum::body::to_bytes(req.into_body(), MAX_ADMIN_BODY_SIZE)
            .await
            .map_err(|e| ApiError::InvalidRequest(format!("failed to read body: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid JSON: {e}")))?
    };

    let username = body.username.trim();
    if username.is_empty() || username.contains(',') {
        return Err(ApiError::InvalidRequest(format!(
            "invalid username: {:?}",
            body.username
        )));
    }
    if Uuid::parse_str(username).is_ok() {
        return Err(ApiError::InvalidRequest(
            "usernames cannot be UUIDs".to_string(),
        ));
    }

    let now = OffsetDateTime::now_utc();
    let user = match state.metadata.get_user_by_username(username).await? {
        Some(existing) => existing,
        None => {
            let user = UserRow {
                user_id: Uuid::new_v4(),
                username: username.to_string(),
                fullname: body.fullname,
                email: body.email,
                is_admin: body.is_admin,
                created_at: now,
            };
            state.metadata.create_user(&user).await?;
            user
        }
    };

    let expires_at = match body.expires_in_secs {
        Some(secs) => {
            let secs_i64: i64 = secs.try_into().map_err(|_| {
                ApiError::InvalidRequest(format!(
                    "expires_in_secs too large: {secs} exceeds maximum of {}",
                    i64::MAX
                ))
            })?;
            Some(now + time::Duration::seconds(secs_i64))
        }
        None => None,
    };

    let token_secret = random_id(TOKEN_SECRET_LEN);
    let token = TokenRow {
        token_id: Uuid::new_v4(),
        user_id: user.user_id,
        token_hash: hash_token(&token_secret),
        expires_at,
        revoked_at: None,
        created_at: now,
        last_used_at: None,
        description: body.description,
    };
    state.metadata.create_token(&token).await?;

    tracing::info!(
        user_id = %user.user_id,
        username = %user.username,
        token_id = %token.token_id,
        "Issued API token"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse {
            user_id: user.user_id.to_string(),
            username: user.username,
            token_id: token.token_id.to_string(),
            token_secret,
            expires_at: expires_at.map(format_time).transpose()?,
        }),
    ))
}

/// GET /v1/admin/users/{username}/tokens - List a user's tokens.
pub async fn list_user_tokens(
    State(state): State<AppState>,
    Path(username): Path<String>,
    req: Request,
) -> ApiResult<Json<Vec<TokenInfo>>> {
    require_auth(&req)?.require_admin()?;

    let user = state
        .metadata
        .get_user_by_username(&username)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user not found: {username}")))?;
    let tokens = state
        .metadata
        .list_tokens_for_user(user.user_id)
        .await?
        .into_iter()
        .map(TokenInfo::from_row)
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(tokens))
}

/// DELETE /v1/admin/tokens/{token_id} - Revoke a token.
pub async fn revoke_token(
    State(state): State<AppState>,
    Path(token_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let auth = require_auth(&req)?;
    auth.require_admin()?;
    let caller_token = auth.token_id;

    let token_id = Uuid::parse_str(&token_id)
        .map_err(|e| ApiError::InvalidRequest(format!("invalid token ID: {e}")))?;
    if token_id == caller_token {
        return Err(ApiError::InvalidRequest(
            "cannot revoke the token used for this request".to_string(),
        ));
    }

    let token = state
        .metadata
        .get_token(token_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("token not found".to_string()))?;
    if token.revoked_at.is_none() {
        state
            .metadata
            .revoke_token(token_id, OffsetDateTime::now_utc())
            .await?;
        tracing::info!(token_id = %token_id, "Token revoked");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Count response for maintenance operations.
#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub purged: u64,
}

/// POST /v1/admin/preauth/purge - Delete expired preauth tokens.
pub async fn purge_preauth(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<PurgeResponse>> {
    require_auth(&req)?.require_admin()?;
    let purged = state.preauth.purge_expired().await?;
    Ok(Json(PurgeResponse { purged }))
}

/// POST /v1/admin/nodes/{id}/reload - Re-import a node from its snapshot.
pub async fn reload_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> ApiResult<Json<silo_core::Node>> {
    require_auth(&req)?.require_admin()?;
    let id = parse_node_id(&id)?;
    let node = state.nodes.reload_from_disk(id).await?;
    Ok(Json(node))
}
