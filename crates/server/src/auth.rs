//! Authentication middleware.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use silo_core::UserId;
use silo_core::hash::hash_token;
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value, keeping at most
    /// MAX_TRACE_ID_LEN printable ASCII characters.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated request extension.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub username: String,
    pub is_admin: bool,
    /// Token the request was authenticated with.
    pub token_id: Uuid,
}

impl AuthenticatedUser {
    /// Require the admin flag, returning an error if not present.
    pub fn require_admin(&self) -> ApiResult<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(ApiError::Unauthorized("admin rights required".to_string()))
        }
    }
}

/// Extract the credential from the Authorization header.
///
/// `Ok(None)` when no header is present. Per RFC 6750 the "Bearer" scheme is
/// case-insensitive; any other scheme is rejected rather than ignored.
fn extract_bearer_token(req: &Request) -> ApiResult<Option<&str>> {
    let Some(value) = req.headers().get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::Unauthenticated("malformed authorization header".to_string()))?;
    if value.len() >= 7 && value[..7].eq_ignore_ascii_case("bearer ") {
        Ok(Some(value[7..].trim()))
    } else {
        Err(ApiError::Unauthenticated(
            "unsupported authorization scheme".to_string(),
        ))
    }
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Resolve a presented secret to its user. Any failure is a hard
/// `Unauthenticated`; it never degrades to anonymous access.
async fn authenticate(state: &AppState, secret: &str) -> ApiResult<AuthenticatedUser> {
    let token = state
        .metadata
        .get_token_by_hash(&hash_token(secret))
        .await?
        .ok_or_else(|| ApiError::Unauthenticated("invalid token".to_string()))?;

    let now = OffsetDateTime::now_utc();
    let expired = token.expires_at.is_some_and(|at| at <= now);
    if token.revoked_at.is_some() || expired {
        return Err(ApiError::Unauthenticated(
            "token expired or revoked".to_string(),
        ));
    }

    let user = state
        .metadata
        .get_user(token.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthenticated("token owner no longer exists".to_string()))?;

    // Update last used time (fire and forget)
    let metadata = state.metadata.clone();
    let token_id = token.token_id;
    tokio::spawn(async move {
        let _ = metadata.touch_token(token_id, now).await;
    });

    Ok(AuthenticatedUser {
        user_id: UserId::from(user.user_id),
        username: user.username,
        is_admin: user.is_admin,
        token_id: token.token_id,
    })
}

/// Authentication middleware that validates tokens and sets up trace context.
///
/// Requests without an Authorization header pass through as anonymous.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    if let Some(secret) = extract_bearer_token(&req)? {
        let user = authenticate(&state, secret).await?;
        req.extensions_mut().insert(user);
    }

    // Run the request within a tracing span that includes the trace ID
    let response = next
        .run(req)
        .instrument(tracing::info_span!("request", trace_id = %trace_id_str))
        .await;

    Ok(response)
}

/// Require authentication (token must be present).
pub fn require_auth(req: &Request) -> ApiResult<&AuthenticatedUser> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::Unauthenticated("No Authorization".to_string()))
}

/// Get optional authentication.
pub fn get_auth(req: &Request) -> Option<&AuthenticatedUser> {
    req.extensions().get::<AuthenticatedUser>()
}

/// The requester's user ID, `None` for anonymous requests.
pub fn requester(req: &Request) -> Option<UserId> {
    get_auth(req).map(|auth| auth.user_id)
}

/// Get the trace ID from request extensions.
pub fn get_trace_id(req: &Request) -> Option<&TraceId> {
    req.extensions().get::<TraceId>()
}
