//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, Request};
use axum::http::HeaderValue;
use axum::http::header::HOST;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use silo_core::{NodeId, UserId};
use silo_metadata::MetadataError;
use silo_metadata::models::UserRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Response header marking a node served from its on-disk snapshot.
pub const NODE_SOURCE_HEADER: &str = "x-silo-node-source";

/// Success envelope: `{"data": ..., "status": 200}`.
pub fn envelope<T: Serialize>(data: T) -> Response {
    Json(json!({ "data": data, "status": 200 })).into_response()
}

/// Mark `response` as built from a possibly stale snapshot.
pub fn mark_snapshot(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(NODE_SOURCE_HEADER, HeaderValue::from_static("snapshot"));
    response
}

/// Query string as an ordered list of pairs. Keys may repeat (`part`).
#[derive(Debug, Default)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn from_request(req: &Request) -> ApiResult<Self> {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(req.uri())
            .map_err(|e| ApiError::InvalidRequest(format!("invalid query string: {e}")))?;
        Ok(Self(pairs))
    }

    /// Whether `key` is present, with or without a value.
    pub fn has(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    /// First non-empty value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }

    /// Every value of `key`, in request order.
    pub fn all(&self, key: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    /// Parse the value of `key` as a number, `None` when absent.
    pub fn parse_u64(&self, key: &str) -> ApiResult<Option<u64>> {
        self.get(key)
            .map(|v| {
                v.trim()
                    .parse::<u64>()
                    .map_err(|_| ApiError::InvalidRequest(format!("Invalid {key}")))
            })
            .transpose()
    }
}

/// Parse a node ID path segment. Malformed IDs cannot name a node.
pub fn parse_node_id(raw: &str) -> ApiResult<NodeId> {
    NodeId::parse(raw).map_err(|_| ApiError::node_not_found())
}

/// Base URL for links handed back to clients: `server.api_url` when set,
/// otherwise derived from the request's Host header.
pub fn api_url(state: &AppState, req: &Request) -> ApiResult<String> {
    if let Some(url) = &state.config.server.api_url {
        return Ok(url.trim_end_matches('/').to_string());
    }
    let host = req
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .ok_or_else(|| {
            ApiError::Internal("server.api_url is unset and the request has no Host".to_string())
        })?;
    Ok(format!("http://{host}"))
}

/// Resolve a user reference to an ID.
///
/// UUIDs are taken as user IDs directly. Anything else is a username looked
/// up in the user directory; unknown usernames are registered on the spot so
/// nodes can be shared with users before their first login.
pub async fn resolve_user(state: &AppState, reference: &str) -> ApiResult<UserId> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(ApiError::InvalidRequest("empty user reference".to_string()));
    }
    if let Ok(id) = Uuid::parse_str(reference) {
        return Ok(UserId::from(id));
    }

    if let Some(user) = state.metadata.get_user_by_username(reference).await? {
        return Ok(UserId::from(user.user_id));
    }

    let user = UserRow {
        user_id: Uuid::new_v4(),
        username: reference.to_string(),
        fullname: None,
        email: None,
        is_admin: false,
        created_at: OffsetDateTime::now_utc(),
    };
    match state.metadata.create_user(&user).await {
        Ok(()) => {
            tracing::info!(username = %reference, user_id = %user.user_id, "Registered user");
            Ok(UserId::from(user.user_id))
        }
        // Lost a registration race; the winner's row is authoritative.
        Err(MetadataError::AlreadyExists(_)) => state
            .metadata
            .get_user_by_username(reference)
            .await?
            .map(|u| UserId::from(u.user_id))
            .ok_or_else(|| ApiError::Internal(format!("user {reference} vanished"))),
        Err(e) => Err(e.into()),
    }
}
