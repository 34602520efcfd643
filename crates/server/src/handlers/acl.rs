//! Node ACL endpoints.
//!
//! `GET /node/{id}/acl` returns the full ACL. `/node/{id}/acl/{type}` reads
//! (GET), grants (POST, PUT) or revokes (DELETE) one category for the users
//! named in the `users` parameter. Every call requires authentication, even
//! on public nodes.

use crate::auth::require_auth;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{QueryParams, envelope, parse_node_id, resolve_user};
use crate::node_store::Loaded;
use crate::state::AppState;
use axum::extract::{Form, FromRequest, Path, Request, State};
use axum::http::Method;
use axum::response::Response;
use silo_core::{AclCategory, AclError};

/// GET /node/{id}/acl - The node's full ACL.
pub async fn get_acl(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> ApiResult<Response> {
    let user = require_auth(&req)?.user_id;
    let id = parse_node_id(&id)?;
    let Loaded { node, .. } = state.nodes.load(id, Some(&user)).await?;
    Ok(envelope(node.acl.category_view(AclCategory::All)))
}

/// GET|POST|PUT|DELETE /node/{id}/acl/{type} - Read or change one category.
pub async fn acl_category(
    State(state): State<AppState>,
    Path((id, category)): Path<(String, String)>,
    req: Request,
) -> ApiResult<Response> {
    let user = require_auth(&req)?.user_id;
    let id = parse_node_id(&id)?;
    let method = req.method().clone();

    // The read-checked load also answers "Node not found" before any
    // parameter validation.
    let Loaded { node, .. } = state.nodes.load(id, Some(&user)).await?;
    let category: AclCategory = category.parse()?;

    if method == Method::GET {
        return Ok(envelope(node.acl.category_view(category)));
    }

    let granting = match method {
        Method::POST | Method::PUT => true,
        Method::DELETE => false,
        _ => {
            return Err(ApiError::InvalidRequest(format!(
                "unsupported method {method}"
            )));
        }
    };

    let rights = node.rights(Some(&user), state.public_read());
    let permitted = if granting { rights.write } else { rights.delete };
    if !permitted {
        return Err(ApiError::unauthorized());
    }
    if !granting && category == AclCategory::Owner {
        return Err(AclError::OwnerNotRemovable.into());
    }

    let references = users_param(&state, req).await?;
    if category == AclCategory::Owner && references.len() > 1 {
        return Err(AclError::TooManyOwners(references.len()).into());
    }
    let mut targets = Vec::with_capacity(references.len());
    for reference in &references {
        targets.push(resolve_user(&state, reference).await?);
    }

    let policy = state.public_read();
    let updated = state
        .nodes
        .update(id, Some(&user), |node| -> ApiResult<()> {
            let rights = node.rights(Some(&user), policy);
            if !(if granting { rights.write } else { rights.delete }) {
                return Err(ApiError::unauthorized());
            }
            match category.mask() {
                None => node.acl.transfer_ownership(&user, &targets)?,
                Some(mask) if granting => {
                    for target in &targets {
                        node.acl.set(*target, mask);
                    }
                }
                Some(mask) => {
                    for target in &targets {
                        node.acl.unset(target, mask);
                    }
                }
            }
            Ok(())
        })
        .await?;

    tracing::info!(
        node_id = %id,
        user = %user,
        category = %category,
        method = %method,
        targets = targets.len(),
        "ACL updated"
    );
    Ok(envelope(updated.acl.category_view(category)))
}

/// Comma separated user references from the query string or a form body.
async fn users_param(state: &AppState, req: Request) -> ApiResult<Vec<String>> {
    let params = QueryParams::from_request(&req)?;
    let raw = match params.get("users") {
        Some(users) => Some(users.to_string()),
        None => match Form::<Vec<(String, String)>>::from_request(req, state).await {
            Ok(Form(pairs)) => pairs
                .into_iter()
                .find(|(k, v)| k == "users" && !v.is_empty())
                .map(|(_, v)| v),
            Err(_) => None,
        },
    };

    let users = split_users(raw.as_deref().unwrap_or_default());
    if users.is_empty() {
        return Err(ApiError::InvalidRequest(
            "Action requires list of comma separated usernames in 'users' parameter".to_string(),
        ));
    }
    Ok(users)
}

fn split_users(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .collect()
}
