//! Preauth download redemption.

use crate::error::ApiResult;
use crate::handlers::nodes::whole_file;
use crate::metrics;
use crate::state::AppState;
use crate::streamer::{RangeStreamer, StreamError};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use silo_core::{IndexError, PreauthAction};

/// GET /preauth/{id} - Stream the whole payload of the token's node.
///
/// No authentication: the token is the capability. The node is loaded
/// without a rights check.
pub async fn redeem_preauth(
    State(state): State<AppState>,
    Path(preauth_id): Path<String>,
) -> ApiResult<Response> {
    let token = state
        .preauth
        .redeem(&preauth_id, PreauthAction::Download)
        .await?;
    let node = state.nodes.load_unauthenticated(token.node_id).await?;
    let file = node.file.as_ref().ok_or(IndexError::NoFile)?;

    let filename = token
        .filename()
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| node.id.to_string());

    let reader = state
        .storage
        .open(&node.id.payload_key())
        .await
        .map_err(StreamError::from)?;
    metrics::record_node_read("preauth");
    tracing::debug!(node_id = %node.id, "Serving preauth download");

    Ok(RangeStreamer::new(reader, whole_file(file), filename).into_response())
}
