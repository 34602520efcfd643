//! Node endpoints: create, list, retrieve, index and delete.
//!
//! `GET /node/{id}` is the retrieval orchestrator. After the rights-checked
//! load it branches on the query intent: plain metadata, a whole or partial
//! download, or issuance of a preauth download link.

use crate::auth::{get_auth, get_trace_id, require_auth, requester};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{QueryParams, api_url, envelope, mark_snapshot, parse_node_id};
use crate::metrics;
use crate::node_store::{Loaded, NodeSource};
use crate::region_filter::{RegionRequest, parse_region, parse_samtools_args};
use crate::state::AppState;
use crate::streamer::{ContentFilter, OCTET_STREAM, RangeStreamer, StreamError, attachment};
use axum::extract::multipart::Field;
use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Serialize;
use silo_core::hash::SHA256;
use silo_core::preauth::FILENAME_OPTION;
use silo_core::{
    ByteRange, ContentHash, FileInfo, IndexDescriptor, IndexError, IndexOptions, LineIndexer,
    Node, NodeId, PreauthAction, UserId,
};
use silo_metadata::NodeQuery;
use std::collections::BTreeMap;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;

/// Page size of node listings when `limit` is not given.
const DEFAULT_PAGE_LIMIT: u32 = 25;
/// Largest accepted `limit`.
const MAX_PAGE_LIMIT: u32 = 1000;

/// Index name answered by the external region filter.
const REGION_INDEX: &str = "bai";
/// Virtual index registered on every node with a payload.
const SIZE_INDEX: &str = "size";

/// Preauth link response.
#[derive(Debug, Serialize)]
pub struct PreauthLink {
    pub url: String,
    pub validtill: String,
}

/// Node listing response.
#[derive(Debug, Serialize)]
pub struct NodeList {
    pub total_count: u64,
    pub limit: u32,
    pub offset: u32,
    pub nodes: Vec<Node>,
}

// =============================================================================
// Create
// =============================================================================

/// POST /node - Create a node from a multipart form.
///
/// Fields: `upload` (the payload), `attributes` (JSON), `tags` (comma
/// separated) and `format`. All are optional.
pub async fn create_node(State(state): State<AppState>, req: Request) -> ApiResult<Response> {
    let owner = match get_auth(&req) {
        Some(auth) => auth.user_id,
        // Anonymous nodes get an owner nobody can authenticate as.
        None if state.config.auth.anonymous_write => UserId::new(),
        None => return Err(ApiError::Unauthenticated("No Authorization".to_string())),
    };
    let trace_id = get_trace_id(&req).cloned().unwrap_or_default();

    let mut node = Node::new(owner);
    let mut format = None;
    let mut file = None;

    let mut multipart = Multipart::from_request(req, &state)
        .await
        .map_err(|e| ApiError::InvalidRequest(e.body_text()))?;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("invalid multipart body: {e}")))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "upload" => {
                if file.is_some() {
                    return Err(ApiError::InvalidRequest(
                        "only one upload per node".to_string(),
                    ));
                }
                let name = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| node.id.to_string());
                let (size, sha256) = store_payload(&state, node.id, &mut field).await?;
                file = Some((name, size, sha256));
            }
            "attributes" => {
                let text = field_text(field).await?;
                node.attributes = serde_json::from_str(&text)
                    .map_err(|e| ApiError::InvalidRequest(format!("Invalid attributes: {e}")))?;
            }
            "tags" => {
                let text = field_text(field).await?;
                node.tags = text
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "format" => format = Some(field_text(field).await?),
            _ => {}
        }
    }

    if let Some((name, size, sha256)) = file {
        node.set_file(FileInfo {
            name,
            size,
            checksum: BTreeMap::from([(SHA256.to_string(), sha256)]),
            format,
            virtual_file: false,
            created_at: node.created_at,
        });
        node.set_index(SIZE_INDEX, IndexDescriptor::virtual_index())?;
    }

    if let Err(e) = state.nodes.save(&mut node).await {
        if node.has_file() {
            let _ = state.storage.delete(&node.id.payload_key()).await;
        }
        return Err(e.into());
    }

    tracing::info!(
        node_id = %node.id,
        owner = %owner,
        size = node.file_size().unwrap_or(0),
        trace_id = %trace_id,
        "Node created"
    );
    Ok(envelope(&node))
}

/// Stream an upload field into the payload object, hashing as it goes.
async fn store_payload(
    state: &AppState,
    id: NodeId,
    field: &mut Field<'_>,
) -> ApiResult<(u64, String)> {
    let start_time = Instant::now();
    let max = state.config.server.max_upload_size;
    let mut upload = state.storage.put_stream(&id.payload_key()).await?;
    let mut hasher = ContentHash::hasher();
    let mut size = 0u64;

    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                let _ = upload.abort().await;
                return Err(ApiError::InvalidRequest(format!(
                    "failed to read upload: {e}"
                )));
            }
        };
        size += chunk.len() as u64;
        if size > max {
            let _ = upload.abort().await;
            return Err(ApiError::InvalidRequest(format!(
                "upload exceeds maximum size of {max} bytes"
            )));
        }
        hasher.update(&chunk);
        if let Err(e) = upload.write(chunk).await {
            let _ = upload.abort().await;
            return Err(e.into());
        }
    }

    upload.finish().await?;
    metrics::UPLOAD_DURATION.observe(start_time.elapsed().as_secs_f64());
    Ok((size, hasher.finalize().to_hex()))
}

async fn field_text(field: Field<'_>) -> ApiResult<String> {
    field
        .text()
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("invalid form field: {e}")))
}

// =============================================================================
// List
// =============================================================================

/// GET /node - List nodes readable by the requester.
pub async fn list_nodes(State(state): State<AppState>, req: Request) -> ApiResult<Response> {
    let params = QueryParams::from_request(&req)?;
    let auth = get_auth(&req);
    let anonymous_read = state.config.auth.anonymous_read;
    if auth.is_none() && !anonymous_read {
        return Err(ApiError::Unauthenticated("No Authorization".to_string()));
    }

    let limit = params
        .parse_u64("limit")?
        .map_or(DEFAULT_PAGE_LIMIT, |l| l.min(MAX_PAGE_LIMIT as u64) as u32);
    let offset = params
        .parse_u64("offset")?
        .map_or(0, |o| u32::try_from(o).unwrap_or(u32::MAX));

    let query = NodeQuery {
        readable_by: auth.map(|a| a.user_id),
        include_public: anonymous_read,
        unrestricted: auth.is_some_and(|a| a.is_admin),
        owner: None,
        limit,
        offset,
    };
    let (total_count, nodes) = state.nodes.list(&query).await?;

    Ok(envelope(NodeList {
        total_count,
        limit,
        offset,
        nodes,
    }))
}

// =============================================================================
// Retrieve
// =============================================================================

/// GET /node/{id} - Node metadata, download, or preauth link issuance.
pub async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> ApiResult<Response> {
    let params = QueryParams::from_request(&req)?;
    let requester = requester(&req);
    if requester.is_none() && !state.config.auth.anonymous_read {
        return Err(ApiError::Unauthenticated("No Authorization".to_string()));
    }

    // Resolved up front: the request must not stay borrowed across awaits.
    let base_url = api_url(&state, &req);

    let id = parse_node_id(&id)?;
    let Loaded { node, source } = state.nodes.load_or_snapshot(id, requester.as_ref()).await?;

    let response = if params.has("download_url") {
        metrics::record_node_read("download_url");
        issue_download_url(&state, base_url?, &node, requester.as_ref(), &params).await?
    } else if params.has("download") {
        download(&state, &node, &params).await?
    } else {
        metrics::record_node_read("metadata");
        envelope(&node)
    };

    Ok(match source {
        NodeSource::Primary => response,
        NodeSource::Snapshot => mark_snapshot(response),
    })
}

async fn issue_download_url(
    state: &AppState,
    base_url: String,
    node: &Node,
    requester: Option<&UserId>,
    params: &QueryParams,
) -> ApiResult<Response> {
    if requester.is_none() {
        return Err(ApiError::Unauthenticated("No Authorization".to_string()));
    }
    if node.file.is_none() {
        return Err(IndexError::NoFile.into());
    }

    let options: BTreeMap<String, String> = params
        .get("filename")
        .map(|name| (FILENAME_OPTION.to_string(), name.to_string()))
        .into_iter()
        .collect();
    let token = state
        .preauth
        .issue(PreauthAction::Download, node.id, options)
        .await?;

    let validtill = token
        .valid_till
        .format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format validtill: {e}")))?;
    Ok(envelope(PreauthLink {
        url: format!("{base_url}/preauth/{}", token.id),
        validtill,
    }))
}

/// Name a download is saved under: the `filename` parameter, else the node ID.
fn download_name(node: &Node, params: &QueryParams) -> String {
    params
        .get("filename")
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| node.id.to_string())
}

async fn download(state: &AppState, node: &Node, params: &QueryParams) -> ApiResult<Response> {
    let file = node.file.as_ref().ok_or(IndexError::NoFile)?;
    let filename = download_name(node, params);
    let filter = params.get("filter").and_then(ContentFilter::parse);

    let ranges = match params.get("index") {
        Some(REGION_INDEX) => {
            metrics::record_node_read("region");
            return region_download(state, node, params, &filename).await;
        }
        Some(index) => {
            metrics::record_node_read("download_part");
            let default_chunk_size = state.config.server.default_chunk_size;
            resolve_parts(node, file, index, params, default_chunk_size)?
        }
        None => {
            metrics::record_node_read("download");
            whole_file(file)
        }
    };

    let reader = state
        .storage
        .open(&node.id.payload_key())
        .await
        .map_err(StreamError::from)?;
    Ok(RangeStreamer::new(reader, ranges, filename)
        .with_filter(filter)
        .into_response())
}

pub(crate) fn whole_file(file: &FileInfo) -> Vec<ByteRange> {
    if file.size == 0 {
        Vec::new()
    } else {
        vec![ByteRange::new(0, file.size)]
    }
}

/// Resolve the requested parts against a stored index, in request order.
fn resolve_parts(
    node: &Node,
    file: &FileInfo,
    index: &str,
    params: &QueryParams,
    default_chunk_size: u64,
) -> ApiResult<Vec<ByteRange>> {
    let parts = params.all("part");
    if parts.is_empty() {
        return Err(ApiError::InvalidRequest(
            "Index parameter requires part parameter".to_string(),
        ));
    }

    let mut descriptor = node.index(index)?.clone();
    if let IndexDescriptor::Virtual { chunk_size: stored } = descriptor {
        let requested = params
            .get("chunk_size")
            .map(|raw| match raw.trim().parse::<u64>() {
                Ok(size) if size > 0 => Ok(size),
                _ => Err(ApiError::InvalidRequest("Invalid chunk_size".to_string())),
            })
            .transpose()?;
        // Request override, then the stored size, then the server default.
        let chunk_size = requested.or(stored).unwrap_or(default_chunk_size);
        descriptor.apply(&IndexOptions {
            chunk_size: Some(chunk_size),
        })?;
    }

    let mut ranges = Vec::new();
    for part in parts {
        ranges.extend(descriptor.resolve(part, file.size)?);
    }
    Ok(ranges)
}

async fn region_download(
    state: &AppState,
    node: &Node,
    params: &QueryParams,
    filename: &str,
) -> ApiResult<Response> {
    let args = parse_samtools_args(params.pairs())?;
    let region = params.get("region").map(parse_region).transpose()?;
    let path = state
        .storage
        .local_path(&node.id.payload_key())
        .await
        .map_err(StreamError::from)?
        .ok_or_else(|| {
            StreamError::Spawn("payload is not available as a local file".to_string())
        })?;

    let request = RegionRequest {
        path,
        region,
        args,
    };
    let body = state.region_filter.run(request).await?;
    Ok(attachment(body, filename, OCTET_STREAM, None))
}

// =============================================================================
// Index and delete
// =============================================================================

/// PUT /node/{id}?index=size|line - Build and store an index.
///
/// `size` stores a virtual index, optionally with a persisted `chunk_size`.
/// `line` scans the payload into records of `records_per_chunk` lines.
pub async fn update_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> ApiResult<Response> {
    let user = require_auth(&req)?.user_id;
    let params = QueryParams::from_request(&req)?;
    let id = parse_node_id(&id)?;

    let Some(index) = params.get("index") else {
        return Err(ApiError::InvalidRequest(
            "Index parameter is required".to_string(),
        ));
    };

    let Loaded { node, .. } = state.nodes.load(id, Some(&user)).await?;
    if !node.rights(Some(&user), state.public_read()).write {
        return Err(ApiError::unauthorized());
    }
    let file = node.file.as_ref().ok_or(IndexError::NoFile)?;

    let descriptor = match index {
        SIZE_INDEX => {
            let chunk_size = params.parse_u64("chunk_size")?;
            let mut descriptor = IndexDescriptor::virtual_index();
            descriptor.apply(&IndexOptions { chunk_size })?;
            descriptor
        }
        LineIndexer::FORMAT => {
            let lines = params.parse_u64("records_per_chunk")?.unwrap_or(1);
            build_line_index(&state, id, lines).await?
        }
        _ => return Err(IndexError::UnknownIndex(index.to_string()).into()),
    };
    let size = file.size;

    let policy = state.public_read();
    let name = index.to_string();
    let updated = state
        .nodes
        .update(id, Some(&user), |node| -> ApiResult<()> {
            if !node.rights(Some(&user), policy).write {
                return Err(ApiError::unauthorized());
            }
            // The payload is immutable, but reject a stale scan all the same.
            if node.file_size() != Some(size) {
                return Err(ApiError::Conflict(
                    "node payload changed while indexing".to_string(),
                ));
            }
            node.set_index(name.clone(), descriptor.clone())?;
            Ok(())
        })
        .await?;

    tracing::info!(node_id = %id, index = %index, "Index stored");
    Ok(envelope(&updated))
}

async fn build_line_index(
    state: &AppState,
    id: NodeId,
    lines_per_record: u64,
) -> ApiResult<IndexDescriptor> {
    let mut indexer = LineIndexer::new(lines_per_record)?;
    let mut stream = state.storage.get_stream(&id.payload_key()).await?;
    while let Some(chunk) = stream.next().await {
        indexer.update(&chunk?);
    }
    Ok(indexer.finish())
}

/// DELETE /node/{id} - Delete a node and its payload.
pub async fn delete_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> ApiResult<Response> {
    let user = require_auth(&req)?.user_id;
    let id = parse_node_id(&id)?;

    let Loaded { node, .. } = state.nodes.load(id, Some(&user)).await?;
    if !node.rights(Some(&user), state.public_read()).delete {
        return Err(ApiError::unauthorized());
    }

    state.nodes.delete(id).await?;
    tracing::info!(node_id = %id, user = %user, "Node deleted");
    Ok(envelope(serde_json::Value::Null))
}
