//! Node persistence: the primary document store plus on-disk JSON snapshots.
//!
//! Every save writes the document first and then its snapshot next to the
//! payload. Snapshots are only read when the document store is unreachable
//! (read path fallback) or when an operator re-imports them.

use crate::metrics;
use bytes::Bytes;
use silo_core::{Node, NodeId, PublicRead, UserId};
use silo_metadata::{MetadataError, MetadataStore, NodeQuery};
use silo_storage::{ObjectStore, StorageError};
use std::sync::Arc;

/// Attempts made by [`NodeStore::update`] before giving up on a contended node.
pub const MAX_UPDATE_ATTEMPTS: usize = 3;

/// Where a loaded node came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeSource {
    Primary,
    /// Read from the on-disk snapshot; may be stale.
    Snapshot,
}

/// A node returned by a rights-checked load.
#[derive(Clone, Debug)]
pub struct Loaded {
    pub node: Node,
    pub source: NodeSource,
}

/// Node persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum NodeStoreError {
    #[error("node not found: {0}")]
    NotFound(NodeId),

    #[error("user unauthorized")]
    Unauthorized,

    #[error("concurrent modification of node {0}")]
    Conflict(NodeId),

    /// The document store could not be reached.
    #[error("document store unavailable: {0}")]
    Unavailable(String),

    #[error("snapshot of node {id} unreadable: {reason}")]
    Snapshot { id: NodeId, reason: String },

    #[error(transparent)]
    Metadata(MetadataError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<MetadataError> for NodeStoreError {
    fn from(e: MetadataError) -> Self {
        if e.is_unavailable() {
            Self::Unavailable(e.to_string())
        } else {
            Self::Metadata(e)
        }
    }
}

/// Result type for node persistence.
pub type NodeStoreResult<T> = std::result::Result<T, NodeStoreError>;

/// Persistence adapter for nodes.
#[derive(Clone)]
pub struct NodeStore {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStore>,
    policy: PublicRead,
}

impl NodeStore {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
        policy: PublicRead,
    ) -> Self {
        Self {
            metadata,
            storage,
            policy,
        }
    }

    /// The public-read policy applied by rights checks.
    pub fn policy(&self) -> PublicRead {
        self.policy
    }

    /// Load a node from the primary store, enforcing the read right.
    pub async fn load(&self, id: NodeId, requester: Option<&UserId>) -> NodeStoreResult<Loaded> {
        let node = self.load_unauthenticated(id).await?;
        self.authorize_read(node, requester, NodeSource::Primary)
    }

    /// Like [`load`](Self::load), but serve the on-disk snapshot when the
    /// document store is unavailable. The snapshot gets the same read check.
    pub async fn load_or_snapshot(
        &self,
        id: NodeId,
        requester: Option<&UserId>,
    ) -> NodeStoreResult<Loaded> {
        match self.load(id, requester).await {
            Err(NodeStoreError::Unavailable(reason)) => {
                tracing::error!(
                    node_id = %id,
                    error = %reason,
                    "Document store unavailable, falling back to snapshot"
                );
                let node = match self.load_from_disk(id).await {
                    Ok(node) => node,
                    Err(e) => {
                        tracing::error!(node_id = %id, error = %e, "Snapshot fallback failed");
                        return Err(NodeStoreError::Unavailable(reason));
                    }
                };
                metrics::SNAPSHOT_FALLBACKS.inc();
                self.authorize_read(node, requester, NodeSource::Snapshot)
            }
            other => other,
        }
    }

    /// Load a node without any rights check.
    pub async fn load_unauthenticated(&self, id: NodeId) -> NodeStoreResult<Node> {
        self.metadata
            .get_node(id)
            .await?
            .ok_or(NodeStoreError::NotFound(id))
    }

    /// Reconstruct a node from its JSON snapshot.
    pub async fn load_from_disk(&self, id: NodeId) -> NodeStoreResult<Node> {
        let bytes = match self.storage.get(&id.snapshot_key()).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Err(NodeStoreError::NotFound(id)),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| NodeStoreError::Snapshot {
            id,
            reason: e.to_string(),
        })
    }

    /// Persist `node`, then refresh its snapshot.
    ///
    /// The stored version must still be `node.version` (or the node must be
    /// new when it is zero). On success `node.version` is incremented.
    pub async fn save(&self, node: &mut Node) -> NodeStoreResult<()> {
        let expected = node.version;
        let mut next = node.clone();
        next.version = expected + 1;
        next.touch();

        match self.metadata.upsert_node(&next, expected).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                metrics::NODE_WRITE_CONFLICTS.inc();
                return Err(NodeStoreError::Conflict(node.id));
            }
            Err(e) => return Err(e.into()),
        }

        // The document is committed; a missing snapshot only weakens recovery.
        if let Err(e) = self.write_snapshot(&next).await {
            tracing::warn!(node_id = %next.id, error = %e, "Failed to write node snapshot");
        }

        *node = next;
        Ok(())
    }

    /// Load, mutate and save with bounded retries on version conflicts.
    ///
    /// `mutate` runs against a fresh copy on every attempt, so it must be
    /// free of side effects beyond the node itself.
    pub async fn update<F, E>(
        &self,
        id: NodeId,
        requester: Option<&UserId>,
        mut mutate: F,
    ) -> Result<Node, E>
    where
        F: FnMut(&mut Node) -> Result<(), E>,
        E: From<NodeStoreError>,
    {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let Loaded { mut node, .. } = self.load(id, requester).await?;
            mutate(&mut node)?;
            match self.save(&mut node).await {
                Ok(()) => return Ok(node),
                Err(NodeStoreError::Conflict(_)) => {
                    tracing::debug!(node_id = %id, attempt, "Version conflict, retrying update");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(NodeStoreError::Conflict(id).into())
    }

    /// Remove the document, snapshot and payload. Missing pieces are ignored.
    pub async fn delete(&self, id: NodeId) -> NodeStoreResult<()> {
        self.metadata.delete_node(id).await?;
        for key in [id.snapshot_key(), id.payload_key()] {
            match self.storage.delete(&key).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Re-import a snapshot into the primary store, replacing whatever
    /// document is there.
    pub async fn reload_from_disk(&self, id: NodeId) -> NodeStoreResult<Node> {
        let mut node = self.load_from_disk(id).await?;
        node.version = match self.metadata.get_node(id).await? {
            Some(current) => current.version,
            None => 0,
        };
        self.save(&mut node).await?;
        tracing::info!(node_id = %id, version = node.version, "Node reloaded from snapshot");
        Ok(node)
    }

    /// List nodes with the total count of matches.
    pub async fn list(&self, query: &NodeQuery) -> NodeStoreResult<(u64, Vec<Node>)> {
        Ok(self.metadata.find_nodes(query).await?)
    }

    fn authorize_read(
        &self,
        node: Node,
        requester: Option<&UserId>,
        source: NodeSource,
    ) -> NodeStoreResult<Loaded> {
        if !node.rights(requester, self.policy).read {
            return Err(NodeStoreError::Unauthorized);
        }
        Ok(Loaded { node, source })
    }

    async fn write_snapshot(&self, node: &Node) -> NodeStoreResult<()> {
        let json = serde_json::to_vec(node).map_err(|e| NodeStoreError::Snapshot {
            id: node.id,
            reason: e.to_string(),
        })?;
        self.storage
            .put(&node.id.snapshot_key(), Bytes::from(json))
            .await?;
        Ok(())
    }
}
