//! Node document repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use silo_core::{Node, NodeId, UserId};

/// Listing filter for [`NodeRepo::find_nodes`].
#[derive(Debug, Clone, Default)]
pub struct NodeQuery {
    /// Only nodes this user can read (owner, read set, or public).
    /// `None` together with `unrestricted == false` yields public nodes only.
    pub readable_by: Option<UserId>,
    /// Count nodes with an empty read set as readable.
    pub include_public: bool,
    /// Skip the readability filter entirely (admin listings).
    pub unrestricted: bool,
    /// Only nodes owned by this user.
    pub owner: Option<UserId>,
    pub limit: u32,
    pub offset: u32,
}

/// Repository for node documents.
#[async_trait]
pub trait NodeRepo: Send + Sync {
    /// Get a node by ID.
    async fn get_node(&self, node_id: NodeId) -> MetadataResult<Option<Node>>;

    /// List nodes matching `query`, ordered by creation time. Returns the
    /// total match count alongside the requested page.
    async fn find_nodes(&self, query: &NodeQuery) -> MetadataResult<(u64, Vec<Node>)>;

    /// Write `node` if the stored version equals `expected_version`.
    ///
    /// `expected_version == 0` means the node must not exist yet. The stored
    /// version becomes `node.version`. Fails with `VersionConflict` otherwise.
    async fn upsert_node(&self, node: &Node, expected_version: u64) -> MetadataResult<()>;

    /// Delete a node. Returns whether a row was removed.
    async fn delete_node(&self, node_id: NodeId) -> MetadataResult<bool>;
}
