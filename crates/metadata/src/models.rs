//! Database models mapping to the metadata schema.

use crate::error::MetadataResult;
use silo_core::{Node, PreauthToken};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Nodes
// =============================================================================

/// Node document record.
///
/// The full node is kept as a JSON document. `owner` and `acl_read` are
/// denormalised from it so listing can filter on readability in SQL.
#[derive(Debug, Clone, FromRow)]
pub struct NodeRow {
    pub node_id: String,
    pub owner: String,
    pub version: i64,
    /// JSON array of user IDs in the read set.
    pub acl_read: String,
    pub document: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl NodeRow {
    pub fn from_node(node: &Node) -> MetadataResult<Self> {
        Ok(Self {
            node_id: node.id.to_string(),
            owner: node.acl.owner().to_string(),
            version: i64::try_from(node.version).unwrap_or(i64::MAX),
            acl_read: serde_json::to_string(node.acl.read())?,
            document: serde_json::to_string(node)?,
            created_at: node.created_at,
            updated_at: node.updated_at,
        })
    }

    /// Decode the stored document. The column version wins over the one
    /// embedded in the JSON.
    pub fn into_node(self) -> MetadataResult<Node> {
        let mut node: Node = serde_json::from_str(&self.document)?;
        node.version = u64::try_from(self.version).unwrap_or(0);
        Ok(node)
    }
}

// =============================================================================
// Users and tokens
// =============================================================================

/// User directory record.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub username: String,
    pub fullname: Option<String>,
    pub email: Option<String>,
    pub is_admin: bool,
    pub created_at: OffsetDateTime,
}

/// API token record. Only the SHA-256 hash of the secret is stored.
#[derive(Debug, Clone, FromRow)]
pub struct TokenRow {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: Option<OffsetDateTime>,
    pub revoked_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
    pub description: Option<String>,
}

// =============================================================================
// Preauth tokens
// =============================================================================

/// Preauth token record.
#[derive(Debug, Clone, FromRow)]
pub struct PreauthRow {
    pub preauth_id: String,
    pub action: String,
    pub node_id: String,
    /// JSON object of string options (e.g. `filename`).
    pub options: String,
    pub valid_till: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl PreauthRow {
    pub fn from_token(token: &PreauthToken) -> MetadataResult<Self> {
        Ok(Self {
            preauth_id: token.id.clone(),
            action: token.action.as_str().to_string(),
            node_id: token.node_id.to_string(),
            options: serde_json::to_string(&token.options)?,
            valid_till: token.valid_till,
            created_at: token.created_at,
        })
    }

    pub fn into_token(self) -> MetadataResult<PreauthToken> {
        let action = self.action.parse().map_err(|e: silo_core::PreauthError| {
            crate::MetadataError::Internal(format!("preauth {}: {e}", self.preauth_id))
        })?;
        let node_id = self.node_id.parse().map_err(|e: silo_core::Error| {
            crate::MetadataError::Internal(format!("preauth {}: {e}", self.preauth_id))
        })?;
        Ok(PreauthToken {
            id: self.preauth_id,
            action,
            node_id,
            options: serde_json::from_str(&self.options)?,
            valid_till: self.valid_till,
            created_at: self.created_at,
        })
    }
}
