//! Node documents.

use crate::acl::{Acl, PublicRead, Rights};
use crate::error::IndexError;
use crate::ids::{NodeId, UserId};
use crate::index::IndexDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Payload descriptor attached to a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Original file name supplied at upload.
    pub name: String,
    /// Payload size in bytes.
    pub size: u64,
    /// Checksums keyed by algorithm (`sha256` -> lowercase hex).
    #[serde(default)]
    pub checksum: BTreeMap<String, String>,
    /// Declared file format, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Payload has no fixed on-disk chunk layout and is chunked on demand.
    #[serde(default)]
    pub virtual_file: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A stored node: payload descriptor plus metadata and its ACL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Optimistic concurrency token. Zero until the first save.
    #[serde(default)]
    pub version: u64,
    pub acl: Acl,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileInfo>,
    #[serde(default)]
    indexes: BTreeMap<String, IndexDescriptor>,
    #[serde(default)]
    pub attributes: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Node {
    /// A fresh, never-saved node owned by `owner`.
    pub fn new(owner: UserId) -> Self {
        // Second precision keeps the document equal to itself after an RFC 3339 round trip.
        let now = OffsetDateTime::now_utc()
            .replace_nanosecond(0)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());
        Self {
            id: NodeId::new(),
            version: 0,
            acl: Acl::new(owner),
            file: None,
            indexes: BTreeMap::new(),
            attributes: serde_json::Value::Null,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }

    pub fn file_size(&self) -> Option<u64> {
        self.file.as_ref().map(|f| f.size)
    }

    /// Rights `user` holds on this node under `policy`.
    pub fn rights(&self, user: Option<&UserId>, policy: PublicRead) -> Rights {
        self.acl.check(user, policy)
    }

    pub fn indexes(&self) -> &BTreeMap<String, IndexDescriptor> {
        &self.indexes
    }

    /// Look up a stored index by name.
    pub fn index(&self, name: &str) -> Result<&IndexDescriptor, IndexError> {
        self.indexes
            .get(name)
            .ok_or_else(|| IndexError::UnknownIndex(name.to_string()))
    }

    /// Store an index. Nodes without a payload cannot carry indexes.
    pub fn set_index(
        &mut self,
        name: impl Into<String>,
        index: IndexDescriptor,
    ) -> Result<(), IndexError> {
        if !self.has_file() {
            return Err(IndexError::NoFile);
        }
        self.indexes.insert(name.into(), index);
        Ok(())
    }

    /// Attach a payload. Existing indexes describe the old payload and are dropped.
    pub fn set_file(&mut self, file: FileInfo) {
        self.indexes.clear();
        self.file = Some(file);
    }

    /// Stamp the modification time.
    pub fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc()
            .replace_nanosecond(0)
            .unwrap_or(self.updated_at);
    }
}
