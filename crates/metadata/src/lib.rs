//! Metadata store abstraction and implementations for Silo.
//!
//! This crate provides the primary document store:
//! - Node documents with optimistic versioning
//! - The user directory
//! - API tokens and the bootstrap admin marker
//! - Preauth download tokens

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use repos::NodeQuery;
pub use store::{MetadataStore, SqliteStore};

use silo_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            tracing::info!(path = %path.display(), "Opening SQLite metadata store");
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
