//! Application state shared across handlers.

use crate::node_store::NodeStore;
use crate::preauth::PreauthService;
use crate::region_filter::{RegionFilter, SamtoolsFilter};
use silo_core::PublicRead;
use silo_core::config::AppConfig;
use silo_metadata::MetadataStore;
use silo_storage::ObjectStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Payload and snapshot storage.
    pub storage: Arc<dyn ObjectStore>,
    /// Users, tokens, preauth tokens and node documents.
    pub metadata: Arc<dyn MetadataStore>,
    /// Rights-checked node persistence.
    pub nodes: NodeStore,
    pub preauth: PreauthService,
    /// Backend for `index=bai` region downloads.
    pub region_filter: Arc<dyn RegionFilter>,
}

impl AppState {
    /// Create the application state, wiring the samtools region filter.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let filter = Arc::new(SamtoolsFilter::new(config.filter.samtools_path.clone()));
        Self::with_region_filter(config, storage, metadata, filter)
    }

    /// Create the application state with a custom region filter.
    pub fn with_region_filter(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        region_filter: Arc<dyn RegionFilter>,
    ) -> Self {
        if config.auth.anonymous_write {
            tracing::warn!(
                "Configuration warning: auth.anonymous_write is enabled, anyone can create nodes"
            );
        }

        let nodes = NodeStore::new(
            metadata.clone(),
            storage.clone(),
            PublicRead::from_flag(config.auth.anonymous_read),
        );
        let preauth = PreauthService::new(metadata.clone(), &config.preauth);

        Self {
            config: Arc::new(config),
            storage,
            metadata,
            nodes,
            preauth,
            region_filter,
        }
    }

    /// The public-read policy in force.
    pub fn public_read(&self) -> PublicRead {
        self.nodes.policy()
    }
}
