//! HTTP API server for the Silo node store.
//!
//! This crate provides the HTTP surface:
//! - Node creation, listing, retrieval and deletion
//! - Indexed partial downloads with optional compression
//! - Region queries through an external filter process
//! - ACL management
//! - Preauth download links
//! - Admin endpoints (users, tokens, maintenance)

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod node_store;
pub mod preauth;
pub mod region_filter;
pub mod routes;
pub mod state;
pub mod streamer;

pub use auth::TraceId;
pub use error::ApiError;
pub use node_store::{NodeSource, NodeStore, NodeStoreError};
pub use preauth::PreauthService;
pub use region_filter::{RegionFilter, RegionRequest, SamtoolsFilter};
pub use routes::create_router;
pub use state::AppState;
