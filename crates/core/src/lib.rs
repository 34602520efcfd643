//! Core domain types for the Silo node store.
//!
//! This crate defines the data model shared by every other crate:
//! - Node and user identifiers
//! - Node documents and their payload descriptors
//! - Access-control lists and the rights they grant
//! - Virtual and format-specific indexes for partial reads
//! - Pre-authorized download tokens
//! - Service configuration

pub mod acl;
pub mod config;
pub mod error;
pub mod hash;
pub mod ids;
pub mod index;
pub mod node;
pub mod preauth;

pub use acl::{Acl, AclCategory, PublicRead, Rights, RightsMask};
pub use error::{AclError, Error, IndexError, PreauthError, Result};
pub use hash::{ContentHash, ContentHasher};
pub use ids::{NodeId, UserId};
pub use index::{ByteRange, IndexDescriptor, IndexOptions, LineIndexer};
pub use node::{FileInfo, Node};
pub use preauth::{PreauthAction, PreauthToken};

/// Default virtual index chunk size: 1 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;
