//! HTTP request handlers.

pub mod acl;
pub mod admin;
pub mod auth;
pub mod common;
pub mod nodes;
pub mod preauth;

pub use acl::*;
pub use admin::*;
pub use auth::*;
pub use common::*;
pub use nodes::*;
pub use preauth::*;
