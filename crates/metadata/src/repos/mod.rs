//! Repository traits for metadata operations.

pub mod bootstrap;
pub mod nodes;
pub mod preauth;
pub mod tokens;
pub mod users;

pub use bootstrap::BootstrapRepo;
pub use nodes::{NodeQuery, NodeRepo};
pub use preauth::PreauthRepo;
pub use tokens::TokenRepo;
pub use users::UserRepo;
