//! Preauth token repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use silo_core::PreauthToken;
use time::OffsetDateTime;

/// Repository for preauth tokens.
#[async_trait]
pub trait PreauthRepo: Send + Sync {
    /// Persist a freshly issued token.
    async fn create_preauth(&self, token: &PreauthToken) -> MetadataResult<()>;

    /// Get a token by ID without consuming it.
    async fn get_preauth(&self, preauth_id: &str) -> MetadataResult<Option<PreauthToken>>;

    /// Remove and return a token in one statement, so two concurrent
    /// redemptions cannot both succeed.
    async fn consume_preauth(&self, preauth_id: &str) -> MetadataResult<Option<PreauthToken>>;

    /// Delete a token. Missing tokens are not an error.
    async fn delete_preauth(&self, preauth_id: &str) -> MetadataResult<()>;

    /// Delete every token whose validity ended before `now`. Returns the count.
    async fn purge_expired_preauth(&self, now: OffsetDateTime) -> MetadataResult<u64>;
}
