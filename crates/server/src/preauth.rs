//! Preauth token issuance and redemption.

use crate::metrics;
use silo_core::config::PreauthConfig;
use silo_core::{NodeId, PreauthAction, PreauthError, PreauthToken};
use silo_metadata::{MetadataError, MetadataStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

/// Preauth service errors.
#[derive(Debug, thiserror::Error)]
pub enum PreauthServiceError {
    #[error(transparent)]
    Token(#[from] PreauthError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

pub type PreauthResult<T> = std::result::Result<T, PreauthServiceError>;

/// Issues and redeems preauth tokens against the metadata store.
#[derive(Clone)]
pub struct PreauthService {
    repo: Arc<dyn MetadataStore>,
    ttl: Duration,
    single_use: bool,
}

impl PreauthService {
    pub fn new(repo: Arc<dyn MetadataStore>, config: &PreauthConfig) -> Self {
        Self {
            repo,
            ttl: config.ttl(),
            single_use: config.single_use,
        }
    }

    /// Lifetime given to newly issued tokens.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue and persist a token for `action` on `node_id`.
    pub async fn issue(
        &self,
        action: PreauthAction,
        node_id: NodeId,
        options: BTreeMap<String, String>,
    ) -> PreauthResult<PreauthToken> {
        self.issue_at(action, node_id, options, OffsetDateTime::now_utc())
            .await
    }

    pub async fn issue_at(
        &self,
        action: PreauthAction,
        node_id: NodeId,
        options: BTreeMap<String, String>,
        now: OffsetDateTime,
    ) -> PreauthResult<PreauthToken> {
        let token = PreauthToken::issue(action, node_id, options, self.ttl, now);
        self.repo.create_preauth(&token).await?;
        metrics::PREAUTH_ISSUED.inc();
        tracing::debug!(
            node_id = %node_id,
            action = %action,
            valid_till = %token.valid_till,
            "Issued preauth token"
        );
        Ok(token)
    }

    /// Redeem token `id` for `action`.
    pub async fn redeem(&self, id: &str, action: PreauthAction) -> PreauthResult<PreauthToken> {
        self.redeem_at(id, action, OffsetDateTime::now_utc()).await
    }

    /// Redeem as of `now`. Expired tokens are deleted on sight; with
    /// single-use enabled a valid token is consumed atomically.
    pub async fn redeem_at(
        &self,
        id: &str,
        action: PreauthAction,
        now: OffsetDateTime,
    ) -> PreauthResult<PreauthToken> {
        let Some(token) = self.repo.get_preauth(id).await? else {
            metrics::record_preauth_redeem("not_found");
            return Err(PreauthError::NotFound(id.to_string()).into());
        };

        if let Err(e) = token.check(action, now) {
            if matches!(e, PreauthError::Expired(_)) {
                metrics::record_preauth_redeem("expired");
                self.repo.delete_preauth(id).await?;
            } else {
                metrics::record_preauth_redeem("rejected");
            }
            return Err(e.into());
        }

        if self.single_use && self.repo.consume_preauth(id).await?.is_none() {
            // Another request consumed it between the read and the delete.
            metrics::record_preauth_redeem("not_found");
            return Err(PreauthError::NotFound(id.to_string()).into());
        }

        metrics::record_preauth_redeem("ok");
        Ok(token)
    }

    /// Delete every expired token. Returns how many were removed.
    pub async fn purge_expired(&self) -> PreauthResult<u64> {
        let purged = self
            .repo
            .purge_expired_preauth(OffsetDateTime::now_utc())
            .await?;
        if purged > 0 {
            tracing::info!(purged, "Purged expired preauth tokens");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_metadata::SqliteStore;

    async fn service(ttl_secs: u64, single_use: bool) -> (tempfile::TempDir, PreauthService) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("meta.db"), Some(1))
            .await
            .unwrap();
        let config = PreauthConfig {
            ttl_secs,
            single_use,
            ..PreauthConfig::default()
        };
        (dir, PreauthService::new(Arc::new(store), &config))
    }

    fn whole_second_now() -> OffsetDateTime {
        OffsetDateTime::now_utc().replace_nanosecond(0).unwrap()
    }

    #[tokio::test]
    async fn test_redeem_within_and_after_validity() {
        let (_dir, svc) = service(1, false).await;
        let now = whole_second_now();
        let token = svc
            .issue_at(PreauthAction::Download, NodeId::new(), BTreeMap::new(), now)
            .await
            .unwrap();
        assert_eq!(token.id.len(), 20);

        let redeemed = svc
            .redeem_at(&token.id, PreauthAction::Download, now + Duration::milliseconds(500))
            .await
            .unwrap();
        assert_eq!(redeemed.node_id, token.node_id);

        let err = svc
            .redeem_at(&token.id, PreauthAction::Download, now + Duration::seconds(2))
            .await
            .unwrap_err();
        assert!(matches!(err, PreauthServiceError::Token(PreauthError::Expired(_))));

        // Expired tokens are removed on sight.
        let err = svc
            .redeem_at(&token.id, PreauthAction::Download, now)
            .await
            .unwrap_err();
        assert!(matches!(err, PreauthServiceError::Token(PreauthError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_multi_use_by_default() {
        let (_dir, svc) = service(60, false).await;
        let token = svc
            .issue(PreauthAction::Download, NodeId::new(), BTreeMap::new())
            .await
            .unwrap();
        for _ in 0..3 {
            svc.redeem(&token.id, PreauthAction::Download).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_single_use_consumes() {
        let (_dir, svc) = service(60, true).await;
        let mut options = BTreeMap::new();
        options.insert("filename".to_string(), "reads.bam".to_string());
        let token = svc
            .issue(PreauthAction::Download, NodeId::new(), options)
            .await
            .unwrap();

        let redeemed = svc.redeem(&token.id, PreauthAction::Download).await.unwrap();
        assert_eq!(redeemed.filename(), Some("reads.bam"));
        assert!(matches!(
            svc.redeem(&token.id, PreauthAction::Download).await,
            Err(PreauthServiceError::Token(PreauthError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let (_dir, svc) = service(60, false).await;
        assert!(matches!(
            svc.redeem("doesnotexist", PreauthAction::Download).await,
            Err(PreauthServiceError::Token(PreauthError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (_dir, svc) = service(1, false).await;
        let past = OffsetDateTime::now_utc() - Duration::hours(1);
        svc.issue_at(PreauthAction::Download, NodeId::new(), BTreeMap::new(), past)
            .await
            .unwrap();
        let live = svc
            .issue(PreauthAction::Download, NodeId::new(), BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(svc.purge_expired().await.unwrap(), 1);
        svc.redeem(&live.id, PreauthAction::Download).await.unwrap();
    }
}
