//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{BootstrapRepo, NodeRepo, PreauthRepo, TokenRepo, UserRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    NodeRepo + UserRepo + TokenRepo + PreauthRepo + BootstrapRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    ///
    /// `query_timeout_secs` bounds how long a caller waits for the connection;
    /// past it the store reports itself unavailable.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(30);

        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // serialises writers and makes each conditional upsert atomic.
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(query_timeout_secs))
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            query_timeout_secs,
            "SQLite metadata store ready"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Readability filter shared by the count and page queries of `find_nodes`.
///
/// ?1 unrestricted, ?2 reader, ?3 include public, ?4 owner.
const NODE_FILTER_SQL: &str = r#"
    WHERE (
        ?1 = 1
        OR owner = ?2
        OR EXISTS (SELECT 1 FROM json_each(nodes.acl_read) WHERE json_each.value = ?2)
        OR (?3 = 1 AND json_array_length(nodes.acl_read) = 0)
    )
    AND (?4 IS NULL OR owner = ?4)
"#;

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::NodeQuery;
    use silo_core::{Node, NodeId, PreauthToken};
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl NodeRepo for SqliteStore {
        async fn get_node(&self, node_id: NodeId) -> MetadataResult<Option<Node>> {
            let row = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE node_id = ?")
                .bind(node_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
            row.map(NodeRow::into_node).transpose()
        }

        async fn find_nodes(&self, query: &NodeQuery) -> MetadataResult<(u64, Vec<Node>)> {
            let reader = query.readable_by.map(|u| u.to_string());
            let owner = query.owner.map(|u| u.to_string());

            let total: i64 =
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM nodes {NODE_FILTER_SQL}"))
                    .bind(query.unrestricted)
                    .bind(&reader)
                    .bind(query.include_public)
                    .bind(&owner)
                    .fetch_one(&self.pool)
                    .await?;

            let rows = sqlx::query_as::<_, NodeRow>(&format!(
                "SELECT * FROM nodes {NODE_FILTER_SQL} ORDER BY created_at, node_id LIMIT ?5 OFFSET ?6"
            ))
            .bind(query.unrestricted)
            .bind(&reader)
            .bind(query.include_public)
            .bind(&owner)
            .bind(i64::from(query.limit))
            .bind(i64::from(query.offset))
            .fetch_all(&self.pool)
            .await?;

            let nodes = rows
                .into_iter()
                .map(NodeRow::into_node)
                .collect::<MetadataResult<Vec<_>>>()?;
            Ok((u64::try_from(total).unwrap_or(0), nodes))
        }

        async fn upsert_node(&self, node: &Node, expected_version: u64) -> MetadataResult<()> {
            let row = NodeRow::from_node(node)?;
            let expected = i64::try_from(expected_version).map_err(|_| {
                MetadataError::Internal(format!("version {expected_version} out of range"))
            })?;

            let result = if expected_version == 0 {
                sqlx::query(
                    r#"
                    INSERT INTO nodes (
                        node_id, owner, version, acl_read, document, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(node_id) DO NOTHING
                    "#,
                )
                .bind(&row.node_id)
                .bind(&row.owner)
                .bind(row.version)
                .bind(&row.acl_read)
                .bind(&row.document)
                .bind(row.created_at)
                .bind(row.updated_at)
                .execute(&self.pool)
                .await?
            } else {
                sqlx::query(
                    r#"
                    UPDATE nodes
                    SET owner = ?, version = ?, acl_read = ?, document = ?, updated_at = ?
                    WHERE node_id = ? AND version = ?
                    "#,
                )
                .bind(&row.owner)
                .bind(row.version)
                .bind(&row.acl_read)
                .bind(&row.document)
                .bind(row.updated_at)
                .bind(&row.node_id)
                .bind(expected)
                .execute(&self.pool)
                .await?
            };

            if result.rows_affected() == 1 {
                return Ok(());
            }

            let found: Option<i64> =
                sqlx::query_scalar("SELECT version FROM nodes WHERE node_id = ?")
                    .bind(&row.node_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Err(MetadataError::VersionConflict {
                id: row.node_id,
                expected: expected_version,
                found: found.and_then(|v| u64::try_from(v).ok()),
            })
        }

        async fn delete_node(&self, node_id: NodeId) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM nodes WHERE node_id = ?")
                .bind(node_id.to_string())
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }
    }

    #[async_trait]
    impl UserRepo for SqliteStore {
        async fn create_user(&self, user: &UserRow) -> MetadataResult<()> {
            if self.get_user(user.user_id).await?.is_some() {
                return Err(MetadataError::AlreadyExists(format!(
                    "user_id {} already exists",
                    user.user_id
                )));
            }
            if self.get_user_by_username(&user.username).await?.is_some() {
                return Err(MetadataError::AlreadyExists(format!(
                    "username '{}' already exists",
                    user.username
                )));
            }

            sqlx::query(
                r#"
                INSERT INTO users (user_id, username, fullname, email, is_admin, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(user.user_id)
            .bind(&user.username)
            .bind(&user.fullname)
            .bind(&user.email)
            .bind(user.is_admin)
            .bind(user.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_user(&self, user_id: Uuid) -> MetadataResult<Option<UserRow>> {
            let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_user_by_username(&self, username: &str) -> MetadataResult<Option<UserRow>> {
            let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }
    }

    #[async_trait]
    impl TokenRepo for SqliteStore {
        async fn create_token(&self, token: &TokenRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO tokens (
                    token_id, user_id, token_hash, expires_at,
                    revoked_at, created_at, last_used_at, description
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(token.token_id)
            .bind(token.user_id)
            .bind(&token.token_hash)
            .bind(token.expires_at)
            .bind(token.revoked_at)
            .bind(token.created_at)
            .bind(token.last_used_at)
            .bind(&token.description)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_hash = ?")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_token(&self, token_id: Uuid) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_id = ?")
                .bind(token_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn touch_token(&self, token_id: Uuid, used_at: OffsetDateTime) -> MetadataResult<()> {
            sqlx::query("UPDATE tokens SET last_used_at = ? WHERE token_id = ?")
                .bind(used_at)
                .bind(token_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn revoke_token(
            &self,
            token_id: Uuid,
            revoked_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query("UPDATE tokens SET revoked_at = ? WHERE token_id = ?")
                .bind(revoked_at)
                .bind(token_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn list_tokens_for_user(&self, user_id: Uuid) -> MetadataResult<Vec<TokenRow>> {
            let rows = sqlx::query_as::<_, TokenRow>(
                "SELECT * FROM tokens WHERE user_id = ? ORDER BY created_at DESC",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl PreauthRepo for SqliteStore {
        async fn create_preauth(&self, token: &PreauthToken) -> MetadataResult<()> {
            let row = PreauthRow::from_token(token)?;
            sqlx::query(
                r#"
                INSERT INTO preauth_tokens (
                    preauth_id, action, node_id, options, valid_till, created_at
                ) VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.preauth_id)
            .bind(&row.action)
            .bind(&row.node_id)
            .bind(&row.options)
            .bind(row.valid_till)
            .bind(row.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_preauth(&self, preauth_id: &str) -> MetadataResult<Option<PreauthToken>> {
            let row = sqlx::query_as::<_, PreauthRow>(
                "SELECT * FROM preauth_tokens WHERE preauth_id = ?",
            )
            .bind(preauth_id)
            .fetch_optional(&self.pool)
            .await?;
            row.map(PreauthRow::into_token).transpose()
        }

        async fn consume_preauth(&self, preauth_id: &str) -> MetadataResult<Option<PreauthToken>> {
            // DELETE ... RETURNING is atomic in SQLite: exactly one caller gets the row.
            let row = sqlx::query_as::<_, PreauthRow>(
                "DELETE FROM preauth_tokens WHERE preauth_id = ? RETURNING *",
            )
            .bind(preauth_id)
            .fetch_optional(&self.pool)
            .await?;
            row.map(PreauthRow::into_token).transpose()
        }

        async fn delete_preauth(&self, preauth_id: &str) -> MetadataResult<()> {
            sqlx::query("DELETE FROM preauth_tokens WHERE preauth_id = ?")
                .bind(preauth_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn purge_expired_preauth(&self, now: OffsetDateTime) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM preauth_tokens WHERE valid_till < ?")
                .bind(now)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl BootstrapRepo for SqliteStore {
        async fn get_bootstrap_token_id(&self) -> MetadataResult<Option<Uuid>> {
            let value: Option<String> =
                sqlx::query_scalar("SELECT bootstrap_token_id FROM bootstrap_state WHERE id = 1")
                    .fetch_optional(&self.pool)
                    .await?
                    .flatten();
            value
                .filter(|id| !id.is_empty())
                .map(|id| {
                    Uuid::parse_str(&id).map_err(|e| {
                        MetadataError::Internal(format!(
                            "invalid bootstrap_token_id uuid '{id}': {e}"
                        ))
                    })
                })
                .transpose()
        }

        async fn set_bootstrap_token_id(&self, token_id: Uuid) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO bootstrap_state (id, bootstrap_token_id)
                VALUES (1, ?)
                ON CONFLICT(id) DO UPDATE
                SET bootstrap_token_id = excluded.bootstrap_token_id
                "#,
            )
            .bind(token_id.to_string())
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Node documents
CREATE TABLE IF NOT EXISTS nodes (
    node_id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    version INTEGER NOT NULL,
    acl_read TEXT NOT NULL DEFAULT '[]',
    document TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_nodes_owner ON nodes(owner);
CREATE INDEX IF NOT EXISTS idx_nodes_created ON nodes(created_at, node_id);

-- User directory
CREATE TABLE IF NOT EXISTS users (
    user_id BLOB PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    fullname TEXT,
    email TEXT,
    is_admin INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- API tokens
CREATE TABLE IF NOT EXISTS tokens (
    token_id BLOB PRIMARY KEY,
    user_id BLOB NOT NULL REFERENCES users(user_id),
    token_hash TEXT NOT NULL UNIQUE,
    expires_at TEXT,
    revoked_at TEXT,
    created_at TEXT NOT NULL,
    last_used_at TEXT,
    description TEXT
);
CREATE INDEX IF NOT EXISTS idx_tokens_hash ON tokens(token_hash);
CREATE INDEX IF NOT EXISTS idx_tokens_user ON tokens(user_id);

-- Preauth tokens
CREATE TABLE IF NOT EXISTS preauth_tokens (
    preauth_id TEXT PRIMARY KEY,
    action TEXT NOT NULL,
    node_id TEXT NOT NULL,
    options TEXT NOT NULL DEFAULT '{}',
    valid_till TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_preauth_valid_till ON preauth_tokens(valid_till);

-- Bootstrap marker
CREATE TABLE IF NOT EXISTS bootstrap_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    bootstrap_token_id TEXT
);
INSERT OR IGNORE INTO bootstrap_state (id, bootstrap_token_id) VALUES (1, NULL);
"#;
