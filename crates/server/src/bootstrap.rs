//! Admin account initialization.

use anyhow::{Result, bail};
use silo_core::config::AdminConfig;
use silo_metadata::MetadataStore;
use silo_metadata::models::{TokenRow, UserRow};
use time::OffsetDateTime;
use uuid::Uuid;

/// Normalize a configured token hash to lowercase hex without a prefix.
fn normalize_hash(raw: &str) -> Result<String> {
    // hash_token() emits lowercase hex; uppercase hashes would never match.
    let hash = raw.strip_prefix("sha256:").unwrap_or(raw).to_lowercase();
    if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("invalid admin token_hash: expected 64 hex chars");
    }
    Ok(hash)
}

/// Find or create the admin user. An existing non-admin account with the
/// configured username is refused rather than silently promoted.
async fn ensure_admin_user(metadata: &dyn MetadataStore, config: &AdminConfig) -> Result<UserRow> {
    if let Some(existing) = metadata.get_user_by_username(&config.username).await? {
        if !existing.is_admin {
            bail!(
                "admin username '{}' belongs to a non-admin user (id={})",
                config.username,
                existing.user_id
            );
        }
        return Ok(existing);
    }

    let user = UserRow {
        user_id: Uuid::new_v4(),
        username: config.username.clone(),
        fullname: None,
        email: None,
        is_admin: true,
        created_at: OffsetDateTime::now_utc(),
    };
    metadata.create_user(&user).await?;
    tracing::info!(user_id = %user.user_id, username = %user.username, "Admin user created");
    Ok(user)
}

/// Ensure the configured admin account and token exist, rotating the
/// previous token if needed.
///
/// If the token hash changes between restarts, the previous admin token is
/// automatically revoked and a new one is created with the new hash.
pub async fn ensure_admin_token(metadata: &dyn MetadataStore, config: &AdminConfig) -> Result<()> {
    let hash = normalize_hash(&config.token_hash)?;
    let admin = ensure_admin_user(metadata, config).await?;

    if let Some(existing) = metadata.get_token_by_hash(&hash).await? {
        if existing.revoked_at.is_some() {
            bail!(
                "admin token hash matches a revoked token (id={}); \
                 use a new token hash",
                existing.token_id
            );
        }
        let now = OffsetDateTime::now_utc();
        if let Some(expires_at) = existing.expires_at
            && expires_at <= now
        {
            bail!(
                "admin token hash matches an expired token (id={}, expired={}); \
                 use a new token hash",
                existing.token_id,
                expires_at
            );
        }
        if existing.user_id != admin.user_id {
            bail!(
                "admin token hash is already registered to another user (token id={})",
                existing.token_id
            );
        }
        metadata.set_bootstrap_token_id(existing.token_id).await?;
        tracing::debug!("Admin token already exists");
        return Ok(());
    }

    let now = OffsetDateTime::now_utc();
    if let Some(prev_id) = metadata.get_bootstrap_token_id().await? {
        metadata.revoke_token(prev_id, now).await?;
        tracing::info!(token_id = %prev_id, "Previous admin token revoked");
    }

    let token = TokenRow {
        token_id: Uuid::new_v4(),
        user_id: admin.user_id,
        token_hash: hash,
        expires_at: None,
        revoked_at: None,
        created_at: now,
        last_used_at: None,
        description: config.token_description.clone(),
    };

    metadata.create_token(&token).await?;
    metadata.set_bootstrap_token_id(token.token_id).await?;
    tracing::info!(token_id = %token.token_id, "Admin token created");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_hash() {
        let upper = "SHA256:".to_string() + &"AB".repeat(32);
        assert!(normalize_hash(&upper).is_err());

        let prefixed = "sha256:".to_string() + &"AB".repeat(32);
        assert_eq!(normalize_hash(&prefixed).unwrap(), "ab".repeat(32));

        assert!(normalize_hash("abc").is_err());
        assert!(normalize_hash(&"zz".repeat(32)).is_err());
    }
}
