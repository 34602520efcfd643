//! Authentication-related endpoints.

use crate::auth::require_auth;
use crate::error::ApiResult;
use axum::Json;
use axum::extract::Request;
use serde::Serialize;

/// Response for the authenticated caller.
#[derive(Debug, Serialize)]
pub struct WhoamiResponse {
    pub user_id: String,
    pub username: String,
    pub is_admin: bool,
    pub token_id: String,
}

/// GET /v1/auth/whoami - Return the identity behind the presented token.
pub async fn whoami(req: Request) -> ApiResult<Json<WhoamiResponse>> {
    let auth = require_auth(&req)?;
    Ok(Json(WhoamiResponse {
        user_id: auth.user_id.to_string(),
        username: auth.username.clone(),
        is_admin: auth.is_admin,
        token_id: auth.token_id.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthenticatedUser;
    use crate::error::ApiError;
    use axum::body::Body;
    use silo_core::UserId;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_whoami_reports_extension() {
        let user_id = UserId::new();
        let token_id = Uuid::new_v4();
        let mut req = Request::new(Body::empty());
        req.extensions_mut().insert(AuthenticatedUser {
            user_id,
            username: "alice".to_string(),
            is_admin: false,
            token_id,
        });

        let Json(response) = whoami(req).await.unwrap();
        assert_eq!(response.user_id, user_id.to_string());
        assert_eq!(response.username, "alice");
        assert!(!response.is_admin);
        assert_eq!(response.token_id, token_id.to_string());
    }

    #[tokio::test]
    async fn test_whoami_requires_token() {
        let err = whoami(Request::new(Body::empty())).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated(_)));
    }
}
