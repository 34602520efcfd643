//! Server test utilities.

use super::fixtures::{BOUNDARY, FormPart, multipart_body, sha256_hash};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::HOST;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use bytes::Bytes;
use serde_json::Value;
use silo_core::UserId;
use silo_core::config::{AppConfig, MetadataConfig, StorageConfig};
use silo_metadata::models::{TokenRow, UserRow};
use silo_metadata::{MetadataStore, SqliteStore};
use silo_server::bootstrap::ensure_admin_token;
use silo_server::streamer::{BodyStream, StreamError};
use silo_server::{AppState, RegionFilter, RegionRequest, create_router};
use silo_storage::{FilesystemBackend, ObjectStore};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

/// Secret matching `AdminConfig::for_testing()`.
#[allow(dead_code)]
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Host header added to requests that do not set one.
#[allow(dead_code)]
pub const TEST_HOST: &str = "silo.test";

/// Region filter that records requests and echoes them as the body.
#[derive(Default)]
pub struct MockRegionFilter {
    pub requests: Mutex<Vec<RegionRequest>>,
    /// Fail every run as if the process exited before writing output.
    pub fail: bool,
}

#[async_trait]
impl RegionFilter for MockRegionFilter {
    async fn run(&self, request: RegionRequest) -> Result<BodyStream, StreamError> {
        let body = format!(
            "region={} args={}",
            request.region.as_deref().unwrap_or("-"),
            request.args.join(" ")
        );
        self.requests.lock().unwrap().push(request);
        if self.fail {
            return Err(StreamError::ProcessFailed {
                status: "exit status: 1".to_string(),
                stderr: "[main_samview] region \"chr9\" specifies an invalid region".to_string(),
            });
        }
        Ok(Box::pin(futures::stream::once(async move {
            Ok(Bytes::from(body))
        })))
    }
}

/// Buffered response.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub sqlite: Arc<SqliteStore>,
    pub region_filter: Arc<MockRegionFilter>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::build(|_| {}, MockRegionFilter::default()).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, MockRegionFilter::default()).await
    }

    /// Create a test server whose region filter always fails.
    pub async fn with_failing_filter() -> Self {
        let filter = MockRegionFilter {
            fail: true,
            ..Default::default()
        };
        Self::build(|_| {}, filter).await
    }

    async fn build<F>(modifier: F, filter: MockRegionFilter) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let db_path = temp_dir.path().join("metadata.db");
        let sqlite = Arc::new(
            SqliteStore::new(&db_path, Some(1))
                .await
                .expect("Failed to create metadata store"),
        );
        let metadata: Arc<dyn MetadataStore> = sqlite.clone();

        let mut config = AppConfig {
            storage: StorageConfig::Filesystem { path: storage_path },
            metadata: MetadataConfig::Sqlite {
                path: db_path,
                query_timeout_secs: Some(1),
            },
            ..AppConfig::for_testing()
        };
        modifier(&mut config);

        ensure_admin_token(metadata.as_ref(), &config.admin)
            .await
            .expect("Failed to bootstrap admin token");

        let region_filter = Arc::new(filter);
        let state = AppState::with_region_filter(config, storage, metadata, region_filter.clone());
        let router = create_router(state.clone());

        Self {
            router,
            state,
            sqlite,
            region_filter,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Register a user with one API token and return the raw secret.
    pub async fn create_user(&self, username: &str) -> (UserId, String) {
        let now = OffsetDateTime::now_utc();
        let user = UserRow {
            user_id: Uuid::new_v4(),
            username: username.to_string(),
            fullname: None,
            email: None,
            is_admin: false,
            created_at: now,
        };
        self.metadata()
            .create_user(&user)
            .await
            .expect("Failed to create user");

        let raw_token = format!("test-token-{}", Uuid::new_v4());
        let token = TokenRow {
            token_id: Uuid::new_v4(),
            user_id: user.user_id,
            token_hash: sha256_hash(raw_token.as_bytes()),
            expires_at: None,
            revoked_at: None,
            created_at: now,
            last_used_at: None,
            description: Some("Test Token".to_string()),
        };
        self.metadata()
            .create_token(&token)
            .await
            .expect("Failed to create token");

        (UserId::from(user.user_id), raw_token)
    }

    /// Send a request and buffer the response. Requests without a Host
    /// header get `silo.test`.
    pub async fn send(&self, mut request: Request<Body>) -> TestResponse {
        request
            .headers_mut()
            .entry(HOST)
            .or_insert(HeaderValue::from_static(TEST_HOST));
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Send a body-less request.
    pub async fn call(&self, method: &str, uri: &str, token: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Send a JSON request.
    pub async fn call_json(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Value,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        self.send(
            builder
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
    }

    /// POST /node with a multipart form, returning the raw response.
    pub async fn post_node(&self, token: Option<&str>, parts: &[FormPart<'_>]) -> TestResponse {
        let mut builder = Request::builder().method("POST").uri("/node").header(
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(multipart_body(parts))).unwrap())
            .await
    }

    /// Create a node holding `data` and return its ID.
    pub async fn upload(&self, token: &str, name: &str, data: &[u8]) -> String {
        let response = self
            .post_node(Some(token), &[FormPart::File { name, data }])
            .await;
        assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());
        response.json()["data"]["id"]
            .as_str()
            .expect("node id in response")
            .to_string()
    }
}
