//! Integration tests for the node lifecycle endpoints.

mod common;

use axum::http::StatusCode;
use common::{ADMIN_TOKEN, FormPart, TestServer, seeded_bytes, sha256_hash};

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;

    // Health endpoint is intentionally unauthenticated
    let response = server.call("GET", "/v1/health", None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["status"], "ok");
}

#[tokio::test]
async fn test_whoami() {
    let server = TestServer::new().await;
    let (user_id, token) = server.create_user("alice").await;

    let response = server.call("GET", "/v1/auth/whoami", Some(&token)).await;
    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["user_id"], user_id.to_string());
    assert_eq!(body["username"], "alice");
    assert_eq!(body["is_admin"], false);

    let response = server.call("GET", "/v1/auth/whoami", None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.json()["code"], "unauthenticated");
}

#[tokio::test]
async fn test_invalid_token_is_hard_failure() {
    let server = TestServer::new().await;
    let (_, token) = server.create_user("alice").await;
    let id = server.upload(&token, "a.txt", b"public bytes").await;

    // A bad token never degrades to anonymous access, even on a public node.
    let response = server
        .call("GET", &format!("/node/{id}"), Some("not-a-real-token"))
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.json()["code"], "unauthenticated");
}

#[tokio::test]
async fn test_create_node_with_file_and_metadata() {
    let server = TestServer::new().await;
    let (owner, token) = server.create_user("alice").await;
    let data = seeded_bytes(7, 3000);

    let response = server
        .post_node(
            Some(&token),
            &[
                FormPart::Text {
                    field: "attributes",
                    value: r#"{"project":"demo","lane":3}"#,
                },
                FormPart::Text {
                    field: "tags",
                    value: "raw, fastq",
                },
                FormPart::Text {
                    field: "format",
                    value: "fastq",
                },
                FormPart::File {
                    name: "reads.fq",
                    data: &data,
                },
            ],
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let body = response.json();
    assert_eq!(body["status"], 200);
    let node = &body["data"];
    assert_eq!(node["version"], 1);
    assert_eq!(node["acl"]["owner"], owner.to_string());
    assert_eq!(node["file"]["name"], "reads.fq");
    assert_eq!(node["file"]["size"], 3000);
    assert_eq!(node["file"]["format"], "fastq");
    assert_eq!(node["file"]["checksum"]["sha256"], sha256_hash(&data));
    assert_eq!(node["attributes"]["project"], "demo");
    assert_eq!(node["tags"], serde_json::json!(["raw", "fastq"]));
    assert_eq!(node["indexes"]["size"]["kind"], "virtual");

    // The stored document matches what was returned.
    let id = node["id"].as_str().unwrap();
    let fetched = server
        .call("GET", &format!("/node/{id}"), Some(&token))
        .await;
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.json()["data"], *node);
}

#[tokio::test]
async fn test_create_node_without_file() {
    let server = TestServer::new().await;
    let (_, token) = server.create_user("alice").await;

    let response = server
        .post_node(
            Some(&token),
            &[FormPart::Text {
                field: "attributes",
                value: r#"{"kind":"collection"}"#,
            }],
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let node = &response.json()["data"];
    assert!(node.get("file").is_none());

    // Downloading a node without a file is a request error.
    let id = node["id"].as_str().unwrap();
    let response = server
        .call("GET", &format!("/node/{id}?download"), Some(&token))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["message"], "Node has no file");
}

#[tokio::test]
async fn test_create_node_rejects_bad_attributes() {
    let server = TestServer::new().await;
    let (_, token) = server.create_user("alice").await;

    let response = server
        .post_node(
            Some(&token),
            &[FormPart::Text {
                field: "attributes",
                value: "{not json",
            }],
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_anonymous_create_requires_config() {
    let server = TestServer::new().await;
    let response = server
        .post_node(
            None,
            &[FormPart::File {
                name: "a.txt",
                data: b"hello",
            }],
        )
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.json()["message"], "No Authorization");

    let server = TestServer::with_config(|c| c.auth.anonymous_write = true).await;
    let response = server
        .post_node(
            None,
            &[FormPart::File {
                name: "a.txt",
                data: b"hello",
            }],
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    // Public under the default read policy.
    let id = response.json()["data"]["id"].as_str().unwrap().to_string();
    let response = server
        .call("GET", &format!("/node/{id}?download"), None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body.as_ref(), b"hello");
}

#[tokio::test]
async fn test_upload_size_limit() {
    let server = TestServer::with_config(|c| c.server.max_upload_size = 1024).await;
    let (_, token) = server.create_user("alice").await;
    let data = seeded_bytes(1, 4096);

    let response = server
        .post_node(
            Some(&token),
            &[FormPart::File {
                name: "big.bin",
                data: &data,
            }],
        )
        .await;
    assert!(response.status.is_client_error(), "{}", response.status);

    let (total, _) = server
        .state
        .nodes
        .list(&silo_metadata::NodeQuery {
            unrestricted: true,
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_get_unknown_node() {
    let server = TestServer::new().await;
    let (_, token) = server.create_user("alice").await;

    let response = server
        .call(
            "GET",
            "/node/5b0c3f52-9d3e-4a4c-8d4e-3f1f0e6b9a11",
            Some(&token),
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.json()["message"], "Node not found");

    let response = server.call("GET", "/node/garbage", Some(&token)).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_restricted_node_hidden_from_others() {
    let server = TestServer::new().await;
    let (_, alice) = server.create_user("alice").await;
    let (_, bob) = server.create_user("bob").await;
    let (_, carol) = server.create_user("carol").await;
    let id = server.upload(&alice, "secret.txt", b"classified").await;

    // Granting bob read makes the node non-public.
    let response = server
        .call(
            "PUT",
            &format!("/node/{id}/acl/read?users=bob"),
            Some(&alice),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    for token in [Some(carol.as_str()), None] {
        let response = server.call("GET", &format!("/node/{id}"), token).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert!(response.json().get("data").is_none());
        let response = server
            .call("GET", &format!("/node/{id}?download"), token)
            .await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    }

    let response = server
        .call("GET", &format!("/node/{id}?download"), Some(&bob))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body.as_ref(), b"classified");
}

#[tokio::test]
async fn test_anonymous_read_disabled() {
    let server = TestServer::with_config(|c| c.auth.anonymous_read = false).await;
    let (_, alice) = server.create_user("alice").await;
    let (_, bob) = server.create_user("bob").await;
    let id = server.upload(&alice, "a.txt", b"data").await;

    let response = server.call("GET", &format!("/node/{id}"), None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.json()["message"], "No Authorization");

    // With no public rule, an empty read set grants nobody but the owner.
    let response = server.call("GET", &format!("/node/{id}"), Some(&bob)).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    let response = server
        .call("GET", &format!("/node/{id}"), Some(&alice))
        .await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_list_nodes_filters_by_readability() {
    let server = TestServer::new().await;
    let (_, alice) = server.create_user("alice").await;
    let (_, bob) = server.create_user("bob").await;

    let public = server.upload(&alice, "public.txt", b"p").await;
    let private = server.upload(&alice, "private.txt", b"q").await;
    let response = server
        .call(
            "PUT",
            &format!("/node/{private}/acl/read?users=dave"),
            Some(&alice),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let ids = |response: &common::TestResponse| -> Vec<String> {
        response.json()["data"]["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["id"].as_str().unwrap().to_string())
            .collect()
    };

    let listing = server.call("GET", "/node", Some(&bob)).await;
    assert_eq!(listing.status, StatusCode::OK);
    assert_eq!(ids(&listing), vec![public.clone()]);
    assert_eq!(listing.json()["data"]["total_count"], 1);

    let listing = server.call("GET", "/node", Some(&alice)).await;
    let mut seen = ids(&listing);
    seen.sort();
    let mut expected = vec![public.clone(), private.clone()];
    expected.sort();
    assert_eq!(seen, expected);

    let listing = server.call("GET", "/node", Some(ADMIN_TOKEN)).await;
    assert_eq!(listing.json()["data"]["total_count"], 2);

    let listing = server.call("GET", "/node?limit=1", Some(&alice)).await;
    assert_eq!(listing.json()["data"]["nodes"].as_array().unwrap().len(), 1);
    assert_eq!(listing.json()["data"]["total_count"], 2);

    let listing = server.call("GET", "/node?limit=abc", Some(&alice)).await;
    assert_eq!(listing.status, StatusCode::BAD_REQUEST);
    assert_eq!(listing.json()["message"], "Invalid limit");
}

#[tokio::test]
async fn test_delete_node() {
    let server = TestServer::new().await;
    let (_, alice) = server.create_user("alice").await;
    let (_, bob) = server.create_user("bob").await;
    let id = server.upload(&alice, "a.txt", b"bytes").await;

    let response = server
        .call("DELETE", &format!("/node/{id}"), Some(&bob))
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.json()["message"], "User Unauthorized");

    let response = server.call("DELETE", &format!("/node/{id}"), None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = server
        .call("DELETE", &format!("/node/{id}"), Some(&alice))
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let response = server
        .call("GET", &format!("/node/{id}"), Some(&alice))
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let node_id = silo_core::NodeId::parse(&id).unwrap();
    assert!(
        !server
            .state
            .storage
            .exists(&node_id.payload_key())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let server = TestServer::new().await;
    silo_server::metrics::register_metrics();

    let response = server.call("GET", "/metrics", None).await;
    assert_eq!(response.status, StatusCode::OK);

    let server = TestServer::with_config(|c| c.server.metrics_enabled = false).await;
    let response = server.call("GET", "/metrics", None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
