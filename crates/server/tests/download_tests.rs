//! Integration tests for whole, partial, filtered and region downloads.

mod common;

use async_compression::tokio::bufread::GzipDecoder;
use axum::http::StatusCode;
use common::{TestServer, numbered_lines, seeded_bytes};
use silo_server::handlers::NODE_SOURCE_HEADER;
use tokio::io::AsyncReadExt;

#[tokio::test]
async fn test_whole_file_download() {
    let server = TestServer::new().await;
    let (_, token) = server.create_user("alice").await;
    let data = seeded_bytes(3, 10_000);
    let id = server.upload(&token, "reads.fq", &data).await;

    let response = server
        .call("GET", &format!("/node/{id}?download"), Some(&token))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, data);
    assert_eq!(response.header("content-length"), Some("10000"));
    assert_eq!(
        response.header("content-disposition"),
        Some(format!("attachment; filename=\"{id}\"").as_str())
    );

    let response = server
        .call(
            "GET",
            &format!("/node/{id}?download&filename=renamed.fq"),
            Some(&token),
        )
        .await;
    assert_eq!(
        response.header("content-disposition"),
        Some("attachment; filename=\"renamed.fq\"")
    );
}

#[tokio::test]
async fn test_empty_file_download() {
    let server = TestServer::new().await;
    let (_, token) = server.create_user("alice").await;
    let id = server.upload(&token, "empty.txt", b"").await;

    let response = server
        .call("GET", &format!("/node/{id}?download"), Some(&token))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.is_empty());
    assert_eq!(response.header("content-length"), Some("0"));
}

#[tokio::test]
async fn test_virtual_parts_in_request_order() {
    let server = TestServer::new().await;
    let (_, token) = server.create_user("alice").await;
    let data = seeded_bytes(11, 250);
    let id = server.upload(&token, "data.bin", &data).await;

    let response = server
        .call(
            "GET",
            &format!("/node/{id}?download&index=size&chunk_size=100&part=2&part=0"),
            Some(&token),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let mut expected = data[200..250].to_vec();
    expected.extend_from_slice(&data[0..100]);
    assert_eq!(response.body.as_ref(), expected.as_slice());
    assert_eq!(response.header("content-length"), Some("150"));

    // Parts 0 and 1 are contiguous; the total equals the sum of lengths.
    let response = server
        .call(
            "GET",
            &format!("/node/{id}?download&index=size&chunk_size=100&part=0&part=1"),
            Some(&token),
        )
        .await;
    assert_eq!(response.body.as_ref(), &data[0..200]);

    // Inclusive chunk ranges resolve to one contiguous span.
    let response = server
        .call(
            "GET",
            &format!("/node/{id}?download&index=size&chunk_size=100&part=1-2"),
            Some(&token),
        )
        .await;
    assert_eq!(response.body.as_ref(), &data[100..250]);
}

#[tokio::test]
async fn test_part_errors() {
    let server = TestServer::new().await;
    let (_, token) = server.create_user("alice").await;
    let id = server.upload(&token, "data.bin", &seeded_bytes(1, 250)).await;

    let cases = [
        ("index=size", "Index parameter requires part parameter"),
        ("index=size&chunk_size=100&part=3", "Invalid index part"),
        ("index=size&chunk_size=zero&part=0", "Invalid chunk_size"),
        ("index=size&chunk_size=0&part=0", "Invalid chunk_size"),
        ("index=nope&part=0", "Invalid index"),
        ("index=size&chunk_size=100&part=x", "Invalid index part"),
    ];
    for (query, message) in cases {
        let response = server
            .call("GET", &format!("/node/{id}?download&{query}"), Some(&token))
            .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{query}");
        assert_eq!(response.json()["message"], message, "{query}");
    }
}

#[tokio::test]
async fn test_gzip_filter() {
    let server = TestServer::new().await;
    let (_, token) = server.create_user("alice").await;
    let data = numbered_lines(500);
    let id = server.upload(&token, "notes.txt", &data).await;

    let response = server
        .call(
            "GET",
            &format!("/node/{id}?download&filter=gzip"),
            Some(&token),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.header("content-length").is_none());
    assert_eq!(
        response.header("content-disposition"),
        Some(format!("attachment; filename=\"{id}.gz\"").as_str())
    );

    let mut decoder = GzipDecoder::new(response.body.as_ref());
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).await.unwrap();
    assert_eq!(decoded, data.as_ref());

    // Unknown filters are ignored.
    let response = server
        .call(
            "GET",
            &format!("/node/{id}?download&filter=bzip9"),
            Some(&token),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, data);
}

#[tokio::test]
async fn test_line_index_build_and_download() {
    let server = TestServer::new().await;
    let (_, alice) = server.create_user("alice").await;
    let (_, bob) = server.create_user("bob").await;
    let data = numbered_lines(10);
    let id = server.upload(&alice, "reads.txt", &data).await;

    // Building an index needs write right.
    let response = server
        .call(
            "PUT",
            &format!("/node/{id}?index=line&records_per_chunk=4"),
            Some(&bob),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = server
        .call(
            "PUT",
            &format!("/node/{id}?index=line&records_per_chunk=4"),
            Some(&alice),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let node = response.json()["data"].clone();
    assert_eq!(node["version"], 2);
    assert_eq!(node["indexes"]["line"]["kind"], "format");
    assert_eq!(node["indexes"]["line"]["records"].as_array().unwrap().len(), 3);

    // Records 2 then 0: lines 8-9 followed by lines 0-3.
    let response = server
        .call(
            "GET",
            &format!("/node/{id}?download&index=line&part=2&part=0"),
            Some(&alice),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        std::str::from_utf8(&response.body).unwrap(),
        "line 8\nline 9\nline 0\nline 1\nline 2\nline 3\n"
    );

    let response = server
        .call(
            "GET",
            &format!("/node/{id}?download&index=line&part=3"),
            Some(&alice),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_size_index_persists_chunk_size() {
    let server = TestServer::new().await;
    let (_, token) = server.create_user("alice").await;
    let data = seeded_bytes(5, 250);
    let id = server.upload(&token, "data.bin", &data).await;

    let response = server
        .call(
            "PUT",
            &format!("/node/{id}?index=size&chunk_size=100"),
            Some(&token),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.json()["data"]["indexes"]["size"]["chunk_size"],
        100
    );

    let response = server
        .call(
            "GET",
            &format!("/node/{id}?download&index=size&part=1"),
            Some(&token),
        )
        .await;
    assert_eq!(response.body.as_ref(), &data[100..200]);

    let response = server
        .call("PUT", &format!("/node/{id}?index=bogus"), Some(&token))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["message"], "Invalid index");
}

#[tokio::test]
async fn test_region_download_uses_filter() {
    let server = TestServer::new().await;
    let (_, token) = server.create_user("alice").await;
    let id = server.upload(&token, "sample.bam", b"BAM\x01").await;

    let response = server
        .call(
            "GET",
            &format!("/node/{id}?download&index=bai&region=chr1:100-200&head&mapq=30&flag=4"),
            Some(&token),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.header("content-length").is_none());
    assert_eq!(
        std::str::from_utf8(&response.body).unwrap(),
        "region=chr1:100-200 args=-h -q 30 -f 4"
    );

    let requests = server.region_filter.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].path.is_file());
    assert_eq!(requests[0].region.as_deref(), Some("chr1:100-200"));
}

#[tokio::test]
async fn test_region_download_rejects_bad_args() {
    let server = TestServer::new().await;
    let (_, token) = server.create_user("alice").await;
    let id = server.upload(&token, "sample.bam", b"BAM\x01").await;

    let response = server
        .call(
            "GET",
            &format!("/node/{id}?download&index=bai&mapq=high"),
            Some(&token),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["message"], "Invalid mapq value: high");
    assert!(server.region_filter.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_region_cannot_inject_options() {
    let server = TestServer::new().await;
    let (_, token) = server.create_user("alice").await;
    let id = server.upload(&token, "sample.bam", b"BAM\x01").await;

    let response = server
        .call(
            "GET",
            &format!("/node/{id}?download&index=bai&region=-o/tmp/out.sam"),
            Some(&token),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json()["message"],
        "Invalid region value: -o/tmp/out.sam"
    );
    assert!(server.region_filter.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_region_filter_failure_is_clean_error() {
    let server = TestServer::with_failing_filter().await;
    let (_, token) = server.create_user("alice").await;
    let id = server.upload(&token, "sample.bam", b"BAM\x01").await;

    let response = server
        .call(
            "GET",
            &format!("/node/{id}?download&index=bai&region=chr9"),
            Some(&token),
        )
        .await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json()["code"], "stream_error");
}

#[tokio::test]
async fn test_snapshot_fallback_when_primary_down() {
    let server = TestServer::new().await;
    let (_, token) = server.create_user("alice").await;
    let data = seeded_bytes(9, 64);
    let id = server.upload(&token, "data.bin", &data).await;

    let response = server.call("GET", &format!("/node/{id}"), None).await;
    assert!(response.header(NODE_SOURCE_HEADER).is_none());
    let primary = response.json()["data"].clone();

    server.sqlite.pool().close().await;

    let response = server.call("GET", &format!("/node/{id}"), None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header(NODE_SOURCE_HEADER), Some("snapshot"));
    assert_eq!(response.json()["data"], primary);

    let response = server
        .call("GET", &format!("/node/{id}?download"), None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header(NODE_SOURCE_HEADER), Some("snapshot"));
    assert_eq!(response.body, data);

    // Authenticated requests need the token table and report the outage.
    let response = server
        .call("DELETE", &format!("/node/{id}"), Some(&token))
        .await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json()["code"], "backend_unavailable");

    // Without a snapshot the outage is reported rather than a 404.
    let response = server
        .call("GET", "/node/5b0c3f52-9d3e-4a4c-8d4e-3f1f0e6b9a11", None)
        .await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json()["code"], "backend_unavailable");
}
