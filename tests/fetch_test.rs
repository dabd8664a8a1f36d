//! Descriptor Fetcher Tests
//!
//! HTTP downloads of `.torrent` descriptors against a mockito server.

use mockito::Server;
use nyaastream::api::fetch::{save_descriptor, sanitize_file_name};
use nyaastream::api::{DescriptorFetcher, FetchError, HttpFetcher};
use tokio_test::{assert_err, assert_ok};

const DESCRIPTOR: &[u8] = b"d8:announce14:http://tracker4:infod4:name5:Show1ee";

// =============================================================================
// Fetch
// =============================================================================

#[tokio::test]
async fn test_fetch_writes_body() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/download/1.torrent")
        .with_status(200)
        .with_header("content-type", "application/x-bittorrent")
        .with_body(DESCRIPTOR)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.torrent");
    let fetcher = HttpFetcher::new();

    let written = assert_ok!(
        fetcher
            .fetch(&format!("{}/download/1.torrent", server.url()), &dest)
            .await
    );

    mock.assert_async().await;
    assert_eq!(written, dest);
    assert_eq!(std::fs::read(&dest).unwrap(), DESCRIPTOR);
}

#[tokio::test]
async fn test_fetch_http_error() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/gone.torrent")
        .with_status(410)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.torrent");
    let result = HttpFetcher::new()
        .fetch(&format!("{}/gone.torrent", server.url()), &dest)
        .await;

    match assert_err!(result) {
        FetchError::Status(status) => assert_eq!(status.as_u16(), 410),
        other => panic!("unexpected error: {}", other),
    }
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_fetch_connection_refused() {
    // Bind then release a port so nothing is listening on it
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let dir = tempfile::tempdir().unwrap();
    let result = HttpFetcher::new()
        .fetch(
            &format!("http://127.0.0.1:{}/a.torrent", port),
            &dir.path().join("a.torrent"),
        )
        .await;
    assert!(matches!(result, Err(FetchError::Request(_))));
}

// =============================================================================
// Save
// =============================================================================

#[tokio::test]
async fn test_save_descriptor_creates_output_dir() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/download/7")
        .with_status(200)
        .with_body(DESCRIPTOR)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("torrents").join("anime");
    let path = save_descriptor(
        &HttpFetcher::new(),
        &format!("{}/download/7", server.url()),
        &output,
        "[Group] Show - 01",
    )
    .await
    .unwrap();

    assert_eq!(path, output.join("[Group] Show - 01.torrent"));
    assert_eq!(std::fs::read(&path).unwrap(), DESCRIPTOR);
}

#[tokio::test]
async fn test_save_descriptor_keeps_name_inside_output_dir() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/x")
        .with_status(200)
        .with_body(DESCRIPTOR)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = save_descriptor(
        &HttpFetcher::new(),
        &format!("{}/x", server.url()),
        dir.path(),
        "../../etc/passwd",
    )
    .await
    .unwrap();

    assert_eq!(path.parent().unwrap(), dir.path());
    assert_eq!(
        path.file_name().unwrap().to_str().unwrap(),
        format!("{}.torrent", sanitize_file_name("../../etc/passwd"))
    );
}
