//! Local Engine Tests
//!
//! `.torrent` descriptors whose payload sits in a scratch data directory,
//! exercised through the session and the gateway.

mod common;

use std::path::Path;
use std::sync::Arc;

use nyaastream::models::Descriptor;
use nyaastream::stream::gateway::Gateway;
use nyaastream::stream::{EngineError, LocalEngine, ProtocolEngine, Session, SessionError};
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use tokio::io::AsyncReadExt;

use common::{pattern, NoFetch};

fn bstr(s: &str) -> String {
    format!("{}:{}", s.len(), s)
}

fn single_file_descriptor(name: &str, length: u64) -> String {
    format!(
        "d4:infod6:lengthi{}e4:name{}12:piece lengthi16384eee",
        length,
        bstr(name)
    )
}

fn multi_file_descriptor(name: &str, files: &[(&[&str], u64)]) -> String {
    let entries: String = files
        .iter()
        .map(|(path, length)| {
            let parts: String = path.iter().map(|p| bstr(p)).collect();
            format!("d6:lengthi{}e4:pathl{}ee", length, parts)
        })
        .collect();
    format!("d4:infod5:filesl{}e4:name{}ee", entries, bstr(name))
}

fn write_descriptor(dir: &Path, contents: &str) -> String {
    let path = dir.join("release.torrent");
    std::fs::write(&path, contents).unwrap();
    path.to_str().unwrap().to_string()
}

async fn start(
    engine: &Arc<LocalEngine>,
    descriptor: &str,
    data_dir: &Path,
) -> Result<Session, SessionError> {
    let engine: Arc<dyn ProtocolEngine> = engine.clone();
    Session::start(
        engine,
        &NoFetch,
        Descriptor::parse(descriptor),
        data_dir,
    )
    .await
}

// =============================================================================
// Descriptors
// =============================================================================

#[tokio::test]
async fn test_single_file_release() {
    let scratch = tempfile::tempdir().unwrap();
    let data = scratch.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    std::fs::write(data.join("Movie.mkv"), pattern(3000)).unwrap();

    let engine = Arc::new(LocalEngine::new());
    let descriptor = write_descriptor(scratch.path(), &single_file_descriptor("Movie.mkv", 3000));
    let session = start(&engine, &descriptor, &data).await.unwrap();

    assert_eq!(session.name(), "Movie.mkv");
    assert_eq!(session.length(), 3000);
    assert_eq!(session.files().len(), 1);
    assert_eq!(session.bytes_completed(), 3000);
    assert_eq!(session.peer_stats().total, 0);

    let mut reader = session.open_reader(0).await.unwrap();
    let mut contents = Vec::new();
    reader.read_to_end(&mut contents).await.unwrap();
    assert_eq!(contents, pattern(3000));
}

#[tokio::test]
async fn test_partial_multi_file_release() {
    let scratch = tempfile::tempdir().unwrap();
    let data = scratch.path().join("data");
    std::fs::create_dir_all(data.join("Show").join("Extras")).unwrap();
    // Episode 1 half downloaded, extras missing entirely
    std::fs::write(data.join("Show").join("Show 01.mkv"), pattern(500)).unwrap();

    let engine = Arc::new(LocalEngine::new());
    let descriptor = write_descriptor(
        scratch.path(),
        &multi_file_descriptor(
            "Show",
            &[
                (&["Show 01.mkv"][..], 1000),
                (&["Extras", "NCOP.mkv"][..], 200),
            ],
        ),
    );
    let session = start(&engine, &descriptor, &data).await.unwrap();

    assert_eq!(session.length(), 1200);
    assert_eq!(session.files()[1].path, "Extras/NCOP.mkv");
    assert_eq!(session.bytes_completed(), 500);
    assert!(session.open_reader(1).await.is_err());
}

#[tokio::test]
async fn test_magnet_is_unsupported() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(LocalEngine::new());
    let result = start(&engine, "magnet:?xt=urn:btih:abcdef", scratch.path()).await;
    assert!(matches!(
        result,
        Err(SessionError::DescriptorInvalid(EngineError::Unsupported(_)))
    ));
    assert!(engine.is_empty());
}

#[tokio::test]
async fn test_garbage_descriptor_is_invalid() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(LocalEngine::new());
    let descriptor = write_descriptor(scratch.path(), "<!doctype html>");
    let result = start(&engine, &descriptor, scratch.path()).await;
    assert!(matches!(
        result,
        Err(SessionError::DescriptorInvalid(EngineError::InvalidDescriptor(_)))
    ));
}

#[tokio::test]
async fn test_drop_releases_torrent() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(LocalEngine::new());
    let descriptor = write_descriptor(scratch.path(), &single_file_descriptor("a.mkv", 1));
    let session = start(&engine, &descriptor, scratch.path()).await.unwrap();
    assert_eq!(engine.len(), 1);

    session.drop_session().await;
    session.drop_session().await;
    assert!(engine.is_empty());
}

// =============================================================================
// Through the Gateway
// =============================================================================

#[tokio::test]
async fn test_gateway_serves_disk_ranges() {
    let scratch = tempfile::tempdir().unwrap();
    let data = scratch.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    let payload = pattern(64 * 1024);
    std::fs::write(data.join("Movie.mkv"), &payload).unwrap();

    let engine = Arc::new(LocalEngine::new());
    let descriptor = write_descriptor(
        scratch.path(),
        &single_file_descriptor("Movie.mkv", payload.len() as u64),
    );
    let session = Arc::new(start(&engine, &descriptor, &data).await.unwrap());

    let handle = Gateway::bind("127.0.0.1:0".parse().unwrap(), Arc::clone(&session), 0)
        .await
        .unwrap()
        .spawn();

    let resp = reqwest::Client::new()
        .get(format!("http://{}/0", handle.local_addr()))
        .header(RANGE, "bytes=40000-40999")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        resp.headers()[CONTENT_RANGE].to_str().unwrap(),
        format!("bytes 40000-40999/{}", payload.len())
    );
    assert_eq!(resp.bytes().await.unwrap().as_ref(), &payload[40000..41000]);

    handle.shutdown();
    handle.join().await.unwrap();
    session.drop_session().await;
    assert!(engine.is_empty());
}
