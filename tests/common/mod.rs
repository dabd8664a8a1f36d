//! Shared test doubles
//!
//! `FakeEngine` is an in-memory protocol engine: file contents live in
//! memory, completion and peers are set by the test, and every add/drop is
//! recorded for inspection.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io::{Cursor, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use nyaastream::api::{DescriptorFetcher, FetchError, HttpFetcher};
use nyaastream::models::{Descriptor, PeerStats};
use nyaastream::stream::{
    EngineError, EngineFile, FileReader, ProtocolEngine, Session, SessionHandle,
};

/// What the engine was asked to add
#[derive(Debug, Clone, PartialEq)]
pub enum Added {
    Magnet(String),
    File { path: PathBuf, contents: Vec<u8> },
}

pub struct FakeEngine {
    name: String,
    files: Vec<(String, Vec<u8>)>,
    reject: bool,
    next_id: AtomicU64,
    live: Mutex<HashSet<SessionHandle>>,
    completed: AtomicU64,
    peers: Mutex<PeerStats>,
    added: Mutex<Vec<Added>>,
    drops: AtomicUsize,
    open_readers: Arc<AtomicUsize>,
}

/// In-memory reader that keeps the engine's open-reader count
struct CountedReader {
    inner: Cursor<Vec<u8>>,
    open: Arc<AtomicUsize>,
}

impl CountedReader {
    fn new(data: Vec<u8>, open: Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self {
            inner: Cursor::new(data),
            open,
        }
    }
}

impl Drop for CountedReader {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for CountedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncSeek for CountedReader {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> std::io::Result<()> {
        Pin::new(&mut self.inner).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
        Pin::new(&mut self.inner).poll_complete(cx)
    }
}

impl FakeEngine {
    pub fn new(name: &str, files: Vec<(&str, Vec<u8>)>) -> Self {
        Self {
            name: name.to_string(),
            files: files
                .into_iter()
                .map(|(path, data)| (path.to_string(), data))
                .collect(),
            reject: false,
            next_id: AtomicU64::new(1),
            live: Mutex::new(HashSet::new()),
            completed: AtomicU64::new(0),
            peers: Mutex::new(PeerStats::default()),
            added: Mutex::new(Vec::new()),
            drops: AtomicUsize::new(0),
            open_readers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Engine that rejects every descriptor
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::new("rejected", Vec::new())
        }
    }

    pub fn set_completed(&self, bytes: u64) {
        self.completed.store(bytes, Ordering::SeqCst);
    }

    pub fn set_peers(&self, stats: PeerStats) {
        *self.peers.lock().unwrap() = stats;
    }

    pub fn added(&self) -> Vec<Added> {
        self.added.lock().unwrap().clone()
    }

    /// Engine-level drops actually performed
    pub fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }

    /// Readers handed out and not yet dropped
    pub fn open_readers(&self) -> usize {
        self.open_readers.load(Ordering::SeqCst)
    }

    pub fn live_sessions(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    fn register(&self) -> Result<SessionHandle, EngineError> {
        if self.reject {
            return Err(EngineError::InvalidDescriptor("not a torrent".to_string()));
        }
        let handle = SessionHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.live.lock().unwrap().insert(handle);
        Ok(handle)
    }

    fn check(&self, handle: SessionHandle) -> Result<(), EngineError> {
        if self.live.lock().unwrap().contains(&handle) {
            Ok(())
        } else {
            Err(EngineError::UnknownHandle(handle))
        }
    }
}

#[async_trait]
impl ProtocolEngine for FakeEngine {
    async fn add_magnet(&self, uri: &str, _data_dir: &Path) -> Result<SessionHandle, EngineError> {
        self.added.lock().unwrap().push(Added::Magnet(uri.to_string()));
        self.register()
    }

    async fn add_file(&self, path: &Path, _data_dir: &Path) -> Result<SessionHandle, EngineError> {
        let contents = std::fs::read(path)?;
        self.added.lock().unwrap().push(Added::File {
            path: path.to_path_buf(),
            contents,
        });
        self.register()
    }

    fn name(&self, handle: SessionHandle) -> Result<String, EngineError> {
        self.check(handle)?;
        Ok(self.name.clone())
    }

    fn files(&self, handle: SessionHandle) -> Result<Vec<EngineFile>, EngineError> {
        self.check(handle)?;
        Ok(self
            .files
            .iter()
            .map(|(path, data)| EngineFile {
                path: path.clone(),
                length: data.len() as u64,
            })
            .collect())
    }

    fn bytes_completed(&self, _handle: SessionHandle) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    fn total_length(&self, _handle: SessionHandle) -> u64 {
        self.files.iter().map(|(_, data)| data.len() as u64).sum()
    }

    fn peer_stats(&self, _handle: SessionHandle) -> PeerStats {
        self.peers.lock().unwrap().clone()
    }

    async fn open_reader(
        &self,
        handle: SessionHandle,
        index: usize,
    ) -> Result<Box<dyn FileReader>, EngineError> {
        self.check(handle)?;
        let (_, data) = self.files.get(index).ok_or(EngineError::NoSuchFile(index))?;
        Ok(Box::new(CountedReader::new(
            data.clone(),
            Arc::clone(&self.open_readers),
        )))
    }

    async fn drop_session(&self, handle: SessionHandle) {
        if self.live.lock().unwrap().remove(&handle) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Fetcher for tests that must never touch the network
pub struct NoFetch;

#[async_trait]
impl DescriptorFetcher for NoFetch {
    async fn fetch(&self, url: &str, _destination: &Path) -> Result<PathBuf, FetchError> {
        panic!("unexpected fetch of {}", url);
    }
}

/// Deterministic non-repeating-looking payload of `len` bytes
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

/// Start a magnet session on `engine` in a scratch data directory
pub async fn start_session(engine: Arc<FakeEngine>) -> (Arc<Session>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::start(
        engine,
        &NoFetch,
        Descriptor::Magnet("magnet:?xt=urn:btih:0000".to_string()),
        dir.path(),
    )
    .await
    .unwrap();
    (Arc::new(session), dir)
}

pub fn http_fetcher() -> Arc<HttpFetcher> {
    Arc::new(HttpFetcher::new())
}
