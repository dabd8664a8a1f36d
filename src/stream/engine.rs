//! Protocol engine capability
//!
//! The BitTorrent machinery (peers, pieces, disk) lives behind this trait.
//! The session manager, gateway and monitor only ever talk to an engine
//! through it, so any backend that can add a descriptor, enumerate files,
//! report progress and hand out file readers can drive a stream.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncSeek};

use crate::models::PeerStats;

/// Opaque identifier of one torrent inside an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

/// A file as enumerated by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFile {
    pub path: String,
    pub length: u64,
}

/// Independent read cursor into one file's content.
///
/// Each gateway request owns its own reader; readers are never shared.
pub trait FileReader: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> FileReader for T {}

/// Errors raised by an engine backend
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("unsupported by this engine: {0}")]
    Unsupported(String),
    #[error("unknown session handle {0:?}")]
    UnknownHandle(SessionHandle),
    #[error("file index {0} out of range")]
    NoSuchFile(usize),
    #[error("engine failure: {0}")]
    Backend(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability interface of a BitTorrent protocol engine.
///
/// Progress and peer reads are snapshot reads; implementations must make them
/// safe to call concurrently with an in-flight transfer.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Add a torrent from a magnet URI, resolving its metadata
    async fn add_magnet(&self, uri: &str, data_dir: &Path) -> Result<SessionHandle, EngineError>;

    /// Add a torrent from a descriptor file on disk
    async fn add_file(&self, path: &Path, data_dir: &Path) -> Result<SessionHandle, EngineError>;

    /// Release display name
    fn name(&self, handle: SessionHandle) -> Result<String, EngineError>;

    /// Ordered file enumeration; the position is the file index
    fn files(&self, handle: SessionHandle) -> Result<Vec<EngineFile>, EngineError>;

    /// Bytes of payload verified so far
    fn bytes_completed(&self, handle: SessionHandle) -> u64;

    /// Total payload length
    fn total_length(&self, handle: SessionHandle) -> u64;

    /// Live swarm snapshot with per-peer instantaneous rates
    fn peer_stats(&self, handle: SessionHandle) -> PeerStats;

    /// Open a fresh reader positioned at the start of file `index`
    async fn open_reader(
        &self,
        handle: SessionHandle,
        index: usize,
    ) -> Result<Box<dyn FileReader>, EngineError>;

    /// Tear the torrent down. Unknown handles are ignored.
    async fn drop_session(&self, handle: SessionHandle);
}
