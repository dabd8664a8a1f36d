//! Local engine
//!
//! A [`ProtocolEngine`] for releases whose payload already sits in the data
//! directory, e.g. a finished download being replayed. Descriptors are read
//! with `serde_bencode`; there is no swarm, so peer stats are always empty
//! and magnet URIs (which need peers to resolve metadata) are rejected.
//! Completion is measured once, when the torrent is added.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::engine::{EngineError, EngineFile, FileReader, ProtocolEngine, SessionHandle};
use crate::models::PeerStats;

/// Subset of a `.torrent` metainfo dictionary we care about
#[derive(Debug, Deserialize)]
struct MetaInfo {
    info: Info,
}

#[derive(Debug, Deserialize)]
struct Info {
    name: String,
    length: Option<u64>,
    files: Option<Vec<InfoFile>>,
}

#[derive(Debug, Deserialize)]
struct InfoFile {
    length: u64,
    path: Vec<String>,
}

#[derive(Debug)]
struct LocalFile {
    path: String,
    location: PathBuf,
    length: u64,
    /// Bytes present on disk when the torrent was added
    on_disk: u64,
}

#[derive(Debug)]
struct LocalTorrent {
    name: String,
    files: Vec<LocalFile>,
}

impl LocalTorrent {
    fn from_descriptor(bytes: &[u8], data_dir: &Path) -> Result<Self, EngineError> {
        let meta: MetaInfo = serde_bencode::from_bytes(bytes)
            .map_err(|e| EngineError::InvalidDescriptor(e.to_string()))?;
        let info = meta.info;

        check_component(&info.name)?;

        let files = match (info.files, info.length) {
            (Some(entries), _) => {
                let root = data_dir.join(&info.name);
                entries
                    .into_iter()
                    .map(|entry| {
                        if entry.path.is_empty() {
                            return Err(EngineError::InvalidDescriptor(
                                "file entry with empty path".to_string(),
                            ));
                        }
                        let mut location = root.clone();
                        for part in &entry.path {
                            check_component(part)?;
                            location.push(part);
                        }
                        Ok(LocalFile {
                            path: entry.path.join("/"),
                            location,
                            length: entry.length,
                            on_disk: 0,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
            (None, Some(length)) => vec![LocalFile {
                path: info.name.clone(),
                location: data_dir.join(&info.name),
                length,
                on_disk: 0,
            }],
            (None, None) => {
                return Err(EngineError::InvalidDescriptor(
                    "info dictionary has neither length nor files".to_string(),
                ))
            }
        };

        Ok(Self {
            name: info.name,
            files,
        })
    }

    /// Record how much of each file is already on disk
    async fn measure(&mut self) {
        for file in &mut self.files {
            file.on_disk = tokio::fs::metadata(&file.location)
                .await
                .map(|m| m.len().min(file.length))
                .unwrap_or(0);
        }
    }

    fn completed(&self) -> u64 {
        self.files.iter().map(|f| f.on_disk).sum()
    }
}

/// Reject path components that would escape the data directory
fn check_component(part: &str) -> Result<(), EngineError> {
    let mut components = Path::new(part).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(EngineError::InvalidDescriptor(format!(
            "unsafe path component {:?}",
            part
        ))),
    }
}

/// Engine backed by payload already present on disk
#[derive(Debug, Default)]
pub struct LocalEngine {
    next_id: AtomicU64,
    torrents: RwLock<HashMap<SessionHandle, Arc<LocalTorrent>>>,
}

impl LocalEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, handle: SessionHandle) -> Result<Arc<LocalTorrent>, EngineError> {
        self.torrents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&handle)
            .cloned()
            .ok_or(EngineError::UnknownHandle(handle))
    }

    /// Number of torrents currently held
    pub fn len(&self) -> usize {
        self.torrents.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProtocolEngine for LocalEngine {
    async fn add_magnet(&self, _uri: &str, _data_dir: &Path) -> Result<SessionHandle, EngineError> {
        Err(EngineError::Unsupported(
            "magnet links need a swarm-capable engine".to_string(),
        ))
    }

    async fn add_file(&self, path: &Path, data_dir: &Path) -> Result<SessionHandle, EngineError> {
        let bytes = tokio::fs::read(path).await?;
        let mut torrent = LocalTorrent::from_descriptor(&bytes, data_dir)?;
        torrent.measure().await;

        let handle = SessionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        info!(
            name = %torrent.name,
            files = torrent.files.len(),
            completed = torrent.completed(),
            "Added local torrent"
        );
        self.torrents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle, Arc::new(torrent));
        Ok(handle)
    }

    fn name(&self, handle: SessionHandle) -> Result<String, EngineError> {
        Ok(self.get(handle)?.name.clone())
    }

    fn files(&self, handle: SessionHandle) -> Result<Vec<EngineFile>, EngineError> {
        Ok(self
            .get(handle)?
            .files
            .iter()
            .map(|f| EngineFile {
                path: f.path.clone(),
                length: f.length,
            })
            .collect())
    }

    fn bytes_completed(&self, handle: SessionHandle) -> u64 {
        self.get(handle).map(|t| t.completed()).unwrap_or(0)
    }

    fn total_length(&self, handle: SessionHandle) -> u64 {
        self.get(handle)
            .map(|t| t.files.iter().map(|f| f.length).sum())
            .unwrap_or(0)
    }

    fn peer_stats(&self, _handle: SessionHandle) -> PeerStats {
        PeerStats::default()
    }

    async fn open_reader(
        &self,
        handle: SessionHandle,
        index: usize,
    ) -> Result<Box<dyn FileReader>, EngineError> {
        let torrent = self.get(handle)?;
        let file = torrent.files.get(index).ok_or(EngineError::NoSuchFile(index))?;
        debug!(path = %file.location.display(), "Opening local reader");
        let reader = tokio::fs::File::open(&file.location).await?;
        Ok(Box::new(reader))
    }

    async fn drop_session(&self, handle: SessionHandle) {
        let removed = self
            .torrents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle);
        if let Some(torrent) = removed {
            info!(name = %torrent.name, "Dropped local torrent");
        }
    }
}
