//! librqbit engine
//!
//! The default [`ProtocolEngine`]: a librqbit session that resolves magnets
//! over DHT and trackers and downloads while the gateway reads. Readers are
//! librqbit file streams, which pull the pieces under the read cursor to the
//! front of the queue, so playback starts before the torrent completes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use librqbit::api::TorrentIdOrHash;
use librqbit::{
    AddTorrent, AddTorrentOptions, AddTorrentResponse, ManagedTorrent, Session,
    SessionOptions,
};
use serde_json::Value;
use tracing::{debug, info, warn};

/// librqbit 8.x does not re-export its `ManagedTorrentHandle` alias
type ManagedTorrentHandle = Arc<ManagedTorrent>;

use super::engine::{EngineError, EngineFile, FileReader, ProtocolEngine, SessionHandle};
use crate::models::{PeerSample, PeerStats};

fn backend(e: anyhow::Error) -> EngineError {
    EngineError::Backend(format!("{:#}", e))
}

/// Per-peer download rates from cumulative byte counters
#[derive(Debug, Default)]
struct PeerRates {
    last: HashMap<String, (u64, Instant)>,
}

impl PeerRates {
    /// Turn the current `(address, fetched bytes)` counters into rates
    /// against the previous call. Peers seen for the first time report 0.
    fn sample(&mut self, fetched: Vec<(String, u64)>, now: Instant) -> Vec<PeerSample> {
        let mut next = HashMap::with_capacity(fetched.len());
        let samples = fetched
            .into_iter()
            .map(|(address, bytes)| {
                let rate = match self.last.get(&address) {
                    Some(&(previous, at)) => {
                        let secs = now.duration_since(at).as_secs_f64();
                        if secs > 0.0 {
                            bytes.saturating_sub(previous) as f64 / secs
                        } else {
                            0.0
                        }
                    }
                    None => 0.0,
                };
                next.insert(address.clone(), (bytes, now));
                PeerSample::new(address, rate)
            })
            .collect();
        self.last = next;
        samples
    }
}

/// Live peers and their cumulative fetched bytes from a per-peer snapshot
fn fetched_by_peer(snapshot: &Value) -> Vec<(String, u64)> {
    let Some(peers) = snapshot.get("peers").and_then(Value::as_object) else {
        return Vec::new();
    };
    peers
        .iter()
        .filter(|(_, peer)| {
            peer.get("state")
                .and_then(Value::as_str)
                .map_or(true, |state| state.eq_ignore_ascii_case("live"))
        })
        .map(|(address, peer)| {
            let fetched = peer
                .pointer("/counters/fetched_bytes")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            (address.clone(), fetched)
        })
        .collect()
}

struct Tracked {
    id: usize,
    torrent: ManagedTorrentHandle,
    rates: PeerRates,
}

/// Engine backed by a librqbit session
pub struct RqbitEngine {
    session: Arc<Session>,
    torrents: Mutex<HashMap<SessionHandle, Tracked>>,
}

impl RqbitEngine {
    /// Start a librqbit session whose default output folder is `data_dir`
    pub async fn new(data_dir: &Path) -> Result<Self, EngineError> {
        let options = SessionOptions {
            disable_dht_persistence: true,
            ..Default::default()
        };
        let session = Session::new_with_opts(data_dir.to_path_buf(), options)
            .await
            .map_err(backend)?;
        info!(dir = %data_dir.display(), "Torrent session ready");

        Ok(Self {
            session,
            torrents: Mutex::new(HashMap::new()),
        })
    }

    fn torrent(&self, handle: SessionHandle) -> Result<ManagedTorrentHandle, EngineError> {
        self.torrents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&handle)
            .map(|t| t.torrent.clone())
            .ok_or(EngineError::UnknownHandle(handle))
    }

    async fn add(&self, add: AddTorrent<'_>, data_dir: &Path) -> Result<SessionHandle, EngineError> {
        let options = AddTorrentOptions {
            output_folder: Some(data_dir.to_string_lossy().into_owned()),
            overwrite: true,
            ..Default::default()
        };

        let response = self
            .session
            .add_torrent(add, Some(options))
            .await
            .map_err(|e| EngineError::InvalidDescriptor(format!("{:#}", e)))?;
        let (id, torrent) = match response {
            AddTorrentResponse::Added(id, torrent) => (id, torrent),
            AddTorrentResponse::AlreadyManaged(id, torrent) => {
                debug!(id = %id, "Torrent already managed");
                (id, torrent)
            }
            AddTorrentResponse::ListOnly(_) => {
                return Err(EngineError::Unsupported(
                    "torrent was added in list-only mode".to_string(),
                ))
            }
        };
        torrent.wait_until_initialized().await.map_err(backend)?;

        let id: usize = id.into();
        let handle = SessionHandle(id as u64);
        info!(
            id,
            name = ?torrent.name(),
            info_hash = %torrent.info_hash().as_string(),
            "Added torrent"
        );
        self.torrents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                handle,
                Tracked {
                    id,
                    torrent,
                    rates: PeerRates::default(),
                },
            );
        Ok(handle)
    }
}

#[async_trait]
impl ProtocolEngine for RqbitEngine {
    async fn add_magnet(&self, uri: &str, data_dir: &Path) -> Result<SessionHandle, EngineError> {
        self.add(AddTorrent::from_url(uri.to_string()), data_dir).await
    }

    async fn add_file(&self, path: &Path, data_dir: &Path) -> Result<SessionHandle, EngineError> {
        let bytes = tokio::fs::read(path).await?;
        self.add(AddTorrent::from_bytes(bytes), data_dir).await
    }

    fn name(&self, handle: SessionHandle) -> Result<String, EngineError> {
        let torrent = self.torrent(handle)?;
        Ok(torrent
            .name()
            .unwrap_or_else(|| torrent.info_hash().as_string()))
    }

    fn files(&self, handle: SessionHandle) -> Result<Vec<EngineFile>, EngineError> {
        let torrent = self.torrent(handle)?;
        let metadata = torrent.metadata.load();
        let metadata = metadata
            .as_ref()
            .ok_or_else(|| EngineError::Backend("torrent metadata not resolved".to_string()))?;

        let files = metadata
            .info
            .iter_file_details()
            .map_err(backend)?
            .map(|file| {
                Ok(EngineFile {
                    path: file.filename.to_string().map_err(backend)?,
                    length: file.len,
                })
            })
            .collect();
        files
    }

    fn bytes_completed(&self, handle: SessionHandle) -> u64 {
        self.torrent(handle)
            .map(|t| t.stats().progress_bytes)
            .unwrap_or(0)
    }

    fn total_length(&self, handle: SessionHandle) -> u64 {
        self.torrent(handle)
            .map(|t| t.stats().total_bytes)
            .unwrap_or(0)
    }

    fn peer_stats(&self, handle: SessionHandle) -> PeerStats {
        let mut torrents = self.torrents.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tracked) = torrents.get_mut(&handle) else {
            return PeerStats::default();
        };

        let stats = tracked.torrent.stats();
        let Some(live) = stats.live.as_ref() else {
            return PeerStats::default();
        };

        let fetched = tracked
            .torrent
            .live()
            .and_then(|state| serde_json::to_value(state.per_peer_stats_snapshot(Default::default())).ok())
            .map(|snapshot| fetched_by_peer(&snapshot))
            .unwrap_or_default();

        PeerStats {
            active: live.snapshot.peer_stats.live as usize,
            total: live.snapshot.peer_stats.seen as usize,
            peers: tracked.rates.sample(fetched, Instant::now()),
        }
    }

    async fn open_reader(
        &self,
        handle: SessionHandle,
        index: usize,
    ) -> Result<Box<dyn FileReader>, EngineError> {
        if index >= self.files(handle)?.len() {
            return Err(EngineError::NoSuchFile(index));
        }
        let torrent = self.torrent(handle)?;
        let stream = torrent.stream(index).map_err(backend)?;
        debug!(index, "Opened torrent stream");
        Ok(Box::new(stream))
    }

    async fn drop_session(&self, handle: SessionHandle) {
        let removed = self
            .torrents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle);
        let Some(tracked) = removed else {
            return;
        };
        drop(tracked.torrent);

        match self
            .session
            .delete(TorrentIdOrHash::Id(tracked.id.into()), false)
            .await
        {
            Ok(()) => info!(id = tracked.id, "Dropped torrent"),
            Err(e) => warn!(id = tracked.id, "Failed to drop torrent: {:#}", e),
        }
    }
}
