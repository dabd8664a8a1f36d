//! Session lifecycle
//!
//! [`SessionManager`] owns at most one active [`Session`] at a time. Starting
//! a session resolves the descriptor (fetching remote `.torrent` files into a
//! private temporary file first), hands it to the protocol engine and takes a
//! snapshot of the file enumeration. The resulting `Arc<Session>` is the
//! explicit handle the gateway and the monitor are built from.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::engine::{EngineError, FileReader, ProtocolEngine, SessionHandle};
use crate::api::fetch::{DescriptorFetcher, FetchError};
use crate::models::{Descriptor, FileEntry, PeerStats, WHOLE_SESSION};

/// Errors from session lifecycle operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to fetch descriptor: {0}")]
    DescriptorFetch(#[from] FetchError),
    #[error("descriptor rejected: {0}")]
    DescriptorInvalid(#[source] EngineError),
    #[error("data directory {path} is not usable: {source}")]
    DataDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("file index {index} out of range (session has {count} files)")]
    IndexOutOfRange { index: i64, count: usize },
    #[error("a session is already active; drop it first")]
    AlreadyActive,
    #[error("no active session")]
    NoActiveSession,
    #[error("engine error: {0}")]
    Engine(#[source] EngineError),
}

/// The single in-flight download context for one descriptor
pub struct Session {
    id: Uuid,
    engine: Arc<dyn ProtocolEngine>,
    handle: SessionHandle,
    origin: Descriptor,
    data_dir: PathBuf,
    name: String,
    files: Vec<FileEntry>,
    length: u64,
    dropped: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("origin", &self.origin)
            .field("name", &self.name)
            .field("files", &self.files.len())
            .field("length", &self.length)
            .finish()
    }
}

impl Session {
    /// Resolve `descriptor` and add it to `engine`.
    ///
    /// Remote descriptors are downloaded into a temporary file that is
    /// removed once the engine has accepted or rejected it.
    pub async fn start(
        engine: Arc<dyn ProtocolEngine>,
        fetcher: &dyn DescriptorFetcher,
        descriptor: Descriptor,
        data_dir: &Path,
    ) -> Result<Self, SessionError> {
        prepare_data_dir(data_dir)?;

        let handle = match &descriptor {
            Descriptor::Magnet(uri) => engine
                .add_magnet(uri, data_dir)
                .await
                .map_err(SessionError::DescriptorInvalid)?,
            Descriptor::Remote(url) => {
                let temp = tempfile::Builder::new()
                    .prefix("nyaastream")
                    .suffix(".torrent")
                    .tempfile()
                    .map_err(|e| SessionError::DescriptorFetch(FetchError::Io(e)))?;
                debug!(url = %url, temp = %temp.path().display(), "Fetching remote descriptor");

                let path = fetcher.fetch(url, temp.path()).await?;
                let added = engine.add_file(&path, data_dir).await;
                // `temp` is deleted here whatever the engine said
                drop(temp);
                added.map_err(SessionError::DescriptorInvalid)?
            }
            Descriptor::Local(path) => engine
                .add_file(path, data_dir)
                .await
                .map_err(SessionError::DescriptorInvalid)?,
        };

        match Self::snapshot(Arc::clone(&engine), handle, descriptor, data_dir) {
            Ok(session) => {
                info!(
                    id = %session.id,
                    name = %session.name,
                    files = session.files.len(),
                    length = session.length,
                    "Session started"
                );
                Ok(session)
            }
            Err(e) => {
                engine.drop_session(handle).await;
                Err(e)
            }
        }
    }

    fn snapshot(
        engine: Arc<dyn ProtocolEngine>,
        handle: SessionHandle,
        origin: Descriptor,
        data_dir: &Path,
    ) -> Result<Self, SessionError> {
        let name = engine.name(handle).map_err(SessionError::Engine)?;
        let files: Vec<FileEntry> = engine
            .files(handle)
            .map_err(SessionError::Engine)?
            .into_iter()
            .enumerate()
            .map(|(index, f)| FileEntry {
                index,
                path: f.path,
                length: f.length,
            })
            .collect();
        let length = engine.total_length(handle);

        Ok(Self {
            id: Uuid::new_v4(),
            engine,
            handle,
            origin,
            data_dir: data_dir.to_path_buf(),
            name,
            files,
            length,
            dropped: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Release display name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &Descriptor {
        &self.origin
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Aggregate payload length
    pub fn length(&self) -> u64 {
        self.length
    }

    /// File enumeration, stable for the lifetime of the session
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    /// Look up a file by index
    pub fn file(&self, index: usize) -> Option<&FileEntry> {
        self.files.get(index)
    }

    /// Display name for `index`; `-1` names the release itself
    pub fn name_of(&self, index: i64) -> Result<&str, SessionError> {
        if index == WHOLE_SESSION {
            return Ok(&self.name);
        }
        usize::try_from(index)
            .ok()
            .and_then(|i| self.files.get(i))
            .map(|f| f.path.as_str())
            .ok_or(SessionError::IndexOutOfRange {
                index,
                count: self.files.len(),
            })
    }

    pub fn bytes_completed(&self) -> u64 {
        self.engine.bytes_completed(self.handle)
    }

    pub fn peer_stats(&self) -> PeerStats {
        self.engine.peer_stats(self.handle)
    }

    /// Open an independent read cursor into file `index`
    pub async fn open_reader(&self, index: usize) -> Result<Box<dyn FileReader>, SessionError> {
        if self.is_dropped() {
            return Err(SessionError::NoActiveSession);
        }
        self.engine
            .open_reader(self.handle, index)
            .await
            .map_err(SessionError::Engine)
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Release engine resources. Calling this more than once is a no-op.
    pub async fn drop_session(&self) {
        if self.dropped.swap(true, Ordering::SeqCst) {
            debug!(id = %self.id, "Session already dropped");
            return;
        }
        self.engine.drop_session(self.handle).await;
        info!(id = %self.id, name = %self.name, "Session dropped");
    }
}

/// Make sure the storage root exists and accepts writes
fn prepare_data_dir(data_dir: &Path) -> Result<(), SessionError> {
    let wrap = |source| SessionError::DataDirectory {
        path: data_dir.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(data_dir).map_err(wrap)?;
    tempfile::tempfile_in(data_dir).map_err(wrap)?;
    Ok(())
}

/// Owns the engine and at most one active session
pub struct SessionManager {
    engine: Arc<dyn ProtocolEngine>,
    fetcher: Arc<dyn DescriptorFetcher>,
    active: Mutex<Option<Arc<Session>>>,
}

impl SessionManager {
    pub fn new(engine: Arc<dyn ProtocolEngine>, fetcher: Arc<dyn DescriptorFetcher>) -> Self {
        Self {
            engine,
            fetcher,
            active: Mutex::new(None),
        }
    }

    /// Start a session. Fails with [`SessionError::AlreadyActive`] while a
    /// previous session has not been dropped, whether through
    /// [`SessionManager::stop`] or [`Session::drop_session`].
    pub async fn start(
        &self,
        descriptor: Descriptor,
        data_dir: &Path,
    ) -> Result<Arc<Session>, SessionError> {
        if self.current().is_some() {
            return Err(SessionError::AlreadyActive);
        }

        let session = Arc::new(
            Session::start(
                Arc::clone(&self.engine),
                self.fetcher.as_ref(),
                descriptor,
                data_dir,
            )
            .await?,
        );

        let raced = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if active.as_ref().is_some_and(|s| !s.is_dropped()) {
                true
            } else {
                *active = Some(Arc::clone(&session));
                false
            }
        };
        if raced {
            // Lost a race with a concurrent start
            warn!(id = %session.id(), "Concurrent session start, discarding");
            session.drop_session().await;
            return Err(SessionError::AlreadyActive);
        }
        Ok(session)
    }

    /// The active session, if any. A session dropped by its owner no
    /// longer counts as active.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .filter(|s| !s.is_dropped())
    }

    /// Drop the active session. A no-op when nothing is active.
    pub async fn stop(&self) {
        let session = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(session) = session {
            session.drop_session().await;
        }
    }
}
