//! nyaastream - stream torrent releases to a local media player
//!
//! Takes one torrent session, exposes its files as plain HTTP resources with
//! byte-range support, and reports live download and peer telemetry while an
//! external player reads from it.
//!
//! # Modules
//!
//! - `models` - Descriptors, file entries, byte ranges, peer samples
//! - `api` - Descriptor fetching over HTTP(S)
//! - `stream` - Engine capability, session lifecycle, gateway, monitor, player
//! - `config` - User configuration
//! - `cli` / `commands` - Command line surface

pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod models;
pub mod stream;

// Re-export commonly used types
pub use models::{ByteRange, Descriptor, FileEntry, PeerSample, PeerStats, SessionSummary};

pub use api::{DescriptorFetcher, FetchError, HttpFetcher};
pub use config::Config;
pub use stream::{
    Gateway, GatewayError, LocalEngine, Monitor, Playback, PlaybackOptions, ProtocolEngine,
    RqbitEngine, Session, SessionError, SessionManager,
};
