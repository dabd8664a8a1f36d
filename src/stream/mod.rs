//! Streaming infrastructure
//!
//! - Engine: protocol engine capability, the librqbit engine and the local
//!   replay engine
//! - Session: the single active download context
//! - Gateway: HTTP range server over session files
//! - Monitor: download progress and peer telemetry
//! - Player / Playback: external player and ordered start/stop

pub mod engine;
pub mod gateway;
pub mod local;
pub mod monitor;
pub mod playback;
pub mod player;
pub mod range;
pub mod rqbit;
pub mod session;

pub use engine::{EngineError, EngineFile, FileReader, ProtocolEngine, SessionHandle};
pub use gateway::{Gateway, GatewayError, GatewayHandle};
pub use local::LocalEngine;
pub use monitor::{Monitor, MonitorHandle, RateEstimator};
pub use playback::{Playback, PlaybackOptions};
pub use player::{LocalPlayer, PlayerError, PlayerOptions, PlayerType};
pub use range::{parse_range, RangeError};
pub use rqbit::RqbitEngine;
pub use session::{Session, SessionError, SessionManager};
