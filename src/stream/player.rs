//! Local Player - VLC/mpv playback support
//!
//! Opens a gateway URL in an external player and waits for it to close.

use std::process::Stdio;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Supported local players
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerType {
    /// VLC media player (default)
    #[default]
    Vlc,
    /// mpv media player
    Mpv,
}

impl PlayerType {
    /// Get the command name for this player
    pub fn command(&self) -> &'static str {
        match self {
            PlayerType::Vlc => {
                // On macOS, VLC is an app bundle
                #[cfg(target_os = "macos")]
                if std::path::Path::new("/Applications/VLC.app").exists() {
                    return "/Applications/VLC.app/Contents/MacOS/VLC";
                }
                "vlc"
            }
            PlayerType::Mpv => "mpv",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PlayerType::Vlc => "VLC",
            PlayerType::Mpv => "mpv",
        }
    }
}

impl std::fmt::Display for PlayerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl std::str::FromStr for PlayerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vlc" => Ok(PlayerType::Vlc),
            "mpv" => Ok(PlayerType::Mpv),
            other => Err(format!("unknown player '{}'", other)),
        }
    }
}

/// Errors from local player operations
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Player '{0}' not found. Install it first.")]
    NotFound(String),
    #[error("Failed to start player: {0}")]
    StartFailed(#[from] std::io::Error),
}

/// Window options passed to the player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerOptions {
    pub fullscreen: bool,
    pub on_top: bool,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            fullscreen: false,
            on_top: true,
        }
    }
}

/// Local player for gateway streams
pub struct LocalPlayer {
    player_type: PlayerType,
    options: PlayerOptions,
}

impl LocalPlayer {
    pub fn new(player_type: PlayerType, options: PlayerOptions) -> Self {
        Self {
            player_type,
            options,
        }
    }

    pub fn player_type(&self) -> PlayerType {
        self.player_type
    }

    /// Check if the player is available on the system
    pub async fn is_available(&self) -> bool {
        let cmd = self.player_type.command();

        // Full path (macOS app bundle)
        if cmd.starts_with('/') {
            return std::path::Path::new(cmd).exists();
        }

        Command::new("which")
            .arg(cmd)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Command line arguments for `url`, window titled `title`
    pub fn args(&self, url: &str, title: &str) -> Vec<String> {
        let mut args = Vec::new();
        match self.player_type {
            PlayerType::Vlc => {
                args.push("-q".to_string());
                args.push("--play-and-exit".to_string());
                args.push(format!("--meta-title={}", title));
                if self.options.on_top {
                    args.push("--video-on-top".to_string());
                }
                if self.options.fullscreen {
                    args.push("--fullscreen".to_string());
                }
            }
            PlayerType::Mpv => {
                args.push("--force-window=immediate".to_string());
                args.push(format!("--title={}", title));
                if self.options.on_top {
                    args.push("--ontop".to_string());
                }
                if self.options.fullscreen {
                    args.push("--fs".to_string());
                }
            }
        }
        args.push(url.to_string());
        args
    }

    /// Spawn the player on `url`
    pub fn play(&self, url: &str, title: &str) -> Result<Child, PlayerError> {
        let args = self.args(url, title);
        debug!(player = %self.player_type, ?args, "Launching player");

        let mut cmd = Command::new(self.player_type.command());
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PlayerError::NotFound(self.player_type.command().to_string())
            } else {
                PlayerError::StartFailed(e)
            }
        })
    }

    /// Play `url` and wait for the player to close.
    ///
    /// The player's exit status is not an error: closing the window early or
    /// a codec complaint still ends playback normally.
    pub async fn play_and_wait(&self, url: &str, title: &str) -> Result<(), PlayerError> {
        let mut child = self.play(url, title)?;
        match child.wait().await {
            Ok(status) => info!(player = %self.player_type, %status, "Player exited"),
            Err(e) => debug!(player = %self.player_type, "Waiting for player failed: {}", e),
        }
        Ok(())
    }
}
