//! CLI - Command Line Interface for nyaastream
//!
//! Every action is scriptable. Output is human-readable on a terminal and
//! JSON when piped or with `--json`.
//!
//! # Examples
//!
//! ```bash
//! # Stream the first file of a release in VLC
//! nyaastream stream "magnet:?xt=urn:btih:..."
//!
//! # Serve episode 3 of a local descriptor to any player on the LAN box
//! nyaastream serve ./release.torrent --index 2 --port 8080
//!
//! # Save a remote descriptor
//! nyaastream save https://example.org/download/123.torrent --name "Show 01"
//! ```

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::stream::player::PlayerType;

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit codes for CLI operations (semantic for scripting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// General error
    Error = 1,
    /// Invalid arguments
    InvalidArgs = 2,
    /// Network error
    NetworkError = 3,
    /// Descriptor rejected or unreadable
    DescriptorInvalid = 4,
    /// Gateway could not bind or failed while serving
    GatewayFailed = 5,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

// =============================================================================
// Main CLI Structure
// =============================================================================

/// nyaastream - stream torrent releases to a local player over HTTP
#[derive(Parser, Debug)]
#[command(
    name = "nyaastream",
    version,
    about = "Stream torrent releases to a local media player over HTTP",
    long_about = "Starts a torrent session from a magnet URI, a .torrent URL or a \
                  local .torrent file, serves its files over HTTP with byte-range \
                  support and shows live download progress while a player reads.",
    after_help = "EXAMPLES:\n\
                  nyaastream stream magnet:?xt=...          Play first file in VLC\n\
                  nyaastream serve ./a.torrent -i 2         Serve file 2 until Ctrl-C\n\
                  nyaastream files ./a.torrent --json       List files\n\
                  nyaastream save https://.../a.torrent     Save the descriptor"
)]
pub struct Cli {
    /// Output format as JSON (default for non-TTY)
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Check if JSON output should be used
    pub fn should_json(&self) -> bool {
        self.json || !std::io::stdout().is_terminal()
    }
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream a release into VLC or mpv
    #[command(visible_alias = "play")]
    Stream(StreamCmd),

    /// Serve a release over HTTP until interrupted
    Serve(ServeCmd),

    /// List the files of a release
    #[command(visible_alias = "ls")]
    Files(FilesCmd),

    /// Save a remote .torrent descriptor
    Save(SaveCmd),
}

// =============================================================================
// Stream Command
// =============================================================================

/// Start a session, serve it and open the player; tear down on player exit
#[derive(Args, Debug)]
pub struct StreamCmd {
    /// Magnet URI, .torrent URL or local .torrent path
    #[arg(required = true)]
    pub descriptor: String,

    /// File index to play (-1 plays the default route)
    #[arg(long, short = 'i', default_value = "-1", allow_negative_numbers = true)]
    pub index: i64,

    /// Gateway port
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Player to launch
    #[arg(long, value_enum)]
    pub player: Option<PlayerType>,

    /// Start the player fullscreen
    #[arg(long, short = 'f')]
    pub fullscreen: bool,

    /// Data directory for downloaded pieces
    #[arg(long, short = 'd')]
    pub dir: Option<PathBuf>,

    /// Replay payload already in the data directory instead of downloading
    #[arg(long)]
    pub offline: bool,
}

// =============================================================================
// Serve Command
// =============================================================================

/// Serve a session over HTTP without launching a player
#[derive(Args, Debug)]
pub struct ServeCmd {
    /// Magnet URI, .torrent URL or local .torrent path
    #[arg(required = true)]
    pub descriptor: String,

    /// File served on `/` (-1 for the first file)
    #[arg(long, short = 'i', default_value = "-1", allow_negative_numbers = true)]
    pub index: i64,

    /// Gateway port
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Data directory for downloaded pieces
    #[arg(long, short = 'd')]
    pub dir: Option<PathBuf>,

    /// Replay payload already in the data directory instead of downloading
    #[arg(long)]
    pub offline: bool,

    /// Don't render the progress monitor
    #[arg(long)]
    pub no_monitor: bool,
}

// =============================================================================
// Files Command
// =============================================================================

/// List the files of a release with their indices
#[derive(Args, Debug)]
pub struct FilesCmd {
    /// Magnet URI, .torrent URL or local .torrent path
    #[arg(required = true)]
    pub descriptor: String,

    /// Data directory for downloaded pieces
    #[arg(long, short = 'd')]
    pub dir: Option<PathBuf>,

    /// Replay payload already in the data directory instead of downloading
    #[arg(long)]
    pub offline: bool,
}

// =============================================================================
// Save Command
// =============================================================================

/// Download a remote .torrent descriptor to disk
#[derive(Args, Debug)]
pub struct SaveCmd {
    /// Descriptor URL
    #[arg(required = true)]
    pub url: String,

    /// File name, without the .torrent extension
    #[arg(long, short = 'n')]
    pub name: Option<String>,

    /// Output directory
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

impl SaveCmd {
    /// Name to save under: `--name`, else the last URL path segment
    pub fn effective_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let path = self.url.split(['?', '#']).next().unwrap_or(&self.url);
        let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
        let decoded = urlencoding::decode(last)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| last.to_string());
        decoded
            .strip_suffix(".torrent")
            .map(str::to_string)
            .unwrap_or(decoded)
    }
}

// =============================================================================
// JSON Output Types
// =============================================================================

/// Generic JSON output wrapper with status
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonOutput<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub exit_code: i32,
}

fn is_zero(n: &i32) -> bool {
    *n == 0
}

impl<T: Serialize> JsonOutput<T> {
    /// Create success output with data
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            exit_code: 0,
        }
    }

    /// Create error output (no data)
    pub fn error_msg(msg: impl Into<String>, code: ExitCode) -> JsonOutput<()> {
        JsonOutput::<()> {
            data: None,
            error: Some(msg.into()),
            exit_code: code.into(),
        }
    }
}

/// Response for a finished stream/serve run
#[derive(Debug, Serialize, Deserialize)]
pub struct PlaybackResponse {
    pub status: String,
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<String>,
}

/// Response for a saved descriptor
#[derive(Debug, Serialize, Deserialize)]
pub struct SaveResponse {
    pub status: String,
    pub path: PathBuf,
}

// =============================================================================
// Output Helpers
// =============================================================================

/// Output handler for consistent formatting
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    pub fn new(cli: &Cli) -> Self {
        Self {
            json: cli.should_json(),
            quiet: cli.quiet,
        }
    }

    /// Print success data
    pub fn print<T: Serialize>(&self, data: T) -> anyhow::Result<()> {
        if self.json {
            let output = JsonOutput::success(data);
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Ok(())
    }

    /// Print error and return exit code
    pub fn error(&self, msg: impl Into<String>, code: ExitCode) -> ExitCode {
        let msg = msg.into();
        if self.json {
            let output = JsonOutput::<()>::error_msg(&msg, code);
            if let Ok(json) = serde_json::to_string_pretty(&output) {
                eprintln!("{}", json);
            }
        } else if !self.quiet {
            eprintln!("Error: {}", msg);
        }
        code
    }

    /// Print info message (suppressed in quiet mode)
    pub fn info(&self, msg: impl std::fmt::Display) {
        if !self.quiet && !self.json {
            eprintln!("{}", msg);
        }
    }

    /// Whether the full-screen monitor may draw on this terminal
    pub fn interactive(&self) -> bool {
        !self.quiet && !self.json && std::io::stdout().is_terminal()
    }
}

// =============================================================================
// Tests
// =============================================================================
