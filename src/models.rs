//! Data structures shared across nyaastream
//!
//! Organized by domain:
//! - **Descriptor**: where a release's metadata comes from
//! - **Files**: the streamable units inside a session
//! - **Ranges**: byte windows served by the gateway
//! - **Peers**: live swarm telemetry sampled by the monitor

use serde::{Deserialize, Serialize};
use size::Size;
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

// =============================================================================
// Descriptor Models
// =============================================================================

/// Origin of a release descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Descriptor {
    /// `magnet:?xt=urn:btih:...` URI, handed to the engine as-is
    Magnet(String),
    /// `.torrent` file reachable over HTTP(S)
    Remote(String),
    /// `.torrent` file on the local filesystem
    Local(PathBuf),
}

static HTTP_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://").expect("http url pattern is valid"));

impl Descriptor {
    /// Classify a user-supplied descriptor string
    pub fn parse(input: &str) -> Self {
        let input = input.trim();

        if input.starts_with("magnet:") {
            return Descriptor::Magnet(input.to_string());
        }

        if HTTP_URL.is_match(input) {
            return Descriptor::Remote(input.to_string());
        }

        Descriptor::Local(PathBuf::from(input))
    }

    /// Check if this descriptor needs a network fetch before the engine sees it
    pub fn is_remote(&self) -> bool {
        matches!(self, Descriptor::Remote(_))
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descriptor::Magnet(uri) => write!(f, "{}", uri),
            Descriptor::Remote(url) => write!(f, "{}", url),
            Descriptor::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

// =============================================================================
// File Models
// =============================================================================

/// Index reserved for "the session as a whole"
pub const WHOLE_SESSION: i64 = -1;

/// One streamable file inside a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Position in the session's file enumeration (the gateway path)
    pub index: usize,
    /// Relative path within the release
    pub path: String,
    /// Length in bytes
    pub length: u64,
}

impl FileEntry {
    /// Format length for display
    pub fn format_length(&self) -> String {
        format_bytes(self.length)
    }
}

impl fmt::Display for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.index, self.path, self.format_length())
    }
}

/// Serializable view of a started session, used by the `files` command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub name: String,
    pub length: u64,
    pub files: Vec<FileEntry>,
}

// =============================================================================
// Range Models
// =============================================================================

/// Inclusive byte window `start..=end` into one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered (never zero)
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false: a range covers at least one byte
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `Content-Range` header value for a resource of `total` bytes
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

// =============================================================================
// Peer Models
// =============================================================================

/// One connected peer as seen on a single monitor tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSample {
    /// Remote address, usually `ip:port`
    pub address: String,
    /// Instantaneous download rate from this peer in bytes/sec
    pub rate: f64,
}

impl PeerSample {
    pub fn new(address: impl Into<String>, rate: f64) -> Self {
        Self {
            address: address.into(),
            rate,
        }
    }
}

/// Swarm snapshot reported by the protocol engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerStats {
    /// Peers currently exchanging data
    pub active: usize,
    /// Peers known to the session
    pub total: usize,
    pub peers: Vec<PeerSample>,
}

// =============================================================================
// Formatting Helpers
// =============================================================================

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    Size::from_bytes(bytes).to_string()
}

/// Human-readable transfer rate
pub fn format_rate(bytes_per_sec: f64) -> String {
    let bytes = if bytes_per_sec.is_finite() && bytes_per_sec > 0.0 {
        bytes_per_sec as u64
    } else {
        0
    };
    format!("{}/s", format_bytes(bytes))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_magnet() {
        let d = Descriptor::parse("magnet:?xt=urn:btih:abcdef");
        assert_eq!(d, Descriptor::Magnet("magnet:?xt=urn:btih:abcdef".to_string()));
        assert!(!d.is_remote());
    }

    #[test]
    fn test_descriptor_remote() {
        let d = Descriptor::parse("https://nyaa.si/download/1234.torrent");
        assert!(d.is_remote());

        let d = Descriptor::parse("HTTP://example.com/a.torrent");
        assert!(d.is_remote());
    }

    #[test]
    fn test_descriptor_local() {
        let d = Descriptor::parse("./release.torrent");
        assert_eq!(d, Descriptor::Local(PathBuf::from("./release.torrent")));

        // A scheme-like prefix that is not http stays local
        let d = Descriptor::parse("ftp://example.com/a.torrent");
        assert!(matches!(d, Descriptor::Local(_)));

        let d = Descriptor::parse("https.torrent");
        assert!(matches!(d, Descriptor::Local(_)));
    }

    #[test]
    fn test_descriptor_classification_is_repeatable() {
        for _ in 0..3 {
            assert!(Descriptor::parse("http://a/b.torrent").is_remote());
            assert!(!Descriptor::parse("b.torrent").is_remote());
        }
    }

    #[test]
    fn test_descriptor_display_roundtrips_input() {
        let input = "https://nyaa.si/download/1.torrent";
        assert_eq!(Descriptor::parse(input).to_string(), input);
    }

    #[test]
    fn test_byte_range_len_and_header() {
        let r = ByteRange::new(0, 99);
        assert_eq!(r.len(), 100);
        assert_eq!(r.content_range(1000), "bytes 0-99/1000");

        let r = ByteRange::new(5, 5);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_format_rate_handles_negative_and_nan() {
        assert_eq!(format_rate(-10.0), format_rate(0.0));
        assert_eq!(format_rate(f64::NAN), format_rate(0.0));
    }

    #[test]
    fn test_file_entry_display() {
        let f = FileEntry {
            index: 2,
            path: "Show/Episode 03.mkv".to_string(),
            length: 10,
        };
        assert!(f.to_string().starts_with("[2] Show/Episode 03.mkv ("));
    }
}
