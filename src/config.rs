//! Configuration management for nyaastream
//!
//! Config is stored at ~/.config/nyaastream/config.toml. Every field is
//! optional; environment variables override the file and CLI flags override
//! both.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::stream::player::{PlayerOptions, PlayerType};
use crate::stream::playback::DEFAULT_PORT;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    /// Storage root for session payloads (default: fresh temp dir per run)
    pub data_dir: Option<PathBuf>,
    /// Where saved .torrent descriptors go
    pub output_dir: Option<PathBuf>,
    /// Gateway port
    pub port: Option<u16>,
    /// Preferred player
    pub player: Option<PlayerType>,
    /// Start the player fullscreen
    pub fullscreen: Option<bool>,
    /// Keep the player window above others
    pub on_top: Option<bool>,
}

impl Config {
    /// Get config file path (~/.config/nyaastream/config.toml)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("nyaastream").join("config.toml"))
    }

    /// Load config from the default path, or defaults if missing or corrupt
    pub fn load() -> Self {
        Self::path()
            .map(|p| Self::load_from(&p))
            .unwrap_or_default()
            .with_env()
    }

    /// Load config from an explicit file
    pub fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Apply NYAASTREAM_* environment overrides
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(port) = var("NYAASTREAM_PORT").and_then(|v| v.trim().parse().ok()) {
            self.port = Some(port);
        }
        if let Some(dir) = var("NYAASTREAM_DATA_DIR").filter(|v| !v.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(player) = var("NYAASTREAM_PLAYER").and_then(|v| v.parse().ok()) {
            self.player = Some(player);
        }
        self
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn player(&self) -> PlayerType {
        self.player.unwrap_or_default()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn player_options(&self) -> PlayerOptions {
        let defaults = PlayerOptions::default();
        PlayerOptions {
            fullscreen: self.fullscreen.unwrap_or(defaults.fullscreen),
            on_top: self.on_top.unwrap_or(defaults.on_top),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.port(), 3001);
        assert_eq!(config.player(), PlayerType::Vlc);
        assert_eq!(config.output_dir(), PathBuf::from("."));
        assert!(config.data_dir.is_none());
        assert!(config.player_options().on_top);
        assert!(!config.player_options().fullscreen);
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            port = 8080
            player = "mpv"
            fullscreen = true
            data_dir = "/tmp/nyaa"
            "#,
        )
        .unwrap();
        assert_eq!(config.port(), 8080);
        assert_eq!(config.player(), PlayerType::Mpv);
        assert!(config.player_options().fullscreen);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/nyaa")));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config {
            port: Some(8080),
            ..Default::default()
        }
        .with_overrides(|key| match key {
            "NYAASTREAM_PORT" => Some("9000".to_string()),
            "NYAASTREAM_PLAYER" => Some("mpv".to_string()),
            _ => None,
        });
        assert_eq!(config.port(), 9000);
        assert_eq!(config.player(), PlayerType::Mpv);
        assert!(config.data_dir.is_none());

        // Unparseable values are ignored
        let config = Config::default().with_overrides(|key| match key {
            "NYAASTREAM_PORT" => Some("not-a-port".to_string()),
            _ => None,
        });
        assert_eq!(config.port(), 3001);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = 4000\non_top = false\n").unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.port(), 4000);
        assert!(!config.player_options().on_top);
        assert_eq!(Config::load_from(&dir.path().join("missing.toml")), Config::default());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = [").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }
}
