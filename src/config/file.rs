//! TOML configuration file loading
//!
//! Supports `~/.config/s2s-link/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::audio::AudioFormat;
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfigFile {
    /// Recognition language sent after connecting (e.g. "en")
    #[serde(default)]
    pub language: Option<String>,

    /// Connection configuration
    #[serde(default)]
    pub connection: ConnectionFileConfig,

    /// Capture configuration
    #[serde(default)]
    pub audio: AudioFileConfig,
}

/// Connection configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionFileConfig {
    /// Service endpoint (e.g. `ws://127.0.0.1:8766`)
    pub endpoint: Option<String>,

    /// Delay between reconnect attempts, in milliseconds
    pub reconnect_interval_ms: Option<u64>,

    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: Option<u32>,

    /// Heartbeat interval, in milliseconds
    pub heartbeat_interval_ms: Option<u64>,

    /// Reconnect automatically after unexpected closes
    pub auto_reconnect: Option<bool>,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudioFileConfig {
    /// Capture sample rate in Hz
    pub sample_rate: Option<u32>,

    /// Capture channel count
    pub channels: Option<u16>,

    /// Capture encoding ("pcm16" or "wav")
    pub format: Option<AudioFormat>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LinkConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> LinkConfigFile {
    let Some(path) = config_file_path() else {
        return LinkConfigFile::default();
    };

    if !path.exists() {
        return LinkConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            LinkConfigFile::default()
        }
    }
}

/// Load a config file the caller asked for explicitly
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn read_config_file(path: &Path) -> Result<LinkConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/s2s-link/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("s2s-link").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parses_partial_file() {
        let config: LinkConfigFile = toml::from_str(
            r#"
            language = "de"

            [connection]
            endpoint = "wss://speech.example.com"
            max_reconnect_attempts = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.language.as_deref(), Some("de"));
        assert_eq!(
            config.connection.endpoint.as_deref(),
            Some("wss://speech.example.com")
        );
        assert_eq!(config.connection.max_reconnect_attempts, Some(2));
        assert!(config.connection.heartbeat_interval_ms.is_none());
        assert!(config.audio.format.is_none());
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: LinkConfigFile = toml::from_str("").unwrap();
        assert!(config.language.is_none());
        assert!(config.connection.endpoint.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: std::result::Result<LinkConfigFile, _> =
            toml::from_str("[connection]\nendpont = \"ws://typo\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn reads_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[audio]\nsample_rate = 24000\nformat = \"wav\"").unwrap();

        let config = read_config_file(file.path()).unwrap();
        assert_eq!(config.audio.sample_rate, Some(24000));
        assert_eq!(config.audio.format, Some(AudioFormat::Wav));
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_config_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn standard_path_ends_with_app_dir() {
        if let Some(path) = config_file_path() {
            assert!(path.ends_with("s2s-link/config.toml"));
        }
    }
}
