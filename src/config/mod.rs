//! Configuration management for the s2s link client
//!
//! Precedence, lowest to highest: built-in defaults, the TOML file,
//! `S2S_*` environment variables, then command-line flags applied by the
//! binary.

pub mod file;

use std::path::Path;
use std::time::Duration;

use crate::audio::AudioConfig;
use crate::session::SessionConfig;
use crate::{Error, Result};

use file::LinkConfigFile;

/// Client configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Connection settings
    pub session: SessionConfig,

    /// Capture settings
    pub audio: AudioConfig,

    /// Recognition language sent after connecting
    pub language: Option<String>,
}

impl Config {
    /// Load configuration from the file and the process environment
    ///
    /// An explicit `path` must exist and parse; the standard path is optional.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit file is unusable, an environment value
    /// is malformed, or the result fails validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = match path {
            Some(path) => file::read_config_file(path)?,
            None => file::load_config_file(),
        };

        let config = Self::from_sources(fc, |key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Merge a parsed file with environment lookups (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if an environment value cannot be parsed
    pub fn from_sources<F>(fc: LinkConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = SessionConfig::default();
        let audio_defaults = AudioConfig::default();

        let session = SessionConfig {
            endpoint: env("S2S_ENDPOINT")
                .or(fc.connection.endpoint)
                .unwrap_or(defaults.endpoint),
            reconnect_interval: parse_env(&env, "S2S_RECONNECT_INTERVAL_MS")?
                .or(fc.connection.reconnect_interval_ms)
                .map_or(defaults.reconnect_interval, Duration::from_millis),
            max_reconnect_attempts: parse_env(&env, "S2S_MAX_RECONNECT_ATTEMPTS")?
                .or(fc.connection.max_reconnect_attempts)
                .unwrap_or(defaults.max_reconnect_attempts),
            heartbeat_interval: parse_env(&env, "S2S_HEARTBEAT_INTERVAL_MS")?
                .or(fc.connection.heartbeat_interval_ms)
                .map_or(defaults.heartbeat_interval, Duration::from_millis),
            auto_reconnect: parse_env_bool(&env, "S2S_AUTO_RECONNECT")?
                .or(fc.connection.auto_reconnect)
                .unwrap_or(defaults.auto_reconnect),
        };

        let audio = AudioConfig {
            sample_rate: fc.audio.sample_rate.unwrap_or(audio_defaults.sample_rate),
            channels: fc.audio.channels.unwrap_or(audio_defaults.channels),
            format: fc.audio.format.unwrap_or(audio_defaults.format),
        };

        let language = env("S2S_LANGUAGE")
            .or(fc.language)
            .filter(|l| !l.trim().is_empty());

        Ok(Self {
            session,
            audio,
            language,
        })
    }

    /// Validate the merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if any section is invalid
    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        self.audio.validate()
    }
}

fn parse_env<F, T>(env: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Config(format!("invalid {key}={raw}: {e}")))
        })
        .transpose()
}

fn parse_env_bool<F>(env: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::Config(format!("invalid {key}={raw}: expected a boolean"))),
        })
        .transpose()
}
