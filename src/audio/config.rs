//! Audio configuration shared by capture and playback

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default capture sample rate (16kHz for speech)
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Audio encoding formats understood on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// Headerless little-endian signed 16-bit PCM
    #[default]
    Pcm16,
    /// RIFF/WAVE container around 16-bit PCM
    Wav,
    /// MPEG layer III (playback only)
    Mp3,
}

impl AudioFormat {
    /// Wire name of this format
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
        }
    }

    /// Parse a wire name (case-insensitive, accepts a few common aliases)
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pcm16" | "pcm" | "s16le" => Some(Self::Pcm16),
            "wav" | "wave" | "audio/wav" => Some(Self::Wav),
            "mp3" | "mpeg" | "audio/mpeg" => Some(Self::Mp3),
            _ => None,
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audio configuration owned by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Encoding format for captured chunks
    pub format: AudioFormat,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
            format: AudioFormat::Pcm16,
        }
    }
}

impl AudioConfig {
    /// Shallow-merge a partial update into this configuration
    pub fn merge(&mut self, patch: &AudioConfigPatch) {
        if let Some(sample_rate) = patch.sample_rate {
            self.sample_rate = sample_rate;
        }
        if let Some(channels) = patch.channels {
            self.channels = channels;
        }
        if let Some(format) = patch.format {
            self.format = format;
        }
    }

    /// Check that the configuration describes a usable stream
    ///
    /// # Errors
    ///
    /// Returns error if the sample rate is zero or the channel count is not 1 or 2
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Audio("sample rate must be non-zero".to_string()));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(Error::Audio(format!(
                "unsupported channel count: {}",
                self.channels
            )));
        }
        Ok(())
    }
}

/// Partial audio configuration, used for shallow overrides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfigPatch {
    /// Sample rate override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    /// Channel count override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    /// Format override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<AudioFormat>,
}
