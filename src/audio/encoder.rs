//! Encoding of captured samples into transmittable chunks

use super::{AudioConfig, AudioFormat};
use crate::{Error, Result};

/// Encodes interleaved f32 samples in the configured format
#[derive(Debug, Clone, Copy)]
pub struct ChunkEncoder {
    config: AudioConfig,
}

impl ChunkEncoder {
    /// Create an encoder for `config`
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the format cannot be produced
    pub fn new(config: AudioConfig) -> Result<Self> {
        config.validate()?;
        if config.format == AudioFormat::Mp3 {
            return Err(Error::Audio(
                "mp3 is a playback-only format and cannot be captured".to_string(),
            ));
        }
        Ok(Self { config })
    }

    /// Encode one chunk
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn encode(&self, samples: &[f32]) -> Result<Vec<u8>> {
        match self.config.format {
            AudioFormat::Pcm16 => Ok(samples_to_pcm16(samples)),
            AudioFormat::Wav => {
                samples_to_wav(samples, self.config.sample_rate, self.config.channels)
            }
            AudioFormat::Mp3 => Err(Error::Audio("mp3 encoding not supported".to_string())),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_i16(sample: f32) -> i16 {
    // Convert f32 [-1.0, 1.0] to i16
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Convert f32 samples to little-endian 16-bit PCM bytes
#[must_use]
pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| to_i16(s).to_le_bytes())
        .collect()
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(to_i16(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
