//! Decoding of received audio into mono f32 samples

use std::io::Cursor;

use super::AudioFormat;
use crate::{Error, Result};

/// Decoded mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
}

/// Decode `bytes` in `format` into mono samples
///
/// `sample_rate` and `channels` describe raw PCM; WAV and MP3 carry their own.
///
/// # Errors
///
/// Returns error if the bytes are not valid for `format`
pub fn decode_audio(
    bytes: &[u8],
    format: AudioFormat,
    sample_rate: u32,
    channels: u16,
) -> Result<DecodedAudio> {
    match format {
        AudioFormat::Pcm16 => decode_pcm16(bytes, sample_rate, channels),
        AudioFormat::Wav => decode_wav(bytes),
        AudioFormat::Mp3 => decode_mp3(bytes),
    }
}

fn decode_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<DecodedAudio> {
    if channels == 0 || sample_rate == 0 {
        return Err(Error::Audio(format!(
            "invalid pcm16 layout: {sample_rate} Hz, {channels} channels"
        )));
    }
    if bytes.len() % 2 != 0 {
        return Err(Error::Audio(format!(
            "pcm16 payload has odd length {}",
            bytes.len()
        )));
    }

    let interleaved: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();

    Ok(DecodedAudio {
        samples: downmix(&interleaved, channels),
        sample_rate,
    })
}

#[allow(clippy::cast_precision_loss)]
fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let mut reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, spec.channels),
        sample_rate: spec.sample_rate,
    })
}

/// Decode MP3 bytes, averaging stereo to mono
fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or_default();
                let pcm: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                let channels = u16::try_from(frame.channels).unwrap_or(1);
                samples.extend(downmix(&pcm, channels));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Audio("no MP3 frames found".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Average interleaved frames down to mono
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 | 1 => interleaved.to_vec(),
        2 => interleaved
            .chunks(2)
            .map(|frame| f32::midpoint(frame[0], frame.get(1).copied().unwrap_or(frame[0])))
            .collect(),
        n => {
            let width = usize::from(n);
            interleaved
                .chunks(width)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        }
    }
}

/// Resample mono audio between rates
///
/// # Errors
///
/// Returns error if the resampler cannot be built or fails
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let expected = samples.len() * to_rate as usize / from_rate as usize;
    // The filter delays everything by this many output frames
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(delay + expected);

    for chunk in input.chunks(chunk_size) {
        let mut block = chunk.to_vec();
        block.resize(chunk_size, 0.0);
        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    // Flush silence until the delayed tail has come out
    while output.len() < delay + expected {
        let result = resampler
            .process(&[vec![0.0; chunk_size]], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        if result[0].is_empty() {
            break;
        }
        output.extend_from_slice(&result[0]);
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);

    Ok(output.iter().map(|&s| s as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{samples_to_pcm16, samples_to_wav};

    #[test]
    fn pcm16_decodes_little_endian() {
        let bytes = samples_to_pcm16(&[0.5, -0.5]);
        let decoded = decode_audio(&bytes, AudioFormat::Pcm16, 24_000, 1).unwrap();

        assert_eq!(decoded.sample_rate, 24_000);
        assert_eq!(decoded.samples.len(), 2);
        assert!((decoded.samples[0] - 0.5).abs() < 0.001);
        assert!((decoded.samples[1] + 0.5).abs() < 0.001);
    }

    #[test]
    fn pcm16_stereo_is_averaged() {
        let bytes = samples_to_pcm16(&[0.5, 0.0, 0.5, 0.0]);
        let decoded = decode_audio(&bytes, AudioFormat::Pcm16, 16_000, 2).unwrap();
        assert_eq!(decoded.samples.len(), 2);
        assert!((decoded.samples[0] - 0.25).abs() < 0.001);
    }

    #[test]
    fn pcm16_rejects_odd_length() {
        assert!(decode_audio(&[1, 2, 3], AudioFormat::Pcm16, 16_000, 1).is_err());
    }

    #[test]
    fn wav_carries_its_own_rate() {
        let bytes = samples_to_wav(&[0.1; 480], 48_000, 1).unwrap();
        let decoded = decode_audio(&bytes, AudioFormat::Wav, 16_000, 1).unwrap();
        assert_eq!(decoded.sample_rate, 48_000);
        assert_eq!(decoded.samples.len(), 480);
    }

    #[test]
    fn garbage_is_not_mp3() {
        assert!(decode_audio(b"definitely not audio", AudioFormat::Mp3, 0, 0).is_err());
    }

    #[test]
    fn resample_scales_length() {
        let samples = vec![0.0; 4800];
        let out = resample(&samples, 16_000, 24_000).unwrap();
        assert_eq!(out.len(), 7200);
    }

    #[test]
    fn resample_keeps_signal_at_both_ends() {
        let samples = vec![0.5; 2400];
        let out = resample(&samples, 16_000, 24_000).unwrap();
        assert_eq!(out.len(), 3600);

        let mean = |s: &[f32]| s.iter().sum::<f32>() / s.len() as f32;
        let head = mean(&out[32..232]);
        let tail = mean(&out[out.len() - 232..out.len() - 32]);
        assert!((head - 0.5).abs() < 0.05, "head mean {head}");
        assert!((tail - 0.5).abs() < 0.05, "tail mean {tail}");
        assert!(out[..64].iter().filter(|s| s.abs() < 0.01).count() < 4);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 24_000, 24_000).unwrap(), samples);
    }
}
