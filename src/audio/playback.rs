//! Audio playback to speakers

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use cpal::SampleRate;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::device::{OPEN_TIMEOUT, supports_f32, wait_ready};
use super::{AudioFormat, decode_audio, resample};
use crate::protocol::AudioChunk;
use crate::{Error, Result, codec};

/// Sample rate for playback (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Rate assumed for raw PCM chunks that do not state one
pub const DEFAULT_CHUNK_SAMPLE_RATE: u32 = 24000;

/// A sink for decoded mono samples
pub trait AudioOutput: Send {
    /// Rate samples must be delivered at
    fn sample_rate(&self) -> u32;

    /// Queue mono samples behind anything already playing
    ///
    /// # Errors
    ///
    /// Returns error if the device is no longer usable
    fn enqueue(&mut self, samples: Vec<f32>) -> Result<()>;
}

/// Creates the output on first use
pub type OutputFactory = Box<dyn Fn() -> Result<Box<dyn AudioOutput>> + Send + Sync>;

/// Decodes received chunks and feeds them to a lazily created output
pub struct PlaybackPipeline {
    factory: OutputFactory,
    output: Option<Box<dyn AudioOutput>>,
}

impl PlaybackPipeline {
    /// Create a pipeline; `factory` runs on the first playable chunk
    #[must_use]
    pub fn new(factory: OutputFactory) -> Self {
        Self {
            factory,
            output: None,
        }
    }

    /// Pipeline over the default output device
    #[must_use]
    pub fn speaker() -> Self {
        Self::new(Box::new(|| {
            let output: Box<dyn AudioOutput> = Box::new(SpeakerOutput::open()?);
            Ok(output)
        }))
    }

    /// Decode one chunk and queue it
    ///
    /// Chunks without a format are accepted and not played.
    ///
    /// # Errors
    ///
    /// Returns error if the chunk cannot be decoded or played
    pub fn handle_chunk(&mut self, chunk: &AudioChunk) -> Result<()> {
        let bytes = codec::decode(&chunk.audio)?;

        let Some(format) = chunk.format.as_deref() else {
            tracing::trace!(bytes = bytes.len(), "audio chunk without format, not played");
            return Ok(());
        };
        let format = AudioFormat::parse(format)
            .ok_or_else(|| Error::Audio(format!("unsupported audio format: {format}")))?;

        let decoded = decode_audio(
            &bytes,
            format,
            chunk.sample_rate.unwrap_or(DEFAULT_CHUNK_SAMPLE_RATE),
            chunk.channels.unwrap_or(1),
        )?;
        if decoded.samples.is_empty() {
            return Ok(());
        }

        if self.output.is_none() {
            self.output = Some((self.factory)()?);
            tracing::debug!("audio output opened");
        }
        let Some(output) = self.output.as_mut() else {
            return Err(Error::Audio("audio output unavailable".to_string()));
        };

        let samples = resample(&decoded.samples, decoded.sample_rate, output.sample_rate())?;
        tracing::trace!(samples = samples.len(), %format, "queued audio chunk");
        output.enqueue(samples)
    }

    /// Check if the output has been created
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.output.is_some()
    }

    /// Release the output; the next chunk opens it again
    pub fn close(&mut self) {
        if self.output.take().is_some() {
            tracing::debug!("audio output closed");
        }
    }
}

impl std::fmt::Debug for PlaybackPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackPipeline")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Plays audio to the default output device
///
/// One stream stays open for the lifetime of the value and plays whatever
/// is queued, emitting silence while the queue is empty. Dropping the value
/// signals the stream thread and returns without joining it.
pub struct SpeakerOutput {
    queue: Arc<Mutex<VecDeque<f32>>>,
    stop: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl SpeakerOutput {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open() -> Result<Self> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let stream_queue = Arc::clone(&queue);
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("s2s-playback".to_string())
            .spawn(move || {
                let stream = match build_output_stream(stream_queue) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                let _ = stop_rx.recv();
                drop(stream);
            })?;

        wait_ready(&ready_rx, OPEN_TIMEOUT)?;
        Ok(Self {
            queue,
            stop: stop_tx,
            thread,
        })
    }
}

impl AudioOutput for SpeakerOutput {
    fn sample_rate(&self) -> u32 {
        PLAYBACK_SAMPLE_RATE
    }

    fn enqueue(&mut self, samples: Vec<f32>) -> Result<()> {
        if self.thread.is_finished() {
            return Err(Error::Audio("playback stream has stopped".to_string()));
        }
        lock(&self.queue).extend(samples);
        Ok(())
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        let _ = self.stop.send(());
    }
}

fn build_output_stream(queue: Arc<Mutex<VecDeque<f32>>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let rate = SampleRate(PLAYBACK_SAMPLE_RATE);
    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| supports_f32(c, 1, rate))
        .or_else(|| {
            // Fallback: try stereo
            device
                .supported_output_configs()
                .ok()?
                .find(|c| supports_f32(c, 2, rate))
        })
        .ok_or_else(|| Error::Audio("no suitable f32 output config found".to_string()))?;

    let config = supported_config.with_sample_rate(rate).config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate = PLAYBACK_SAMPLE_RATE,
        channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut queue = lock(&queue);
                for frame in data.chunks_mut(channels) {
                    let sample = queue.pop_front().unwrap_or(0.0);
                    frame.fill(sample);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}
