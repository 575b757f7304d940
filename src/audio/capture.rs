//! Audio capture from microphone
//!
//! [`CapturePipeline`] drains an [`AudioInput`] every [`CHUNK_INTERVAL`],
//! encodes what it collected, and hands each chunk to a sink. The default
//! input is [`MicrophoneInput`], backed by `cpal`.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cpal::SampleRate;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::time::{Instant, MissedTickBehavior};

use super::device::{OPEN_TIMEOUT, supports_f32, wait_ready};
use super::{AudioConfig, ChunkEncoder};
use crate::{Error, Result};

/// How much audio goes into one chunk
pub const CHUNK_INTERVAL: Duration = Duration::from_millis(100);

/// Receives each encoded chunk
pub type ChunkSink = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// A source of captured samples
pub trait AudioInput: Send {
    /// Acquire the device and start buffering interleaved f32 samples
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be acquired with `config`
    fn open(&mut self, config: &AudioConfig) -> Result<()>;

    /// Take everything buffered since the last call
    fn take_samples(&mut self) -> Vec<f32>;

    /// Release the device; safe to call when not open
    fn close(&mut self);

    /// Whether the device is currently held
    fn is_open(&self) -> bool;
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Streams encoded chunks from an input while running
pub struct CapturePipeline {
    input: Arc<Mutex<Box<dyn AudioInput>>>,
    ticker: Option<tokio::task::JoinHandle<()>>,
}

impl CapturePipeline {
    /// Create a stopped pipeline over `input`
    #[must_use]
    pub fn new(input: Box<dyn AudioInput>) -> Self {
        Self {
            input: Arc::new(Mutex::new(input)),
            ticker: None,
        }
    }

    /// Start capturing; a no-op if already running
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the encoder cannot be built or the input cannot be opened
    pub fn start(&mut self, config: &AudioConfig, sink: ChunkSink) -> Result<()> {
        if self.ticker.is_some() {
            return Ok(());
        }

        let encoder = ChunkEncoder::new(*config)?;
        lock(&self.input).open(config)?;

        let input = Arc::clone(&self.input);
        self.ticker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + CHUNK_INTERVAL, CHUNK_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let samples = lock(&input).take_samples();
                if samples.is_empty() {
                    continue;
                }
                match encoder.encode(&samples) {
                    Ok(chunk) => sink(chunk),
                    Err(e) => tracing::warn!(error = %e, "failed to encode audio chunk"),
                }
            }
        }));

        tracing::debug!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            format = %config.format,
            "audio capture started"
        );
        Ok(())
    }

    /// Stop capturing and release the input; idempotent
    pub fn stop(&mut self) {
        let was_running = self.ticker.is_some();
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        lock(&self.input).close();
        if was_running {
            tracing::debug!("audio capture stopped");
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.ticker.is_some()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CapturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturePipeline")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Captures audio from the default input device
///
/// The `cpal` stream is owned by a dedicated thread, since streams cannot
/// move between threads on every platform. Closing only signals that
/// thread; the caller never waits for the stream to be torn down.
#[derive(Default)]
pub struct MicrophoneInput {
    buffer: Arc<Mutex<Vec<f32>>>,
    stop: Option<std_mpsc::Sender<()>>,
}

impl MicrophoneInput {
    /// Create an input; the device is not touched until [`AudioInput::open`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioInput for MicrophoneInput {
    fn open(&mut self, config: &AudioConfig) -> Result<()> {
        if self.stop.is_some() {
            return Ok(());
        }

        // A stream from an earlier open may still be winding down; give
        // this one its own buffer
        self.buffer = Arc::new(Mutex::new(Vec::new()));
        let config = *config;
        let buffer = Arc::clone(&self.buffer);
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("s2s-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(&config, buffer) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Hold the stream until close() or the input is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        wait_ready(&ready_rx, OPEN_TIMEOUT)?;
        self.stop = Some(stop_tx);
        Ok(())
    }

    fn take_samples(&mut self) -> Vec<f32> {
        std::mem::take(&mut *lock(&self.buffer))
    }

    fn close(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        lock(&self.buffer).clear();
    }

    fn is_open(&self) -> bool {
        self.stop.is_some()
    }
}

impl Drop for MicrophoneInput {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_input_stream(config: &AudioConfig, buffer: Arc<Mutex<Vec<f32>>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let rate = SampleRate(config.sample_rate);
    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| supports_f32(c, config.channels, rate))
        .ok_or_else(|| Error::Audio("no suitable f32 input config found".to_string()))?;

    let stream_config = supported_config.with_sample_rate(rate).config();

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate = config.sample_rate,
        channels = stream_config.channels,
        "audio capture initialized"
    );

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                lock(&buffer).extend_from_slice(data);
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::audio::AudioFormat;

    /// Input that yields a fixed block of samples on every drain
    struct SteadyInput {
        open: bool,
        block: usize,
    }

    impl AudioInput for SteadyInput {
        fn open(&mut self, _config: &AudioConfig) -> Result<()> {
            self.open = true;
            Ok(())
        }

        fn take_samples(&mut self) -> Vec<f32> {
            vec![0.25; self.block]
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    fn counting_sink() -> (Arc<AtomicUsize>, ChunkSink) {
        let count = Arc::new(AtomicUsize::new(0));
        let sink_count = Arc::clone(&count);
        let sink: ChunkSink = Arc::new(move |chunk: Vec<u8>| {
            assert_eq!(chunk.len(), 3200);
            sink_count.fetch_add(1, Ordering::SeqCst);
        });
        (count, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn emits_one_chunk_per_interval() {
        let mut pipeline = CapturePipeline::new(Box::new(SteadyInput {
            open: false,
            block: 1600,
        }));
        let (count, sink) = counting_sink();

        pipeline.start(&AudioConfig::default(), sink).unwrap();
        tokio::time::sleep(CHUNK_INTERVAL * 3 + Duration::from_millis(10)).await;
        pipeline.stop();

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn start_fails_for_uncapturable_format() {
        let mut pipeline = CapturePipeline::new(Box::new(SteadyInput {
            open: false,
            block: 1,
        }));
        let (_, sink) = counting_sink();
        let config = AudioConfig {
            format: AudioFormat::Mp3,
            ..AudioConfig::default()
        };

        assert!(pipeline.start(&config, sink).is_err());
        assert!(!pipeline.is_running());
    }

    #[test]
    fn close_signals_stream_thread_without_waiting() {
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let mut input = MicrophoneInput {
            buffer: Arc::new(Mutex::new(vec![0.5; 16])),
            stop: Some(stop_tx),
        };
        assert!(input.is_open());

        input.close();

        assert!(!input.is_open());
        assert!(stop_rx.try_recv().is_ok());
        assert!(input.take_samples().is_empty());
    }

    #[test]
    fn stop_without_start_is_harmless() {
        let mut pipeline = CapturePipeline::new(Box::new(MicrophoneInput::new()));
        pipeline.stop();
        pipeline.stop();
        assert!(!pipeline.is_running());
    }
}
