//! Microphone capture and speaker playback
//!
//! Capture turns microphone input into fixed-interval encoded chunks.
//! Playback decodes chunks received from the service and queues them on a
//! single output stream.

mod capture;
mod config;
mod decode;
mod device;
mod encoder;
mod playback;

pub use capture::{AudioInput, CHUNK_INTERVAL, CapturePipeline, ChunkSink, MicrophoneInput};
pub use config::{AudioConfig, AudioConfigPatch, AudioFormat, DEFAULT_SAMPLE_RATE};
pub use decode::{DecodedAudio, decode_audio, downmix, resample};
pub use encoder::{ChunkEncoder, samples_to_pcm16, samples_to_wav};
pub use playback::{
    AudioOutput, DEFAULT_CHUNK_SAMPLE_RATE, OutputFactory, PLAYBACK_SAMPLE_RATE, PlaybackPipeline,
    SpeakerOutput,
};
