//! s2s link - Real-time transport client for speech-to-speech services
//!
//! This library provides the client side of a speech-to-speech session:
//! - A WebSocket session with heartbeat and bounded reconnection
//! - A JSON envelope protocol (`{"type", "data"}`) with typed payloads
//! - Microphone capture streamed as base64 audio chunks
//! - Playback of synthesized audio returned by the service
//! - An ordered event bus for everything the session observes
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      Caller                          │
//! │     connect │ start_listening │ on(event, ...)       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                     Session                          │
//! │  Heartbeat │ Reconnect │ Capture │ Playback │ Events │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │             Transport (WebSocket)                    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
pub use events::{ErrorKind, ErrorReport, EventBus, EventKind, ListenerId, SessionEvent};
pub use protocol::{ListenOptions, MessageKind, ModelType, ProtocolMessage};
pub use session::{ConnectionStatus, NOISE_GATE_BYTES, Session, SessionBuilder, SessionConfig};
pub use transport::{Connector, WsConnector};
