//! Wire protocol between the client and the speech service
//!
//! Every text frame carries one JSON envelope `{"type": <kind>, "data": <payload>}`.
//! Kinds the client does not recognise are surfaced as [`Inbound::Unknown`]
//! rather than failing the parse, so new server messages never break a session.

mod payload;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use payload::{AudioChunk, AudioData, ListenOptions, ModelType, SetLanguage, SetModel};

use crate::{Error, Result};

/// Protocol message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Ask the service to begin a listening turn
    StartListening,
    /// Ask the service to end the listening turn
    StopListening,
    /// Change the recognition language
    SetLanguage,
    /// Change one of the pipeline models
    SetModel,
    /// Captured microphone audio
    AudioData,
    /// Recognised speech text
    Transcription,
    /// Generated response text
    Response,
    /// Synthesized audio for playback
    AudioChunk,
    /// Service status report
    Status,
    /// Error report (either direction)
    Error,
    /// Liveness check
    Ping,
    /// Liveness acknowledgement
    Pong,
}

impl MessageKind {
    /// All kinds, in protocol table order
    pub const ALL: [Self; 12] = [
        Self::StartListening,
        Self::StopListening,
        Self::SetLanguage,
        Self::SetModel,
        Self::AudioData,
        Self::Transcription,
        Self::Response,
        Self::AudioChunk,
        Self::Status,
        Self::Error,
        Self::Ping,
        Self::Pong,
    ];

    /// Wire name of this kind
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StartListening => "start_listening",
            Self::StopListening => "stop_listening",
            Self::SetLanguage => "set_language",
            Self::SetModel => "set_model",
            Self::AudioData => "audio_data",
            Self::Transcription => "transcription",
            Self::Response => "response",
            Self::AudioChunk => "audio_chunk",
            Self::Status => "status",
            Self::Error => "error",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }

    /// Parse a wire name
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol message: a kind and its payload
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolMessage {
    /// Message kind
    pub kind: MessageKind,
    /// Kind-specific payload
    pub data: Value,
}

impl ProtocolMessage {
    /// Create a message from a kind and raw payload
    #[must_use]
    pub const fn new(kind: MessageKind, data: Value) -> Self {
        Self { kind, data }
    }

    /// Create a message with an empty object payload
    #[must_use]
    pub fn empty(kind: MessageKind) -> Self {
        Self::new(kind, Value::Object(serde_json::Map::new()))
    }

    /// Create a message from a typed payload
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be serialized
    pub fn with_payload<T: Serialize>(kind: MessageKind, payload: &T) -> Result<Self> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    /// Serialize into a text frame
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be serialized
    pub fn to_frame(&self) -> Result<String> {
        let envelope = OutboundEnvelope {
            kind: self.kind.as_str(),
            data: &self.data,
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Deserialize the payload into a typed shape
    ///
    /// # Errors
    ///
    /// Returns error if the payload does not match `T`
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.data)?)
    }
}

/// A parsed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A message of a known kind
    Known(ProtocolMessage),
    /// A well-formed envelope with a kind this client does not know
    Unknown {
        /// Kind as sent by the peer
        kind: String,
        /// Raw payload
        data: Value,
    },
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a Value,
}

#[derive(Deserialize)]
struct InboundEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Parse one text frame
///
/// # Errors
///
/// Returns error if the frame is not JSON or has no string `type` field
pub fn parse_frame(text: &str) -> Result<Inbound> {
    let envelope: InboundEnvelope = serde_json::from_str(text)
        .map_err(|e| Error::Protocol(format!("invalid envelope: {e}")))?;

    Ok(match MessageKind::parse(&envelope.kind) {
        Some(kind) => Inbound::Known(ProtocolMessage::new(kind, envelope.data)),
        None => Inbound::Unknown {
            kind: envelope.kind,
            data: envelope.data,
        },
    })
}
