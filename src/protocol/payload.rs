//! Typed payload shapes for protocol messages

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::audio::{AudioConfigPatch, AudioFormat};

/// `start_listening` payload
///
/// Unknown keys are carried through to the service untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListenOptions {
    /// Recognition language for this turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Audio configuration override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioConfigPatch>,

    /// Any other listening options
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ListenOptions {
    /// Options that only set the language
    #[must_use]
    pub fn with_language(language: impl Into<String>) -> Self {
        Self {
            language: Some(language.into()),
            ..Self::default()
        }
    }
}

/// `set_language` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetLanguage {
    /// Language code (e.g. "en")
    pub language: String,
}

/// Pipeline stage a model belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// Speech-to-text
    Stt,
    /// Language model
    Lm,
    /// Text-to-speech
    Tts,
}

/// `set_model` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetModel {
    /// Stage to configure
    pub model_type: ModelType,
    /// Model identifier
    pub model_name: String,
}

/// `audio_data` payload (outbound captured audio)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioData {
    /// Base64 audio bytes
    pub audio: String,
    /// Encoding of the bytes
    pub format: AudioFormat,
}

/// `audio_chunk` payload (inbound synthesized audio)
///
/// `format` is kept as free text: an unknown format is a playback problem
/// for that one chunk, not a protocol error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioChunk {
    /// Base64 audio bytes
    pub audio: String,
    /// Encoding of the bytes, if the service sent one
    #[serde(default)]
    pub format: Option<String>,
    /// Sample rate of headerless PCM
    #[serde(default)]
    pub sample_rate: Option<u32>,
    /// Channel count of headerless PCM
    #[serde(default)]
    pub channels: Option<u16>,
    /// Set on the final chunk of an utterance
    #[serde(default)]
    pub is_last: Option<bool>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn listen_options_keep_extra_keys() {
        let options: ListenOptions =
            serde_json::from_value(json!({"language": "de", "vad": true})).unwrap();
        assert_eq!(options.language.as_deref(), Some("de"));
        assert_eq!(options.extra.get("vad"), Some(&json!(true)));

        let back = serde_json::to_value(&options).unwrap();
        assert_eq!(back, json!({"language": "de", "vad": true}));
    }

    #[test]
    fn empty_listen_options_serialize_to_empty_object() {
        let value = serde_json::to_value(ListenOptions::default()).unwrap();
        assert_eq!(value, json!({}));
    }

    #[test]
    fn set_model_wire_shape() {
        let value = serde_json::to_value(SetModel {
            model_type: ModelType::Tts,
            model_name: "xtts_v2".to_string(),
        })
        .unwrap();
        assert_eq!(value, json!({"model_type": "tts", "model_name": "xtts_v2"}));
    }

    #[test]
    fn audio_chunk_accepts_server_shape() {
        let chunk: AudioChunk =
            serde_json::from_value(json!({"audio": "AAA=", "is_last": false})).unwrap();
        assert_eq!(chunk.audio, "AAA=");
        assert!(chunk.format.is_none());
        assert_eq!(chunk.is_last, Some(false));
    }

    #[test]
    fn audio_data_wire_shape() {
        let value = serde_json::to_value(AudioData {
            audio: "AQI=".to_string(),
            format: AudioFormat::Pcm16,
        })
        .unwrap();
        assert_eq!(value, json!({"audio": "AQI=", "format": "pcm16"}));
    }
}
