//! Wire types for the live conversational endpoint
//!
//! The endpoint speaks JSON over a bidirectional stream: one connect
//! configuration on open, then media frames outbound and `serverContent`
//! events inbound. No other module reads these shapes directly — the
//! transport is the only producer/consumer.

use serde::{Deserialize, Serialize};

use crate::audio::capture::AudioFrame;

/// Audio response modality requested at connect time
pub const MODALITY_AUDIO: &str = "AUDIO";

/// Empty transcription block — presence enables live transcription
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TranscriptionConfig {}

/// One-time connect configuration, sent as the first outbound message
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectConfig {
    /// Desired response modalities (audio for a voice session)
    pub response_modalities: Vec<String>,

    /// Enable live transcription of user audio
    pub input_audio_transcription: TranscriptionConfig,

    /// Enable live transcription of synthesized audio
    pub output_audio_transcription: TranscriptionConfig,

    /// Persona, behavior rules, and the action-command protocol
    pub system_instruction: String,
}

impl ConnectConfig {
    /// Build an audio-modality configuration with the given instruction
    #[must_use]
    pub fn audio(system_instruction: String) -> Self {
        Self {
            response_modalities: vec![MODALITY_AUDIO.to_string()],
            input_audio_transcription: TranscriptionConfig {},
            output_audio_transcription: TranscriptionConfig {},
            system_instruction,
        }
    }
}

/// Outbound realtime media message wrapping one captured frame
#[derive(Debug, Clone, Serialize)]
pub struct MediaMessage {
    /// The encoded audio frame
    pub media: AudioFrame,
}

/// Inbound server event
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvent {
    /// Streamed content for the current turn, if any
    pub server_content: Option<ServerContent>,
}

/// Streamed turn content
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    /// Partial transcript of what the user is saying
    pub input_transcription: Option<TranscriptionDelta>,

    /// Partial transcript of what the model is saying
    pub output_transcription: Option<TranscriptionDelta>,

    /// The model's turn is complete
    #[serde(default)]
    pub turn_complete: bool,

    /// The user spoke while the model was still playing (barge-in)
    #[serde(default)]
    pub interrupted: bool,

    /// Model turn payload carrying inline audio
    pub model_turn: Option<ModelTurn>,
}

/// A partial transcript token
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionDelta {
    /// The text delta to append
    #[serde(default)]
    pub text: String,
}

/// Model turn content parts
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    /// Content parts; audio arrives as inline data on the first part
    #[serde(default)]
    pub parts: Vec<ContentPart>,
}

/// One content part of a model turn
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPart {
    /// Inline binary payload
    pub inline_data: Option<InlineData>,
}

/// Inline base64 payload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    /// Base64-encoded bytes
    #[serde(default)]
    pub data: String,

    /// Payload MIME type
    pub mime_type: Option<String>,
}

impl ServerEvent {
    /// Base64 audio chunk carried by this event, if any
    #[must_use]
    pub fn audio_data(&self) -> Option<&str> {
        self.server_content
            .as_ref()?
            .model_turn
            .as_ref()?
            .parts
            .first()?
            .inline_data
            .as_ref()
            .map(|d| d.data.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_config_serializes_camel_case() {
        let config = ConnectConfig::audio("be brief".to_string());
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["responseModalities"][0], "AUDIO");
        assert_eq!(json["systemInstruction"], "be brief");
        assert!(json["inputAudioTranscription"].is_object());
        assert!(json["outputAudioTranscription"].is_object());
    }

    #[test]
    fn server_event_parses_transcription_deltas() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"serverContent":{"inputTranscription":{"text":"hi "},"outputTranscription":{"text":"hello"}}}"#,
        )
        .unwrap();
        let content = event.server_content.unwrap();
        assert_eq!(content.input_transcription.unwrap().text, "hi ");
        assert_eq!(content.output_transcription.unwrap().text, "hello");
        assert!(!content.turn_complete);
        assert!(!content.interrupted);
    }

    #[test]
    fn server_event_exposes_inline_audio() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"data":"AAAA","mimeType":"audio/pcm;rate=24000"}}]}}}"#,
        )
        .unwrap();
        assert_eq!(event.audio_data(), Some("AAAA"));
    }

    #[test]
    fn server_event_tolerates_unknown_shape() {
        let event: ServerEvent = serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap();
        assert!(event.server_content.is_none());
        assert!(event.audio_data().is_none());
    }
}
