//! # Realtime Protocol Messages
//!
//! JSON messages exchanged with the upstream conversational API, plus the
//! notifications relayed to the downstream audio client.
//!
//! ## Upstream (relay → API):
//! - `input_audio_buffer.append` with base64 audio
//! - `input_audio_buffer.commit`
//! - `response.create` asking for text only
//!
//! ## Upstream (API → relay):
//! - `input_audio_buffer.committed`, `response.created`,
//!   `response.audio_transcript.done`, `response.done`, `error`
//! - anything else is kept as [`UpstreamEvent::Unrecognized`] so it can be logged
//!
//! ## Downstream (relay → client):
//! - `{"type": "transcript", "text": ...}`
//! - `{"type": "error", "code": ..., "message": ...}` for buffering backpressure

use crate::error::RelayError;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages the relay sends to the upstream API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum UpstreamRequest {
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend {
        /// Base64 (standard alphabet, padded) encoding of the raw audio bytes
        audio: String,
    },

    #[serde(rename = "input_audio_buffer.commit")]
    AudioCommit,

    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseOptions },
}

/// Options attached to a `response.create` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseOptions {
    pub modalities: Vec<String>,
}

impl ResponseOptions {
    /// Text output only; audio synthesis is never requested.
    pub fn text_only() -> Self {
        Self {
            modalities: vec!["text".to_string()],
        }
    }
}

impl UpstreamRequest {
    /// Build an append message from raw audio bytes.
    pub fn append(audio: &[u8]) -> Self {
        UpstreamRequest::AudioAppend {
            audio: base64::engine::general_purpose::STANDARD.encode(audio),
        }
    }

    pub fn create_text_response() -> Self {
        UpstreamRequest::ResponseCreate {
            response: ResponseOptions::text_only(),
        }
    }

    /// Wire name of the message, used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamRequest::AudioAppend { .. } => "input_audio_buffer.append",
            UpstreamRequest::AudioCommit => "input_audio_buffer.commit",
            UpstreamRequest::ResponseCreate { .. } => "response.create",
        }
    }

    /// Number of raw audio bytes carried (zero for non-append messages).
    pub fn audio_bytes(&self) -> usize {
        match self {
            UpstreamRequest::AudioAppend { audio } => {
                let padding = audio.bytes().rev().take_while(|&b| b == b'=').count();
                (audio.len() / 4) * 3 - padding
            }
            _ => 0,
        }
    }

    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string(self)
            .map_err(|e| RelayError::Protocol(format!("failed to encode {}: {}", self.kind(), e)))
    }
}

/// Events received from the upstream API.
///
/// Parsing is done in two steps (JSON first, then the `type` field) so that
/// unknown event types keep their name for logging instead of failing.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    BufferCommitted,
    ResponseCreated,
    TranscriptDone { transcript: String },
    ResponseDone,
    Error { message: String },
    Unrecognized { event_type: String },
}

impl UpstreamEvent {
    /// Parse one upstream text frame.
    ///
    /// ## Errors:
    /// - Not JSON at all
    /// - JSON without a string `type` field
    /// - A transcript event without a string `transcript`
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RelayError::Protocol(format!("upstream message is not JSON: {}", e)))?;

        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::Protocol(format!("unexpected upstream message: {}", value)))?;

        let event = match event_type {
            "input_audio_buffer.committed" => UpstreamEvent::BufferCommitted,
            "response.created" => UpstreamEvent::ResponseCreated,
            "response.audio_transcript.done" => {
                let transcript = value
                    .get("transcript")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        RelayError::Protocol("transcript event without transcript text".to_string())
                    })?;
                UpstreamEvent::TranscriptDone {
                    transcript: transcript.to_string(),
                }
            }
            "response.done" => UpstreamEvent::ResponseDone,
            "error" => UpstreamEvent::Error {
                // The tracker must reset even when the error body is unusual
                message: value
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("no error message provided")
                    .to_string(),
            },
            other => UpstreamEvent::Unrecognized {
                event_type: other.to_string(),
            },
        };

        Ok(event)
    }
}

/// Notifications sent to the downstream audio client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DownstreamMessage {
    #[serde(rename = "transcript")]
    Transcript { text: String },

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl DownstreamMessage {
    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string(self)
            .map_err(|e| RelayError::Protocol(format!("failed to encode downstream message: {}", e)))
    }
}
