//! Wire payloads for OpenAI-compatible chat completion endpoints.
//!
//! Outbound types serialize the request body; inbound types are lenient
//! deserializers for both event-stream chunks and non-streaming completions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ApiMessage {
    pub role: String,
    pub content: String,
}

impl ApiMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Sampling parameters forwarded verbatim; unset values are omitted from the body.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SamplingParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    pub stream: bool,
    #[serde(flatten)]
    pub params: SamplingParams,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ApiMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: true,
            params: SamplingParams::default(),
        }
    }

    pub fn with_params(mut self, params: SamplingParams) -> Self {
        self.params = params;
        self
    }

    pub fn streaming(&self, stream: bool) -> Self {
        let mut request = self.clone();
        request.stream = stream;
        request
    }
}

/// One decoded JSON frame of a streamed response.
#[derive(Debug, Deserialize, Default)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ChunkMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub timestamp: Option<serde_json::Number>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Message metadata a provider may attach to a frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMeta {
    pub id: Option<String>,
    pub role: Option<String>,
    pub timestamp: Option<i64>,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

impl MessageMeta {
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.role.is_none()
            && self.timestamp.is_none()
            && self.model.is_none()
            && self.finish_reason.is_none()
    }
}

impl From<&ChunkMessage> for MessageMeta {
    fn from(message: &ChunkMessage) -> Self {
        let timestamp = message
            .timestamp
            .as_ref()
            .and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)));
        Self {
            id: message.id.clone().filter(|id| !id.is_empty()),
            role: message.role.clone(),
            timestamp,
            model: message.model.clone(),
            finish_reason: message.finish_reason.clone(),
        }
    }
}

/// Extract the first choice's `message.content` from a non-streaming completion.
pub fn completion_text(raw: &Value) -> String {
    raw.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
