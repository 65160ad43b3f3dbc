//! OpenAI-style chat-completion wire types.
//!
//! The proxy only ever touches `model`; these types decide whether a body is
//! a chat request at all. They stay loose: unknown fields are kept in
//! `extra`, and numeric sampling parameters are held as [`Number`] so `1`
//! stays `1` rather than becoming `1.0`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// A single entry of `messages[]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,

    /// Either a string or an array of content parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Request body for `/v1/chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<Number>,

    /// Everything else (`max_tokens`, `tools`, `stream_options`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
