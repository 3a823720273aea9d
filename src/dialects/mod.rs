// Backend dialects
//
// Each backend speaks one native API. A dialect knows that API's probe and
// completion paths and translates between it and the canonical
// OpenAI-compatible types in `server::openai_types`. All translators are pure.

pub mod legacy;
pub mod ollama;
pub mod openai;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::server::openai_types::{ChatCompletionRequest, ChatCompletionResponse, Delta};

/// Native API spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// OpenAI-compatible `/v1/chat/completions` with SSE streaming
    #[default]
    OpenAi,
    /// Ollama `/api/chat` with NDJSON streaming
    Ollama,
    /// `zeroconfai-v1` prompt completion, no native streaming
    Legacy,
}

/// One decoded unit of a backend stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta {
        role: Option<String>,
        content: Option<String>,
        finish_reason: Option<String>,
    },
    /// The backend signalled the end of the stream
    Done,
}

impl StreamEvent {
    pub fn content(text: impl Into<String>) -> Self {
        StreamEvent::Delta {
            role: None,
            content: Some(text.into()),
            finish_reason: None,
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        StreamEvent::Delta {
            role: None,
            content: None,
            finish_reason: Some(reason.into()),
        }
    }

    /// Canonical delta for a `Delta` event.
    pub fn to_delta(&self) -> Option<(Delta, Option<String>)> {
        match self {
            StreamEvent::Delta {
                role,
                content,
                finish_reason,
            } => Some((
                Delta {
                    role: role.clone(),
                    content: content.clone(),
                },
                finish_reason.clone(),
            )),
            StreamEvent::Done => None,
        }
    }
}

/// A backend body that could not be translated.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct DecodeError(pub String);

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError(err.to_string())
    }
}

impl Dialect {
    /// Parse an advertisement's `api_format` value.
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai-compatible" | "openai_compatible" | "openai-v1" => {
                Some(Dialect::OpenAi)
            }
            "ollama" => Some(Dialect::Ollama),
            "zeroconfai-v1" | "legacy" => Some(Dialect::Legacy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::OpenAi => "openai",
            Dialect::Ollama => "ollama",
            Dialect::Legacy => "zeroconfai-v1",
        }
    }

    pub fn liveness_path(&self) -> &'static str {
        match self {
            Dialect::OpenAi => "/v1/health",
            Dialect::Ollama => "/api/version",
            Dialect::Legacy => "/health",
        }
    }

    /// Model listing path, if the dialect has one.
    pub fn models_path(&self) -> Option<&'static str> {
        match self {
            Dialect::OpenAi => Some("/v1/models"),
            Dialect::Ollama => Some("/api/tags"),
            Dialect::Legacy => None,
        }
    }

    pub fn completion_path(&self) -> &'static str {
        match self {
            Dialect::OpenAi => "/v1/chat/completions",
            Dialect::Ollama => "/api/chat",
            Dialect::Legacy => "/v1/complete",
        }
    }

    pub fn supports_streaming(&self) -> bool {
        !matches!(self, Dialect::Legacy)
    }

    /// Native request body for `request`, with the model already resolved.
    pub fn encode_request(&self, request: &ChatCompletionRequest, model: &str, stream: bool) -> Value {
        match self {
            Dialect::OpenAi => openai::encode_request(request, model, stream),
            Dialect::Ollama => ollama::encode_request(request, model, stream),
            Dialect::Legacy => legacy::encode_request(request, model),
        }
    }

    /// Canonical response for a buffered native body.
    pub fn decode_response(&self, body: &[u8], model: &str) -> Result<ChatCompletionResponse, DecodeError> {
        match self {
            Dialect::OpenAi => openai::decode_response(body, model),
            Dialect::Ollama => ollama::decode_response(body, model),
            Dialect::Legacy => legacy::decode_response(body, model),
        }
    }

    /// Decode one complete line of a native stream. Blank and comment lines yield nothing.
    pub fn decode_stream_line(&self, line: &str) -> Result<Vec<StreamEvent>, DecodeError> {
        match self {
            Dialect::OpenAi => openai::decode_stream_line(line),
            Dialect::Ollama => ollama::decode_stream_line(line),
            Dialect::Legacy => Err(DecodeError(
                "zeroconfai-v1 backends do not stream".to_string(),
            )),
        }
    }

    /// Model identifiers from a capability-listing body.
    pub fn parse_models(&self, body: &[u8]) -> Result<Vec<String>, DecodeError> {
        let value: Value = serde_json::from_slice(body)?;
        let list = value
            .get("models")
            .or_else(|| value.get("data"))
            .and_then(Value::as_array)
            .ok_or_else(|| DecodeError("model listing has no 'models' or 'data' array".into()))?;

        Ok(list.iter().filter_map(model_id).collect())
    }
}

/// Identifier of one listing entry: a bare string or an object with `id`/`name`/`model`.
fn model_id(entry: &Value) -> Option<String> {
    let id = match entry {
        Value::String(s) => Some(s.as_str()),
        Value::Object(obj) => ["id", "name", "model"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str)),
        _ => None,
    }?;
    let id = id.trim();
    (!id.is_empty()).then(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_parsing() {
        assert_eq!(Dialect::from_hint("OpenAI"), Some(Dialect::OpenAi));
        assert_eq!(Dialect::from_hint("ollama"), Some(Dialect::Ollama));
        assert_eq!(Dialect::from_hint("zeroconfai-v1"), Some(Dialect::Legacy));
        assert_eq!(Dialect::from_hint("grpc"), None);
    }

    #[test]
    fn test_parse_models_accepts_both_listing_shapes() {
        let dialect = Dialect::OpenAi;
        let saturn = br#"{"models": [{"id": "llama3.2"}, {"id": "mistral"}]}"#;
        assert_eq!(dialect.parse_models(saturn).unwrap(), vec!["llama3.2", "mistral"]);

        let openai = br#"{"object": "list", "data": [{"id": "gpt-4o-mini", "object": "model"}]}"#;
        assert_eq!(dialect.parse_models(openai).unwrap(), vec!["gpt-4o-mini"]);
    }

    #[test]
    fn test_parse_models_ollama_tags() {
        let tags = br#"{"models": [{"name": "llama3.2:latest", "size": 1}, {"name": ""}]}"#;
        assert_eq!(
            Dialect::Ollama.parse_models(tags).unwrap(),
            vec!["llama3.2:latest"]
        );
    }

    #[test]
    fn test_parse_models_rejects_unexpected_shape() {
        assert!(Dialect::OpenAi.parse_models(br#"{"status": "ok"}"#).is_err());
        assert!(Dialect::OpenAi.parse_models(b"not json").is_err());
    }

    #[test]
    fn test_legacy_has_no_listing_or_streaming() {
        assert!(Dialect::Legacy.models_path().is_none());
        assert!(!Dialect::Legacy.supports_streaming());
        assert!(Dialect::Legacy.decode_stream_line("data: x").is_err());
    }
}
