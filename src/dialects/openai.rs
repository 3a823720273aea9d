// OpenAI-compatible dialect: JSON bodies, SSE `data:` streaming, `[DONE]` terminator

use serde::Deserialize;
use serde_json::{json, Value};

use super::{DecodeError, StreamEvent};
use crate::server::openai_types::{
    completion_id, ChatCompletionRequest, ChatCompletionResponse, Choice, Usage,
};

pub(super) fn encode_request(request: &ChatCompletionRequest, model: &str, stream: bool) -> Value {
    let mut body = json!({
        "model": model,
        "messages": request.messages,
        "stream": stream,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

/// Backends are not strict about the envelope; only `choices` is required.
#[derive(Deserialize)]
struct RawResponse {
    id: Option<String>,
    created: Option<i64>,
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

pub(super) fn decode_response(body: &[u8], model: &str) -> Result<ChatCompletionResponse, DecodeError> {
    let raw: RawResponse = serde_json::from_slice(body)?;
    if raw.choices.is_empty() {
        return Err(DecodeError("response contained no choices".to_string()));
    }
    Ok(ChatCompletionResponse {
        id: raw.id.unwrap_or_else(completion_id),
        object: "chat.completion".to_string(),
        created: raw.created.unwrap_or_else(|| chrono::Utc::now().timestamp()),
        model: raw
            .model
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| model.to_string()),
        choices: raw.choices,
        usage: raw.usage,
    })
}

pub(super) fn decode_stream_line(line: &str) -> Result<Vec<StreamEvent>, DecodeError> {
    let line = line.trim();
    // Blank separators, comments and non-data fields carry nothing
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(Vec::new());
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(vec![StreamEvent::Done]);
    }

    let chunk: Value = serde_json::from_str(data)?;
    if let Some(err) = chunk.get("error") {
        return Err(DecodeError(format!("backend stream error: {}", err)));
    }

    let events = chunk
        .get("choices")
        .and_then(Value::as_array)
        .map(|choices| {
            choices
                .iter()
                .map(|choice| {
                    let delta = choice.get("delta");
                    let field = |name: &str| {
                        delta
                            .and_then(|d| d.get(name))
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    };
                    StreamEvent::Delta {
                        role: field("role"),
                        content: field("content"),
                        finish_reason: choice
                            .get("finish_reason")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::openai_types::ChatMessage;

    #[test]
    fn test_encode_preserves_stream_flag_and_options() {
        let request = ChatCompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            max_tokens: Some(64),
            ..Default::default()
        };
        let body = encode_request(&request, "llama3.2", true);
        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 64);
        assert!(body.get("temperature").is_none());
        assert!(body.get("service").is_none());
    }

    #[test]
    fn test_decode_minimal_response() {
        let body = br#"{"choices": [{"index": 0, "message": {"role": "assistant", "content": "4"}}]}"#;
        let response = decode_response(body, "fallback").unwrap();
        assert_eq!(response.model, "fallback");
        assert_eq!(response.content(), Some("4"));
        assert!(response.id.starts_with("chatcmpl-"));
    }

    #[test]
    fn test_decode_null_content() {
        let body = br#"{"choices": [{"index": 0, "message": {"role": "assistant", "content": null}, "finish_reason": "stop"}]}"#;
        let response = decode_response(body, "m").unwrap();
        assert_eq!(response.content(), Some(""));
    }

    #[test]
    fn test_decode_empty_choices_is_an_error() {
        assert!(decode_response(br#"{"choices": []}"#, "m").is_err());
    }

    #[test]
    fn test_stream_lines() {
        assert!(decode_stream_line("").unwrap().is_empty());
        assert!(decode_stream_line(": keep-alive").unwrap().is_empty());
        assert_eq!(decode_stream_line("data: [DONE]").unwrap(), vec![StreamEvent::Done]);

        let events = decode_stream_line(
            r#"data: {"choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(events, vec![StreamEvent::content("Hel")]);
    }

    #[test]
    fn test_stream_error_payload() {
        assert!(decode_stream_line(r#"data: {"error": {"message": "overloaded"}}"#).is_err());
        assert!(decode_stream_line("data: {not json").is_err());
    }
}
