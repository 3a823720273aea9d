// Ollama dialect: /api/chat, NDJSON streaming terminated by `"done": true`

use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{DecodeError, StreamEvent};
use crate::server::openai_types::{
    null_as_empty, ChatCompletionRequest, ChatCompletionResponse, Usage,
};

pub(super) fn encode_request(request: &ChatCompletionRequest, model: &str, stream: bool) -> Value {
    let mut options = Map::new();
    if let Some(max_tokens) = request.max_tokens {
        options.insert("num_predict".to_string(), json!(max_tokens));
    }
    if let Some(temperature) = request.temperature {
        options.insert("temperature".to_string(), json!(temperature));
    }

    let mut body = json!({
        "model": model,
        "messages": request.messages,
        "stream": stream,
    });
    if !options.is_empty() {
        body["options"] = Value::Object(options);
    }
    body
}

#[derive(Deserialize)]
struct ChatLine {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<LineMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct LineMessage {
    #[serde(default, deserialize_with = "null_as_empty")]
    content: String,
}

pub(super) fn decode_response(body: &[u8], model: &str) -> Result<ChatCompletionResponse, DecodeError> {
    let line: ChatLine = serde_json::from_slice(body)?;
    if let Some(err) = line.error {
        return Err(DecodeError(err));
    }
    let message = line
        .message
        .ok_or_else(|| DecodeError("response has no message".to_string()))?;
    let usage = match (line.prompt_eval_count, line.eval_count) {
        (Some(prompt), Some(completion)) => Some(Usage::new(prompt, completion)),
        _ => None,
    };
    let model = line
        .model
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| model.to_string());
    Ok(ChatCompletionResponse::single(model, message.content, usage))
}

pub(super) fn decode_stream_line(line: &str) -> Result<Vec<StreamEvent>, DecodeError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Vec::new());
    }

    let chunk: ChatLine = serde_json::from_str(line)?;
    if let Some(err) = chunk.error {
        return Err(DecodeError(err));
    }

    let mut events = Vec::new();
    if let Some(message) = chunk.message.filter(|m| !m.content.is_empty()) {
        events.push(StreamEvent::content(message.content));
    }
    if chunk.done {
        events.push(StreamEvent::finish(
            chunk.done_reason.unwrap_or_else(|| "stop".to_string()),
        ));
        events.push(StreamEvent::Done);
    }
    Ok(events)
}
