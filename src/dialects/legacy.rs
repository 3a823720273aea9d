// zeroconfai-v1 dialect: flattened prompt to /v1/complete, no native streaming

use serde::Deserialize;
use serde_json::{json, Value};

use super::DecodeError;
use crate::server::openai_types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Usage};

const DEFAULT_MAX_TOKENS: u32 = 200;
const DEFAULT_TEMPERATURE: f32 = 0.7;

pub(super) fn encode_request(request: &ChatCompletionRequest, model: &str) -> Value {
    json!({
        "prompt": flatten_prompt(&request.messages),
        "model": model,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "temperature": request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
    })
}

/// A lone user message is sent as-is; conversations become a role-labelled transcript.
fn flatten_prompt(messages: &[ChatMessage]) -> String {
    if let [only] = messages {
        if only.role == "user" {
            return only.content.clone();
        }
    }

    let mut prompt = String::new();
    for message in messages {
        let label = match message.role.as_str() {
            "system" => "System",
            "assistant" => "Assistant",
            _ => "User",
        };
        prompt.push_str(label);
        prompt.push_str(": ");
        prompt.push_str(&message.content);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Assistant:");
    prompt
}

#[derive(Deserialize)]
struct CompleteResponse {
    text: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    tokens_used: Option<u32>,
}

pub(super) fn decode_response(body: &[u8], model: &str) -> Result<ChatCompletionResponse, DecodeError> {
    let raw: CompleteResponse = serde_json::from_slice(body)?;
    let model = raw
        .model
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| model.to_string());
    let usage = raw.tokens_used.map(|used| Usage::new(0, used));
    Ok(ChatCompletionResponse::single(model, raw.text, usage))
}
