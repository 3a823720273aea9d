// Request router
//
// Resolves a target through the selection policy, translates the canonical
// request into the target's dialect, forwards it with a timeout, and
// translates the answer back. One re-selection is allowed when the target
// cannot be reached; a backend that answered with an error is never retried.

pub mod stream;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::RouterConfig;
use crate::error::{RouteError, RouteResult};
use crate::registry::{Registry, ServiceDescriptor};
use crate::selection::select_excluding;
use crate::server::openai_types::{ChatCompletionRequest, ChatCompletionResponse};
use stream::{Relay, StreamFrame, FRAME_BUFFER};

/// What the caller gets back.
#[derive(Debug)]
pub enum RouteOutcome {
    Complete {
        backend: String,
        response: ChatCompletionResponse,
    },
    Stream {
        backend: String,
        frames: mpsc::Receiver<StreamFrame>,
    },
}

impl RouteOutcome {
    pub fn backend(&self) -> &str {
        match self {
            RouteOutcome::Complete { backend, .. } | RouteOutcome::Stream { backend, .. } => backend,
        }
    }
}

#[derive(Clone)]
pub struct RequestRouter {
    registry: Registry,
    client: reqwest::Client,
    config: RouterConfig,
}

impl RequestRouter {
    pub fn new(registry: Registry, client: reqwest::Client, config: RouterConfig) -> Self {
        Self {
            registry,
            client,
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Route one request. `explicit` names a backend and disables fallback.
    pub async fn route(
        &self,
        request: &ChatCompletionRequest,
        explicit: Option<&str>,
    ) -> RouteResult<RouteOutcome> {
        if request.messages.is_empty() {
            return Err(RouteError::InvalidRequest(
                "messages must not be empty".to_string(),
            ));
        }

        let snapshot = self.registry.snapshot().await;
        let target = select_excluding(&snapshot, explicit, &[])?;

        match self.attempt(target, request).await {
            Err(err) if err.allows_reselection() && explicit.is_none() && self.config.failover => {
                let excluded = [target.name.clone()];
                match select_excluding(&snapshot, None, &excluded) {
                    Ok(fallback) => {
                        tracing::warn!(
                            failed = %target.name,
                            fallback = %fallback.name,
                            "Backend unreachable, retrying once on next candidate: {}",
                            err
                        );
                        self.attempt(fallback, request).await
                    }
                    Err(_) => Err(err),
                }
            }
            other => other,
        }
    }

    /// Model to request: the caller's, else the target's first, else the configured default.
    pub fn resolve_model(&self, request: &ChatCompletionRequest, target: &ServiceDescriptor) -> String {
        request
            .requested_model()
            .map(str::to_string)
            .or_else(|| target.models().first().cloned())
            .unwrap_or_else(|| self.config.default_model.clone())
    }

    async fn attempt(
        &self,
        target: &ServiceDescriptor,
        request: &ChatCompletionRequest,
    ) -> RouteResult<RouteOutcome> {
        let model = self.resolve_model(request, target);
        tracing::debug!(
            service = %target.name,
            model = %model,
            stream = request.stream,
            "Forwarding completion"
        );

        if request.stream && target.dialect.supports_streaming() {
            let frames = self.open_stream(target, request, &model).await?;
            return Ok(RouteOutcome::Stream {
                backend: target.name.clone(),
                frames,
            });
        }

        let response = self.forward(target, request, &model).await?;
        if request.stream {
            return Ok(RouteOutcome::Stream {
                backend: target.name.clone(),
                frames: stream::synthesize(&response),
            });
        }
        Ok(RouteOutcome::Complete {
            backend: target.name.clone(),
            response,
        })
    }

    async fn forward(
        &self,
        target: &ServiceDescriptor,
        request: &ChatCompletionRequest,
        model: &str,
    ) -> RouteResult<ChatCompletionResponse> {
        let url = format!("{}{}", target.endpoint(), target.dialect.completion_path());
        let body = target.dialect.encode_request(request, model, false);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.config.generation_timeout())
            .send()
            .await
            .map_err(|e| RouteError::from_transport(&target.name, &e))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RouteError::from_transport(&target.name, &e))?;

        if !status.is_success() {
            return Err(rejected(target, status, &bytes));
        }

        target
            .dialect
            .decode_response(&bytes, model)
            .map_err(|e| RouteError::InvalidResponse {
                backend: target.name.clone(),
                message: e.to_string(),
            })
    }

    async fn open_stream(
        &self,
        target: &ServiceDescriptor,
        request: &ChatCompletionRequest,
        model: &str,
    ) -> RouteResult<mpsc::Receiver<StreamFrame>> {
        let url = format!("{}{}", target.endpoint(), target.dialect.completion_path());
        let body = target.dialect.encode_request(request, model, true);
        let timeout = self.config.generation_timeout();

        // reqwest's per-request timeout would cover the whole body, so only
        // the response head is bounded here; the relay bounds each read.
        let response = tokio::time::timeout(timeout, self.client.post(&url).json(&body).send())
            .await
            .map_err(|_| RouteError::Timeout {
                backend: target.name.clone(),
            })?
            .map_err(|e| RouteError::from_transport(&target.name, &e))?;

        let status = response.status();
        if !status.is_success() {
            let bytes = tokio::time::timeout(timeout, response.bytes())
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default();
            return Err(rejected(target, status, &bytes));
        }

        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let relay = Relay::new(
            target.dialect,
            target.name.clone(),
            model.to_string(),
            timeout,
            tx,
        );
        tokio::spawn(relay.run(response.bytes_stream()));
        Ok(rx)
    }
}

fn rejected(target: &ServiceDescriptor, status: reqwest::StatusCode, body: &[u8]) -> RouteError {
    tracing::warn!(service = %target.name, status = %status, "Backend rejected request");
    RouteError::Rejected {
        backend: target.name.clone(),
        status: status.as_u16(),
        message: rejection_message(status, body),
    }
}

/// Best human-readable message from an error body.
fn rejection_message(status: reqwest::StatusCode, body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        let message = value
            .pointer("/error/message")
            .or_else(|| value.get("error"))
            .or_else(|| value.get("detail"))
            .or_else(|| value.get("message"));
        if let Some(Value::String(message)) = message {
            return message.clone();
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("backend error")
            .to_string()
    } else {
        text.chars().take(512).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_message_shapes() {
        let status = reqwest::StatusCode::BAD_REQUEST;
        assert_eq!(
            rejection_message(status, br#"{"error":{"message":"bad model"}}"#),
            "bad model"
        );
        assert_eq!(rejection_message(status, br#"{"error":"model not found"}"#), "model not found");
        assert_eq!(rejection_message(status, br#"{"detail":"nope"}"#), "nope");
        assert_eq!(rejection_message(status, b"plain text"), "plain text");
        assert_eq!(rejection_message(status, b""), "Bad Request");
    }

    #[tokio::test]
    async fn test_empty_messages_rejected_before_selection() {
        let router = RequestRouter::new(Registry::new(), reqwest::Client::new(), RouterConfig::default());
        let err = router
            .route(&ChatCompletionRequest::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::InvalidRequest(_)));
    }
}
