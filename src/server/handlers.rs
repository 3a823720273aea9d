// HTTP handlers

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;

use super::openai_types::{ChatCompletionRequest, Model, ModelsResponse};
use super::AppState;
use crate::config::constants::BACKEND_HEADER;
use crate::error::{RouteError, RouteResult};
use crate::registry::ServiceSummary;
use crate::router::RouteOutcome;
use crate::selection::{readiness, select, Readiness};

/// Build the router. Every API route is also mounted under `/v1`.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health_check))
        .route("/models", get(list_models))
        .route("/services", get(list_services))
        .route("/chat/completions", post(chat_completions));

    Router::new()
        .route("/", get(root))
        .merge(api.clone())
        .nest("/v1", api)
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "name": "saturn",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/models", "/services", "/chat/completions"],
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: Readiness,
    pub healthy_services: usize,
    pub total_services: usize,
}

/// Aggregate readiness. Always 200; the status field carries the answer.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.registry.snapshot().await;
    Json(HealthResponse {
        status: readiness(&snapshot),
        healthy_services: snapshot.iter().filter(|d| d.healthy).count(),
        total_services: snapshot.len(),
    })
}

#[derive(Debug, Deserialize)]
struct ModelsQuery {
    service: Option<String>,
}

async fn list_models(
    State(state): State<AppState>,
    Query(query): Query<ModelsQuery>,
) -> RouteResult<Json<ModelsResponse>> {
    let snapshot = state.registry.snapshot().await;

    let owners: Vec<_> = match query.service.as_deref() {
        Some(name) => vec![select(&snapshot, Some(name))?],
        None => snapshot.iter().filter(|d| d.healthy).collect(),
    };
    if owners.is_empty() {
        return Err(RouteError::NoHealthyBackend);
    }

    let data = owners
        .into_iter()
        .flat_map(|owner| {
            owner.models().iter().map(move |id| Model {
                id: id.clone(),
                object: "model".to_string(),
                owned_by: owner.name.clone(),
            })
        })
        .collect();

    Ok(Json(ModelsResponse {
        object: "list".to_string(),
        data,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServicesResponse {
    pub count: usize,
    pub services: Vec<ServiceSummary>,
    pub best: Option<ServiceSummary>,
}

async fn list_services(State(state): State<AppState>) -> Json<ServicesResponse> {
    let snapshot = state.registry.snapshot().await;
    let services: Vec<ServiceSummary> = snapshot
        .iter()
        .filter(|d| d.healthy)
        .map(|d| d.to_summary())
        .collect();
    let best = select(&snapshot, None).ok().map(|d| d.to_summary());

    Json(ServicesResponse {
        count: services.len(),
        services,
        best,
    })
}

async fn chat_completions(
    State(state): State<AppState>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> RouteResult<Response> {
    let Json(request) = payload.map_err(|e| RouteError::InvalidRequest(e.body_text()))?;

    let outcome = state
        .router
        .route(&request, request.service.as_deref())
        .await
        .map_err(|e| {
            tracing::debug!("Completion failed: {}", e);
            e
        })?;

    let backend = outcome.backend().to_string();
    let mut response = match outcome {
        RouteOutcome::Complete { response, .. } => Json(response).into_response(),
        RouteOutcome::Stream { frames, .. } => sse_response(frames),
    };

    if let Ok(value) = HeaderValue::from_str(&backend) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(BACKEND_HEADER), value);
    }
    Ok(response)
}

fn sse_response(frames: tokio::sync::mpsc::Receiver<crate::router::stream::StreamFrame>) -> Response {
    let body = futures::stream::unfold(frames, |mut rx| async move {
        rx.recv()
            .await
            .map(|frame| (Ok::<_, Infallible>(frame.to_sse()), rx))
    });

    let mut response = Response::new(Body::from_stream(body));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}
