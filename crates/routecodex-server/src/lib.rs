//! HTTP entry layer: the three well-known endpoints, request-deadline
//! enforcement, and response emission (JSON or SSE).

pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::Bytes;
use serde_json::Value;
use tracing::info;

use routecodex_common::new_request_id;
use routecodex_core::{Engine, EngineOutcome, GatewayError, GatewayRequest};
use routecodex_protocol::EntryEndpoint;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Overall per-request deadline; failover attempts share it.
    pub request_timeout: Duration,
}

pub fn gateway_router(engine: Arc<Engine>, request_timeout: Duration) -> Router {
    let state = AppState {
        engine,
        request_timeout,
    };
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/responses", post(responses))
        .route("/v1/messages", post(messages))
        .route("/anthropic/v1/messages", post(messages))
        .with_state(state)
}

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_entry(state, EntryEndpoint::ChatCompletions, headers, body).await
}

async fn responses(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    handle_entry(state, EntryEndpoint::Responses, headers, body).await
}

async fn messages(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    handle_entry(state, EntryEndpoint::Messages, headers, body).await
}

async fn handle_entry(
    state: AppState,
    endpoint: EntryEndpoint,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = new_request_id();

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            let mut error =
                GatewayError::configuration("INVALID_REQUEST", format!("invalid json: {err}"));
            error.status = 400;
            return error_response(error.with_request_id(request_id));
        }
    };
    let stream = payload
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    // Inbound auth material stops here; upstream auth is assembled from
    // the credential store.
    let inbound_user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    info!(
        event = "entry.request",
        request_id = %request_id,
        endpoint = endpoint.path(),
        stream = stream
    );

    let request = GatewayRequest {
        endpoint,
        body: payload,
        stream,
        request_id: request_id.clone(),
        inbound_user_agent,
    };

    let outcome = match tokio::time::timeout(state.request_timeout, state.engine.handle(request))
        .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            return error_response(
                GatewayError::timeout("request deadline exceeded").with_request_id(request_id),
            );
        }
    };

    match outcome {
        Err(error) => error_response(error),
        Ok(EngineOutcome::Buffered {
            body,
            headers,
            synthesize_stream,
        }) => {
            if synthesize_stream {
                sse_response(stream::synthesize(endpoint, body))
            } else {
                json_response(body, &headers)
            }
        }
        Ok(EngineOutcome::UpstreamStream { rx, .. }) => sse_response(stream::passthrough(rx)),
    }
}

fn json_response(body: Value, upstream_headers: &[(String, String)]) -> Response {
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in upstream_headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            if name != header::CONTENT_TYPE {
                response = response.header(name, value);
            }
        }
    }
    response
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn sse_response(stream: tokio_stream::wrappers::ReceiverStream<Bytes>) -> Response {
    use futures_util::StreamExt;
    let body = Body::from_stream(stream.map(Ok::<Bytes, std::convert::Infallible>));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn error_response(error: GatewayError) -> Response {
    if routecodex_common::env::verbose_errors() {
        tracing::error!(
            event = "entry.error",
            request_id = %error.request_id,
            code = %error.code,
            status = error.status,
            detail = ?error
        );
    }
    let status =
        StatusCode::from_u16(error.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = error.body();
    (status, axum::Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_responses_use_the_mapped_status_and_body() {
        let error = GatewayError::all_unavailable("default", vec!["qwen.a".to_string()])
            .with_request_id("req_x");
        let response = error_response(error);
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
