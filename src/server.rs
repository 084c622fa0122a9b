//! HTTP surface: `POST /chat` streams NDJSON frames, `GET /health` answers `ok`.

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;

use crate::models::ChatRequest;
use crate::service::ChatService;
use crate::streaming::FrameSink;

pub const NDJSON: &str = "application/x-ndjson";

/// Frames buffered between the pipeline and a slow client
const FRAME_BUFFER: usize = 32;

#[derive(Clone)]
struct AppState {
    service: Arc<ChatService>,
}

pub fn router(service: Arc<ChatService>, bearer_token: Option<String>) -> Router {
    let mut router = Router::new()
        .route("/chat", post(chat))
        .with_state(AppState { service });
    if let Some(expected) = bearer_token {
        router = router.layer(middleware::from_fn_with_state(
            Arc::new(expected),
            require_bearer,
        ));
    }
    router.route("/health", get(|| async { "ok" }))
}

async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    if request.chat.is_empty() {
        return AppError::bad_request("chat.messages must contain at least one message")
            .into_response();
    }

    let (sink, rx) = FrameSink::channel(FRAME_BUFFER);
    let service = Arc::clone(&state.service);
    tokio::spawn(async move {
        service.respond(request.chat, sink).await;
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    (
        [
            (header::CONTENT_TYPE, NDJSON),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Bearer token from the `Authorization` header, or from an `access_token` /
/// `token` query parameter for clients that cannot set headers
fn presented_token<B>(req: &Request<B>) -> Option<&str> {
    let headers: &HeaderMap = req.headers();
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(token);
    }
    req.uri()
        .query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "access_token" || *k == "token")
        .map(|(_, v)| v)
}

async fn require_bearer(
    State(expected): State<Arc<String>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if presented_token(&req) != Some(expected.as_str()) {
        return AppError {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthorized",
            message: "missing or invalid bearer token".to_string(),
        }
        .into_response();
    }
    next.run(req).await
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Rejection sent before the stream starts; later failures are in-band frames
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}
