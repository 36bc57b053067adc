use crate::SharedState;
use axum::extract::{FromRequestParts, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use cirrus_core::{ChannelSink, TurnRequest};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, info, info_span};

const MAX_CHAT_ID_LEN: usize = 128;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Rejection for bad requests; rendered as `{"error": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "Missing user identity".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Identity established by the upstream auth layer. The loop trusts it as-is.
#[derive(Debug, Clone)]
pub struct UserId(pub String);

impl FromRequestParts<SharedState> for UserId {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(&state.auth_header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| UserId(v.to_string()))
            .ok_or_else(ApiError::unauthorized)
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(rename = "chatId")]
    chat_id: Option<String>,
    q: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamBody {
    chat_id: Option<String>,
    message: Option<String>,
}

/// `GET /api/messages/stream?chatId=..&q=..`
pub async fn stream_query_handler(
    State(state): State<SharedState>,
    user: UserId,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let request = validate_turn(query.chat_id, query.q)?;
    Ok(start_turn(&state, &user, request))
}

/// `POST /api/messages/stream` with `{"chatId": .., "message": ..}`
pub async fn stream_json_handler(
    State(state): State<SharedState>,
    user: UserId,
    Json(body): Json<StreamBody>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let request = validate_turn(body.chat_id, body.message)?;
    Ok(start_turn(&state, &user, request))
}

fn validate_turn(chat_id: Option<String>, message: Option<String>) -> Result<TurnRequest, ApiError> {
    let chat_id = chat_id.unwrap_or_default();
    if chat_id.is_empty() {
        return Err(ApiError::bad_request("chatId is required"));
    }
    if chat_id.len() > MAX_CHAT_ID_LEN {
        return Err(ApiError::bad_request(format!(
            "chatId must be at most {MAX_CHAT_ID_LEN} characters"
        )));
    }
    if !chat_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::bad_request(
            "chatId may only contain letters, digits, '-' and '_'",
        ));
    }

    let message = message.unwrap_or_default();
    if message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }

    Ok(TurnRequest::new(chat_id, message))
}

/// Spawns the loop for one turn. The SSE body owns the receiving end, so a
/// client disconnect drops it and closes the loop's sink.
fn start_turn(
    state: &SharedState,
    user: &UserId,
    request: TurnRequest,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>> + use<>> {
    let (sink, rx) = ChannelSink::new(state.channel_capacity);
    let controller = state.controller.clone();

    info!(user = %user.0, chat_id = %request.conversation_id, "streaming turn");
    let span = info_span!("turn", user = %user.0);
    tokio::spawn(
        async move {
            controller.run(&request, &sink).await;
        }
        .instrument(span),
    );

    let stream = ReceiverStream::new(rx)
        .map(|event| Ok(SseEvent::default().event(event.kind()).data(event.data())));

    Sse::new(stream).keep_alive(KeepAlive::default())
}
