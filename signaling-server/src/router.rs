use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequestParts, Path, Query, State, WebSocketUpgrade};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::error;
use peer_calls_protocol::{
    Call, CallId, CallParticipant, CallType, ConversationId, ErrorBody, ErrorKind, UserId,
};
use serde::Deserialize;

use crate::connection;
use crate::error::{CallError, Result};
use crate::lifecycle::LifecycleManager;
use crate::pubsub::PubSub;
use crate::relay::SignalingRelay;

/// Header carrying the caller's identity, set by the authenticating proxy.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct ServerState {
    pub lifecycle: Arc<LifecycleManager>,
    pub relay: SignalingRelay,
    pub hub: PubSub,
    /// Restrict `missed` to the parties of the call.
    pub strict_missed: bool,
}

impl IntoResponse for CallError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict | ErrorKind::AlreadyInCall => StatusCode::CONFLICT,
            ErrorKind::Internal => {
                error!("request failed: {self}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(self.to_body())).into_response()
    }
}

/// Trusted identity of the caller, from the `x-user-id` header or, for
/// websocket upgrades from browsers, the `user_id` query parameter.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

#[derive(Deserialize)]
struct IdentityQuery {
    user_id: Option<String>,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let user_id = match from_header {
            Some(user_id) => Some(user_id),
            None => Query::<IdentityQuery>::from_request_parts(parts, state)
                .await
                .ok()
                .and_then(|Query(query)| query.user_id),
        };
        match user_id.map(UserId::new) {
            Some(user_id) if !user_id.is_blank() => Ok(Self(user_id)),
            _ => Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody {
                    kind: ErrorKind::Forbidden,
                    message: "missing caller identity".to_owned(),
                }),
            )
                .into_response()),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCallRequest {
    conversation_id: ConversationId,
    call_type: String,
}

#[derive(Deserialize)]
struct FailRequest {
    reason: String,
}

#[allow(clippy::unused_async)]
async fn health_handler() -> &'static str {
    "OK"
}

#[allow(clippy::unused_async)]
async fn ws_handler(
    State(state): State<ServerState>,
    AuthUser(user_id): AuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| connection::user_connected(socket, user_id, state.hub, state.relay))
}

async fn create_call(
    State(state): State<ServerState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<CreateCallRequest>,
) -> Result<(StatusCode, Json<Call>)> {
    let call_type: CallType = request.call_type.parse().map_err(CallError::Validation)?;
    let call = state
        .lifecycle
        .initiate(&user_id, &request.conversation_id, call_type)
        .await?;
    Ok((StatusCode::CREATED, Json(call)))
}

async fn answer_call(
    State(state): State<ServerState>,
    AuthUser(user_id): AuthUser,
    Path(call_id): Path<CallId>,
) -> Result<Json<Call>> {
    Ok(Json(state.lifecycle.answer(&user_id, &call_id).await?))
}

async fn decline_call(
    State(state): State<ServerState>,
    AuthUser(user_id): AuthUser,
    Path(call_id): Path<CallId>,
) -> Result<Json<Call>> {
    Ok(Json(state.lifecycle.decline(&user_id, &call_id).await?))
}

async fn missed_call(
    State(state): State<ServerState>,
    user: Option<AuthUser>,
    Path(call_id): Path<CallId>,
) -> Result<Json<Call>> {
    let call = match (state.strict_missed, user) {
        (false, _) => state.lifecycle.missed(&call_id).await?,
        (true, Some(AuthUser(user_id))) => state.lifecycle.missed_by(&user_id, &call_id).await?,
        (true, None) => {
            return Err(CallError::Forbidden(
                "marking a call missed requires a caller identity".to_owned(),
            ))
        }
    };
    Ok(Json(call))
}

async fn end_call(
    State(state): State<ServerState>,
    AuthUser(user_id): AuthUser,
    Path(call_id): Path<CallId>,
) -> Result<Json<Call>> {
    Ok(Json(state.lifecycle.end(&user_id, &call_id).await?))
}

async fn fail_call(
    State(state): State<ServerState>,
    AuthUser(user_id): AuthUser,
    Path(call_id): Path<CallId>,
    Json(request): Json<FailRequest>,
) -> Result<Json<Call>> {
    Ok(Json(
        state
            .lifecycle
            .fail(&user_id, &call_id, &request.reason)
            .await?,
    ))
}

async fn get_call(
    State(state): State<ServerState>,
    AuthUser(user_id): AuthUser,
    Path(call_id): Path<CallId>,
) -> Result<Json<Call>> {
    Ok(Json(state.lifecycle.get_call(&user_id, &call_id).await?))
}

async fn call_participants(
    State(state): State<ServerState>,
    AuthUser(user_id): AuthUser,
    Path(call_id): Path<CallId>,
) -> Result<Json<Vec<CallParticipant>>> {
    Ok(Json(state.lifecycle.participants(&user_id, &call_id).await?))
}

async fn active_call(
    State(state): State<ServerState>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<ConversationId>,
) -> Result<Json<Option<Call>>> {
    Ok(Json(
        state
            .lifecycle
            .get_active_call(&user_id, &conversation_id)
            .await?,
    ))
}

pub fn create(server_state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/calls", post(create_call))
        .route("/calls/:id", get(get_call))
        .route("/calls/:id/participants", get(call_participants))
        .route("/calls/:id/answer", post(answer_call))
        .route("/calls/:id/decline", post(decline_call))
        .route("/calls/:id/missed", post(missed_call))
        .route("/calls/:id/end", post(end_call))
        .route("/calls/:id/fail", post(fail_call))
        .route("/conversations/:id/active-call", get(active_call))
        .with_state(server_state)
}
