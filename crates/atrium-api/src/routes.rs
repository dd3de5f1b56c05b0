use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use atrium_gateway::connection::{GatewayState, gateway_upgrade};
use atrium_types::api::{
    ConversationListResponse, ConversationResponse, MarkReadResponse, MessageListResponse,
    NotificationListResponse, NotificationResponse, ReactRequest, ReactResponse, SendMessageRequest,
    SendMessageResponse, StartConversationRequest, UpdatedResponse,
};

use crate::error::{ApiError, ApiResult};
use crate::middleware::{AuthUser, require_auth};
use crate::state::{AppState, blocking};
use crate::{conversations, messages, notifications, reactions, social};

#[derive(Debug, Default, Deserialize)]
pub struct MessageQuery {
    /// RFC 3339 timestamp of the oldest message already loaded.
    pub before: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    pub limit: Option<String>,
}

fn parse_id(raw: &str, what: &str) -> ApiResult<Uuid> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::InvalidInput(format!("Invalid {what} id")))
}

/// Full HTTP surface: public health check, authenticated REST routes and
/// the WebSocket gateway (which authenticates through its own handshake).
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/messages/conversations",
            get(list_conversations).post(start_conversation),
        )
        .route(
            "/messages/conversations/{id}/messages",
            get(get_messages).post(send_message),
        )
        .route("/messages/conversations/{id}/read", post(mark_conversation_read))
        .route(
            "/messages/conversations/{id}/messages/{message_id}/react",
            post(react),
        )
        .route("/notifications", get(list_notifications))
        .route("/notifications/read-all", post(mark_all_notifications_read))
        .route("/notifications/{id}/read", patch(mark_notification_read))
        .route("/notifications/{id}", delete(delete_notification))
        .route("/users/{id}/follow", post(follow).delete(unfollow))
        .route("/projects/{id}/like", post(like_project))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let gateway = Router::new()
        .route("/gateway", get(gateway_upgrade))
        .with_state(GatewayState::new(
            state.dispatcher.clone(),
            state.jwt_secret.as_str(),
        ));

    let public = Router::new()
        .route("/health", get(health))
        .with_state(state);

    Router::new().merge(public).merge(protected).merge(gateway)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "onlineUsers": state.dispatcher.registry().online_user_count(),
    }))
}

// -- Conversations --

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
) -> ApiResult<Json<ConversationListResponse>> {
    let conversations = blocking(&state, move |s| conversations::list_conversations(s, caller)).await?;
    Ok(Json(ConversationListResponse { conversations }))
}

pub async fn start_conversation(
    State(state): State<AppState>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Json(req): Json<StartConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    let (conversation, created) = blocking(&state, move |s| {
        conversations::start_conversation(s, caller, &req.target_user_id, Utc::now())
    })
    .await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(ConversationResponse { conversation })))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(query): Query<MessageQuery>,
) -> ApiResult<Json<MessageListResponse>> {
    let conversation_id = parse_id(&id, "conversation")?;
    let messages = blocking(&state, move |s| {
        conversations::get_messages(
            s,
            caller,
            conversation_id,
            query.before.as_deref(),
            query.limit.as_deref(),
        )
    })
    .await?;
    Ok(Json(MessageListResponse { messages }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let conversation_id = parse_id(&id, "conversation")?;
    let (message, conversation) = blocking(&state, move |s| {
        messages::send_message(s, caller, conversation_id, req, Utc::now())
    })
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse { message, conversation }),
    ))
}

pub async fn mark_conversation_read(
    State(state): State<AppState>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<MarkReadResponse>> {
    let conversation_id = parse_id(&id, "conversation")?;
    let (updated, conversation) = blocking(&state, move |s| {
        conversations::mark_read(s, caller, conversation_id, Utc::now())
    })
    .await?;
    Ok(Json(MarkReadResponse { updated, conversation }))
}

pub async fn react(
    State(state): State<AppState>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path((id, message_id)): Path<(String, String)>,
    Json(req): Json<ReactRequest>,
) -> ApiResult<Json<ReactResponse>> {
    let conversation_id = parse_id(&id, "conversation")?;
    let message_id = parse_id(&message_id, "message")?;
    let message = blocking(&state, move |s| {
        reactions::react(s, caller, conversation_id, message_id, req, Utc::now())
    })
    .await?;
    Ok(Json(ReactResponse { message }))
}

// -- Notifications --

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Json<NotificationListResponse>> {
    let notifications = blocking(&state, move |s| {
        notifications::list_notifications(s, caller, query.limit.as_deref(), Utc::now())
    })
    .await?;
    Ok(Json(NotificationListResponse { notifications }))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<NotificationResponse>> {
    let notification_id = parse_id(&id, "notification")?;
    let notification = blocking(&state, move |s| {
        notifications::mark_read(s, caller, notification_id, Utc::now())
    })
    .await?;
    Ok(Json(NotificationResponse { notification }))
}

pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
) -> ApiResult<Json<UpdatedResponse>> {
    let updated = blocking(&state, move |s| notifications::mark_all_read(s, caller, Utc::now())).await?;
    Ok(Json(UpdatedResponse { updated }))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let notification_id = parse_id(&id, "notification")?;
    blocking(&state, move |s| notifications::delete_notification(s, caller, notification_id)).await?;
    Ok(Json(json!({ "message": "Notification removed" })))
}

// -- Social --

pub async fn follow(
    State(state): State<AppState>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let created = blocking(&state, move |s| social::follow(s, caller, &id, Utc::now())).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(json!({ "following": true }))))
}

pub async fn unfollow(
    State(state): State<AppState>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    blocking(&state, move |s| social::unfollow(s, caller, &id)).await?;
    Ok(Json(json!({ "following": false })))
}

pub async fn like_project(
    State(state): State<AppState>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project_id = parse_id(&id, "project")?;
    let created = blocking(&state, move |s| social::like_project(s, caller, project_id, Utc::now())).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(json!({ "liked": true }))))
}
