use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use application::{
    dto::{ChatSummaryDto, MessageDto, UserDto},
    repository::MAX_PAGE_LIMIT,
    ApplicationError, AuthenticateUserRequest, ChatListQuery, ChatSortField, PageRequest,
    RegisterUserRequest, SortOrder,
};
use domain::{Chat, ChatKey, DomainError, ProfileUpdate, Username};

use crate::{
    admin_routes::admin_routes, auth::LoginResponse, error::ApiError, state::AppState,
    websocket::websocket_upgrade,
};

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct CreateChatPayload {
    /// 不必包含请求者本人
    participants: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    content: String,
}

#[derive(Debug, Deserialize)]
struct DirectMessagePayload {
    receiver: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct PageParams {
    skip: Option<i64>,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ChatListParams {
    skip: Option<i64>,
    limit: Option<i64>,
    sort_by: Option<ChatSortField>,
    order: Option<SortOrder>,
}

fn page_request(skip: Option<i64>, limit: Option<i64>) -> Result<PageRequest, ApiError> {
    PageRequest::new(skip.unwrap_or(0), limit.unwrap_or(MAX_PAGE_LIMIT as i64))
        .map_err(validation)
}

fn validation(err: DomainError) -> ApiError {
    ApiError::from(ApplicationError::from(err))
}

#[derive(Debug, Serialize)]
struct OnlineUsersResponse {
    online_users: Vec<Username>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api/v1", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register_user))
        .route("/auth/login", post(login_user))
        .route("/users/me", get(current_user))
        .route("/users/me/profile", put(update_profile))
        .route("/users/online", get(online_users))
        .route("/chats", get(list_chats).post(create_chat))
        .route(
            "/chats/{chat_key}/messages",
            get(list_messages).post(send_message),
        )
        .route("/chats/{chat_key}/read", post(mark_read))
        .route("/chats/{chat_key}/transcript", get(export_transcript))
        .route("/messages", post(send_direct_message))
        .nest("/admin", admin_routes())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<UserDto>), ApiError> {
    let user = state
        .user_service
        .register(RegisterUserRequest {
            username: payload.username,
            email: payload.email,
            password: payload.password,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(UserDto::from(&user))))
}

async fn login_user(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = state
        .user_service
        .authenticate(AuthenticateUserRequest {
            username: payload.username,
            password: payload.password,
        })
        .await?;
    let token = state.jwt_service.generate_token(&user.username)?;

    Ok(Json(LoginResponse {
        user: UserDto::from(&user),
        token,
    }))
}

async fn current_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserDto>, ApiError> {
    let username = state.jwt_service.extract_user_from_headers(&headers)?;
    let user = state.user_service.get_user(&username).await?;
    Ok(Json(UserDto::from(&user)))
}

async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<UserDto>, ApiError> {
    let username = state.jwt_service.extract_user_from_headers(&headers)?;
    let user = state.user_service.update_profile(&username, update).await?;
    Ok(Json(UserDto::from(&user)))
}

async fn online_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OnlineUsersResponse>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    Ok(Json(OnlineUsersResponse {
        online_users: state.coordinator.online_usernames().into_iter().collect(),
    }))
}

async fn list_chats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ChatListParams>,
) -> Result<Json<Vec<ChatSummaryDto>>, ApiError> {
    let username = state.jwt_service.extract_user_from_headers(&headers)?;
    let query = ChatListQuery {
        page: page_request(params.skip, params.limit)?,
        sort_by: params.sort_by.unwrap_or_default(),
        order: params.order.unwrap_or_default(),
    };
    let chats = state.registry.list_chats_for_user(&username, query).await?;
    Ok(Json(chats))
}

async fn create_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateChatPayload>,
) -> Result<(StatusCode, Json<ChatSummaryDto>), ApiError> {
    let requester = state.jwt_service.extract_user_from_headers(&headers)?;
    let mut participants = payload
        .participants
        .into_iter()
        .map(Username::parse)
        .collect::<Result<Vec<_>, _>>()
        .map_err(validation)?;
    participants.push(requester);

    let chat = state.registry.create_chat(&participants).await?;
    Ok((StatusCode::CREATED, Json(ChatSummaryDto::from(&chat))))
}

async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_key): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<MessageDto>>, ApiError> {
    let username = state.jwt_service.extract_user_from_headers(&headers)?;
    let chat = participant_chat(&state, &username, chat_key).await?;
    let messages = state
        .registry
        .list_messages(&chat.key, page_request(params.skip, params.limit)?)
        .await?;
    Ok(Json(messages.iter().map(MessageDto::from).collect()))
}

async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_key): Path<String>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<MessageDto>), ApiError> {
    let sender = state.jwt_service.extract_user_from_headers(&headers)?;
    let chat_key = parse_chat_key(chat_key)?;
    let message = state
        .coordinator
        .send_message(&sender, &chat_key, &payload.content)
        .await?;
    Ok((StatusCode::CREATED, Json(MessageDto::from(&message))))
}

async fn send_direct_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<DirectMessagePayload>,
) -> Result<(StatusCode, Json<MessageDto>), ApiError> {
    let sender = state.jwt_service.extract_user_from_headers(&headers)?;
    let receiver = Username::parse(payload.receiver).map_err(validation)?;
    let message = state
        .coordinator
        .send_direct(&sender, &receiver, &payload.content)
        .await?;
    Ok((StatusCode::CREATED, Json(MessageDto::from(&message))))
}

async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_key): Path<String>,
) -> Result<StatusCode, ApiError> {
    let reader = state.jwt_service.extract_user_from_headers(&headers)?;
    let chat_key = parse_chat_key(chat_key)?;
    state.coordinator.mark_read(&reader, &chat_key).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn export_transcript(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let username = state.jwt_service.extract_user_from_headers(&headers)?;
    let chat = participant_chat(&state, &username, chat_key).await?;
    let transcript = state.registry.export_transcript(&chat.key).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        transcript,
    ))
}

fn parse_chat_key(raw: String) -> Result<ChatKey, ApiError> {
    ChatKey::parse(raw).map_err(validation)
}

/// 只有参与者可以读取会话内容
async fn participant_chat(
    state: &AppState,
    username: &Username,
    raw_key: String,
) -> Result<Chat, ApiError> {
    let chat = state.registry.find_chat(&parse_chat_key(raw_key)?).await?;
    if !chat.is_participant(username) {
        return Err(ApplicationError::Authorization.into());
    }
    Ok(chat)
}
