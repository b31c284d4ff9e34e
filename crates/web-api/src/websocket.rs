//! WebSocket 传输
//!
//! 握手时用查询参数里的 JWT 认证，随后每个连接一个任务：
//! 同时等待客户端帧、事件总线推送和“被替换”信号，退出时交给协调器清理在线状态。

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use application::{
    dto::MessageDto, ActiveSession, ApplicationError, ChatEvent, CloseReason, Connection,
};
use domain::{ChatKey, Username};

use crate::{error::ApiError, state::AppState};

/// WebSocket连接查询参数
#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    /// JWT access token
    pub token: Option<String>,
}

/// 客户端发来的帧
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    /// 指定 `chat_key` 发到已有会话，只给 `receiver` 时按需创建会话
    SendMessage {
        chat_key: Option<String>,
        receiver: Option<String>,
        content: String,
    },
    MarkRead {
        chat_key: String,
    },
    Ping,
}

/// 推送给客户端的帧
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Message {
        message: MessageDto,
    },
    Presence {
        username: Username,
        online: bool,
        online_users: Vec<Username>,
    },
    SessionClosed {
        reason: CloseReason,
    },
    Error {
        code: &'static str,
        message: String,
    },
    Pong,
}

impl From<ChatEvent> for ServerFrame {
    fn from(event: ChatEvent) -> Self {
        match event {
            ChatEvent::Message { message } => ServerFrame::Message {
                message: MessageDto::from(&message),
            },
            ChatEvent::Presence {
                username,
                online,
                online_users,
            } => ServerFrame::Presence {
                username,
                online,
                online_users,
            },
            ChatEvent::SessionClosed { reason } => ServerFrame::SessionClosed { reason },
        }
    }
}

impl From<ApiError> for ServerFrame {
    fn from(error: ApiError) -> Self {
        ServerFrame::Error {
            code: error.code(),
            message: error.message().to_owned(),
        }
    }
}

pub async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WebSocketQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Missing token"))?;
    let username = state.jwt_service.verify_token(&token)?;

    let mut conn = state.coordinator.open();
    state
        .coordinator
        .authenticate_verified(&mut conn, username)
        .await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, conn)))
}

async fn handle_socket(socket: WebSocket, state: AppState, mut conn: Connection) {
    let ActiveSession {
        handle,
        guard,
        mut events,
    } = match state.coordinator.on_connect(&mut conn).await {
        Ok(active) => active,
        Err(err) => {
            tracing::warn!(error = %err, "WebSocket 会话激活失败");
            return;
        }
    };
    tracing::info!(
        username = %handle.username(),
        session_id = %handle.id(),
        "WebSocket 连接已建立"
    );

    let (mut sender, mut incoming) = socket.split();

    loop {
        tokio::select! {
            // 被同名新连接替换或被管理员清理
            _ = handle.shutdown_requested() => {
                while let Some(event) = events.try_recv() {
                    if send_frame(&mut sender, ServerFrame::from(event)).await.is_err() {
                        break;
                    }
                }
                let _ = sender.send(WsMessage::Close(None)).await;
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if send_frame(&mut sender, ServerFrame::from(event)).await.is_err() {
                    tracing::warn!(session_id = %handle.id(), "推送事件失败，断开连接");
                    break;
                }
            }
            message = incoming.next() => {
                let message = match message {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "WebSocket 读取失败");
                        break;
                    }
                    None => break,
                };
                match message {
                    WsMessage::Text(text) => {
                        if let Some(reply) = handle_frame(&state, &conn, text.as_str()).await {
                            if send_frame(&mut sender, reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    WsMessage::Ping(data) => {
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    WsMessage::Close(_) => {
                        tracing::debug!(session_id = %handle.id(), "WebSocket收到关闭消息");
                        break;
                    }
                    WsMessage::Pong(_) | WsMessage::Binary(_) => {}
                }
            }
        }
    }

    let went_offline = state.coordinator.on_disconnect(&mut conn).await;
    drop(guard);
    tracing::info!(
        username = %handle.username(),
        session_id = %handle.id(),
        went_offline,
        "WebSocket连接已断开"
    );
}

/// 处理一帧客户端消息，返回需要直接回给该客户端的帧
async fn handle_frame(state: &AppState, conn: &Connection, text: &str) -> Option<ServerFrame> {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            return Some(ApiError::bad_request(format!("invalid frame: {err}")).into());
        }
    };

    let result = match frame {
        ClientFrame::Ping => return Some(ServerFrame::Pong),
        ClientFrame::SendMessage {
            chat_key: Some(chat_key),
            content,
            ..
        } => match ChatKey::parse(chat_key) {
            Ok(key) => state
                .coordinator
                .on_message(conn, &key, &content)
                .await
                .map(|_| ()),
            Err(err) => Err(ApplicationError::from(err)),
        },
        ClientFrame::SendMessage {
            chat_key: None,
            receiver: Some(receiver),
            content,
        } => match Username::parse(receiver) {
            Ok(receiver) => state
                .coordinator
                .on_message_to(conn, &receiver, &content)
                .await
                .map(|_| ()),
            Err(err) => Err(ApplicationError::from(err)),
        },
        ClientFrame::SendMessage { .. } => {
            return Some(ApiError::bad_request("chat_key or receiver is required").into());
        }
        ClientFrame::MarkRead { chat_key } => match ChatKey::parse(chat_key) {
            Ok(key) => state.coordinator.on_mark_read(conn, &key).await,
            Err(err) => Err(ApplicationError::from(err)),
        },
    };

    // 成功发送的消息会经事件总线回到发送者自己的连接
    result.err().map(|err| ApiError::from(err).into())
}

async fn send_frame<S>(sender: &mut S, frame: ServerFrame) -> Result<(), ()>
where
    S: Sink<WsMessage> + Unpin,
{
    let payload = match serde_json::to_string(&frame) {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize websocket payload");
            return Ok(());
        }
    };
    sender
        .send(WsMessage::Text(payload.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_client_frames() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "send_message",
            "receiver": "bob",
            "content": "hi"
        }))
        .unwrap();
        assert!(matches!(
            frame,
            ClientFrame::SendMessage { chat_key: None, receiver: Some(ref r), .. } if r == "bob"
        ));

        let frame: ClientFrame =
            serde_json::from_value(json!({"type": "mark_read", "chat_key": "alice~bob"})).unwrap();
        assert!(matches!(frame, ClientFrame::MarkRead { .. }));
    }

    #[test]
    fn session_closed_frame_shape() {
        let frame = ServerFrame::from(ChatEvent::SessionClosed {
            reason: CloseReason::Replaced,
        });
        assert_eq!(
            serde_json::to_value(frame).unwrap(),
            json!({"type": "session_closed", "reason": "replaced"})
        );
    }
}
