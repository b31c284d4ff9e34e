use domain::{Chat, Message, PresenceStatus, Timestamp, User, UserProfile};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDto {
    pub username: String,
    pub email: String,
    pub presence: PresenceStatus,
    pub profile: UserProfile,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: Timestamp,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.as_str().to_owned(),
            email: user.email.as_str().to_owned(),
            presence: user.presence,
            profile: user.profile.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// 会话列表中的一项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSummaryDto {
    pub chat_key: String,
    pub participants: Vec<String>,
    /// 新会话没有发送者，返回空字符串
    pub last_updated_by: String,
    pub latest_message_preview: String,
    pub unread_count: u32,
    pub message_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: Timestamp,
}

impl From<&Chat> for ChatSummaryDto {
    fn from(chat: &Chat) -> Self {
        Self {
            chat_key: chat.key.as_str().to_owned(),
            participants: chat
                .participants
                .iter()
                .map(|participant| participant.as_str().to_owned())
                .collect(),
            last_updated_by: chat
                .last_updated_by
                .as_ref()
                .map(|sender| sender.as_str().to_owned())
                .unwrap_or_default(),
            latest_message_preview: chat.latest_message_preview.clone(),
            unread_count: chat.unread_count,
            message_count: chat.message_count,
            created_at: chat.created_at,
            last_updated: chat.last_updated,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: Uuid,
    pub chat_key: String,
    pub sender: String,
    pub receivers: Vec<String>,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: Timestamp,
}

impl From<&Message> for MessageDto {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.0,
            chat_key: message.chat_key.as_str().to_owned(),
            sender: message.sender.as_str().to_owned(),
            receivers: message
                .receivers
                .iter()
                .map(|receiver| receiver.as_str().to_owned())
                .collect(),
            content: message.content.as_str().to_owned(),
            timestamp: message.timestamp,
        }
    }
}

/// 管理面板统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminStatsDto {
    pub total_users: u64,
    pub total_chats: u64,
    pub online_users: usize,
    pub active_sockets: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetSummaryDto {
    pub sessions_closed: usize,
    pub users_deleted: u64,
    pub chats_deleted: u64,
}
