//! 聊天系统核心领域模型
//!
//! 包含用户、会话、消息等核心实体，会话键的推导规则，以及领域错误定义。

pub mod chat;
pub mod chat_key;
pub mod errors;
pub mod message;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use chat::{preview, Chat, ChatMutation, PREVIEW_MAX_CHARS};
pub use chat_key::{ChatKey, CHAT_KEY_SEPARATOR};
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use message::Message;
pub use user::{PresenceStatus, ProfileUpdate, User, UserProfile};
pub use value_objects::{
    MessageContent, MessageId, PasswordHash, SessionId, Timestamp, UserEmail, Username,
    MESSAGE_MAX_CHARS, USERNAME_MAX_LEN,
};
