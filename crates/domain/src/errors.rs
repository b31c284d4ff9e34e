//! 领域模型错误定义
//!
//! 定义了系统中所有可能的领域错误与仓储错误，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 参与者集合不合法（少于两个不同用户）
    #[error("invalid participants: {reason}")]
    InvalidParticipants { reason: String },

    /// 参与者没有对应的用户
    #[error("participant not found: {username}")]
    ParticipantNotFound { username: String },

    /// 发送者不在会话参与者中
    #[error("{sender} is not a participant of chat {chat_key}")]
    SenderNotParticipant { sender: String, chat_key: String },

    #[error("chat not found")]
    ChatNotFound,

    #[error("chat already exists")]
    ChatAlreadyExists,

    #[error("user already exists")]
    UserAlreadyExists,

    #[error("email already registered")]
    EmailAlreadyExists,

    #[error("user not found")]
    UserNotFound,
}

impl DomainError {
    /// 创建参数校验错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_participants(reason: impl Into<String>) -> Self {
        Self::InvalidParticipants {
            reason: reason.into(),
        }
    }

    pub fn participant_not_found(username: impl Into<String>) -> Self {
        Self::ParticipantNotFound {
            username: username.into(),
        }
    }

    pub fn sender_not_participant(sender: impl Into<String>, chat_key: impl Into<String>) -> Self {
        Self::SenderNotParticipant {
            sender: sender.into(),
            chat_key: chat_key.into(),
        }
    }

    /// 是否属于输入校验类错误（不触碰共享状态，不重试）
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. } | Self::InvalidParticipants { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ParticipantNotFound { .. } | Self::ChatNotFound | Self::UserNotFound
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::ChatAlreadyExists | Self::UserAlreadyExists | Self::EmailAlreadyExists
        )
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 存储层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Conflict,
    /// 暂时不可用，调用方可以有限次退避重试
    #[error("store unavailable: {message}")]
    Unavailable { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
