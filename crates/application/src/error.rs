use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::password::PasswordHasherError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("password error: {0}")]
    Password(#[from] PasswordHasherError),
    #[error("authentication failed")]
    Authentication,
    #[error("authorization failed")]
    Authorization,
    /// 连接状态机收到了当前状态不允许的事件
    #[error("invalid connection state: {0}")]
    InvalidState(String),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

/// 对外暴露的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Unavailable,
    Unauthorized,
    Forbidden,
    Internal,
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        ApplicationError::InvalidState(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApplicationError::Domain(err) if err.is_validation() => ErrorKind::Validation,
            ApplicationError::Domain(err) if err.is_not_found() => ErrorKind::NotFound,
            ApplicationError::Domain(err) if err.is_conflict() => ErrorKind::Conflict,
            ApplicationError::Domain(DomainError::SenderNotParticipant { .. }) => {
                ErrorKind::Forbidden
            }
            ApplicationError::Domain(_) => ErrorKind::Validation,
            ApplicationError::Repository(RepositoryError::NotFound) => ErrorKind::NotFound,
            ApplicationError::Repository(RepositoryError::Conflict) => ErrorKind::Conflict,
            ApplicationError::Repository(RepositoryError::Unavailable { .. }) => {
                ErrorKind::Unavailable
            }
            ApplicationError::Repository(RepositoryError::Storage { .. }) => ErrorKind::Internal,
            ApplicationError::Authentication => ErrorKind::Unauthorized,
            ApplicationError::Authorization => ErrorKind::Forbidden,
            ApplicationError::InvalidState(_) => ErrorKind::Validation,
            ApplicationError::Password(_) | ApplicationError::Infrastructure(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ApplicationError::Repository(err) if err.is_transient())
    }
}
