//! 应用层实现。
//!
//! 这里是会话与在线状态协调引擎：会话注册表、在线状态表、事件总线、
//! 连接编排器，以及围绕它们的用户、管理用例和存储接口。

pub mod clock;
pub mod dto;
pub mod error;
pub mod events;
pub mod locks;
pub mod password;
pub mod presence;
pub mod registry;
pub mod repository;
pub mod retry;
pub mod services;
pub mod transcript;

pub use clock::{Clock, SystemClock};
pub use error::{ApplicationError, ErrorKind};
pub use events::{ChatEvent, CloseReason, EventBus, EventSubscription};
pub use password::{CredentialVerifier, PasswordHasher, PasswordHasherError};
pub use presence::{PresenceTable, SessionGuard, SessionHandle};
pub use registry::{ChatRegistry, ChatRegistryDependencies};
pub use repository::{
    memory::MemoryStore, ChatListQuery, ChatRepository, ChatSortField, PageRequest, SortOrder,
    UserRepository,
};
pub use retry::{Backoff, RetryPolicy};
pub use services::{
    ActiveSession, AdminService, AdminServiceDependencies, AuthenticateUserRequest, Connection,
    ConnectionState, RegisterUserRequest, SessionCoordinator, SessionCoordinatorDependencies,
    UserService, UserServiceDependencies,
};
