use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use application::{
    AdminService, AdminServiceDependencies, ChatRegistry, ChatRegistryDependencies,
    ChatRepository, Clock, EventBus, PasswordHasher, PresenceTable, RetryPolicy,
    SessionCoordinator, SessionCoordinatorDependencies, SystemClock, UserRepository,
    UserService, UserServiceDependencies,
};
use config::AppConfig;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub user_service: Arc<UserService>,
    pub registry: Arc<ChatRegistry>,
    pub coordinator: Arc<SessionCoordinator>,
    pub admin_service: Arc<AdminService>,
    pub jwt_service: Arc<JwtService>,
}

impl AppState {
    pub fn new(
        user_service: Arc<UserService>,
        registry: Arc<ChatRegistry>,
        coordinator: Arc<SessionCoordinator>,
        admin_service: Arc<AdminService>,
        jwt_service: Arc<JwtService>,
    ) -> Self {
        Self {
            user_service,
            registry,
            coordinator,
            admin_service,
            jwt_service,
        }
    }

    /// 按配置组装引擎：注册表、在线状态表、事件总线与协调器
    pub fn from_config(
        config: &AppConfig,
        user_repository: Arc<dyn UserRepository>,
        chat_repository: Arc<dyn ChatRepository>,
        password_hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let retry = RetryPolicy::from(&config.retry);

        let user_service = Arc::new(UserService::new(UserServiceDependencies {
            user_repository: user_repository.clone(),
            password_hasher,
            clock: clock.clone(),
        }));
        let registry = Arc::new(ChatRegistry::new(ChatRegistryDependencies {
            user_repository: user_repository.clone(),
            chat_repository: chat_repository.clone(),
            clock: clock.clone(),
            retry: retry.clone(),
        }));
        let coordinator = Arc::new(SessionCoordinator::new(SessionCoordinatorDependencies {
            presence: Arc::new(PresenceTable::new()),
            event_bus: Arc::new(EventBus::new(&config.events)),
            registry: registry.clone(),
            user_repository: user_repository.clone(),
            credentials: user_service.clone(),
            clock,
            retry,
            eviction_timeout: Duration::from_millis(config.presence.eviction_timeout_ms),
        }));
        let admin_service = Arc::new(AdminService::new(AdminServiceDependencies {
            user_repository,
            chat_repository,
            coordinator: coordinator.clone(),
            admins: config.admin.usernames.iter().cloned().collect::<HashSet<_>>(),
        }));
        let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

        Self::new(user_service, registry, coordinator, admin_service, jwt_service)
    }
}
