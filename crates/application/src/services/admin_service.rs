use std::collections::HashSet;
use std::sync::Arc;

use domain::Username;

use crate::{
    dto::{AdminStatsDto, ResetSummaryDto},
    error::ApplicationError,
    repository::{ChatRepository, UserRepository},
    services::SessionCoordinator,
};

pub struct AdminServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub chat_repository: Arc<dyn ChatRepository>,
    pub coordinator: Arc<SessionCoordinator>,
    /// 允许执行管理操作的用户名
    pub admins: HashSet<String>,
}

/// 管理面板：统计、清理在线会话、清空全部数据
pub struct AdminService {
    deps: AdminServiceDependencies,
}

impl AdminService {
    pub fn new(deps: AdminServiceDependencies) -> Self {
        Self { deps }
    }

    pub fn is_admin(&self, username: &Username) -> bool {
        self.deps.admins.contains(username.as_str())
    }

    pub async fn stats(&self, requester: &Username) -> Result<AdminStatsDto, ApplicationError> {
        self.authorize(requester)?;
        Ok(AdminStatsDto {
            total_users: self.deps.user_repository.count().await?,
            total_chats: self.deps.chat_repository.count().await?,
            online_users: self.deps.coordinator.online_usernames().len(),
            active_sockets: self.deps.coordinator.active_sockets(),
        })
    }

    pub async fn clear_sessions(&self, requester: &Username) -> Result<usize, ApplicationError> {
        self.authorize(requester)?;
        let closed = self.deps.coordinator.clear_all_sessions().await;
        tracing::warn!(requester = %requester, closed, "管理员清理了所有在线会话");
        Ok(closed)
    }

    /// 删除所有用户与会话，同时关闭在线会话
    pub async fn reset_all(
        &self,
        requester: &Username,
    ) -> Result<ResetSummaryDto, ApplicationError> {
        self.authorize(requester)?;
        let sessions_closed = self.deps.coordinator.clear_all_sessions().await;
        let chats_deleted = self.deps.chat_repository.delete_all().await?;
        let users_deleted = self.deps.user_repository.delete_all().await?;

        tracing::warn!(
            requester = %requester,
            sessions_closed,
            chats_deleted,
            users_deleted,
            "管理员清空了全部数据"
        );
        Ok(ResetSummaryDto {
            sessions_closed,
            users_deleted,
            chats_deleted,
        })
    }

    fn authorize(&self, requester: &Username) -> Result<(), ApplicationError> {
        if self.is_admin(requester) {
            Ok(())
        } else {
            tracing::info!(requester = %requester, "非管理员尝试执行管理操作");
            Err(ApplicationError::Authorization)
        }
    }
}
