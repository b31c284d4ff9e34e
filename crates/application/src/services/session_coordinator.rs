//! 单个连接的编排器
//!
//! 连接状态：`Connecting -> Authenticated -> Active -> Closed`。
//! 传输层每收到一个事件就调用对应的方法，协调器负责在线状态表、
//! 会话注册表与事件总线之间的顺序。

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use domain::{ChatKey, DomainError, Message, MessageContent, PresenceStatus, Username};
use futures::future::join_all;

use crate::{
    clock::Clock,
    error::ApplicationError,
    events::{ChatEvent, CloseReason, EventBus, EventSubscription},
    locks::KeyedLocks,
    password::CredentialVerifier,
    presence::{PresenceTable, SessionGuard, SessionHandle},
    registry::ChatRegistry,
    repository::UserRepository,
    retry::{retry_transient, RetryPolicy},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Active,
    Closed,
}

/// 传输层为每个连接持有一份
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    username: Option<Username>,
    session: Option<SessionHandle>,
}

impl Connection {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn username(&self) -> Option<&Username> {
        self.username.as_ref()
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

/// 连接进入 Active 后交给传输层的资源
pub struct ActiveSession {
    pub handle: SessionHandle,
    /// 连接任务退出时释放
    pub guard: SessionGuard,
    pub events: EventSubscription,
}

pub struct SessionCoordinatorDependencies {
    pub presence: Arc<PresenceTable>,
    pub event_bus: Arc<EventBus>,
    pub registry: Arc<ChatRegistry>,
    pub user_repository: Arc<dyn UserRepository>,
    pub credentials: Arc<dyn CredentialVerifier>,
    pub clock: Arc<dyn Clock>,
    pub retry: RetryPolicy,
    /// 等待被挤下线的连接退出的时间上限
    pub eviction_timeout: Duration,
}

pub struct SessionCoordinator {
    deps: SessionCoordinatorDependencies,
    /// 串行化同一用户的在线状态持久化与广播
    presence_locks: KeyedLocks<Username>,
}

impl SessionCoordinator {
    pub fn new(deps: SessionCoordinatorDependencies) -> Self {
        Self {
            deps,
            presence_locks: KeyedLocks::new(),
        }
    }

    pub fn open(&self) -> Connection {
        Connection {
            state: ConnectionState::Connecting,
            username: None,
            session: None,
        }
    }

    /// 用户名 + 密码校验；失败时连接直接关闭，不触碰在线状态表
    pub async fn authenticate(
        &self,
        conn: &mut Connection,
        username: &str,
        password: &str,
    ) -> Result<(), ApplicationError> {
        expect_state(conn, ConnectionState::Connecting)?;

        match self
            .deps
            .credentials
            .verify_credentials(username, password)
            .await
        {
            Ok(true) => match Username::parse(username) {
                Ok(username) => {
                    conn.username = Some(username);
                    conn.state = ConnectionState::Authenticated;
                    Ok(())
                }
                Err(_) => {
                    conn.close();
                    Err(ApplicationError::Authentication)
                }
            },
            Ok(false) => {
                tracing::info!(username, "连接认证失败");
                conn.close();
                Err(ApplicationError::Authentication)
            }
            Err(err) => {
                tracing::warn!(username, error = %err, "凭证校验出错");
                conn.close();
                Err(err)
            }
        }
    }

    /// 身份已由外部（例如令牌）确认，只检查用户仍然存在
    pub async fn authenticate_verified(
        &self,
        conn: &mut Connection,
        username: Username,
    ) -> Result<(), ApplicationError> {
        expect_state(conn, ConnectionState::Connecting)?;

        let user_repository = &self.deps.user_repository;
        let found = retry_transient(&self.deps.retry, "find_user", || {
            user_repository.find_by_username(&username)
        })
        .await;
        match found {
            Ok(Some(_)) => {
                conn.username = Some(username);
                conn.state = ConnectionState::Authenticated;
                Ok(())
            }
            Ok(None) => {
                conn.close();
                Err(ApplicationError::Authentication)
            }
            Err(err) => {
                conn.close();
                Err(err.into())
            }
        }
    }

    /// 登记会话；同一用户的旧会话会被通知并关闭
    pub async fn on_connect(
        &self,
        conn: &mut Connection,
    ) -> Result<ActiveSession, ApplicationError> {
        expect_state(conn, ConnectionState::Authenticated)?;
        let username = conn
            .username
            .clone()
            .ok_or_else(|| ApplicationError::invalid_state("authenticated without username"))?;

        let (handle, guard) = SessionHandle::new(username.clone(), self.deps.clock.now());
        // 先订阅，新连接也能收到自己上线的广播
        let events = self.deps.event_bus.subscribe(&handle);

        if let Some(evicted) = self.deps.presence.admit(handle.clone()) {
            tracing::info!(
                username = %username,
                evicted_session = %evicted.id(),
                session_id = %handle.id(),
                "新连接替换旧会话"
            );
            self.evict(&evicted, CloseReason::Replaced).await;
        }

        self.publish_presence(&username).await;

        conn.session = Some(handle.clone());
        conn.state = ConnectionState::Active;
        tracing::info!(username = %username, session_id = %handle.id(), "会话已激活");

        Ok(ActiveSession {
            handle,
            guard,
            events,
        })
    }

    /// 在已有会话中发送消息
    pub async fn on_message(
        &self,
        conn: &Connection,
        chat_key: &ChatKey,
        content: &str,
    ) -> Result<Message, ApplicationError> {
        let sender = active_username(conn)?;
        self.send_message(sender, chat_key, content).await
    }

    /// 按接收者发送消息，会话不存在时自动创建
    pub async fn on_message_to(
        &self,
        conn: &Connection,
        receiver: &Username,
        content: &str,
    ) -> Result<Message, ApplicationError> {
        let sender = active_username(conn)?;
        self.send_direct(sender, receiver, content).await
    }

    pub async fn on_mark_read(
        &self,
        conn: &Connection,
        chat_key: &ChatKey,
    ) -> Result<(), ApplicationError> {
        let reader = active_username(conn)?;
        self.mark_read(reader, chat_key).await
    }

    /// 连接断开；只有当表中登记的仍是本会话时才广播下线
    pub async fn on_disconnect(&self, conn: &mut Connection) -> bool {
        let previous = std::mem::replace(&mut conn.state, ConnectionState::Closed);
        let Some(session) = conn.session.take() else {
            return false;
        };
        if previous != ConnectionState::Active {
            return false;
        }

        self.deps.event_bus.unsubscribe(session.id());
        let removed = self.deps.presence.remove(session.username(), session.id());
        if removed {
            tracing::info!(
                username = %session.username(),
                session_id = %session.id(),
                "会话断开，用户下线"
            );
            self.publish_presence(session.username()).await;
        } else {
            tracing::debug!(
                username = %session.username(),
                session_id = %session.id(),
                "会话已被替换，断开时不广播下线"
            );
        }
        removed
    }

    /// 消息先持久化再广播
    pub async fn send_message(
        &self,
        sender: &Username,
        chat_key: &ChatKey,
        content: &str,
    ) -> Result<Message, ApplicationError> {
        let content = MessageContent::new(content)?;
        let message = self
            .deps
            .registry
            .append_message(chat_key, sender, content, self.deps.clock.now())
            .await?;
        self.deps.event_bus.broadcast_message(&message);
        Ok(message)
    }

    pub async fn send_direct(
        &self,
        sender: &Username,
        receiver: &Username,
        content: &str,
    ) -> Result<Message, ApplicationError> {
        // 在触碰共享状态之前完成校验
        MessageContent::new(content)?;
        let (chat, _) = self
            .deps
            .registry
            .get_or_create_chat(&[sender.clone(), receiver.clone()])
            .await?;
        self.send_message(sender, &chat.key, content).await
    }

    /// 只有参与者才能清零未读；会话不存在时什么也不做
    pub async fn mark_read(
        &self,
        reader: &Username,
        chat_key: &ChatKey,
    ) -> Result<(), ApplicationError> {
        match self.deps.registry.find_chat(chat_key).await {
            Ok(chat) if !chat.is_participant(reader) => Err(ApplicationError::Authorization),
            Ok(_) => self.deps.registry.mark_read(chat_key).await,
            Err(ApplicationError::Domain(DomainError::ChatNotFound)) => {
                tracing::info!(chat_key = %chat_key, "标记已读的会话不存在，忽略");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// 关闭所有在线会话并广播下线，返回关闭的数量
    pub async fn clear_all_sessions(&self) -> usize {
        let sessions = self.deps.presence.drain();
        // 并行等待，总耗时以单个淘汰超时为上限
        join_all(
            sessions
                .iter()
                .map(|session| self.evict(session, CloseReason::AdminCleared)),
        )
        .await;
        for session in &sessions {
            self.publish_presence(session.username()).await;
        }
        tracing::info!(closed = sessions.len(), "已清理所有在线会话");
        sessions.len()
    }

    pub fn is_online(&self, username: &Username) -> bool {
        self.deps.presence.is_online(username)
    }

    pub fn online_usernames(&self) -> BTreeSet<Username> {
        self.deps.presence.online_usernames()
    }

    pub fn active_sockets(&self) -> usize {
        self.deps.event_bus.listener_count()
    }

    /// 通知旧会话并在超时内等待其退出，超时只记录告警
    async fn evict(&self, session: &SessionHandle, reason: CloseReason) {
        self.deps
            .event_bus
            .notify_session(session.id(), ChatEvent::SessionClosed { reason });
        let closed = session.close(self.deps.eviction_timeout).await;
        self.deps.event_bus.unsubscribe(session.id());
        if !closed {
            tracing::warn!(
                username = %session.username(),
                session_id = %session.id(),
                timeout_ms = self.deps.eviction_timeout.as_millis() as u64,
                "旧会话未在超时内关闭"
            );
        }
    }

    /// 以在线状态表为准持久化并广播，同一用户的调用串行执行
    async fn publish_presence(&self, username: &Username) {
        self.presence_locks
            .run(username, || async {
                let online = self.deps.presence.is_online(username);
                let status = PresenceStatus::from_online(online);
                let user_repository = &self.deps.user_repository;
                let persisted = retry_transient(&self.deps.retry, "set_presence", || {
                    user_repository.set_presence(username, status)
                })
                .await;
                if let Err(err) = persisted {
                    tracing::warn!(
                        username = %username,
                        status = status.as_str(),
                        error = %err,
                        "在线状态持久化失败"
                    );
                }
                self.deps.event_bus.broadcast_presence(
                    username,
                    online,
                    &self.deps.presence.online_usernames(),
                );
            })
            .await
    }
}

fn expect_state(conn: &Connection, expected: ConnectionState) -> Result<(), ApplicationError> {
    if conn.state != expected {
        return Err(ApplicationError::invalid_state(format!(
            "expected {expected:?}, found {:?}",
            conn.state
        )));
    }
    Ok(())
}

/// 已被替换的会话不能再发消息
fn active_username(conn: &Connection) -> Result<&Username, ApplicationError> {
    expect_state(conn, ConnectionState::Active)?;
    match (&conn.username, &conn.session) {
        (Some(username), Some(session)) if !session.is_shutdown_requested() => Ok(username),
        _ => Err(ApplicationError::invalid_state("session is closing")),
    }
}
