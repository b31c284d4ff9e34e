//! 在线状态表
//!
//! 每个用户最多一个活跃会话。`admit` 原子地替换旧会话并把它交还给调用方，
//! `remove` 只有在会话 ID 匹配时才会删除，保证旧连接的断开不会把新连接挤下线。

use std::collections::BTreeSet;
use std::time::Duration;

use dashmap::DashMap;
use domain::{SessionId, Timestamp, Username};
use tokio_util::sync::CancellationToken;

/// 活跃会话的句柄，可被廉价克隆
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    username: Username,
    connected_at: Timestamp,
    /// 通知连接任务退出
    shutdown: CancellationToken,
    /// 连接任务退出后触发
    terminated: CancellationToken,
}

/// 由连接任务持有，drop 时表示连接已经真正关闭
#[derive(Debug)]
pub struct SessionGuard {
    terminated: CancellationToken,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.terminated.cancel();
    }
}

impl SessionHandle {
    pub fn new(username: Username, connected_at: Timestamp) -> (Self, SessionGuard) {
        let terminated = CancellationToken::new();
        let handle = Self {
            id: SessionId::generate(),
            username,
            connected_at,
            shutdown: CancellationToken::new(),
            terminated: terminated.clone(),
        };
        (handle, SessionGuard { terminated })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    pub fn connected_at(&self) -> Timestamp {
        self.connected_at
    }

    /// 连接任务在此等待关闭请求
    pub async fn shutdown_requested(&self) {
        self.shutdown.cancelled().await
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.is_cancelled()
    }

    /// 请求关闭并在超时内等待连接任务退出，返回是否按时退出
    pub async fn close(&self, timeout: Duration) -> bool {
        self.shutdown.cancel();
        tokio::time::timeout(timeout, self.terminated.cancelled())
            .await
            .is_ok()
    }
}

#[derive(Debug, Default)]
pub struct PresenceTable {
    sessions: DashMap<Username, SessionHandle>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记新会话，返回被替换的旧会话（调用方负责关闭它）
    pub fn admit(&self, session: SessionHandle) -> Option<SessionHandle> {
        let session_id = session.id;
        self.sessions
            .insert(session.username.clone(), session)
            .filter(|previous| previous.id != session_id)
    }

    /// 仅当当前登记的会话就是 `session_id` 时才删除
    pub fn remove(&self, username: &Username, session_id: SessionId) -> bool {
        self.sessions
            .remove_if(username, |_, session| session.id == session_id)
            .is_some()
    }

    pub fn is_online(&self, username: &Username) -> bool {
        self.sessions.contains_key(username)
    }

    pub fn active_session(&self, username: &Username) -> Option<SessionHandle> {
        self.sessions.get(username).map(|entry| entry.value().clone())
    }

    /// 当前在线用户的快照
    pub fn online_usernames(&self) -> BTreeSet<Username> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// 清空并返回所有会话
    pub fn drain(&self) -> Vec<SessionHandle> {
        let usernames: Vec<Username> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        usernames
            .iter()
            .filter_map(|username| self.sessions.remove(username).map(|(_, session)| session))
            .collect()
    }
}
