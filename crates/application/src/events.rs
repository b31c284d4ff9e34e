//! 进程内事件总线
//!
//! 每个监听者拥有独立的有界缓冲区（`tokio::sync::broadcast`），发送永不阻塞：
//! 慢监听者溢出时丢弃最旧的事件，不会拖慢其他监听者，也不会影响发送方。

use std::collections::BTreeSet;

use config::{EventsConfig, FanoutScope};
use dashmap::DashMap;
use domain::{Message, SessionId, Username};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::presence::SessionHandle;

/// 会话被关闭的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// 同一用户在别处登录
    Replaced,
    /// 管理员清理了所有会话
    AdminCleared,
}

/// 推送给在线连接的事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Message {
        message: Message,
    },
    Presence {
        username: Username,
        online: bool,
        online_users: Vec<Username>,
    },
    SessionClosed {
        reason: CloseReason,
    },
}

struct Listener {
    username: Username,
    sender: broadcast::Sender<ChatEvent>,
}

/// 单个连接的事件流
pub struct EventSubscription {
    session_id: SessionId,
    receiver: broadcast::Receiver<ChatEvent>,
}

impl EventSubscription {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// 等待下一个事件；丢弃的事件只记录日志，监听者注销后返回 `None`
    pub async fn recv(&mut self) -> Option<ChatEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        session_id = %self.session_id,
                        skipped,
                        "监听者处理过慢，丢弃最旧的事件"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// 非阻塞读取，测试与批量冲刷时使用
    pub fn try_recv(&mut self) -> Option<ChatEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

pub struct EventBus {
    listeners: DashMap<SessionId, Listener>,
    buffer: usize,
    fanout: FanoutScope,
}

impl EventBus {
    pub fn new(config: &EventsConfig) -> Self {
        Self {
            listeners: DashMap::new(),
            buffer: config.listener_buffer.max(1),
            fanout: config.fanout,
        }
    }

    pub fn subscribe(&self, session: &SessionHandle) -> EventSubscription {
        let (sender, receiver) = broadcast::channel(self.buffer);
        self.listeners.insert(
            session.id(),
            Listener {
                username: session.username().clone(),
                sender,
            },
        );
        EventSubscription {
            session_id: session.id(),
            receiver,
        }
    }

    /// 注销监听者，其事件流随之结束
    pub fn unsubscribe(&self, session_id: SessionId) -> bool {
        self.listeners.remove(&session_id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// 只发给指定会话
    pub fn notify_session(&self, session_id: SessionId, event: ChatEvent) -> bool {
        match self.listeners.get(&session_id) {
            Some(listener) => listener.sender.send(event).is_ok(),
            None => false,
        }
    }

    /// 在线状态变化发给所有监听者
    pub fn broadcast_presence(
        &self,
        username: &Username,
        online: bool,
        snapshot: &BTreeSet<Username>,
    ) {
        let event = ChatEvent::Presence {
            username: username.clone(),
            online,
            online_users: snapshot.iter().cloned().collect(),
        };
        let delivered = self.dispatch(&event, |_| true);
        tracing::debug!(username = %username, online, delivered, "广播在线状态");
    }

    pub fn broadcast_message(&self, message: &Message) {
        let event = ChatEvent::Message {
            message: message.clone(),
        };
        let delivered = match self.fanout {
            FanoutScope::All => self.dispatch(&event, |_| true),
            FanoutScope::Participants => self.dispatch(&event, |listener| {
                message.audience().any(|member| *member == listener.username)
            }),
        };
        tracing::debug!(
            chat_key = %message.chat_key,
            message_id = %message.id,
            delivered,
            "广播消息"
        );
    }

    fn dispatch(&self, event: &ChatEvent, accepts: impl Fn(&Listener) -> bool) -> usize {
        let mut delivered = 0;
        let mut stale = Vec::new();
        for entry in self.listeners.iter() {
            if !accepts(entry.value()) {
                continue;
            }
            match entry.value().sender.send(event.clone()) {
                Ok(_) => delivered += 1,
                Err(_) => stale.push(*entry.key()),
            }
        }
        // 接收端已经释放的监听者
        for session_id in stale {
            tracing::debug!(session_id = %session_id, "移除失效的监听者");
            self.listeners.remove(&session_id);
        }
        delivered
    }
}
