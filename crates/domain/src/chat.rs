//! 会话实体
//!
//! 会话由参与者集合唯一确定。消息序列保存在存储层，这里只保存元数据，
//! 以及追加消息时元数据的推导规则（预览、未读计数）。

use serde::{Deserialize, Serialize};

use crate::chat_key::ChatKey;
use crate::message::Message;
use crate::value_objects::{Timestamp, Username};

/// 最新消息预览的最大长度（字符数）
pub const PREVIEW_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub key: ChatKey,
    /// 参与者，按字典序排列
    pub participants: Vec<Username>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: Timestamp,
    /// 最后一条消息的发送者，新会话为空
    pub last_updated_by: Option<Username>,
    pub latest_message_preview: String,
    pub unread_count: u32,
    pub message_count: u64,
}

/// 对会话文档的一次原子修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMutation {
    /// 追加消息并同步更新元数据
    AppendMessage {
        message: Message,
        latest_message_preview: String,
        unread_count: u32,
    },
    /// 已读，未读计数清零
    ResetUnread,
}

impl Chat {
    pub fn open(key: ChatKey, now: Timestamp) -> Self {
        let participants = key.participants();
        Self {
            key,
            participants,
            created_at: now,
            last_updated: now,
            last_updated_by: None,
            latest_message_preview: String::new(),
            unread_count: 0,
            message_count: 0,
        }
    }

    pub fn is_participant(&self, username: &Username) -> bool {
        self.participants.binary_search(username).is_ok()
    }

    /// 同一发送者连续发送则累加，否则从 1 重新计数
    pub fn next_unread_count(&self, sender: &Username) -> u32 {
        match &self.last_updated_by {
            Some(last) if last == sender => self.unread_count.saturating_add(1),
            _ => 1,
        }
    }

    /// 计算追加消息需要执行的修改，调用方负责在会话锁内执行。
    pub fn append(&self, message: Message) -> ChatMutation {
        let unread_count = self.next_unread_count(&message.sender);
        let latest_message_preview = preview(message.content.as_str());
        ChatMutation::AppendMessage {
            message,
            latest_message_preview,
            unread_count,
        }
    }

    /// 将修改应用到元数据上（消息本身由存储层追加到序列末尾）
    pub fn apply(&mut self, mutation: &ChatMutation) {
        match mutation {
            ChatMutation::AppendMessage {
                message,
                latest_message_preview,
                unread_count,
            } => {
                self.last_updated = message.timestamp;
                self.last_updated_by = Some(message.sender.clone());
                self.latest_message_preview = latest_message_preview.clone();
                self.unread_count = *unread_count;
                self.message_count += 1;
            }
            ChatMutation::ResetUnread => {
                self.unread_count = 0;
            }
        }
    }
}

/// 按字符截断，避免切断多字节字符
pub fn preview(content: &str) -> String {
    content.chars().take(PREVIEW_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::{MessageContent, MessageId};
    use crate::DomainError;
    use time::macros::datetime;
    use uuid::Uuid;

    fn name(raw: &str) -> Username {
        Username::parse(raw).unwrap()
    }

    fn chat() -> Chat {
        let key = ChatKey::canonical([name("bob"), name("alice")].iter()).unwrap();
        Chat::open(key, datetime!(2024-01-01 00:00 UTC))
    }

    fn send(chat: &mut Chat, sender: &str, content: &str) -> Message {
        let message = Message::compose(
            MessageId::new(Uuid::new_v4()),
            chat,
            name(sender),
            MessageContent::new(content).unwrap(),
            datetime!(2024-01-01 10:00 UTC),
        )
        .unwrap();
        let mutation = chat.append(message.clone());
        chat.apply(&mutation);
        message
    }

    #[test]
    fn new_chat_has_empty_metadata() {
        let chat = chat();
        assert_eq!(chat.participants, vec![name("alice"), name("bob")]);
        assert_eq!(chat.unread_count, 0);
        assert!(chat.last_updated_by.is_none());
        assert!(chat.latest_message_preview.is_empty());
    }

    #[test]
    fn unread_counter_accumulates_per_sender() {
        let mut chat = chat();
        send(&mut chat, "alice", "one");
        assert_eq!(chat.unread_count, 1);
        send(&mut chat, "alice", "two");
        assert_eq!(chat.unread_count, 2);
        send(&mut chat, "bob", "three");
        assert_eq!(chat.unread_count, 1);
        assert_eq!(chat.last_updated_by, Some(name("bob")));

        chat.apply(&ChatMutation::ResetUnread);
        assert_eq!(chat.unread_count, 0);
        send(&mut chat, "bob", "four");
        assert_eq!(chat.unread_count, 1);
        assert_eq!(chat.message_count, 4);
    }

    #[test]
    fn receivers_exclude_sender() {
        let mut chat = chat();
        let message = send(&mut chat, "alice", "hi");
        assert_eq!(message.receivers, vec![name("bob")]);
        assert_eq!(message.audience().count(), 2);
    }

    #[test]
    fn outsiders_cannot_compose() {
        let chat = chat();
        let err = Message::compose(
            MessageId::new(Uuid::new_v4()),
            &chat,
            name("mallory"),
            MessageContent::new("hi").unwrap(),
            datetime!(2024-01-01 10:00 UTC),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::SenderNotParticipant { .. }));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long = "é".repeat(PREVIEW_MAX_CHARS + 10);
        assert_eq!(preview(&long).chars().count(), PREVIEW_MAX_CHARS);
        assert_eq!(preview("short"), "short");
    }
}
