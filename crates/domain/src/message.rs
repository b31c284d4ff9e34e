use serde::{Deserialize, Serialize};

use crate::chat::Chat;
use crate::chat_key::ChatKey;
use crate::errors::DomainError;
use crate::value_objects::{MessageContent, MessageId, Timestamp, Username};

/// 会话中的一条消息，追加后不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_key: ChatKey,
    pub sender: Username,
    pub content: MessageContent,
    /// 参与者中除发送者以外的用户
    pub receivers: Vec<Username>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: Timestamp,
}

impl Message {
    /// 在指定会话中创建消息，发送者必须是参与者。
    pub fn compose(
        id: MessageId,
        chat: &Chat,
        sender: Username,
        content: MessageContent,
        timestamp: Timestamp,
    ) -> Result<Self, DomainError> {
        if !chat.is_participant(&sender) {
            return Err(DomainError::sender_not_participant(
                sender.as_str(),
                chat.key.as_str(),
            ));
        }

        let receivers = chat
            .participants
            .iter()
            .filter(|participant| **participant != sender)
            .cloned()
            .collect();

        Ok(Self {
            id,
            chat_key: chat.key.clone(),
            sender,
            content,
            receivers,
            timestamp,
        })
    }

    /// 发送者与接收者合起来就是会话的全部参与者
    pub fn audience(&self) -> impl Iterator<Item = &Username> {
        std::iter::once(&self.sender).chain(self.receivers.iter())
    }
}
