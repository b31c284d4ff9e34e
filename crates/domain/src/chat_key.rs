//! 会话标识
//!
//! 由参与者集合推导出唯一、与顺序无关的会话键。参与者排序去重后用 `~` 拼接，
//! 用户名中不允许出现 `~`，因此不同集合不会得到相同的键。

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::Username;

/// 会话键中参与者之间的分隔符
pub const CHAT_KEY_SEPARATOR: char = '~';

/// 会话的规范键。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChatKey(String);

impl ChatKey {
    /// 根据参与者集合计算规范键，重复的参与者会被合并。
    pub fn canonical<'a, I>(participants: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = &'a Username>,
    {
        let unique: BTreeSet<&Username> = participants.into_iter().collect();
        if unique.len() < 2 {
            return Err(DomainError::invalid_participants(
                "a chat needs at least two distinct participants",
            ));
        }

        let joined = unique
            .iter()
            .map(|name| name.as_str())
            .collect::<Vec<_>>()
            .join(&CHAT_KEY_SEPARATOR.to_string());
        Ok(Self(joined))
    }

    /// 解析客户端传入的键；只接受规范形式（已排序且无重复）。
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let names = value
            .split(CHAT_KEY_SEPARATOR)
            .map(Username::parse)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| DomainError::invalid_argument("chat_key", "malformed chat key"))?;

        let key = Self::canonical(names.iter())?;
        if key.0 != value {
            return Err(DomainError::invalid_argument(
                "chat_key",
                "chat key is not in canonical form",
            ));
        }
        Ok(key)
    }

    /// 参与者（按字典序）
    pub fn participants(&self) -> Vec<Username> {
        self.0
            .split(CHAT_KEY_SEPARATOR)
            .filter_map(|name| Username::parse(name).ok())
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ChatKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ChatKey> for String {
    fn from(value: ChatKey) -> Self {
        value.0
    }
}
