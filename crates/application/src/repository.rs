//! 存储接口
//!
//! 会话文档（元数据 + 消息序列）的插入与修改必须是原子的；
//! `insert_if_absent` 是“查找或创建”的唯一仲裁点。

use async_trait::async_trait;
use domain::{
    Chat, ChatKey, ChatMutation, DomainError, Message, PresenceStatus, RepositoryError, User,
    UserEmail, Username,
};
use serde::Deserialize;

/// 单页最大条数
pub const MAX_PAGE_LIMIT: u64 = 100;

/// 分页参数，limit 超过上限时截断为上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub skip: u64,
    pub limit: u64,
}

impl PageRequest {
    pub fn new(skip: i64, limit: i64) -> Result<Self, DomainError> {
        if skip < 0 {
            return Err(DomainError::invalid_argument("skip", "must not be negative"));
        }
        if limit <= 0 {
            return Err(DomainError::invalid_argument("limit", "must be positive"));
        }
        Ok(Self {
            skip: skip as u64,
            limit: (limit as u64).min(MAX_PAGE_LIMIT),
        })
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: MAX_PAGE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatSortField {
    #[default]
    LastUpdated,
    CreatedAt,
    UnreadCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChatListQuery {
    pub page: PageRequest,
    pub sort_by: ChatSortField,
    pub order: SortOrder,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 用户名或邮箱重复时返回 `RepositoryError::Conflict`
    async fn create(&self, user: User) -> Result<User, RepositoryError>;
    async fn update(&self, user: User) -> Result<User, RepositoryError>;
    async fn find_by_username(&self, username: &Username) -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError>;
    async fn set_presence(
        &self,
        username: &Username,
        presence: PresenceStatus,
    ) -> Result<(), RepositoryError>;
    async fn count(&self) -> Result<u64, RepositoryError>;
    async fn delete_all(&self) -> Result<u64, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn find_by_key(&self, key: &ChatKey) -> Result<Option<Chat>, RepositoryError>;

    /// 仅当键不存在时插入，返回是否由本次调用创建
    async fn insert_if_absent(&self, chat: Chat) -> Result<bool, RepositoryError>;

    /// 原子地应用一次修改，返回修改后的元数据。
    /// 重复追加同一 id 的消息不会产生第二条记录。
    async fn update(&self, key: &ChatKey, mutation: ChatMutation)
        -> Result<Chat, RepositoryError>;

    /// 按追加顺序返回消息
    async fn list_messages(
        &self,
        key: &ChatKey,
        page: PageRequest,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn list_for_participant(
        &self,
        username: &Username,
        query: ChatListQuery,
    ) -> Result<Vec<Chat>, RepositoryError>;

    async fn count(&self) -> Result<u64, RepositoryError>;
    async fn delete_all(&self) -> Result<u64, RepositoryError>;
}

/// 按查询条件排序，键作为次序保证结果稳定
pub fn sort_chats(chats: &mut [Chat], query: &ChatListQuery) {
    chats.sort_by(|a, b| {
        let ordering = match query.sort_by {
            ChatSortField::LastUpdated => a.last_updated.cmp(&b.last_updated),
            ChatSortField::CreatedAt => a.created_at.cmp(&b.created_at),
            ChatSortField::UnreadCount => a.unread_count.cmp(&b.unread_count),
        }
        .then_with(|| a.key.as_str().cmp(b.key.as_str()));
        match query.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    struct ChatDocument {
        chat: Chat,
        messages: Vec<Message>,
    }

    /// 进程内存储，用于开发环境与测试
    #[derive(Default)]
    pub struct MemoryStore {
        users: RwLock<HashMap<Username, User>>,
        chats: RwLock<HashMap<ChatKey, ChatDocument>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl UserRepository for MemoryStore {
        async fn create(&self, user: User) -> Result<User, RepositoryError> {
            let mut users = self.users.write().await;
            if users.contains_key(&user.username)
                || users.values().any(|existing| existing.email == user.email)
            {
                return Err(RepositoryError::Conflict);
            }
            users.insert(user.username.clone(), user.clone());
            Ok(user)
        }

        async fn update(&self, user: User) -> Result<User, RepositoryError> {
            let mut users = self.users.write().await;
            match users.get_mut(&user.username) {
                Some(existing) => {
                    *existing = user.clone();
                    Ok(user)
                }
                None => Err(RepositoryError::NotFound),
            }
        }

        async fn find_by_username(
            &self,
            username: &Username,
        ) -> Result<Option<User>, RepositoryError> {
            Ok(self.users.read().await.get(username).cloned())
        }

        async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError> {
            Ok(self
                .users
                .read()
                .await
                .values()
                .find(|user| &user.email == email)
                .cloned())
        }

        async fn set_presence(
            &self,
            username: &Username,
            presence: PresenceStatus,
        ) -> Result<(), RepositoryError> {
            let mut users = self.users.write().await;
            let user = users.get_mut(username).ok_or(RepositoryError::NotFound)?;
            user.presence = presence;
            Ok(())
        }

        async fn count(&self) -> Result<u64, RepositoryError> {
            Ok(self.users.read().await.len() as u64)
        }

        async fn delete_all(&self) -> Result<u64, RepositoryError> {
            let mut users = self.users.write().await;
            let removed = users.len() as u64;
            users.clear();
            Ok(removed)
        }
    }

    #[async_trait]
    impl ChatRepository for MemoryStore {
        async fn find_by_key(&self, key: &ChatKey) -> Result<Option<Chat>, RepositoryError> {
            Ok(self
                .chats
                .read()
                .await
                .get(key)
                .map(|document| document.chat.clone()))
        }

        async fn insert_if_absent(&self, chat: Chat) -> Result<bool, RepositoryError> {
            let mut chats = self.chats.write().await;
            if chats.contains_key(&chat.key) {
                return Ok(false);
            }
            chats.insert(
                chat.key.clone(),
                ChatDocument {
                    chat,
                    messages: Vec::new(),
                },
            );
            Ok(true)
        }

        async fn update(
            &self,
            key: &ChatKey,
            mutation: ChatMutation,
        ) -> Result<Chat, RepositoryError> {
            let mut chats = self.chats.write().await;
            let document = chats.get_mut(key).ok_or(RepositoryError::NotFound)?;
            if let ChatMutation::AppendMessage { message, .. } = &mutation {
                if document.messages.last().map(|last| last.id) == Some(message.id) {
                    return Ok(document.chat.clone());
                }
            }
            document.chat.apply(&mutation);
            if let ChatMutation::AppendMessage { message, .. } = mutation {
                document.messages.push(message);
            }
            Ok(document.chat.clone())
        }

        async fn list_messages(
            &self,
            key: &ChatKey,
            page: PageRequest,
        ) -> Result<Vec<Message>, RepositoryError> {
            let chats = self.chats.read().await;
            let document = chats.get(key).ok_or(RepositoryError::NotFound)?;
            Ok(document
                .messages
                .iter()
                .skip(page.skip as usize)
                .take(page.limit as usize)
                .cloned()
                .collect())
        }

        async fn list_for_participant(
            &self,
            username: &Username,
            query: ChatListQuery,
        ) -> Result<Vec<Chat>, RepositoryError> {
            let mut chats: Vec<Chat> = self
                .chats
                .read()
                .await
                .values()
                .filter(|document| document.chat.is_participant(username))
                .map(|document| document.chat.clone())
                .collect();
            sort_chats(&mut chats, &query);
            Ok(chats
                .into_iter()
                .skip(query.page.skip as usize)
                .take(query.page.limit as usize)
                .collect())
        }

        async fn count(&self) -> Result<u64, RepositoryError> {
            Ok(self.chats.read().await.len() as u64)
        }

        async fn delete_all(&self) -> Result<u64, RepositoryError> {
            let mut chats = self.chats.write().await;
            let removed = chats.len() as u64;
            chats.clear();
            Ok(removed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;
    use domain::{MessageContent, MessageId, PasswordHash};
    use time::macros::datetime;
    use uuid::Uuid;

    fn name(raw: &str) -> Username {
        Username::parse(raw).unwrap()
    }

    fn user(raw: &str) -> User {
        User::register(
            name(raw),
            UserEmail::parse(format!("{raw}@example.com")).unwrap(),
            PasswordHash::new("hash").unwrap(),
            datetime!(2024-01-01 00:00 UTC),
        )
    }

    fn chat(a: &str, b: &str) -> Chat {
        let key = ChatKey::canonical([name(a), name(b)].iter()).unwrap();
        Chat::open(key, datetime!(2024-01-01 00:00 UTC))
    }

    #[test]
    fn page_request_caps_and_rejects() {
        assert_eq!(PageRequest::new(0, 500).unwrap().limit, MAX_PAGE_LIMIT);
        assert_eq!(PageRequest::new(3, 10).unwrap(), PageRequest { skip: 3, limit: 10 });
        assert!(PageRequest::new(0, 0).is_err());
        assert!(PageRequest::new(-1, 10).is_err());
    }

    #[tokio::test]
    async fn user_uniqueness_is_enforced() {
        let store = MemoryStore::new();
        store.create(user("alice")).await.unwrap();
        assert_eq!(
            store.create(user("alice")).await.unwrap_err(),
            RepositoryError::Conflict
        );

        let mut other = user("alice2");
        other.email = UserEmail::parse("alice@example.com").unwrap();
        assert_eq!(store.create(other).await.unwrap_err(), RepositoryError::Conflict);
    }

    #[tokio::test]
    async fn insert_if_absent_only_once() {
        let store = MemoryStore::new();
        assert!(store.insert_if_absent(chat("alice", "bob")).await.unwrap());
        assert!(!store.insert_if_absent(chat("bob", "alice")).await.unwrap());
        assert_eq!(ChatRepository::count(&store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_appends_messages_in_order() {
        let store = MemoryStore::new();
        let chat = chat("alice", "bob");
        store.insert_if_absent(chat.clone()).await.unwrap();

        for text in ["one", "two", "three"] {
            let message = Message::compose(
                MessageId::new(Uuid::new_v4()),
                &chat,
                name("alice"),
                MessageContent::new(text).unwrap(),
                datetime!(2024-01-01 00:01 UTC),
            )
            .unwrap();
            let current = store.find_by_key(&chat.key).await.unwrap().unwrap();
            ChatRepository::update(&store, &chat.key, current.append(message))
                .await
                .unwrap();
        }

        let messages = store
            .list_messages(&chat.key, PageRequest::new(1, 10).unwrap())
            .await
            .unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "three"]);

        let stored = store.find_by_key(&chat.key).await.unwrap().unwrap();
        assert_eq!(stored.message_count, 3);
        assert_eq!(stored.unread_count, 3);
    }

    #[tokio::test]
    async fn repeated_append_of_same_message_is_ignored() {
        let store = MemoryStore::new();
        let chat = chat("alice", "bob");
        store.insert_if_absent(chat.clone()).await.unwrap();

        let message = Message::compose(
            MessageId::new(Uuid::new_v4()),
            &chat,
            name("alice"),
            MessageContent::new("once").unwrap(),
            datetime!(2024-01-01 00:01 UTC),
        )
        .unwrap();
        let mutation = chat.append(message);
        let first = ChatRepository::update(&store, &chat.key, mutation.clone())
            .await
            .unwrap();
        let second = ChatRepository::update(&store, &chat.key, mutation)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(second.message_count, 1);
        assert_eq!(second.unread_count, 1);
        let messages = store
            .list_messages(&chat.key, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn lists_participant_chats_sorted() {
        let store = MemoryStore::new();
        let mut older = chat("alice", "bob");
        older.unread_count = 5;
        let mut newer = chat("alice", "carol");
        newer.last_updated = datetime!(2024-02-01 00:00 UTC);
        store.insert_if_absent(older).await.unwrap();
        store.insert_if_absent(newer).await.unwrap();
        store.insert_if_absent(chat("bob", "carol")).await.unwrap();

        let chats = store
            .list_for_participant(&name("alice"), ChatListQuery::default())
            .await
            .unwrap();
        let keys: Vec<_> = chats.iter().map(|c| c.key.as_str().to_string()).collect();
        assert_eq!(keys, vec!["alice~carol", "alice~bob"]);

        let by_unread = store
            .list_for_participant(
                &name("alice"),
                ChatListQuery {
                    sort_by: ChatSortField::UnreadCount,
                    order: SortOrder::Asc,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_unread[0].key.as_str(), "alice~carol");
    }
}
