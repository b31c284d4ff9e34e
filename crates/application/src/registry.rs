//! 会话注册表
//!
//! 负责按参与者集合查找或创建会话，并在会话级互斥锁内串行化
//! “追加消息 + 更新元数据”与“清零未读”。

use std::sync::Arc;

use domain::{
    Chat, ChatKey, ChatMutation, DomainError, Message, MessageContent, MessageId, RepositoryError,
    Timestamp, Username,
};
use uuid::Uuid;

use crate::{
    clock::Clock,
    dto::ChatSummaryDto,
    error::ApplicationError,
    locks::KeyedLocks,
    repository::{ChatListQuery, ChatRepository, PageRequest, UserRepository, MAX_PAGE_LIMIT},
    retry::{retry_transient, RetryPolicy},
    transcript,
};

pub struct ChatRegistryDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub chat_repository: Arc<dyn ChatRepository>,
    pub clock: Arc<dyn Clock>,
    pub retry: RetryPolicy,
}

pub struct ChatRegistry {
    deps: ChatRegistryDependencies,
    /// 会话级锁，串行化同一会话的写操作
    locks: KeyedLocks<ChatKey>,
}

impl ChatRegistry {
    pub fn new(deps: ChatRegistryDependencies) -> Self {
        Self {
            deps,
            locks: KeyedLocks::new(),
        }
    }

    /// 查找或创建会话，返回 `(会话, 是否由本次调用创建)`
    pub async fn get_or_create_chat(
        &self,
        participants: &[Username],
    ) -> Result<(Chat, bool), ApplicationError> {
        let key = ChatKey::canonical(participants)?;
        self.ensure_participants_exist(&key).await?;

        if let Some(chat) = self.find(&key).await? {
            return Ok((chat, false));
        }

        let chat = Chat::open(key.clone(), self.deps.clock.now());
        if self.insert_if_absent(&chat).await? {
            tracing::info!(chat_key = %key, "创建会话");
            return Ok((chat, true));
        }

        // 并发创建中落败，返回胜出者创建的会话
        let existing = self.find(&key).await?.ok_or(DomainError::ChatNotFound)?;
        Ok((existing, false))
    }

    /// 显式创建，会话已存在时返回冲突
    pub async fn create_chat(&self, participants: &[Username]) -> Result<Chat, ApplicationError> {
        let key = ChatKey::canonical(participants)?;
        self.ensure_participants_exist(&key).await?;

        let chat = Chat::open(key.clone(), self.deps.clock.now());
        if !self.insert_if_absent(&chat).await? {
            return Err(DomainError::ChatAlreadyExists.into());
        }
        tracing::info!(chat_key = %key, "创建会话");
        Ok(chat)
    }

    pub async fn find_chat(&self, key: &ChatKey) -> Result<Chat, ApplicationError> {
        Ok(self.find(key).await?.ok_or(DomainError::ChatNotFound)?)
    }

    pub async fn append_message(
        &self,
        key: &ChatKey,
        sender: &Username,
        content: MessageContent,
        timestamp: Timestamp,
    ) -> Result<Message, ApplicationError> {
        self.locks.run(key, || async {
            let chat = self.find(key).await?.ok_or(DomainError::ChatNotFound)?;
            let message = Message::compose(
                MessageId::new(Uuid::new_v4()),
                &chat,
                sender.clone(),
                content,
                timestamp,
            )?;
            let mutation = chat.append(message.clone());
            self.apply(key, mutation).await?;
            Ok::<_, ApplicationError>(message)
        })
        .await
    }

    /// 未读计数清零；会话不存在时只记录日志
    pub async fn mark_read(&self, key: &ChatKey) -> Result<(), ApplicationError> {
        self.locks.run(key, || async {
            if self.find(key).await?.is_none() {
                tracing::info!(chat_key = %key, "标记已读的会话不存在，忽略");
                return Ok(());
            }
            match self.apply(key, ChatMutation::ResetUnread).await {
                Err(ApplicationError::Repository(RepositoryError::NotFound)) => {
                    tracing::info!(chat_key = %key, "标记已读时会话已被删除，忽略");
                    Ok(())
                }
                other => other.map(|_| ()),
            }
        })
        .await
    }

    pub async fn list_messages(
        &self,
        key: &ChatKey,
        page: PageRequest,
    ) -> Result<Vec<Message>, ApplicationError> {
        let chat_repository = &self.deps.chat_repository;
        retry_transient(&self.deps.retry, "list_messages", || {
            chat_repository.list_messages(key, page)
        })
        .await
        .map_err(|err| match err {
            RepositoryError::NotFound => DomainError::ChatNotFound.into(),
            other => other.into(),
        })
    }

    pub async fn list_chats_for_user(
        &self,
        username: &Username,
        query: ChatListQuery,
    ) -> Result<Vec<ChatSummaryDto>, ApplicationError> {
        let chat_repository = &self.deps.chat_repository;
        let chats = retry_transient(&self.deps.retry, "list_chats_for_user", || {
            chat_repository.list_for_participant(username, query)
        })
        .await?;
        Ok(chats.iter().map(ChatSummaryDto::from).collect())
    }

    /// 导出完整聊天记录为纯文本
    pub async fn export_transcript(&self, key: &ChatKey) -> Result<String, ApplicationError> {
        let mut messages = Vec::new();
        let mut skip = 0;
        loop {
            let page = self
                .list_messages(
                    key,
                    PageRequest {
                        skip,
                        limit: MAX_PAGE_LIMIT,
                    },
                )
                .await?;
            let fetched = page.len() as u64;
            messages.extend(page);
            if fetched < MAX_PAGE_LIMIT {
                break;
            }
            skip += fetched;
        }
        Ok(transcript::render(&messages))
    }

    async fn ensure_participants_exist(&self, key: &ChatKey) -> Result<(), ApplicationError> {
        let user_repository = &self.deps.user_repository;
        for participant in key.participants() {
            let user = retry_transient(&self.deps.retry, "find_user", || {
                user_repository.find_by_username(&participant)
            })
            .await?;
            if user.is_none() {
                return Err(DomainError::participant_not_found(participant.as_str()).into());
            }
        }
        Ok(())
    }

    async fn find(&self, key: &ChatKey) -> Result<Option<Chat>, ApplicationError> {
        let chat_repository = &self.deps.chat_repository;
        Ok(retry_transient(&self.deps.retry, "find_chat", || {
            chat_repository.find_by_key(key)
        })
        .await?)
    }

    async fn insert_if_absent(&self, chat: &Chat) -> Result<bool, ApplicationError> {
        let chat_repository = &self.deps.chat_repository;
        Ok(retry_transient(&self.deps.retry, "insert_chat", || {
            chat_repository.insert_if_absent(chat.clone())
        })
        .await?)
    }

    async fn apply(&self, key: &ChatKey, mutation: ChatMutation) -> Result<Chat, ApplicationError> {
        let chat_repository = &self.deps.chat_repository;
        Ok(retry_transient(&self.deps.retry, "update_chat", || {
            chat_repository.update(key, mutation.clone())
        })
        .await?)
    }
}
