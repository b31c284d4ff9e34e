use std::sync::Arc;

use application::repository::{
    ChatListQuery, ChatRepository, ChatSortField, PageRequest, SortOrder, UserRepository,
};
use async_trait::async_trait;
use domain::{
    Chat, ChatKey, ChatMutation, Message, MessageContent, MessageId, PasswordHash, PresenceStatus,
    RepositoryError, User, UserEmail, UserProfile, Username,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// 连接类错误视为暂时不可用，唯一约束冲突单独区分
fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => RepositoryError::unavailable(err.to_string()),
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

fn parse_username(value: String) -> Result<Username, RepositoryError> {
    Username::parse(value).map_err(|err| invalid_data(err.to_string()))
}

#[derive(Debug, FromRow)]
struct UserRecord {
    username: String,
    email: String,
    password_hash: String,
    presence: String,
    about_me: String,
    timezone: String,
    avatar: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let presence = match value.presence.as_str() {
            "online" => PresenceStatus::Online,
            "offline" => PresenceStatus::Offline,
            other => return Err(invalid_data(format!("unknown presence status: {other}"))),
        };

        Ok(User {
            username: parse_username(value.username)?,
            email: UserEmail::parse(value.email).map_err(|err| invalid_data(err.to_string()))?,
            password: PasswordHash::new(value.password_hash)
                .map_err(|err| invalid_data(err.to_string()))?,
            presence,
            profile: UserProfile {
                about_me: value.about_me,
                timezone: value.timezone,
                avatar: value.avatar,
            },
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ChatRecord {
    chat_key: String,
    participants: Vec<String>,
    created_at: OffsetDateTime,
    last_updated: OffsetDateTime,
    last_updated_by: Option<String>,
    latest_message_preview: String,
    unread_count: i32,
    message_count: i64,
}

impl TryFrom<ChatRecord> for Chat {
    type Error = RepositoryError;

    fn try_from(value: ChatRecord) -> Result<Self, Self::Error> {
        let key = ChatKey::parse(value.chat_key).map_err(|err| invalid_data(err.to_string()))?;
        let mut participants = value
            .participants
            .into_iter()
            .map(parse_username)
            .collect::<Result<Vec<_>, _>>()?;
        participants.sort();

        Ok(Chat {
            key,
            participants,
            created_at: value.created_at,
            last_updated: value.last_updated,
            last_updated_by: value.last_updated_by.map(parse_username).transpose()?,
            latest_message_preview: value.latest_message_preview,
            unread_count: u32::try_from(value.unread_count)
                .map_err(|_| invalid_data("negative unread_count"))?,
            message_count: u64::try_from(value.message_count)
                .map_err(|_| invalid_data("negative message_count"))?,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    chat_key: String,
    sender: String,
    receivers: Vec<String>,
    content: String,
    sent_at: OffsetDateTime,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        Ok(Message {
            id: MessageId::from(value.id),
            chat_key: ChatKey::parse(value.chat_key)
                .map_err(|err| invalid_data(err.to_string()))?,
            sender: parse_username(value.sender)?,
            content: MessageContent::new(value.content)
                .map_err(|err| invalid_data(err.to_string()))?,
            receivers: value
                .receivers
                .into_iter()
                .map(parse_username)
                .collect::<Result<Vec<_>, _>>()?,
            timestamp: value.sent_at,
        })
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (username, email, password_hash, presence, about_me, timezone, avatar, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING username, email, password_hash, presence, about_me, timezone, avatar, created_at, updated_at
            "#,
        )
        .bind(user.username.as_str())
        .bind(user.email.as_str())
        .bind(user.password.as_str())
        .bind(user.presence.as_str())
        .bind(user.profile.about_me.as_str())
        .bind(user.profile.timezone.as_str())
        .bind(user.profile.avatar.as_deref())
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn update(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            UPDATE users
            SET email = $2, password_hash = $3, presence = $4, about_me = $5,
                timezone = $6, avatar = $7, updated_at = $8
            WHERE username = $1
            RETURNING username, email, password_hash, presence, about_me, timezone, avatar, created_at, updated_at
            "#,
        )
        .bind(user.username.as_str())
        .bind(user.email.as_str())
        .bind(user.password.as_str())
        .bind(user.presence.as_str())
        .bind(user.profile.about_me.as_str())
        .bind(user.profile.timezone.as_str())
        .bind(user.profile.avatar.as_deref())
        .bind(user.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        User::try_from(record)
    }

    async fn find_by_username(&self, username: &Username) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT username, email, password_hash, presence, about_me, timezone, avatar, created_at, updated_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT username, email, password_hash, presence, about_me, timezone, avatar, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn set_presence(
        &self,
        username: &Username,
        presence: PresenceStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE users SET presence = $2 WHERE username = $1")
            .bind(username.as_str())
            .bind(presence.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(count.max(0) as u64)
    }

    async fn delete_all(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM users")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgChatRepository {
    pool: PgPool,
}

impl PgChatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatRepository for PgChatRepository {
    async fn find_by_key(&self, key: &ChatKey) -> Result<Option<Chat>, RepositoryError> {
        let record = sqlx::query_as::<_, ChatRecord>(
            r#"
            SELECT chat_key, participants, created_at, last_updated, last_updated_by,
                   latest_message_preview, unread_count, message_count
            FROM chats
            WHERE chat_key = $1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Chat::try_from).transpose()
    }

    async fn insert_if_absent(&self, chat: Chat) -> Result<bool, RepositoryError> {
        let participants: Vec<String> = chat
            .participants
            .iter()
            .map(|participant| participant.as_str().to_owned())
            .collect();

        // 主键冲突时什么也不做，由数据库仲裁并发创建
        let result = sqlx::query(
            r#"
            INSERT INTO chats (chat_key, participants, created_at, last_updated, last_updated_by,
                               latest_message_preview, unread_count, message_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (chat_key) DO NOTHING
            "#,
        )
        .bind(chat.key.as_str())
        .bind(participants)
        .bind(chat.created_at)
        .bind(chat.last_updated)
        .bind(chat.last_updated_by.as_ref().map(|sender| sender.as_str()))
        .bind(chat.latest_message_preview.as_str())
        .bind(i32::try_from(chat.unread_count).unwrap_or(i32::MAX))
        .bind(to_i64(chat.message_count))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update(
        &self,
        key: &ChatKey,
        mutation: ChatMutation,
    ) -> Result<Chat, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let record = match &mutation {
            ChatMutation::AppendMessage {
                message,
                latest_message_preview,
                unread_count,
            } => {
                // 提交成功但确认丢失后的重试：消息已落库，直接返回当前状态
                let stored: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM messages WHERE id = $1)")
                        .bind(message.id.0)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(map_sqlx_err)?;
                if stored {
                    tx.rollback().await.map_err(map_sqlx_err)?;
                    tracing::info!(
                        chat_key = %key,
                        message_id = %message.id,
                        "消息已存在，跳过重复追加"
                    );
                    return self.find_by_key(key).await?.ok_or(RepositoryError::NotFound);
                }

                let record = sqlx::query_as::<_, ChatRecord>(
                    r#"
                    UPDATE chats
                    SET last_updated = $2, last_updated_by = $3, latest_message_preview = $4,
                        unread_count = $5, message_count = message_count + 1
                    WHERE chat_key = $1
                    RETURNING chat_key, participants, created_at, last_updated, last_updated_by,
                              latest_message_preview, unread_count, message_count
                    "#,
                )
                .bind(key.as_str())
                .bind(message.timestamp)
                .bind(message.sender.as_str())
                .bind(latest_message_preview.as_str())
                .bind(i32::try_from(*unread_count).unwrap_or(i32::MAX))
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_err)?
                .ok_or(RepositoryError::NotFound)?;

                let receivers: Vec<String> = message
                    .receivers
                    .iter()
                    .map(|receiver| receiver.as_str().to_owned())
                    .collect();

                sqlx::query(
                    r#"
                    INSERT INTO messages (id, chat_key, seq, sender, receivers, content, sent_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(message.id.0)
                .bind(key.as_str())
                .bind(record.message_count)
                .bind(message.sender.as_str())
                .bind(receivers)
                .bind(message.content.as_str())
                .bind(message.timestamp)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;

                record
            }
            ChatMutation::ResetUnread => sqlx::query_as::<_, ChatRecord>(
                r#"
                UPDATE chats
                SET unread_count = 0
                WHERE chat_key = $1
                RETURNING chat_key, participants, created_at, last_updated, last_updated_by,
                          latest_message_preview, unread_count, message_count
                "#,
            )
            .bind(key.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .ok_or(RepositoryError::NotFound)?,
        };

        tx.commit().await.map_err(map_sqlx_err)?;
        Chat::try_from(record)
    }

    async fn list_messages(
        &self,
        key: &ChatKey,
        page: PageRequest,
    ) -> Result<Vec<Message>, RepositoryError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM chats WHERE chat_key = $1)")
                .bind(key.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        if !exists {
            return Err(RepositoryError::NotFound);
        }

        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, chat_key, sender, receivers, content, sent_at
            FROM messages
            WHERE chat_key = $1
            ORDER BY seq ASC
            OFFSET $2
            LIMIT $3
            "#,
        )
        .bind(key.as_str())
        .bind(to_i64(page.skip))
        .bind(to_i64(page.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }

    async fn list_for_participant(
        &self,
        username: &Username,
        query: ChatListQuery,
    ) -> Result<Vec<Chat>, RepositoryError> {
        // 排序列与方向来自枚举，不会拼入用户输入
        let column = match query.sort_by {
            ChatSortField::LastUpdated => "last_updated",
            ChatSortField::CreatedAt => "created_at",
            ChatSortField::UnreadCount => "unread_count",
        };
        let direction = match query.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let sql = format!(
            r#"
            SELECT chat_key, participants, created_at, last_updated, last_updated_by,
                   latest_message_preview, unread_count, message_count
            FROM chats
            WHERE $1 = ANY (participants)
            ORDER BY {column} {direction}, chat_key {direction}
            OFFSET $2
            LIMIT $3
            "#
        );

        let records = sqlx::query_as::<_, ChatRecord>(&sql)
            .bind(username.as_str())
            .bind(to_i64(query.page.skip))
            .bind(to_i64(query.page.limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        records.into_iter().map(Chat::try_from).collect()
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chats")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(count.max(0) as u64)
    }

    async fn delete_all(&self) -> Result<u64, RepositoryError> {
        // 消息随会话级联删除
        let result = sqlx::query("DELETE FROM chats")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub chat_repository: Arc<PgChatRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            chat_repository: Arc::new(PgChatRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
