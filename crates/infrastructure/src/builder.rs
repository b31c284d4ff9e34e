use std::sync::Arc;

use application::{ChatRepository, MemoryStore, PasswordHasher, UserRepository};
use config::{AppConfig, StorageBackend};
use sqlx::PgPool;
use thiserror::Error;

use crate::{
    migrations::MIGRATOR,
    password::BcryptPasswordHasher,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("postgres backend requires storage.database_url")]
    MissingDatabaseUrl,
}

/// 按配置选出的存储后端与密码哈希器
#[derive(Clone)]
pub struct Infrastructure {
    pub user_repository: Arc<dyn UserRepository>,
    pub chat_repository: Arc<dyn ChatRepository>,
    pub password_hasher: Arc<BcryptPasswordHasher>,
    /// 仅 Postgres 后端存在
    pub pool: Option<PgPool>,
}

impl Infrastructure {
    pub async fn build(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let password_hasher = Arc::new(BcryptPasswordHasher::from(&config.security));

        match config.storage.backend {
            StorageBackend::Memory => {
                tracing::info!("使用内存存储，进程退出后数据丢失");
                Ok(Self::in_memory(password_hasher))
            }
            StorageBackend::Postgres => {
                let database_url = config
                    .storage
                    .database_url
                    .as_deref()
                    .filter(|url| !url.trim().is_empty())
                    .ok_or(InfrastructureError::MissingDatabaseUrl)?;
                let pool = create_pg_pool(database_url, config.storage.max_connections).await?;
                MIGRATOR.run(&pool).await?;
                tracing::info!(
                    max_connections = config.storage.max_connections,
                    "PostgreSQL 连接池已就绪，迁移完成"
                );
                Ok(Self::postgres(pool, password_hasher))
            }
        }
    }

    pub fn in_memory(password_hasher: Arc<BcryptPasswordHasher>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            user_repository: store.clone(),
            chat_repository: store,
            password_hasher,
            pool: None,
        }
    }

    pub fn postgres(pool: PgPool, password_hasher: Arc<BcryptPasswordHasher>) -> Self {
        let storage = PgStorage::new(pool.clone());
        Self {
            user_repository: storage.user_repository,
            chat_repository: storage.chat_repository,
            password_hasher,
            pool: Some(pool),
        }
    }

    pub fn password_hasher_trait(&self) -> Arc<dyn PasswordHasher> {
        self.password_hasher.clone()
    }
}
