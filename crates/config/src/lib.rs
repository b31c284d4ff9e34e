//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - 存储后端（内存 / PostgreSQL）
//! - JWT认证
//! - 事件广播与在线状态
//! - 存储重试策略
//!
//! 加载优先级：默认值 -> `APP_CONFIG_FILE` 指定的文件 -> `APP_` 前缀环境变量（`__` 分隔层级）。

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_storage"))]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub storage: StorageConfig,
    #[validate(nested)]
    pub jwt: JwtConfig,
    #[validate(nested)]
    pub events: EventsConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[validate(nested)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[validate(nested)]
    pub security: SecurityConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[serde(default)]
    pub database_url: Option<String>,
    #[validate(range(min = 1))]
    pub max_connections: u32,
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JwtConfig {
    #[validate(length(min = 32, message = "JWT secret must be at least 32 characters long"))]
    pub secret: String,
    #[validate(range(min = 1))]
    pub expiration_hours: i64,
}

/// 消息分发范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanoutScope {
    /// 所有在线连接都会收到
    All,
    /// 只有会话参与者会收到
    Participants,
}

/// 事件总线配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EventsConfig {
    /// 每个监听者的缓冲区大小，溢出时丢弃最旧的事件
    #[validate(range(min = 1))]
    pub listener_buffer: usize,
    pub fanout: FanoutScope,
}

/// 在线状态配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// 通知并关闭被挤下线会话的超时时间
    pub eviction_timeout_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            eviction_timeout_ms: 2_000,
        }
    }
}

/// 存储暂时不可用时的重试策略
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RetryConfig {
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

/// 管理员配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub usernames: Vec<String>,
}

/// 安全相关配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SecurityConfig {
    #[validate(range(min = 4, max = 31))]
    pub bcrypt_cost: u32,
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

impl Default for AppConfig {
    /// 默认配置面向本地开发：内存存储、开发用JWT密钥
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
                cors_origins: vec!["*".into()],
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                database_url: None,
                max_connections: 5,
            },
            jwt: JwtConfig {
                secret: "dev-secret-key-not-for-production-use-minimum-32-chars".into(),
                expiration_hours: 24,
            },
            events: EventsConfig {
                listener_buffer: 256,
                fanout: FanoutScope::Participants,
            },
            presence: PresenceConfig::default(),
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 50,
            },
            admin: AdminConfig::default(),
            security: SecurityConfig { bcrypt_cost: 12 },
        }
    }
}

impl AppConfig {
    /// 按优先级合并：默认值 -> 可选文件 (APP_CONFIG_FILE) -> 环境变量 (APP_*)
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(Self::figment())
    }

    pub fn figment() -> Figment {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig.merge(Env::prefixed("APP_").split("__"))
    }

    pub fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.admin.usernames.iter().any(|name| name == username)
    }

    /// 用于日志输出的脱敏表示
    pub fn sanitize(&self) -> String {
        let mut redacted = self.clone();
        redacted.jwt.secret = "[REDACTED]".into();
        if redacted.storage.database_url.is_some() {
            redacted.storage.database_url = Some("[REDACTED]".into());
        }
        format!("{:?}", redacted)
    }
}

fn validate_storage(config: &AppConfig) -> Result<(), ValidationError> {
    if config.storage.backend == StorageBackend::Postgres
        && config
            .storage
            .database_url
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .is_empty()
    {
        let mut error = ValidationError::new("database_url");
        error.message = Some("postgres backend requires storage.database_url".into());
        return Err(error);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.events.fanout, FanoutScope::Participants);
    }

    #[test]
    fn env_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("APP_SERVER__PORT", "9090");
            jail.set_env("APP_EVENTS__FANOUT", "all");
            jail.set_env("APP_RETRY__MAX_ATTEMPTS", "5");

            let config = AppConfig::load().expect("config should load");
            assert_eq!(config.server.port, 9090);
            assert_eq!(config.events.fanout, FanoutScope::All);
            assert_eq!(config.retry.max_attempts, 5);
            Ok(())
        });
    }

    #[test]
    fn file_is_merged_before_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "app.yaml",
                r#"
server:
  host: 0.0.0.0
  port: 7000
admin:
  usernames: [root]
"#,
            )?;
            jail.set_env("APP_CONFIG_FILE", "app.yaml");
            jail.set_env("APP_SERVER__PORT", "7001");

            let config = AppConfig::load().expect("config should load");
            assert_eq!(config.server.host, "0.0.0.0");
            assert_eq!(config.server.port, 7001);
            assert!(config.is_admin("root"));
            assert!(!config.is_admin("alice"));
            Ok(())
        });
    }

    #[test]
    fn postgres_backend_requires_url() {
        let mut config = AppConfig::default();
        config.storage.backend = StorageBackend::Postgres;
        assert!(config.validate().is_err());

        config.storage.database_url = Some("postgres://chat@db/chat".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_short_jwt_secret_and_zero_buffer() {
        let mut config = AppConfig::default();
        config.jwt.secret = "short".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.events.listener_buffer = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bcrypt_cost_bounds() {
        let mut config = AppConfig::default();
        config.security.bcrypt_cost = 3;
        assert!(config.validate().is_err());
        config.security.bcrypt_cost = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sanitize_hides_secrets() {
        let mut config = AppConfig::default();
        config.storage.database_url = Some("postgres://user:pw@db/chat".into());
        let text = config.sanitize();
        assert!(!text.contains(&config.jwt.secret));
        assert!(!text.contains("user:pw"));
    }
}
