use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{PasswordHash, Timestamp, UserEmail, Username};

const ABOUT_ME_MAX_CHARS: usize = 500;
const TIMEZONE_MAX_CHARS: usize = 64;
const AVATAR_MAX_CHARS: usize = 512;

/// 用户在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
        }
    }

    pub fn from_online(online: bool) -> Self {
        if online {
            PresenceStatus::Online
        } else {
            PresenceStatus::Offline
        }
    }
}

/// 自由填写的个人资料
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub about_me: String,
    pub timezone: String,
    /// 头像引用（例如文件名或 URL），头像本身由外部生成
    pub avatar: Option<String>,
}

/// 个人资料的部分更新，`None` 表示保持不变
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub about_me: Option<String>,
    pub timezone: Option<String>,
    pub avatar: Option<String>,
}

impl ProfileUpdate {
    fn validate(&self) -> Result<(), DomainError> {
        if let Some(about_me) = &self.about_me {
            if about_me.chars().count() > ABOUT_ME_MAX_CHARS {
                return Err(DomainError::invalid_argument("about_me", "too long"));
            }
        }
        if let Some(timezone) = &self.timezone {
            if timezone.chars().count() > TIMEZONE_MAX_CHARS {
                return Err(DomainError::invalid_argument("timezone", "too long"));
            }
        }
        if let Some(avatar) = &self.avatar {
            if avatar.chars().count() > AVATAR_MAX_CHARS {
                return Err(DomainError::invalid_argument("avatar", "too long"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: Username,
    pub email: UserEmail,
    #[serde(skip_serializing)] // 密码字段不暴露给客户端
    pub password: PasswordHash,
    pub presence: PresenceStatus,
    pub profile: UserProfile,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: Timestamp,
}

impl User {
    pub fn register(
        username: Username,
        email: UserEmail,
        password: PasswordHash,
        now: Timestamp,
    ) -> Self {
        Self {
            username,
            email,
            password,
            presence: PresenceStatus::Offline,
            profile: UserProfile::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_online(&self) -> bool {
        self.presence == PresenceStatus::Online
    }

    pub fn update_profile(&mut self, update: ProfileUpdate, now: Timestamp) -> Result<(), DomainError> {
        update.validate()?;
        if let Some(about_me) = update.about_me {
            self.profile.about_me = about_me;
        }
        if let Some(timezone) = update.timezone {
            self.profile.timezone = timezone;
        }
        if let Some(avatar) = update.avatar {
            self.profile.avatar = if avatar.trim().is_empty() {
                None
            } else {
                Some(avatar)
            };
        }
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn user() -> User {
        User::register(
            Username::parse("alice").unwrap(),
            UserEmail::parse("alice@example.com").unwrap(),
            PasswordHash::new("hash").unwrap(),
            datetime!(2024-01-01 00:00 UTC),
        )
    }

    #[test]
    fn new_users_start_offline() {
        assert_eq!(user().presence, PresenceStatus::Offline);
        assert!(!user().is_online());
    }

    #[test]
    fn profile_update_is_partial() {
        let mut user = user();
        let later = datetime!(2024-01-02 00:00 UTC);
        user.update_profile(
            ProfileUpdate {
                about_me: Some("hello".into()),
                ..Default::default()
            },
            later,
        )
        .unwrap();
        user.update_profile(
            ProfileUpdate {
                timezone: Some("Europe/Berlin".into()),
                avatar: Some("alice.png".into()),
                ..Default::default()
            },
            later,
        )
        .unwrap();

        assert_eq!(user.profile.about_me, "hello");
        assert_eq!(user.profile.timezone, "Europe/Berlin");
        assert_eq!(user.profile.avatar.as_deref(), Some("alice.png"));
        assert_eq!(user.updated_at, later);
    }

    #[test]
    fn blank_avatar_clears_reference() {
        let mut user = user();
        let now = datetime!(2024-01-02 00:00 UTC);
        user.profile.avatar = Some("old.png".into());
        user.update_profile(
            ProfileUpdate {
                avatar: Some(" ".into()),
                ..Default::default()
            },
            now,
        )
        .unwrap();
        assert!(user.profile.avatar.is_none());
    }

    #[test]
    fn oversized_profile_is_rejected() {
        let mut user = user();
        let result = user.update_profile(
            ProfileUpdate {
                about_me: Some("x".repeat(ABOUT_ME_MAX_CHARS + 1)),
                ..Default::default()
            },
            datetime!(2024-01-02 00:00 UTC),
        );
        assert!(result.is_err());
        assert!(user.profile.about_me.is_empty());
    }
}
