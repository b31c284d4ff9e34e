use std::sync::Arc;

use async_trait::async_trait;
use domain::{DomainError, ProfileUpdate, RepositoryError, User, UserEmail, Username};

use crate::{
    clock::Clock,
    error::ApplicationError,
    password::{CredentialVerifier, PasswordHasher},
    repository::UserRepository,
};

#[derive(Debug, Clone)]
pub struct RegisterUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AuthenticateUserRequest {
    pub username: String,
    pub password: String,
}

pub struct UserServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub clock: Arc<dyn Clock>,
}

pub struct UserService {
    deps: UserServiceDependencies,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn register(&self, request: RegisterUserRequest) -> Result<User, ApplicationError> {
        let username = Username::parse(request.username)?;
        let email = UserEmail::parse(request.email)?;
        if request.password.is_empty() {
            return Err(DomainError::invalid_argument("password", "must not be empty").into());
        }

        // 先检查用户名，再检查邮箱
        if self
            .deps
            .user_repository
            .find_by_username(&username)
            .await?
            .is_some()
        {
            return Err(DomainError::UserAlreadyExists.into());
        }
        if self
            .deps
            .user_repository
            .find_by_email(&email)
            .await?
            .is_some()
        {
            return Err(DomainError::EmailAlreadyExists.into());
        }

        let password_hash = self.deps.password_hasher.hash(&request.password).await?;
        let user = User::register(username, email, password_hash, self.deps.clock.now());

        match self.deps.user_repository.create(user).await {
            Ok(stored) => {
                tracing::info!(username = %stored.username, "用户注册成功");
                Ok(stored)
            }
            // 并发注册同名用户
            Err(RepositoryError::Conflict) => Err(DomainError::UserAlreadyExists.into()),
            Err(err) => Err(err.into()),
        }
    }

    /// 用户名或密码错误统一返回 `Authentication`，不区分具体原因
    pub async fn authenticate(
        &self,
        request: AuthenticateUserRequest,
    ) -> Result<User, ApplicationError> {
        let username =
            Username::parse(request.username).map_err(|_| ApplicationError::Authentication)?;
        let user = self
            .deps
            .user_repository
            .find_by_username(&username)
            .await?
            .ok_or(ApplicationError::Authentication)?;

        let password_ok = self
            .deps
            .password_hasher
            .verify(&request.password, &user.password)
            .await?;
        if !password_ok {
            tracing::debug!(username = %username, "密码校验失败");
            return Err(ApplicationError::Authentication);
        }

        Ok(user)
    }

    pub async fn get_user(&self, username: &Username) -> Result<User, ApplicationError> {
        Ok(self
            .deps
            .user_repository
            .find_by_username(username)
            .await?
            .ok_or(DomainError::UserNotFound)?)
    }

    pub async fn update_profile(
        &self,
        username: &Username,
        update: ProfileUpdate,
    ) -> Result<User, ApplicationError> {
        let mut user = self.get_user(username).await?;
        user.update_profile(update, self.deps.clock.now())?;
        Ok(self.deps.user_repository.update(user).await?)
    }
}

#[async_trait]
impl CredentialVerifier for UserService {
    async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool, ApplicationError> {
        let request = AuthenticateUserRequest {
            username: username.to_owned(),
            password: password.to_owned(),
        };
        match self.authenticate(request).await {
            Ok(_) => Ok(true),
            Err(ApplicationError::Authentication) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
