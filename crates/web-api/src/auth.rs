//! JWT 认证模块
//!
//! 令牌的 `sub` 是用户名，HTTP 通过 `Authorization: Bearer` 传递，
//! WebSocket 通过查询参数 `token` 传递。

use application::dto::UserDto;
use axum::http::HeaderMap;
use config::JwtConfig;
use domain::Username;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 生成 JWT token
    pub fn generate_token(&self, username: &Username) -> Result<String, ApiError> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            sub: username.as_str().to_owned(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|err| {
            ApiError::internal_server_error(format!("Token generation failed: {}", err))
        })
    }

    /// 验证 token 并取出用户名
    pub fn verify_token(&self, token: &str) -> Result<Username, ApiError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| ApiError::unauthorized(format!("Invalid token: {}", err)))?;

        Username::parse(claims.sub).map_err(|_| ApiError::unauthorized("Invalid token subject"))
    }

    /// 从 headers 中提取和验证 token
    pub fn extract_user_from_headers(&self, headers: &HeaderMap) -> Result<Username, ApiError> {
        let auth_header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

        self.verify_token(token)
    }
}

/// 登录响应结构
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: UserDto,
    pub token: String,
}
