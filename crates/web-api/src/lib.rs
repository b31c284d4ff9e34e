//! Web API 层。
//!
//! 提供 Axum 路由与 WebSocket 传输，将请求委托给应用层的会话协调器和用例服务。

mod admin_routes;
mod auth;
mod error;
mod routes;
mod state;
mod websocket;

pub use auth::{JwtService, LoginResponse};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
