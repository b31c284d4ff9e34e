#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc};

use config::AppConfig;
use infrastructure::{BcryptPasswordHasher, Infrastructure};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use web_api::{router, AppState};

pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
}

impl TestServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws(&self, token: &str) -> String {
        format!("ws://{}/ws?token={}", self.addr, token)
    }

    pub async fn register(&self, username: &str) -> reqwest::Response {
        self.client
            .post(self.http("/api/v1/auth/register"))
            .json(&json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": "secret"
            }))
            .send()
            .await
            .expect("register")
    }

    /// 注册并登录，返回 token
    pub async fn sign_up(&self, username: &str) -> String {
        assert_eq!(self.register(username).await.status(), 201);
        let login: Value = self
            .client
            .post(self.http("/api/v1/auth/login"))
            .json(&json!({"username": username, "password": "secret"}))
            .send()
            .await
            .expect("login")
            .json()
            .await
            .expect("login json");
        login["token"].as_str().expect("token").to_owned()
    }
}

/// 基于内存存储启动一个完整的服务，`root` 是管理员
pub async fn spawn_server() -> TestServer {
    let mut config = AppConfig::default();
    config.admin.usernames = vec!["root".into()];
    config.presence.eviction_timeout_ms = 500;

    let infra = Infrastructure::in_memory(Arc::new(BcryptPasswordHasher::new(4)));
    let state = AppState::from_config(
        &config,
        infra.user_repository.clone(),
        infra.chat_repository.clone(),
        infra.password_hasher_trait(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router(state).into_make_service())
            .await
            .ok();
    });

    TestServer {
        addr,
        client: Client::new(),
    }
}
