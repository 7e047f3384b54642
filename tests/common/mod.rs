#![allow(dead_code)]

use async_trait::async_trait;
use http::Method;
use satori_qq::AppConfig;
use satori_qq::qq::{OpenApi, OpenApiResult};
use satori_qq::server::{Server, ServerBuilder};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// 一次开放平台调用
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

/// 记录所有调用并按路径前缀返回预设响应的开放平台
#[derive(Default)]
pub struct MockOpenApi {
    calls: Mutex<Vec<Call>>,
    responses: Mutex<Vec<(String, Value)>>,
}

impl MockOpenApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, path_prefix: &str, value: Value) {
        self.responses
            .lock()
            .unwrap()
            .push((path_prefix.to_string(), value));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, needle: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.path.contains(needle))
            .collect()
    }
}

#[async_trait]
impl OpenApi for MockOpenApi {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> OpenApiResult<Value> {
        self.calls.lock().unwrap().push(Call {
            method,
            path: path.to_string(),
            body,
        });
        let canned = self
            .responses
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, v)| v.clone());
        Ok(canned.unwrap_or_else(|| {
            json!({"id": "mock-msg-1", "timestamp": "2024-01-01T00:00:00+08:00"})
        }))
    }

    async fn gateway_token(&self) -> OpenApiResult<String> {
        Ok("QQBot mock-token".to_string())
    }
}

/// 不连接上游的测试配置
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.account.bot_id = "10001".into();
    config.account.websocket.enable = false;
    config.account.webhook.enable = false;
    config
}

pub struct TestServer {
    pub server: Arc<Server>,
    pub api: Arc<MockOpenApi>,
    pub addr: SocketAddr,
    _dir: TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

pub async fn build_server(config: AppConfig, api: Arc<MockOpenApi>) -> (Arc<Server>, TempDir) {
    build_server_with(config, api, |builder| builder).await
}

/// 构建前可调整构建器，例如缩短会话时限
pub async fn build_server_with(
    config: AppConfig,
    api: Arc<MockOpenApi>,
    tune: impl FnOnce(ServerBuilder) -> ServerBuilder,
) -> (Arc<Server>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let builder = Server::builder()
        .config(config)
        .data_dir(dir.path())
        .api(api);
    let server = tune(builder).build().await.unwrap();
    (server, dir)
}

/// 在随机端口上启动完整的下游服务
pub async fn spawn_server(config: AppConfig) -> TestServer {
    spawn_server_with(config, |builder| builder).await
}

pub async fn spawn_server_with(
    config: AppConfig,
    tune: impl FnOnce(ServerBuilder) -> ServerBuilder,
) -> TestServer {
    let api = MockOpenApi::new();
    let (server, dir) = build_server_with(config, api.clone(), tune).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.clone().serve(listener));
    tokio::time::sleep(Duration::from_millis(20)).await;
    TestServer {
        server,
        api,
        addr,
        _dir: dir,
    }
}

/// 轮询直到条件成立，最多等待两秒
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
