//! 开放平台 Webhook 回调
//!
//! 请求体以 Ed25519 签名校验；op 13 为回调地址验证，其余帧去重后按到达顺序交给单个分发任务。

use crate::error::ApiError;
use crate::qq::model::Payload;
use crate::server::Server;
use crate::{debug, info, warn};
use anyhow::Context as _;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const SIGNATURE_HEADER: &str = "X-Signature-Ed25519";
pub const TIMESTAMP_HEADER: &str = "X-Signature-Timestamp";

/// 回调地址验证
const OP_VALIDATION: i64 = 13;
/// 去重窗口
const DEDUPE_WINDOW: Duration = Duration::from_secs(300);

/// 由机器人密钥派生签名密钥：重复密钥直到 32 字节后截断
pub fn signing_key(secret: &str) -> SigningKey {
    let mut seed = [0u8; 32];
    let bytes = secret.as_bytes();
    if !bytes.is_empty() {
        for (i, b) in seed.iter_mut().enumerate() {
            *b = bytes[i % bytes.len()];
        }
    }
    SigningKey::from_bytes(&seed)
}

/// 对 `timestamp || body` 签名，返回十六进制
pub fn sign(key: &SigningKey, timestamp: &str, body: &[u8]) -> String {
    let mut message = timestamp.as_bytes().to_vec();
    message.extend_from_slice(body);
    hex::encode(key.sign(&message).to_bytes())
}

pub fn verify(key: &SigningKey, signature_hex: &str, timestamp: &str, body: &[u8]) -> bool {
    let Ok(bytes) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&bytes) else {
        return false;
    };
    let mut message = timestamp.as_bytes().to_vec();
    message.extend_from_slice(body);
    key.verifying_key().verify(&message, &signature).is_ok()
}

/// 窗口期内的重复投递过滤
pub struct Deduper {
    window: Duration,
    seen: HashMap<String, Instant>,
}

impl Deduper {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// 首次出现返回 true
    pub fn check(&mut self, key: &str, now: Instant) -> bool {
        let window = self.window;
        self.seen
            .retain(|_, at| now.saturating_duration_since(*at) < window);
        if self.seen.contains_key(key) {
            return false;
        }
        self.seen.insert(key.to_string(), now);
        true
    }
}

#[derive(Deserialize)]
struct Validation {
    plain_token: String,
    event_ts: String,
}

/// 待分发的事件：类型、数据、平台事件 ID
type Dispatch = (String, Value, Option<String>);

struct WebhookState {
    key: SigningKey,
    dedupe: Mutex<Deduper>,
    queue: mpsc::UnboundedSender<Dispatch>,
}

pub fn router(server: Arc<Server>) -> Router {
    let path = server.config.account.webhook.path.clone();
    let (queue, rx) = mpsc::unbounded_channel();
    let state = Arc::new(WebhookState {
        key: signing_key(&server.config.account.app_secret),
        dedupe: Mutex::new(Deduper::new(DEDUPE_WINDOW)),
        queue,
    });
    tokio::spawn(dispatch_loop(server, rx));
    Router::new().route(&path, post(handle)).with_state(state)
}

/// 逐个分发，保证事件序号与回调到达顺序一致；路由释放后退出
async fn dispatch_loop(server: Arc<Server>, mut rx: mpsc::UnboundedReceiver<Dispatch>) {
    while let Some((kind, data, id)) = rx.recv().await {
        super::dispatch(&server, &kind, data, id.as_deref()).await;
    }
    debug!(target: "Webhook", "分发任务退出");
}

/// 独立监听 account.webhook.host:port，直到进程关闭
pub async fn serve(server: Arc<Server>) -> anyhow::Result<()> {
    let config = &server.config.account.webhook;
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Webhook 端口 {} 绑定失败", addr))?;
    info!(target: "Webhook", "开放平台回调监听于 http://{}{}", addr, config.path);

    axum::serve(listener, router(server.clone()))
        .with_graceful_shutdown(server.shutdown_signal())
        .await?;
    Ok(())
}

async fn handle(State(state): State<Arc<WebhookState>>, headers: HeaderMap, body: Bytes) -> Response {
    let payload: Payload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let timestamp = headers.get(TIMESTAMP_HEADER).and_then(|v| v.to_str().ok());
    match (signature, timestamp) {
        (Some(sig), Some(ts)) => {
            if !verify(&state.key, sig, ts, &body) {
                warn!(target: "Webhook", "签名校验失败，已拒绝");
                return ApiError::Unauthorized("签名校验失败".into()).into_response();
            }
        }
        _ if payload.op == OP_VALIDATION => {}
        _ => {
            warn!(target: "Webhook", "缺少签名头，已拒绝");
            return ApiError::Unauthorized("缺少签名".into()).into_response();
        }
    }

    if payload.op == OP_VALIDATION {
        let validation: Validation = match serde_json::from_value(payload.d) {
            Ok(v) => v,
            Err(e) => return ApiError::from(e).into_response(),
        };
        info!(target: "Webhook", "回调地址验证");
        let signature = sign(
            &state.key,
            &validation.event_ts,
            validation.plain_token.as_bytes(),
        );
        return Json(json!({
            "plain_token": validation.plain_token,
            "signature": signature,
        }))
        .into_response();
    }

    let digest = format!("{:x}", md5::compute(&body));
    let fresh = state
        .dedupe
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .check(&digest, Instant::now());
    if !fresh {
        debug!(target: "Webhook", "重复投递已丢弃: {}", digest);
        return Json(json!({"success": true})).into_response();
    }

    let Payload { op, d, t, id, .. } = payload;
    match t {
        Some(kind) => {
            if state.queue.send((kind, d, id)).is_err() {
                warn!(target: "Webhook", "分发任务已退出，事件丢弃");
            }
        }
        None => debug!(target: "Webhook", "忽略 op {}", op),
    }
    Json(json!({"success": true})).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_repeats_secret() {
        let a = signing_key("abc");
        let b = SigningKey::from_bytes(b"abcabcabcabcabcabcabcabcabcabcab");
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn signature_round_trip() {
        let key = signing_key("naOC0ocQE3shWLAfffVLB1rhYPG7");
        let sig = sign(&key, "1725442341", b"{\"op\":0}");
        assert_eq!(sig.len(), 128);
        assert!(verify(&key, &sig, "1725442341", b"{\"op\":0}"));
        assert!(!verify(&key, &sig, "1725442342", b"{\"op\":0}"));
        assert!(!verify(&key, "zz", "1725442341", b"{\"op\":0}"));
    }

    #[test]
    fn deduper_window() {
        let mut dedupe = Deduper::new(DEDUPE_WINDOW);
        let t0 = Instant::now();
        assert!(dedupe.check("a", t0));
        assert!(!dedupe.check("a", t0 + Duration::from_secs(10)));
        assert!(dedupe.check("b", t0 + Duration::from_secs(10)));
        assert!(dedupe.check("a", t0 + Duration::from_secs(301)));
    }
}
