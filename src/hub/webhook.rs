//! 下游 Webhook 推送

use super::{Delivery, EventHub, EventSink};
use crate::error::{ApiError, ApiResult};
use crate::satori::Event;
use crate::{info, warn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

/// 管理接口登记的 Webhook
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookInfo {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

pub struct WebhookSink {
    info: WebhookInfo,
    client: reqwest::Client,
    timeout: Duration,
    registry: Weak<WebhookRegistry>,
}

#[async_trait]
impl EventSink for WebhookSink {
    fn describe(&self) -> String {
        format!("webhook {}", self.info.url)
    }

    async fn deliver(&self, event: &Event) -> Delivery {
        let mut request = self
            .client
            .post(&self.info.url)
            .timeout(self.timeout)
            .json(event);

        if let Some(token) = self.info.token.as_deref().filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }
        if let Some(login) = &event.login {
            request = request
                .header("Satori-Platform", &login.platform)
                .header("X-Platform", &login.platform)
                .header("Satori-User-ID", &login.self_id)
                .header("X-Self-ID", &login.self_id);
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => Delivery::Delivered,
            Ok(resp) if resp.status().is_client_error() => {
                warn!(target: "Webhook", "{} 返回 {}，视为鉴权失败并移除", self.info.url, resp.status());
                Delivery::Dead
            }
            Ok(resp) => {
                warn!(target: "Webhook", "{} 返回 {}，本次推送失败", self.info.url, resp.status());
                Delivery::Failed
            }
            Err(e) => {
                // 超时与连接失败按 5xx 处理
                warn!(target: "Webhook", "推送到 {} 失败: {}", self.info.url, e);
                Delivery::Failed
            }
        }
    }

    async fn closed(&self, sink_id: u64) {
        if let Some(registry) = self.registry.upgrade() {
            registry.forget(&self.info.url, sink_id);
        }
    }
}

/// url -> (登记信息, 投递目标 ID)
pub struct WebhookRegistry {
    hub: Arc<EventHub>,
    client: reqwest::Client,
    timeout: Duration,
    hooks: Mutex<HashMap<String, (WebhookInfo, u64)>>,
}

impl WebhookRegistry {
    pub fn new(hub: Arc<EventHub>, timeout: Duration) -> Self {
        Self {
            hub,
            client: reqwest::Client::new(),
            timeout,
            hooks: Mutex::new(HashMap::new()),
        }
    }

    /// 登记 Webhook；同一 url 重复登记时替换旧的
    pub fn create(self: &Arc<Self>, info: WebhookInfo) -> ApiResult<()> {
        let parsed = url::Url::parse(&info.url)
            .map_err(|e| ApiError::bad_request(format!("无效的 url: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::bad_request("url 必须为 http 或 https"));
        }

        let sink = WebhookSink {
            info: info.clone(),
            client: self.client.clone(),
            timeout: self.timeout,
            registry: Arc::downgrade(self),
        };
        let id = self.hub.subscribe(sink, None);

        let previous = self
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(info.url.clone(), (info.clone(), id));
        if let Some((_, old_id)) = previous {
            self.hub.unsubscribe(old_id);
        }

        info!(target: "Webhook", "已登记 {}", info.url);
        Ok(())
    }

    pub fn delete(&self, url: &str) -> ApiResult<()> {
        let removed = self
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
        match removed {
            Some((_, id)) => {
                self.hub.unsubscribe(id);
                info!(target: "Webhook", "已删除 {}", url);
                Ok(())
            }
            None => Err(ApiError::not_found(format!("未登记的 webhook: {}", url))),
        }
    }

    pub fn list(&self) -> Vec<WebhookInfo> {
        let guard = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<WebhookInfo> = guard.values().map(|(info, _)| info.clone()).collect();
        list.sort_by(|a, b| a.url.cmp(&b.url));
        list
    }

    /// 投递目标失效后移除登记，已被替换的不动
    fn forget(&self, url: &str, sink_id: u64) {
        let mut guard = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.get(url).is_some_and(|(_, id)| *id == sink_id) {
            guard.remove(url);
        }
    }
}
