use super::{OpenApi, OpenApiError, OpenApiResult};
use crate::config::AccountConfig;
use crate::{debug, info};
use async_trait::async_trait;
use http::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

const TOKEN_URL: &str = "https://bots.qq.com/app/getAppAccessToken";
/// 提前刷新的余量
const REFRESH_MARGIN: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
    // 平台返回的是字符串
    #[serde(default)]
    expires_in: Value,
}

#[derive(Deserialize)]
struct VendorError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// 基于 reqwest 的开放平台客户端
///
/// 配置了 app_secret 时使用 AccessToken 鉴权，否则退回旧式 `Bot appid.token`。
pub struct HttpOpenApi {
    client: reqwest::Client,
    base: String,
    app_id: String,
    token: String,
    app_secret: String,
    cached: AsyncMutex<Option<CachedToken>>,
}

impl HttpOpenApi {
    pub fn new(account: &AccountConfig, base: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
            app_id: account.app_id.clone(),
            token: account.token.clone(),
            app_secret: account.app_secret.clone(),
            cached: AsyncMutex::new(None),
        })
    }

    /// Authorization 头的值
    async fn authorization(&self) -> OpenApiResult<String> {
        if self.app_secret.is_empty() {
            return Ok(format!("Bot {}.{}", self.app_id, self.token));
        }

        let mut guard = self.cached.lock().await;
        if let Some(cached) = guard.as_ref()
            && Instant::now() + REFRESH_MARGIN < cached.expires_at
        {
            return Ok(format!("QQBot {}", cached.value));
        }

        let resp = self
            .client
            .post(TOKEN_URL)
            .json(&json!({ "appId": self.app_id, "clientSecret": self.app_secret }))
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(vendor_error(status.as_u16(), &text));
        }
        let token: AccessToken =
            serde_json::from_str(&text).map_err(|e| OpenApiError::Decode(e.to_string()))?;
        let expires_in = match &token.expires_in {
            Value::Number(n) => n.as_u64().unwrap_or(7200),
            Value::String(s) => s.parse().unwrap_or(7200),
            _ => 7200,
        };

        info!(target: "OpenApi", "AccessToken 已刷新，有效期 {} 秒", expires_in);
        let value = token.access_token;
        *guard = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        });
        Ok(format!("QQBot {}", value))
    }
}

fn vendor_error(status: u16, body: &str) -> OpenApiError {
    let (code, message) = match serde_json::from_str::<VendorError>(body) {
        Ok(e) => (e.code, e.message),
        Err(_) => (0, body.chars().take(200).collect()),
    };
    OpenApiError::Status {
        status,
        code,
        message,
    }
}

#[async_trait]
impl OpenApi for HttpOpenApi {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> OpenApiResult<Value> {
        let url = format!("{}{}", self.base, path);
        let auth = self.authorization().await?;
        debug!(target: "OpenApi", "{} {}", method, path);

        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", auth)
            .header("X-Union-Appid", &self.app_id);
        if let Some(body) = &body {
            request = request.json(body);
        }

        let resp = request.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(vendor_error(status.as_u16(), &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| OpenApiError::Decode(e.to_string()))
    }

    async fn gateway_token(&self) -> OpenApiResult<String> {
        self.authorization().await
    }
}
