// ============================================================================
// QQ 开放平台接口
// OpenApi 只负责把请求发出去；具体的接口封装在 QqApi 上
// ============================================================================

use crate::error::ApiError;
use async_trait::async_trait;
use http::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub mod api;
pub mod client;
pub mod intents;
pub mod model;

pub use client::HttpOpenApi;

/// 开放平台调用错误
#[derive(Debug, Error)]
pub enum OpenApiError {
    #[error("请求失败: {0}")]
    Http(String),
    #[error("开放平台返回 {status} (code={code}): {message}")]
    Status {
        status: u16,
        code: i64,
        message: String,
    },
    #[error("响应解析失败: {0}")]
    Decode(String),
}

pub type OpenApiResult<T> = Result<T, OpenApiError>;

impl From<reqwest::Error> for OpenApiError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<OpenApiError> for ApiError {
    fn from(e: OpenApiError) -> Self {
        match &e {
            OpenApiError::Status { status: 404, .. } => ApiError::NotFound(e.to_string()),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

/// 开放平台传输层
///
/// `path` 以 `/` 开头并已带好查询串；无响应体时返回 `Value::Null`。
#[async_trait]
pub trait OpenApi: Send + Sync + 'static {
    async fn request(&self, method: Method, path: &str, body: Option<Value>)
    -> OpenApiResult<Value>;

    /// 网关鉴权用的 token，形如 `QQBot xxx`
    async fn gateway_token(&self) -> OpenApiResult<String>;
}

/// 带类型的接口封装，可廉价克隆
#[derive(Clone)]
pub struct QqApi {
    transport: Arc<dyn OpenApi>,
}

impl QqApi {
    pub fn new(transport: Arc<dyn OpenApi>) -> Self {
        Self { transport }
    }

    pub async fn gateway_token(&self) -> OpenApiResult<String> {
        self.transport.gateway_token().await
    }

    /// 通用调用：序列化请求体并反序列化响应
    pub async fn call<B, R>(&self, method: Method, path: &str, body: Option<&B>) -> OpenApiResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = match body {
            Some(b) => Some(serde_json::to_value(b).map_err(|e| OpenApiError::Decode(e.to_string()))?),
            None => None,
        };
        let value = self.transport.request(method, path, body).await?;
        serde_json::from_value(value).map_err(|e| OpenApiError::Decode(e.to_string()))
    }

    /// 不关心响应内容的调用
    pub async fn call_unit<B>(&self, method: Method, path: &str, body: Option<&B>) -> OpenApiResult<()>
    where
        B: Serialize + ?Sized,
    {
        let body = match body {
            Some(b) => Some(serde_json::to_value(b).map_err(|e| OpenApiError::Decode(e.to_string()))?),
            None => None,
        };
        self.transport.request(method, path, body).await?;
        Ok(())
    }
}

/// 拼接查询串，跳过空值
pub(crate) fn with_query(path: &str, pairs: &[(&str, Option<String>)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    let mut any = false;
    for (key, value) in pairs {
        if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
            serializer.append_pair(key, v);
            any = true;
        }
    }
    if any {
        format!("{}?{}", path, serializer.finish())
    } else {
        path.to_string()
    }
}

/// 路径参数转义
pub(crate) fn seg(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_skips_empty_values() {
        assert_eq!(
            with_query(
                "/guilds/1/members",
                &[("after", Some("0".into())), ("limit", Some("400".into())), ("x", None)]
            ),
            "/guilds/1/members?after=0&limit=400"
        );
        assert_eq!(with_query("/users/@me", &[("after", None)]), "/users/@me");
        assert_eq!(seg("a b/c"), "a+b%2Fc");
    }

    #[test]
    fn vendor_not_found_maps_to_not_found() {
        let err: ApiError = OpenApiError::Status {
            status: 404,
            code: 11241,
            message: "频道不存在".into(),
        }
        .into();
        assert!(matches!(err, ApiError::NotFound(_)));

        let err: ApiError = OpenApiError::Http("timeout".into()).into();
        assert!(matches!(err, ApiError::Internal(_)));
    }
}
