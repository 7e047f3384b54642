//! 下游 HTTP 路由与动作中间件

use super::{Server, events, files};
use crate::action::{ActionContext, ActionHandler};
use crate::adapter::Logins;
use crate::error::{ApiError, ApiResult};
use crate::{debug, warn};
use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::Value;
use std::sync::Arc;

/// 平台头与其别名
const PLATFORM_HEADERS: [&str; 2] = ["x-platform", "satori-platform"];
const SELF_ID_HEADERS: [&str; 2] = ["x-self-id", "satori-user-id"];

pub fn router(server: Arc<Server>) -> Router {
    let base = server.config.satori.base_path();
    let mut router = Router::new()
        .route(&format!("{}/v1/events", base), get(events::upgrade))
        .route(&format!("{}/v1/proxy/{{*url}}", base), get(files::proxy))
        .route(&format!("{}/v1/admin/{{action}}", base), post(admin_action))
        .route(&format!("{}/v1/{{action}}", base), post(resource_action));
    if server.config.file_server.enable {
        router = router.route("/files/{name}", get(files::serve));
    }
    router.with_state(server)
}

async fn resource_action(
    State(server): State<Arc<Server>>,
    Path(action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    respond(&action, call_resource(&server, &action, &headers, &body).await)
}

/// 管理动作不需要平台头
async fn admin_action(
    State(server): State<Arc<Server>>,
    Path(action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    respond(&action, call_admin(&server, &action, &headers, &body).await)
}

async fn call_resource(
    server: &Arc<Server>,
    action: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> ApiResult<Value> {
    check_request(server, headers)?;
    let platform = resolve_platform(&server.logins, headers)?;
    let handler = server
        .actions
        .get(action)
        .ok_or_else(|| ApiError::not_found(format!("未知动作: {}", action)))?;
    invoke(server, handler, platform, body).await
}

async fn call_admin(
    server: &Arc<Server>,
    action: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> ApiResult<Value> {
    check_request(server, headers)?;
    let handler = server
        .actions
        .get_admin(action)
        .ok_or_else(|| ApiError::not_found(format!("未知管理动作: {}", action)))?;
    invoke(server, handler, String::new(), body).await
}

async fn invoke(
    server: &Arc<Server>,
    handler: ActionHandler,
    platform: String,
    body: &[u8],
) -> ApiResult<Value> {
    let body = parse_body(body)?;
    handler(ActionContext::new(server.clone(), platform, body)).await
}

fn respond(action: &str, result: ApiResult<Value>) -> Response {
    match result {
        Ok(value) => {
            debug!(target: "Action", "{} 完成", action);
            Json(value).into_response()
        }
        Err(e) => {
            warn!(target: "Action", "{} 失败 ({}): {}", action, e.status().as_u16(), e);
            e.into_response()
        }
    }
}

/// Content-Type 与鉴权检查
fn check_request(server: &Server, headers: &HeaderMap) -> ApiResult<()> {
    let json = header(headers, CONTENT_TYPE.as_str())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("application/json"));
    if !json {
        return Err(ApiError::bad_request("Content-Type 必须为 application/json"));
    }
    if !authorized(&server.config.satori.token, header(headers, AUTHORIZATION.as_str())) {
        return Err(ApiError::Unauthorized("鉴权失败".into()));
    }
    Ok(())
}

/// 未配置 token 时放行
pub fn authorized(token: &str, authorization: Option<&str>) -> bool {
    if token.is_empty() {
        return true;
    }
    authorization
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|given| given.trim() == token)
}

/// 平台必须已知；携带的自身 ID 必须一致
fn resolve_platform(logins: &Logins, headers: &HeaderMap) -> ApiResult<String> {
    let platform = PLATFORM_HEADERS
        .iter()
        .find_map(|name| header(headers, name))
        .filter(|p| Logins::is_known_platform(p))
        .ok_or_else(|| ApiError::bad_request("缺少或未知的 X-Platform"))?;

    let self_id = logins.self_id();
    if let Some(given) = SELF_ID_HEADERS.iter().find_map(|name| header(headers, name))
        && !self_id.is_empty()
        && given != self_id
    {
        return Err(ApiError::bad_request(format!("X-Self-ID 不匹配: {}", given)));
    }
    Ok(platform.to_string())
}

/// 空请求体按 `{}` 处理
fn parse_body(body: &[u8]) -> ApiResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    Ok(serde_json::from_slice(body)?)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn empty_token_accepts_anything() {
        assert!(authorized("", None));
        assert!(authorized("", Some("Bearer x")));
        assert!(authorized("t", Some("Bearer t")));
        assert!(!authorized("t", Some("Bearer u")));
        assert!(!authorized("t", Some("t")));
        assert!(!authorized("t", None));
    }

    #[test]
    fn platform_aliases_and_self_id() {
        let logins = Logins::new("42", false);

        let mut headers = HeaderMap::new();
        headers.insert("satori-platform", HeaderValue::from_static("qqguild"));
        assert_eq!(resolve_platform(&logins, &headers).unwrap(), "qqguild");

        headers.insert("x-self-id", HeaderValue::from_static("43"));
        assert!(resolve_platform(&logins, &headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("x-platform", HeaderValue::from_static("discord"));
        assert!(resolve_platform(&logins, &headers).is_err());
    }

    #[test]
    fn blank_body_is_empty_object() {
        assert_eq!(parse_body(b"").unwrap(), serde_json::json!({}));
        assert_eq!(parse_body(b" \n").unwrap(), serde_json::json!({}));
        assert!(parse_body(b"{").is_err());
    }
}
