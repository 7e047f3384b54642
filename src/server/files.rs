//! 暂存文件与平台媒体代理

use super::Server;
use crate::error::ApiError;
use crate::{debug, warn};
use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// 允许代理的平台媒体前缀，随 READY 下发
pub const PROXY_PREFIXES: &[&str] = &[
    "https://multimedia.nt.qq.com.cn/",
    "https://gchat.qpic.cn/",
    "https://qqbot.ugcimg.cn/",
];

/// 按扩展名推断 Content-Type
pub fn content_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "silk" => "audio/silk",
        "amr" => "audio/amr",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// `GET /files/{name}`：开放平台拉取转码后的媒体
pub async fn serve(State(server): State<Arc<Server>>, Path(name): Path<String>) -> Response {
    match server.files.read(&name).await {
        Some(bytes) => ([(header::CONTENT_TYPE, content_type(&name))], bytes).into_response(),
        None => ApiError::not_found(format!("文件不存在: {}", name)).into_response(),
    }
}

/// 还原被路由合并掉的双斜杠并拼回查询串
pub fn proxy_target(raw: &str, query: Option<&str>) -> String {
    let mut url = raw.to_string();
    for scheme in ["https:", "http:"] {
        if let Some(rest) = raw.strip_prefix(scheme)
            && !rest.starts_with("//")
        {
            url = format!("{}//{}", scheme, rest.trim_start_matches('/'));
            break;
        }
    }
    match query.filter(|q| !q.is_empty()) {
        Some(q) => format!("{}?{}", url, q),
        None => url,
    }
}

pub fn proxy_allowed(url: &str) -> bool {
    PROXY_PREFIXES.iter().any(|prefix| url.starts_with(prefix))
}

/// `GET {base}/v1/proxy/{*url}`：以流的形式转发平台媒体
pub async fn proxy(
    State(server): State<Arc<Server>>,
    Path(raw): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    let url = proxy_target(&raw, query.as_deref());
    if !proxy_allowed(&url) {
        return ApiError::Forbidden(format!("不允许代理: {}", url)).into_response();
    }

    debug!(target: "Proxy", "转发 {}", url);
    let upstream = match server.http.get(&url).send().await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(target: "Proxy", "请求 {} 失败: {}", url, e);
            return ApiError::internal(format!("代理请求失败: {}", e)).into_response();
        }
    };

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok());

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    if let Some(ct) = content_type {
        response.headers_mut().insert(header::CONTENT_TYPE, ct);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapsed_scheme_is_restored() {
        assert_eq!(
            proxy_target("https:/gchat.qpic.cn/a/b", Some("x=1")),
            "https://gchat.qpic.cn/a/b?x=1"
        );
        assert_eq!(
            proxy_target("https://gchat.qpic.cn/a", None),
            "https://gchat.qpic.cn/a"
        );
    }

    #[test]
    fn only_vendor_hosts_are_proxied() {
        assert!(proxy_allowed("https://multimedia.nt.qq.com.cn/download?id=1"));
        assert!(!proxy_allowed("https://gchat.qpic.cn.evil.com/x"));
        assert!(!proxy_allowed("http://gchat.qpic.cn/x"));
    }

    #[test]
    fn content_type_by_extension() {
        assert_eq!(content_type("abc.PNG"), "image/png");
        assert_eq!(content_type("abc.silk"), "audio/silk");
        assert_eq!(content_type("abc"), "application/octet-stream");
    }
}
