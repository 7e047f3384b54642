// ============================================================================
// 资源规范化
// 把 data: / file: 形式的 src 转码并发布为开放平台可拉取的 URL
// ============================================================================

use crate::element::MediaKind;
use crate::warn;
use anyhow::{Context as _, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::path::PathBuf;
use std::sync::Arc;

pub mod file_host;
pub mod transcode;

pub use file_host::{FileHost, LocalFileHost, Published, sha256_hex};
pub use transcode::Transcoder;

/// 规范化后的资源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub url: String,
    /// 仅本地发布的资源有哈希
    pub hash: Option<String>,
}

/// 读取到的原始资源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResource {
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
    /// 文件名或 mime 推断出的扩展名
    pub ext: Option<String>,
}

pub struct ResourcePipeline {
    host: Arc<dyn FileHost>,
    transcoder: Transcoder,
}

impl ResourcePipeline {
    pub fn new(host: Arc<dyn FileHost>, transcoder: Transcoder) -> Self {
        Self { host, transcoder }
    }

    /// http(s) 原样返回；data: / file: 转码后发布；失败返回 None
    pub async fn normalize_src(&self, src: &str, kind: MediaKind) -> Option<Resolved> {
        if is_remote(src) {
            return Some(Resolved {
                url: src.to_string(),
                hash: None,
            });
        }
        match self.publish_local(src, kind).await {
            Ok(published) => Some(Resolved {
                url: published.url,
                hash: Some(published.hash),
            }),
            Err(e) => {
                warn!(target: "Resource", "处理资源失败，已跳过: {:#}", e);
                None
            }
        }
    }

    async fn publish_local(&self, src: &str, kind: MediaKind) -> anyhow::Result<Published> {
        let raw = load(src).await?;
        let transcoded = self
            .transcoder
            .transcode(kind, raw.bytes, raw.ext.as_deref())
            .await?;
        self.host.publish(&transcoded.bytes, &transcoded.ext).await
    }

    /// 上传句柄缓存键 `<频道类型>:<sha256(原始字节)>`；远程 URL 不缓存
    pub async fn src_key(&self, src: &str, channel_kind: &str) -> Option<String> {
        if is_remote(src) {
            return None;
        }
        match load(src).await {
            Ok(raw) => Some(format!("{}:{}", channel_kind, sha256_hex(&raw.bytes))),
            Err(e) => {
                warn!(target: "Resource", "读取资源失败: {:#}", e);
                None
            }
        }
    }
}

pub fn is_remote(src: &str) -> bool {
    let lower = src.get(..8).unwrap_or(src).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// 读取 data: 或 file: 资源
pub async fn load(src: &str) -> anyhow::Result<RawResource> {
    if let Some(rest) = src.strip_prefix("data:") {
        return decode_data_url(rest);
    }
    if src.starts_with("file:") {
        let url = url::Url::parse(src).context("无效的 file URL")?;
        let path: PathBuf = url
            .to_file_path()
            .map_err(|_| anyhow::anyhow!("无法转换为本地路径: {}", src))?;
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("读取文件失败: {}", path.display()))?;
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        return Ok(RawResource {
            bytes,
            mime: None,
            ext,
        });
    }
    bail!("不支持的资源地址: {}", src.chars().take(32).collect::<String>())
}

/// `data:<mime>;base64,<payload>`
fn decode_data_url(rest: &str) -> anyhow::Result<RawResource> {
    let (meta, payload) = rest.split_once(',').context("data URL 缺少逗号")?;
    let (mime, is_base64) = match meta.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (meta, false),
    };
    let bytes = if is_base64 {
        STANDARD
            .decode(payload.trim())
            .context("data URL 的 base64 解码失败")?
    } else {
        payload.as_bytes().to_vec()
    };
    let mime = (!mime.is_empty()).then(|| mime.to_string());
    let ext = mime
        .as_deref()
        .and_then(|m| m.split_once('/'))
        .map(|(_, sub)| sub.split(['+', ';']).next().unwrap_or(sub).to_string());
    Ok(RawResource { bytes, mime, ext })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\npayload";

    fn data_url(bytes: &[u8]) -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(bytes))
    }

    fn pipeline(dir: &std::path::Path) -> ResourcePipeline {
        let host = LocalFileHost::new(dir.join("cache"), "http://127.0.0.1:5140", Duration::from_secs(60));
        ResourcePipeline::new(Arc::new(host), Transcoder::new(dir.join("cache"), dir.join("bin")))
    }

    #[tokio::test]
    async fn remote_urls_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let resolved = pipeline
            .normalize_src("HTTPS://example.com/a.png", MediaKind::Image)
            .await
            .unwrap();
        assert_eq!(resolved.url, "HTTPS://example.com/a.png");
        assert_eq!(resolved.hash, None);
        assert_eq!(pipeline.src_key("https://example.com/a.png", "group").await, None);
    }

    #[tokio::test]
    async fn data_url_is_published() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let resolved = pipeline
            .normalize_src(&data_url(PNG), MediaKind::Image)
            .await
            .unwrap();
        let hash = sha256_hex(PNG);
        assert_eq!(resolved.hash.as_deref(), Some(hash.as_str()));
        assert_eq!(
            resolved.url,
            format!("http://127.0.0.1:5140/files/{}.png", hash)
        );
        assert!(dir.path().join("cache").join(format!("{}.png", hash)).exists());
    }

    #[tokio::test]
    async fn src_key_hashes_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        assert_eq!(
            pipeline.src_key(&data_url(PNG), "group").await,
            Some(format!("group:{}", sha256_hex(PNG)))
        );

        let file = dir.path().join("a.png");
        tokio::fs::write(&file, PNG).await.unwrap();
        let file_url = url::Url::from_file_path(&file).unwrap().to_string();
        assert_eq!(
            pipeline.src_key(&file_url, "private").await,
            Some(format!("private:{}", sha256_hex(PNG)))
        );
    }

    #[tokio::test]
    async fn broken_source_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        assert!(
            pipeline
                .normalize_src("data:image/png;base64,@@@", MediaKind::Image)
                .await
                .is_none()
        );
        assert!(
            pipeline
                .normalize_src("ftp://x/y", MediaKind::Image)
                .await
                .is_none()
        );
    }

    #[test]
    fn data_url_metadata() {
        let raw = decode_data_url("audio/amr;base64,IyFBTVI=").unwrap();
        assert_eq!(raw.bytes, b"#!AMR");
        assert_eq!(raw.mime.as_deref(), Some("audio/amr"));
        assert_eq!(raw.ext.as_deref(), Some("amr"));
    }
}
