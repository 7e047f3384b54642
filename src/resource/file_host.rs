//! 转码后媒体的暂存与对外发布

use anyhow::Context as _;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;

use crate::{debug, warn};

/// 已发布的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub url: String,
    pub hash: String,
}

/// 把字节发布为开放平台可拉取的 URL
#[async_trait]
pub trait FileHost: Send + Sync + 'static {
    async fn publish(&self, bytes: &[u8], ext: &str) -> anyhow::Result<Published>;

    async fn delete(&self, hash: &str) -> anyhow::Result<()>;
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// 写入 data/cache，由本进程的 `/files/{name}` 路由对外提供
pub struct LocalFileHost {
    dir: PathBuf,
    external_url: String,
    ttl: Duration,
}

impl LocalFileHost {
    pub fn new(dir: impl Into<PathBuf>, external_url: &str, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            external_url: external_url.trim_end_matches('/').to_string(),
            ttl,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 文件名只允许 `<hash>.<ext>` 形式
    pub fn path_for(&self, name: &str) -> Option<PathBuf> {
        let valid = is_staged_name(name)
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_');
        valid.then(|| self.dir.join(name))
    }

    pub async fn read(&self, name: &str) -> Option<Vec<u8>> {
        let path = self.path_for(name)?;
        fs::read(path).await.ok()
    }

    /// 删除超过保留时间的暂存文件，返回删除数量
    pub async fn sweep(&self) -> usize {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            // message.db 等数据库文件不在清理范围
            if !is_staged_name(&entry.file_name().to_string_lossy()) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let expired = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .is_some_and(|age| age >= self.ttl);
            if meta.is_file() && expired {
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(target: "FileHost", "删除 {} 失败: {}", path.display(), e),
                }
            }
        }
        if removed > 0 {
            debug!(target: "FileHost", "清理了 {} 个过期文件", removed);
        }
        removed
    }
}

/// 64 位十六进制哈希加扩展名
fn is_staged_name(name: &str) -> bool {
    match name.split_once('.') {
        Some((stem, _)) => stem.len() == 64 && stem.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

#[async_trait]
impl FileHost for LocalFileHost {
    async fn publish(&self, bytes: &[u8], ext: &str) -> anyhow::Result<Published> {
        let hash = sha256_hex(bytes);
        let name = format!("{}.{}", hash, ext);
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("创建目录失败: {}", self.dir.display()))?;

        let path = self.dir.join(&name);
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("写入文件失败: {}", path.display()))?;

        Ok(Published {
            url: format!("{}/files/{}", self.external_url, name),
            hash,
        })
    }

    async fn delete(&self, hash: &str) -> anyhow::Result<()> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.split_once('.').is_some_and(|(stem, _)| stem == hash) {
                fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_read_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let host = LocalFileHost::new(dir.path(), "http://host:5140/", Duration::from_secs(60));

        let published = host.publish(b"abc", "png").await.unwrap();
        assert_eq!(published.hash, sha256_hex(b"abc"));
        assert_eq!(
            published.url,
            format!("http://host:5140/files/{}.png", published.hash)
        );
        let name = format!("{}.png", published.hash);
        assert_eq!(host.read(&name).await.unwrap(), b"abc");

        host.delete(&published.hash).await.unwrap();
        assert!(host.read(&name).await.is_none());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_staged_files() {
        let dir = tempfile::tempdir().unwrap();
        let host = LocalFileHost::new(dir.path(), "http://h", Duration::ZERO);
        host.publish(b"x", "jpg").await.unwrap();
        tokio::fs::write(dir.path().join("message.db"), b"db").await.unwrap();

        assert_eq!(host.sweep().await, 1);
        assert!(dir.path().join("message.db").exists());
    }

    #[test]
    fn traversal_names_are_rejected() {
        let host = LocalFileHost::new("/tmp/x", "http://h", Duration::ZERO);
        assert!(host.path_for("../etc/passwd").is_none());
        assert!(host.path_for(".hidden").is_none());
        assert!(host.path_for("a/b").is_none());
        assert!(host.path_for("message.db").is_none());
        let staged = format!("{}.png", sha256_hex(b"abc"));
        assert!(host.path_for(&staged).is_some());
    }
}
