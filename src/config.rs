use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::info;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    // 日志级别: off/fatal/error/warn/info/debug/trace
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // QQ 机器人账号
    #[serde(default)]
    pub account: AccountConfig,

    // 本地文件服务（暴露转码后的媒体给开放平台拉取）
    #[serde(default)]
    pub file_server: FileServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    // Satori 下游服务
    #[serde(default)]
    pub satori: SatoriConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccountConfig {
    // 机器人自身 ID，留空时使用网关 READY 中的用户 ID
    #[serde(default)]
    pub bot_id: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub websocket: WebsocketConfig,
    #[serde(default)]
    pub webhook: UpstreamWebhookConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebsocketConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_shards")]
    pub shards: u32,
    #[serde(default = "default_intents")]
    pub intents: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UpstreamWebhookConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_any_host")]
    pub host: String,
    #[serde(default = "default_webhook_port")]
    pub port: u16,
    #[serde(default = "default_webhook_path")]
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FileServerConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    // 开放平台访问本机文件时使用的外部地址
    #[serde(default = "default_external_url")]
    pub external_url: String,
    // 暂存文件的保留秒数
    #[serde(default = "default_file_ttl")]
    pub ttl: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub message_database: MessageDatabaseConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MessageDatabaseConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    // 每个频道保留的最大消息条数
    #[serde(default = "default_message_limit")]
    pub limit: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SatoriConfig {
    #[serde(default = "default_satori_version")]
    pub version: u32,
    // 路由前缀，例如 "/satori"
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub webhook: DownstreamWebhookConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_local_host")]
    pub host: String,
    #[serde(default = "default_satori_port")]
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DownstreamWebhookConfig {
    // 推送超时（秒）
    #[serde(default = "default_webhook_timeout")]
    pub timeout: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_shards() -> u32 {
    1
}

fn default_intents() -> Vec<String> {
    [
        "GUILDS",
        "GUILD_MEMBERS",
        "PUBLIC_GUILD_MESSAGES",
        "DIRECT_MESSAGE",
        "GROUP_AND_C2C_EVENT",
        "INTERACTION",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_any_host() -> String {
    "0.0.0.0".to_string()
}

fn default_local_host() -> String {
    "127.0.0.1".to_string()
}

fn default_webhook_port() -> u16 {
    8443
}

fn default_webhook_path() -> String {
    "/qqbot".to_string()
}

fn default_external_url() -> String {
    "http://127.0.0.1:5140".to_string()
}

fn default_file_ttl() -> u64 {
    3600
}

fn default_message_limit() -> u64 {
    1000
}

fn default_satori_version() -> u32 {
    1
}

fn default_satori_port() -> u16 {
    5140
}

fn default_webhook_timeout() -> u64 {
    10
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            account: AccountConfig::default(),
            file_server: FileServerConfig::default(),
            database: DatabaseConfig::default(),
            satori: SatoriConfig::default(),
        }
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            bot_id: String::new(),
            app_id: String::new(),
            token: String::new(),
            app_secret: String::new(),
            sandbox: false,
            websocket: WebsocketConfig::default(),
            webhook: UpstreamWebhookConfig::default(),
        }
    }
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            enable: true,
            shards: default_shards(),
            intents: default_intents(),
        }
    }
}

impl Default for UpstreamWebhookConfig {
    fn default() -> Self {
        Self {
            enable: false,
            host: default_any_host(),
            port: default_webhook_port(),
            path: default_webhook_path(),
        }
    }
}

impl Default for FileServerConfig {
    fn default() -> Self {
        Self {
            enable: true,
            external_url: default_external_url(),
            ttl: default_file_ttl(),
        }
    }
}

impl Default for MessageDatabaseConfig {
    fn default() -> Self {
        Self {
            enable: true,
            limit: default_message_limit(),
        }
    }
}

impl Default for SatoriConfig {
    fn default() -> Self {
        Self {
            version: default_satori_version(),
            path: String::new(),
            token: String::new(),
            server: ServerConfig::default(),
            webhook: DownstreamWebhookConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_local_host(),
            port: default_satori_port(),
        }
    }
}

impl Default for DownstreamWebhookConfig {
    fn default() -> Self {
        Self {
            timeout: default_webhook_timeout(),
        }
    }
}

impl SatoriConfig {
    /// 规范化后的路由前缀：空串或以 "/" 开头且不以 "/" 结尾
    pub fn base_path(&self) -> String {
        let trimmed = self.path.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        }
    }
}

impl AppConfig {
    /// 读取配置文件；不存在时写入默认配置并继续
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let config = Self::default();
            config.save(path).await?;
            info!(target: "Config", "已生成默认配置文件: {}", path.display());
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("解析配置文件失败: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        // 空文件视为全部默认
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// 原子保存：先写临时文件再重命名
    pub async fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("yml.tmp");
        fs::write(&tmp, yaml).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// 开放平台 API 根地址
    pub fn api_base(&self) -> &'static str {
        if self.account.sandbox {
            "https://sandbox.api.sgroup.qq.com"
        } else {
            "https://api.sgroup.qq.com"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_fills_defaults() {
        let config = AppConfig::from_yaml(
            r#"
log_level: debug
account:
  app_id: "102000"
  websocket:
    shards: 2
satori:
  path: satori/
"#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.account.app_id, "102000");
        assert_eq!(config.account.websocket.shards, 2);
        assert!(config.account.websocket.enable);
        assert!(!config.account.websocket.intents.is_empty());
        assert_eq!(config.account.webhook.path, "/qqbot");
        assert_eq!(config.satori.webhook.timeout, 10);
        assert_eq!(config.satori.base_path(), "/satori");
        assert!(config.database.message_database.enable);
    }

    #[test]
    fn empty_base_path_stays_empty() {
        let config = AppConfig::default();
        assert_eq!(config.satori.base_path(), "");
        assert_eq!(config.api_base(), "https://api.sgroup.qq.com");
    }

    #[tokio::test]
    async fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");

        let config = AppConfig::load(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.satori.server.port, 5140);

        let reloaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(reloaded.account.webhook.port, 8443);
    }
}
