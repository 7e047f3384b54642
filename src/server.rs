// ============================================================================
// 进程核心
// Server 持有全部单例组件，由构建器组装后以 Arc 传给各个模块
// ============================================================================

use crate::action::ActionRegistry;
use crate::adapter::{self, Logins};
use crate::cache::{MediaCaches, MessageStore};
use crate::config::AppConfig;
use crate::hub::EventHub;
use crate::hub::webhook::WebhookRegistry;
use crate::identity::IdentityMaps;
use crate::qq::{HttpOpenApi, OpenApi, QqApi};
use crate::resource::{LocalFileHost, ResourcePipeline, Transcoder};
use crate::scheduler::Scheduler;
use crate::{error, info, warn};
use anyhow::Context as _;
use axum::Router;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

pub mod events;
pub mod files;
pub mod http;

/// 暂存文件清理间隔
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const PROXY_TIMEOUT: Duration = Duration::from_secs(60);

pub struct Server {
    pub config: AppConfig,
    pub data_dir: PathBuf,
    pub api: QqApi,
    pub hub: Arc<EventHub>,
    pub webhooks: Arc<WebhookRegistry>,
    pub logins: Logins,
    pub identities: IdentityMaps,
    pub media: MediaCaches,
    /// 未启用消息缓存时为 None
    pub messages: Option<MessageStore>,
    pub resources: ResourcePipeline,
    pub files: Arc<LocalFileHost>,
    pub actions: ActionRegistry,
    pub scheduler: Scheduler,
    /// 媒体代理用的 HTTP 客户端
    pub http: reqwest::Client,
    /// 下游会话须在此时限内发送 IDENTIFY
    pub identify_timeout: Duration,
    /// 下游会话两次 PING 的最大间隔
    pub heartbeat_timeout: Duration,
    shutdown: watch::Sender<bool>,
    sessions: AtomicU64,
}

/// 服务构建器
pub struct ServerBuilder {
    config: AppConfig,
    data_dir: PathBuf,
    api: Option<Arc<dyn OpenApi>>,
    identify_timeout: Duration,
    heartbeat_timeout: Duration,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            data_dir: PathBuf::from("data"),
            api: None,
            identify_timeout: events::IDENTIFY_TIMEOUT,
            heartbeat_timeout: events::HEARTBEAT_TIMEOUT,
        }
    }

    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置数据目录
    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.data_dir = path.as_ref().to_path_buf();
        self
    }

    /// 替换开放平台传输层，未设置时使用 HTTP 实现
    pub fn api(mut self, api: Arc<dyn OpenApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn identify_timeout(mut self, timeout: Duration) -> Self {
        self.identify_timeout = timeout;
        self
    }

    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// 打开数据库并组装全部组件
    pub async fn build(self) -> anyhow::Result<Arc<Server>> {
        let Self {
            config,
            data_dir,
            api,
            identify_timeout,
            heartbeat_timeout,
        } = self;

        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("创建数据目录失败: {}", data_dir.display()))?;
        let cache_dir = data_dir.join("cache");

        let transport: Arc<dyn OpenApi> = match api {
            Some(api) => api,
            None => Arc::new(HttpOpenApi::new(&config.account, config.api_base())?),
        };

        let media = MediaCaches::open(&data_dir).await?;
        let message_db = &config.database.message_database;
        let messages = if message_db.enable {
            Some(MessageStore::open(&cache_dir.join("message.db"), message_db.limit).await?)
        } else {
            None
        };

        let files = Arc::new(LocalFileHost::new(
            &cache_dir,
            &config.file_server.external_url,
            Duration::from_secs(config.file_server.ttl),
        ));
        let transcoder = Transcoder::new(&cache_dir, data_dir.join("bin"));
        let resources = ResourcePipeline::new(files.clone(), transcoder);

        let hub = Arc::new(EventHub::new());
        let webhooks = Arc::new(WebhookRegistry::new(
            hub.clone(),
            Duration::from_secs(config.satori.webhook.timeout),
        ));
        let logins = Logins::new(&config.account.bot_id, messages.is_some());
        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Server {
            api: QqApi::new(transport),
            hub,
            webhooks,
            logins,
            identities: IdentityMaps::new(),
            media,
            messages,
            resources,
            files,
            actions: ActionRegistry::with_defaults(),
            scheduler: Scheduler::new(),
            http: reqwest::Client::builder()
                .timeout(PROXY_TIMEOUT)
                .build()
                .context("创建代理客户端失败")?,
            identify_timeout,
            heartbeat_timeout,
            shutdown,
            sessions: AtomicU64::new(1),
            data_dir,
            config,
        }))
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// 进程关闭时完成的 future，可多次获取
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown.subscribe();
        async move {
            let _ = rx.wait_for(|stopped| *stopped).await;
        }
    }

    /// 下游 WebSocket 会话编号
    pub fn next_session_id(&self) -> u64 {
        self.sessions.fetch_add(1, Ordering::SeqCst)
    }

    /// 通知所有会话与后台任务退出
    pub fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        info!(target: "Server", "正在关闭...");
        self.scheduler.shutdown();
    }

    /// 下游 HTTP 与 WebSocket 路由
    pub fn router(self: &Arc<Self>) -> Router {
        http::router(self.clone())
    }

    /// 启动上游接入与后台任务，随后在 satori.server 上提供服务直到关闭
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = format!(
            "{}:{}",
            self.config.satori.server.host, self.config.satori.server.port
        );
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Satori 端口 {} 绑定失败", addr))?;
        self.serve(listener).await
    }

    /// 在给定的监听器上运行；测试中用于绑定随机端口
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        self.start_background();

        let addr = listener.local_addr()?;
        info!(
            target: "Server",
            "Satori 服务监听于 http://{}{}/v1",
            addr,
            self.config.satori.base_path()
        );

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(self.shutdown_signal())
            .await;
        self.shutdown();
        result.context("Satori 服务异常退出")
    }

    fn start_background(self: &Arc<Self>) {
        let account = &self.config.account;
        if account.websocket.enable {
            let total = account.websocket.shards.max(1);
            for shard in 0..total {
                let handle = tokio::spawn(adapter::gateway::run(self.clone(), shard, total));
                self.scheduler.track(handle.abort_handle());
            }
        }
        if account.webhook.enable {
            let server = self.clone();
            let handle = tokio::spawn(async move {
                if let Err(e) = adapter::webhook::serve(server).await {
                    error!(target: "Webhook", "回调服务退出: {:#}", e);
                }
            });
            self.scheduler.track(handle.abort_handle());
        }
        if !account.websocket.enable && !account.webhook.enable {
            warn!(target: "Server", "网关与 Webhook 均未启用，不会收到任何上游事件");
        }

        let files = self.files.clone();
        self.scheduler.add_interval(SWEEP_INTERVAL, move || {
            let files = files.clone();
            async move {
                files.sweep().await;
            }
        });
    }
}
