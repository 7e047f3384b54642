use anyhow::bail;
use clap::Parser;
use satori_qq::adapter::translate::user_of;
use satori_qq::log::{self, Level};
use satori_qq::resource::transcode::ffmpeg_available;
use satori_qq::{AppConfig, Server, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "satori-qq", version, about = "QQ 开放平台 Satori 协议网关")]
struct Cli {
    /// 跳过启动检查（凭据、ffmpeg、app_id）
    #[arg(long)]
    faststart: bool,

    /// 配置文件路径
    #[arg(long, default_value = "config.yml")]
    config: PathBuf,

    /// 数据目录
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config).await?;
    match Level::parse(&config.log_level) {
        Some(level) => log::set_level(level),
        None => warn!(target: "Config", "未知的日志级别 {}，使用 info", config.log_level),
    }

    let server = Server::builder()
        .config(config)
        .data_dir(&cli.data_dir)
        .build()
        .await?;

    if !cli.faststart {
        startup_checks(&server).await?;
    }

    let mut runner = tokio::spawn(server.clone().run());
    let result = tokio::select! {
        result = &mut runner => result,
        _ = tokio::signal::ctrl_c() => {
            info!(target: "Server", "收到 Ctrl-C");
            server.shutdown();
            runner.await
        }
    };

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(target: "Server", "服务异常退出: {:#}", e);
            return Err(e);
        }
        Err(e) => bail!("服务任务异常: {}", e),
    }

    info!(target: "Server", "已停止");
    Ok(())
}

/// 校验凭据并探测外部依赖
async fn startup_checks(server: &Arc<Server>) -> anyhow::Result<()> {
    if server.config.account.app_id.trim().is_empty() {
        bail!("account.app_id 未配置；使用 --faststart 可跳过检查");
    }

    match server.api.me().await {
        Ok(me) => {
            info!(target: "Startup", "凭据有效: {} ({})", me.username.as_deref().unwrap_or("-"), me.id);
            server.logins.set_user(user_of(&me));
        }
        Err(e) => bail!("凭据校验失败: {}", e),
    }

    if !ffmpeg_available().await {
        warn!(target: "Startup", "未检测到 ffmpeg，音视频消息将无法转码");
    }
    Ok(())
}
