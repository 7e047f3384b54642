//! 开放平台 WebSocket 网关
//!
//! 每个分片一个会话：Hello -> Identify / Resume -> Dispatch 循环，
//! 心跳在独立任务中发送；断线后 3 秒重连，持有会话时优先 Resume。

use super::translate::user_of;
use crate::qq::intents;
use crate::qq::model::{Payload, Ready};
use crate::satori::LoginStatus;
use crate::server::Server;
use crate::{debug, error, info, trace, warn};
use anyhow::{Context as _, bail};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Writer = Arc<AsyncMutex<SplitSink<WsStream, WsMessage>>>;

/// 网关操作码
pub mod op {
    pub const DISPATCH: i64 = 0;
    pub const HEARTBEAT: i64 = 1;
    pub const IDENTIFY: i64 = 2;
    pub const RESUME: i64 = 6;
    pub const RECONNECT: i64 = 7;
    pub const INVALID_SESSION: i64 = 9;
    pub const HELLO: i64 = 10;
    pub const HEARTBEAT_ACK: i64 = 11;
}

const RECONNECT_DELAY: Duration = Duration::from_secs(3);
const DEFAULT_HEARTBEAT_MS: u64 = 41_250;

/// 跨重连保留的会话信息
#[derive(Default)]
struct Session {
    id: Option<String>,
    // 0 表示尚未收到任何序号
    seq: Arc<AtomicI64>,
}

impl Session {
    fn last_seq(&self) -> Option<i64> {
        match self.seq.load(Ordering::SeqCst) {
            0 => None,
            s => Some(s),
        }
    }

    fn clear(&mut self) {
        self.id = None;
        self.seq.store(0, Ordering::SeqCst);
    }
}

/// 连接结束的原因
#[derive(Debug, PartialEq, Eq)]
enum Closed {
    /// 服务端关闭连接
    Remote,
    /// 收到 op 7
    Reconnect,
    /// 收到 op 9，会话已作废
    InvalidSession,
}

/// 单个分片的主循环，直到进程关闭
pub async fn run(server: Arc<Server>, shard: u32, total: u32) {
    let stop = server.shutdown_signal();
    tokio::pin!(stop);
    let mut session = Session::default();

    loop {
        super::set_status(&server, LoginStatus::Connect);
        tokio::select! {
            result = connect_and_listen(&server, shard, total, &mut session) => match result {
                Ok(Closed::Reconnect) => {
                    super::set_status(&server, LoginStatus::Reconnect);
                    warn!(target: "Gateway", "分片 [{}/{}] 收到重连指令，3秒后重连...", shard, total);
                }
                Ok(closed) => {
                    super::set_status(&server, LoginStatus::Offline);
                    warn!(target: "Gateway", "分片 [{}/{}] 连接断开 ({:?})，3秒后重连...", shard, total, closed);
                }
                Err(e) => {
                    super::set_status(&server, LoginStatus::Offline);
                    error!(target: "Gateway", "分片 [{}/{}] 连接失败: {:#}。3秒后重试...", shard, total, e);
                }
            },
            _ = &mut stop => break,
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = &mut stop => break,
        }
    }

    super::set_status(&server, LoginStatus::Offline);
    info!(target: "Gateway", "分片 [{}/{}] 已停止", shard, total);
}

async fn connect_and_listen(
    server: &Arc<Server>,
    shard: u32,
    total: u32,
    session: &mut Session,
) -> anyhow::Result<Closed> {
    let gateway = server.api.gateway().await.context("获取网关地址失败")?;
    let token = server.api.gateway_token().await.context("获取鉴权 token 失败")?;

    let (ws_stream, _) = connect_async(gateway.url.as_str())
        .await
        .with_context(|| format!("连接网关 {} 失败", gateway.url))?;
    debug!(target: "Gateway", "已连接 {}", gateway.url);

    let (write_half, mut read_half) = ws_stream.split();
    let writer: Writer = Arc::new(AsyncMutex::new(write_half));

    let hello = next_payload(&mut read_half)
        .await?
        .context("等待 Hello 时连接关闭")?;
    if hello.op != op::HELLO {
        bail!("首帧应为 Hello，实际为 op {}", hello.op);
    }
    let interval = hello
        .d
        .get("heartbeat_interval")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_HEARTBEAT_MS);

    let greeting = match (&session.id, session.last_seq()) {
        (Some(id), Some(seq)) => {
            info!(target: "Gateway", "分片 [{}/{}] 尝试恢复会话 {}", shard, total, id);
            resume_payload(&token, id, seq)
        }
        _ => {
            let bits = intents::parse(&server.config.account.websocket.intents);
            identify_payload(&token, bits, shard, total)
        }
    };
    send(&writer, &greeting).await?;

    let heartbeat = tokio::spawn(heartbeat_loop(
        writer.clone(),
        session.seq.clone(),
        Duration::from_millis(interval),
    ));
    let result = listen(server, &writer, &mut read_half, session).await;
    heartbeat.abort();
    result
}

async fn listen(
    server: &Arc<Server>,
    writer: &Writer,
    read_half: &mut SplitStream<WsStream>,
    session: &mut Session,
) -> anyhow::Result<Closed> {
    while let Some(payload) = next_payload(read_half).await? {
        if let Some(s) = payload.s {
            session.seq.store(s, Ordering::SeqCst);
        }

        match payload.op {
            op::DISPATCH => {
                let kind = payload.t.unwrap_or_default();
                match kind.as_str() {
                    "READY" => {
                        let ready: Ready = serde_json::from_value(payload.d)
                            .context("READY 数据格式错误")?;
                        info!(target: "Gateway", "已就绪: {} ({})", ready.user.username.as_deref().unwrap_or("Unknown"), ready.user.id);
                        session.id = Some(ready.session_id);
                        server.logins.set_user(user_of(&ready.user));
                        super::set_status(server, LoginStatus::Online);
                    }
                    "RESUMED" => {
                        info!(target: "Gateway", "会话已恢复");
                        super::set_status(server, LoginStatus::Online);
                    }
                    _ => {
                        // 按到达顺序逐个处理，保证事件序号与上游顺序一致
                        super::dispatch(server, &kind, payload.d, payload.id.as_deref()).await;
                    }
                }
            }
            op::HEARTBEAT_ACK => trace!(target: "Gateway", "心跳已确认"),
            op::HEARTBEAT => {
                send(writer, &heartbeat_payload(session.last_seq())).await?;
            }
            op::RECONNECT => return Ok(Closed::Reconnect),
            op::INVALID_SESSION => {
                warn!(target: "Gateway", "会话无效，下次连接将重新鉴权");
                session.clear();
                return Ok(Closed::InvalidSession);
            }
            other => debug!(target: "Gateway", "忽略 op {}", other),
        }
    }
    Ok(Closed::Remote)
}

/// 读取下一个文本帧；连接关闭时返回 None
async fn next_payload(read_half: &mut SplitStream<WsStream>) -> anyhow::Result<Option<Payload>> {
    while let Some(frame) = read_half.next().await {
        match frame? {
            WsMessage::Text(text) => match serde_json::from_str::<Payload>(text.as_str()) {
                Ok(payload) => return Ok(Some(payload)),
                Err(e) => warn!(target: "Gateway", "无法解析的网关帧: {}", e),
            },
            WsMessage::Close(frame) => {
                if let Some(frame) = frame {
                    warn!(target: "Gateway", "网关关闭连接: {} {}", frame.code, frame.reason);
                }
                return Ok(None);
            }
            _ => {}
        }
    }
    Ok(None)
}

async fn heartbeat_loop(writer: Writer, seq: Arc<AtomicI64>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let last = match seq.load(Ordering::SeqCst) {
            0 => None,
            s => Some(s),
        };
        if let Err(e) = send(&writer, &heartbeat_payload(last)).await {
            warn!(target: "Gateway", "发送心跳失败: {}", e);
            return;
        }
    }
}

async fn send(writer: &Writer, payload: &Value) -> anyhow::Result<()> {
    let text = serde_json::to_string(payload)?;
    writer.lock().await.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

fn identify_payload(token: &str, intents: u32, shard: u32, total: u32) -> Value {
    json!({
        "op": op::IDENTIFY,
        "d": {
            "token": token,
            "intents": intents,
            "shard": [shard, total],
            "properties": {
                "$os": std::env::consts::OS,
                "$browser": env!("CARGO_PKG_NAME"),
                "$device": env!("CARGO_PKG_NAME"),
            },
        },
    })
}

fn resume_payload(token: &str, session_id: &str, seq: i64) -> Value {
    json!({
        "op": op::RESUME,
        "d": {"token": token, "session_id": session_id, "seq": seq},
    })
}

fn heartbeat_payload(seq: Option<i64>) -> Value {
    json!({"op": op::HEARTBEAT, "d": seq})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_tracks_last_seq() {
        let mut session = Session::default();
        assert_eq!(session.last_seq(), None);
        session.id = Some("s".into());
        session.seq.store(42, Ordering::SeqCst);
        assert_eq!(session.last_seq(), Some(42));
        session.clear();
        assert_eq!(session.id, None);
        assert_eq!(session.last_seq(), None);
    }

    #[test]
    fn greeting_payloads() {
        let identify = identify_payload("QQBot t", 513, 1, 4);
        assert_eq!(identify["op"], 2);
        assert_eq!(identify["d"]["token"], "QQBot t");
        assert_eq!(identify["d"]["intents"], 513);
        assert_eq!(identify["d"]["shard"], json!([1, 4]));

        let resume = resume_payload("QQBot t", "sess", 9);
        assert_eq!(resume, json!({"op": 6, "d": {"token": "QQBot t", "session_id": "sess", "seq": 9}}));

        assert_eq!(heartbeat_payload(None), json!({"op": 1, "d": null}));
        assert_eq!(heartbeat_payload(Some(3)), json!({"op": 1, "d": 3}));
    }
}
