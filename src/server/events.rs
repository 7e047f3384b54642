//! 下游事件 WebSocket：IDENTIFY 握手、重放与心跳

use super::Server;
use super::files::PROXY_PREFIXES;
use crate::hub::{Delivery, EventSink};
use crate::satori::Event;
use crate::satori::signal::{IdentifyBody, Opcode, ReadyBody, Signal};
use crate::{debug, info, trace, warn};
use async_trait::async_trait;
use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::time::{Instant, sleep_until, timeout};

pub const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(11);
/// 关闭帧的写入时限，对端不读时放弃
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

pub async fn upgrade(State(server): State<Arc<Server>>, websocket: WebSocketUpgrade) -> Response {
    websocket.on_upgrade(move |socket| run_session(server, socket))
}

/// 单个下游会话的写端；写操作经互斥锁串行化
struct Session {
    id: u64,
    writer: AsyncMutex<SplitSink<WebSocket, WsMessage>>,
    closed: AtomicBool,
    // 投递失败时唤醒读循环
    broken: Notify,
}

impl Session {
    async fn send(&self, signal: &Signal) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let text = match serde_json::to_string(signal) {
            Ok(text) => text,
            Err(e) => {
                warn!(target: "Events", "信令序列化失败: {}", e);
                return true;
            }
        };
        let mut writer = self.writer.lock().await;
        match writer.send(WsMessage::Text(text.into())).await {
            Ok(()) => true,
            Err(e) => {
                debug!(target: "Events", "会话 {} 写入失败: {}", self.id, e);
                false
            }
        }
    }

    /// 幂等关闭
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.broken.notify_one();
        let closing = async {
            let mut writer = self.writer.lock().await;
            let _ = writer.send(WsMessage::Close(None)).await;
            let _ = writer.close().await;
        };
        if timeout(CLOSE_TIMEOUT, closing).await.is_err() {
            debug!(target: "Events", "会话 {} 关闭帧写入超时", self.id);
        }
    }
}

/// 挂到事件中心上的投递目标
struct WsSink(Arc<Session>);

#[async_trait]
impl EventSink for WsSink {
    fn describe(&self) -> String {
        format!("websocket #{}", self.0.id)
    }

    async fn deliver(&self, event: &Event) -> Delivery {
        let signal = match Signal::event(event) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(target: "Events", "事件 {} 序列化失败: {}", event.sn, e);
                return Delivery::Failed;
            }
        };
        if self.0.send(&signal).await {
            Delivery::Delivered
        } else {
            self.0.close().await;
            Delivery::Dead
        }
    }

    /// 因积压被移出事件中心时断开连接，由客户端重连后重放
    async fn closed(&self, _sink_id: u64) {
        self.0.close().await;
    }
}

async fn run_session(server: Arc<Server>, socket: WebSocket) {
    let (writer, mut reader) = socket.split();
    let session = Arc::new(Session {
        id: server.next_session_id(),
        writer: AsyncMutex::new(writer),
        closed: AtomicBool::new(false),
        broken: Notify::new(),
    });

    let identify = match timeout(server.identify_timeout, read_identify(&mut reader)).await {
        Ok(Some(body)) => body,
        Ok(None) => {
            debug!(target: "Events", "会话 {} 未完成 IDENTIFY", session.id);
            session.close().await;
            return;
        }
        Err(_) => {
            warn!(target: "Events", "会话 {} IDENTIFY 超时", session.id);
            session.close().await;
            return;
        }
    };

    let token = &server.config.satori.token;
    if !token.is_empty() && identify.token != *token {
        warn!(target: "Events", "会话 {} 鉴权失败", session.id);
        session.close().await;
        return;
    }

    let ready = ReadyBody {
        logins: server.logins.all(),
        proxy_urls: PROXY_PREFIXES.iter().map(|s| s.to_string()).collect(),
    };
    let sent = match Signal::ready(&ready) {
        Ok(signal) => session.send(&signal).await,
        Err(_) => false,
    };
    if !sent {
        session.close().await;
        return;
    }

    let sink_id = server
        .hub
        .subscribe(WsSink(session.clone()), identify.sn);
    info!(
        target: "Events",
        "会话 {} 已连接 (sn={})",
        session.id,
        identify.sn.map(|sn| sn.to_string()).unwrap_or_else(|| "-".into())
    );

    heartbeat_loop(&server, &session, &mut reader).await;

    session.close().await;
    server.hub.unsubscribe(sink_id);
    info!(target: "Events", "会话 {} 已断开", session.id);
}

/// 读取第一条信令，必须为 IDENTIFY
async fn read_identify(reader: &mut SplitStream<WebSocket>) -> Option<IdentifyBody> {
    while let Some(Ok(message)) = reader.next().await {
        let text = match message {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => return None,
            _ => continue,
        };
        let signal: Signal = serde_json::from_str(text.as_str()).ok()?;
        if signal.opcode() != Some(Opcode::Identify) {
            return None;
        }
        return match signal.body {
            Some(body) => serde_json::from_value(body).ok(),
            None => Some(IdentifyBody::default()),
        };
    }
    None
}

/// 稳态循环：heartbeat_timeout 内必须收到一次 PING
async fn heartbeat_loop(server: &Server, session: &Session, reader: &mut SplitStream<WebSocket>) {
    let shutdown = server.shutdown_signal();
    tokio::pin!(shutdown);
    let deadline = sleep_until(Instant::now() + server.heartbeat_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!(target: "Events", "会话 {} 随服务关闭", session.id);
                return;
            }
            _ = session.broken.notified() => return,
            _ = &mut deadline => {
                warn!(target: "Events", "会话 {} 心跳超时", session.id);
                return;
            }
            frame = reader.next() => {
                let text = match frame {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | None => return,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(target: "Events", "会话 {} 读取失败: {}", session.id, e);
                        return;
                    }
                };
                let Ok(signal) = serde_json::from_str::<Signal>(text.as_str()) else {
                    trace!(target: "Events", "会话 {} 忽略无法解析的帧", session.id);
                    continue;
                };
                if signal.opcode() == Some(Opcode::Ping) {
                    deadline.as_mut().reset(Instant::now() + server.heartbeat_timeout);
                    if !session.send(&Signal::pong()).await {
                        return;
                    }
                }
            }
        }
    }
}
