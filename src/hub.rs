// ============================================================================
// 事件中心
// 唯一的 sn 分配者；持有重放环形缓冲；向所有下游投递目标扇出
// ============================================================================

use crate::satori::{Event, now_millis};
use crate::{debug, trace, warn};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

pub mod webhook;

/// 重放环形缓冲容量
pub const HISTORY_CAPACITY: usize = 1000;
/// 单个目标最多积压的事件数，超出即移除该目标
pub const SINK_QUEUE_CAPACITY: usize = 4096;

/// 单次投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// 本次失败，目标保留
    Failed,
    /// 目标已失效，移除
    Dead,
}

/// 下游投递目标（WebSocket 会话或 Webhook）
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    fn describe(&self) -> String;

    async fn deliver(&self, event: &Event) -> Delivery;

    /// 目标被移出事件中心后调用一次
    async fn closed(&self, _sink_id: u64) {}
}

struct SinkEntry {
    id: u64,
    name: String,
    tx: mpsc::Sender<Arc<Event>>,
    // 条目被移除时随之丢弃，通知投递循环立即退出
    _evict: oneshot::Sender<()>,
}

/// 上游原生事件 ID -> sn，容量与环形缓冲一致
#[derive(Default)]
struct NativeIds {
    order: VecDeque<String>,
    map: HashMap<String, i64>,
}

impl NativeIds {
    fn insert(&mut self, id: String, sn: i64) {
        if self.order.len() >= HISTORY_CAPACITY
            && let Some(old) = self.order.pop_front()
        {
            self.map.remove(&old);
        }
        self.order.push_back(id.clone());
        self.map.insert(id, sn);
    }
}

#[derive(Default)]
struct HubState {
    ring: VecDeque<Arc<Event>>,
    sinks: Vec<SinkEntry>,
    native: NativeIds,
}

impl HubState {
    fn replay_after(&self, sn: i64) -> Vec<Arc<Event>> {
        self.ring.iter().filter(|e| e.sn > sn).cloned().collect()
    }
}

pub struct EventHub {
    counter: AtomicI64,
    next_sink: AtomicU64,
    state: RwLock<HubState>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            counter: AtomicI64::new(0),
            next_sink: AtomicU64::new(1),
            state: RwLock::new(HubState::default()),
        }
    }

    /// 分配 sn、写入环形缓冲并投递给所有目标，返回分配的 sn
    ///
    /// 分配与入队在同一把写锁内完成，保证每个目标收到的 sn 严格递增。
    /// 入队不阻塞，实际发送由各目标自己的任务完成；队列已满的目标被移除。
    pub fn broadcast(&self, event: Event) -> i64 {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        self.push_locked(&mut state, event)
    }

    /// 带上游原生 ID 的广播；同一 ID 已广播过时返回 None
    pub fn broadcast_native(&self, native_id: Option<&str>, event: Event) -> Option<i64> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = native_id.filter(|id| !id.is_empty()) {
            if let Some(sn) = state.native.map.get(id) {
                debug!(target: "Hub", "重复的上游事件 {} (sn={})，已忽略", id, sn);
                return None;
            }
            let sn = self.push_locked(&mut state, event);
            state.native.insert(id.to_string(), sn);
            return Some(sn);
        }
        Some(self.push_locked(&mut state, event))
    }

    fn push_locked(&self, state: &mut HubState, mut event: Event) -> i64 {
        let sn = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        event.sn = sn;
        if event.timestamp == 0 {
            event.timestamp = now_millis();
        }
        let event = Arc::new(event);

        if state.ring.len() >= HISTORY_CAPACITY {
            state.ring.pop_front();
        }
        state.ring.push_back(event.clone());

        state.sinks.retain(|sink| match sink.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    target: "Hub",
                    "投递目标 {} ({}) 积压超过 {} 条，已移除",
                    sink.id,
                    sink.name,
                    SINK_QUEUE_CAPACITY
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                trace!(target: "Hub", "投递目标 {} ({}) 已关闭", sink.id, sink.name);
                false
            }
        });

        trace!(target: "Hub", "广播事件 sn={} type={}", sn, event.event_type);
        sn
    }

    /// 返回 sn 之后的事件；sn 已被淘汰时从最早的可用事件开始
    pub fn replay_after(&self, sn: i64) -> Vec<Arc<Event>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .replay_after(sn)
    }

    /// 注册投递目标；`replay_from` 不为空时先把重放事件排入队列，再接收实时事件
    pub fn subscribe<S: EventSink>(self: &Arc<Self>, sink: S, replay_from: Option<i64>) -> u64 {
        let (tx, rx) = mpsc::channel(SINK_QUEUE_CAPACITY);
        let (evict, evicted) = oneshot::channel();
        let id = self.next_sink.fetch_add(1, Ordering::SeqCst);
        let sink = Arc::new(sink);
        let name = sink.describe();

        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(after) = replay_from {
                // 重放量不超过环形缓冲容量，不会占满队列
                for event in state.replay_after(after) {
                    let _ = tx.try_send(event);
                }
            }
            state.sinks.push(SinkEntry {
                id,
                name: name.clone(),
                tx,
                _evict: evict,
            });
        }

        debug!(target: "Hub", "注册投递目标 {} ({})", id, name);
        tokio::spawn(run_sink(Arc::downgrade(self), id, sink, rx, evicted));
        id
    }

    /// 移除投递目标，返回其是否存在
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let before = state.sinks.len();
        state.sinks.retain(|s| s.id != id);
        before != state.sinks.len()
    }

    pub fn is_subscribed(&self, id: u64) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sinks
            .iter()
            .any(|s| s.id == id)
    }

    pub fn sink_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sinks
            .len()
    }

    pub fn history_len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ring
            .len()
    }

    /// 最近一次分配的 sn
    pub fn last_sn(&self) -> i64 {
        self.counter.load(Ordering::SeqCst)
    }
}

/// 单个目标的串行投递循环；目标被移出事件中心时中断正在进行的投递
async fn run_sink<S: EventSink>(
    hub: Weak<EventHub>,
    id: u64,
    sink: Arc<S>,
    mut rx: mpsc::Receiver<Arc<Event>>,
    mut evicted: oneshot::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            _ = &mut evicted => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let delivery = tokio::select! {
            _ = &mut evicted => break,
            delivery = sink.deliver(&event) => delivery,
        };
        if delivery == Delivery::Dead {
            break;
        }
    }
    if let Some(hub) = hub.upgrade() {
        hub.unsubscribe(id);
    }
    debug!(target: "Hub", "投递目标 {} ({}) 已移除", id, sink.describe());
    sink.closed(id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::satori::event_types;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    struct Recorder {
        seen: Arc<Mutex<Vec<i64>>>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl EventSink for Recorder {
        fn describe(&self) -> String {
            "recorder".to_string()
        }

        async fn deliver(&self, event: &Event) -> Delivery {
            let mut seen = self.seen.lock().unwrap();
            if self.fail_after.is_some_and(|n| seen.len() >= n) {
                return Delivery::Dead;
            }
            seen.push(event.sn);
            Delivery::Delivered
        }
    }

    /// 永远完成不了投递的目标
    struct Stalled {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl EventSink for Stalled {
        fn describe(&self) -> String {
            "stalled".to_string()
        }

        async fn deliver(&self, _event: &Event) -> Delivery {
            std::future::pending().await
        }

        async fn closed(&self, _sink_id: u64) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn message_event() -> Event {
        Event::new(event_types::MESSAGE_CREATED)
    }

    async fn wait_for(seen: &Arc<Mutex<Vec<i64>>>, len: usize) {
        for _ in 0..200 {
            if seen.lock().unwrap().len() >= len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn ring_keeps_latest_thousand() {
        let hub = EventHub::new();
        for _ in 0..2000 {
            hub.broadcast(message_event());
        }
        assert_eq!(hub.history_len(), HISTORY_CAPACITY);

        let replay = hub.replay_after(500);
        let sns: Vec<i64> = replay.iter().map(|e| e.sn).collect();
        assert_eq!(sns.len(), 1000);
        assert_eq!(sns.first(), Some(&1001));
        assert_eq!(sns.last(), Some(&2000));
    }

    #[test]
    fn push_at_capacity_evicts_exactly_one() {
        let hub = EventHub::new();
        for _ in 0..HISTORY_CAPACITY {
            hub.broadcast(message_event());
        }
        let sn = hub.broadcast(message_event());
        let all = hub.replay_after(0);
        assert_eq!(all.len(), HISTORY_CAPACITY);
        assert_eq!(all.first().map(|e| e.sn), Some(2));
        assert_eq!(all.last().map(|e| e.sn), Some(sn));
    }

    #[test]
    fn zero_timestamp_is_filled() {
        let hub = EventHub::new();
        hub.broadcast(message_event());
        let mut stamped = message_event();
        stamped.timestamp = 42;
        hub.broadcast(stamped);

        let all = hub.replay_after(0);
        assert!(all[0].timestamp > 0);
        assert_eq!(all[1].timestamp, 42);
    }

    #[test]
    fn native_ids_deduplicate() {
        let hub = EventHub::new();
        assert_eq!(hub.broadcast_native(Some("ev-1"), message_event()), Some(1));
        assert_eq!(hub.broadcast_native(Some("ev-1"), message_event()), None);
        assert_eq!(hub.broadcast_native(None, message_event()), Some(2));
        assert_eq!(hub.broadcast_native(Some(""), message_event()), Some(3));
    }

    #[tokio::test]
    async fn replay_precedes_live_events_in_order() {
        let hub = Arc::new(EventHub::new());
        for _ in 0..5 {
            hub.broadcast(message_event());
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        hub.subscribe(
            Recorder {
                seen: seen.clone(),
                fail_after: None,
            },
            Some(2),
        );
        hub.broadcast(message_event());

        wait_for(&seen, 4).await;
        assert_eq!(*seen.lock().unwrap(), vec![3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn concurrent_producers_keep_per_sink_order() {
        let hub = Arc::new(EventHub::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        hub.subscribe(
            Recorder {
                seen: seen.clone(),
                fail_after: None,
            },
            None,
        );

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    hub.broadcast(message_event());
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        wait_for(&seen, 200).await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 200);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn dead_sink_is_removed_without_affecting_others() {
        let hub = Arc::new(EventHub::new());
        let healthy = Arc::new(Mutex::new(Vec::new()));
        let failing = Arc::new(Mutex::new(Vec::new()));
        hub.subscribe(
            Recorder {
                seen: healthy.clone(),
                fail_after: None,
            },
            None,
        );
        let dead_id = hub.subscribe(
            Recorder {
                seen: failing.clone(),
                fail_after: Some(1),
            },
            None,
        );

        for _ in 0..3 {
            hub.broadcast(message_event());
        }
        wait_for(&healthy, 3).await;
        for _ in 0..100 {
            if !hub.is_subscribed(dead_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(*healthy.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(*failing.lock().unwrap(), vec![1]);
        assert!(!hub.is_subscribed(dead_id));
        assert_eq!(hub.sink_count(), 1);
    }

    #[tokio::test]
    async fn backlogged_sink_is_evicted() {
        let hub = Arc::new(EventHub::new());
        let healthy = Arc::new(Mutex::new(Vec::new()));
        hub.subscribe(
            Recorder {
                seen: healthy.clone(),
                fail_after: None,
            },
            None,
        );
        let closed = Arc::new(AtomicBool::new(false));
        let stalled_id = hub.subscribe(
            Stalled {
                closed: closed.clone(),
            },
            None,
        );

        // 分批发送，让正常目标跟上进度
        let total = SINK_QUEUE_CAPACITY + 2;
        let mut sent = 0;
        while sent < total {
            let batch = (total - sent).min(256);
            for _ in 0..batch {
                hub.broadcast(message_event());
            }
            sent += batch;
            wait_for(&healthy, sent).await;
        }
        assert!(!hub.is_subscribed(stalled_id));
        assert_eq!(hub.sink_count(), 1);

        for _ in 0..200 {
            if closed.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(closed.load(Ordering::SeqCst));

        // 其他目标不受影响
        hub.broadcast(message_event());
        wait_for(&healthy, total + 1).await;
        assert_eq!(healthy.lock().unwrap().len(), total + 1);
    }
}
