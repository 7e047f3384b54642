use crate::{debug, info};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;

/// 后台定时任务管理器；关闭时统一中止
pub struct Scheduler {
    tasks: Mutex<HashMap<u64, AbortHandle>>,
    next_id: AtomicU64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 添加一个灵活调度任务
    ///
    /// `next_run` 接收当前时间，返回下一次执行时间；返回 None 时任务结束。
    pub fn add_schedule<C, F, Fut>(&self, mut next_run: C, mut task_gen: F) -> u64
    where
        C: FnMut(DateTime<Local>) -> Option<DateTime<Local>> + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut next_time = next_run(Local::now());

        let handle = tokio::spawn(async move {
            while let Some(target_time) = next_time {
                let now = Local::now();
                if target_time > now {
                    let duration = (target_time - now).to_std().unwrap_or(Duration::ZERO);
                    tokio::time::sleep(duration).await;
                }

                task_gen().await;
                next_time = next_run(Local::now());
            }
        });

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle.abort_handle());
        id
    }

    /// 固定间隔执行，首次在一个间隔之后
    pub fn add_interval<F, Fut>(&self, every: Duration, task_gen: F) -> u64
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let step = chrono::Duration::from_std(every).unwrap_or(chrono::Duration::seconds(60));
        self.add_schedule(move |now| Some(now + step), task_gen)
    }

    /// 托管一个普通后台任务，关闭时一并中止
    pub fn track(&self, handle: AbortHandle) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);
        id
    }

    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            info!(target: "Scheduler", "正在清理 {} 个后台任务...", tasks.len());
        }
        for (id, handle) in tasks.drain() {
            debug!(target: "Scheduler", "中止任务 {}", id);
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn interval_runs_until_shutdown() {
        let scheduler = Scheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        scheduler.add_interval(Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(hits.load(Ordering::SeqCst) >= 2);

        scheduler.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after = hits.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), after);
    }

    #[tokio::test]
    async fn tracked_task_is_aborted_on_shutdown() {
        let scheduler = Scheduler::new();
        let handle = tokio::spawn(std::future::pending::<()>());
        scheduler.track(handle.abort_handle());
        scheduler.shutdown();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
