/// 定时轮询管理器
/// 连接时立即拉取一次，之后按固定间隔刷新；force_sync 不影响既定节奏
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::fetcher::{HttpSnapshotFetcher, SnapshotFetcher};
use crate::core::config::SyncConfig;
use crate::core::error::{DashboardError, Result};
use crate::core::types::{MarketPrice, PollSnapshot};

pub type UpdateHandler = Arc<dyn Fn(Arc<PollSnapshot>) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// 轮询状态，供状态指示器展示
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    pub is_connected: bool,
    pub is_syncing: bool,
    pub last_error: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
    pub next_sync_at: Option<DateTime<Utc>>,
    /// 累计拉取次数（含失败）
    pub fetch_count: u64,
}

pub struct PeriodicSyncManager {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    interval: Duration,
    fetcher: Arc<dyn SnapshotFetcher>,
    snapshot: RwLock<Option<Arc<PollSnapshot>>>,
    status: RwLock<SyncStatus>,
    update_handlers: RwLock<Vec<UpdateHandler>>,
    error_handlers: RwLock<Vec<ErrorHandler>>,
    /// 下一次定时拉取的时刻
    next_tick: Mutex<Option<Instant>>,
    generation: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
    // 同一时刻只允许一次拉取
    fetch_lock: tokio::sync::Mutex<()>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl PeriodicSyncManager {
    pub fn new(interval: Duration, fetcher: Arc<dyn SnapshotFetcher>) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                interval,
                fetcher,
                snapshot: RwLock::new(None),
                status: RwLock::new(SyncStatus::default()),
                update_handlers: RwLock::new(Vec::new()),
                error_handlers: RwLock::new(Vec::new()),
                next_tick: Mutex::new(None),
                generation: AtomicU64::new(0),
                task: Mutex::new(None),
                fetch_lock: tokio::sync::Mutex::new(()),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let fetcher = HttpSnapshotFetcher::from_config(config)?;
        Ok(Self::new(config.interval(), Arc::new(fetcher)))
    }

    /// 立即拉取一次并启动定时刷新
    ///
    /// 首次拉取失败不影响定时任务，错误返回给调用方用于记录。
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.is_running() {
            log::debug!("轮询已启动，忽略重复connect");
            return Ok(());
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        // 先锚定节奏，首次拉取耗时不推迟后续tick
        let start = Instant::now() + self.inner.interval;
        *self.inner.next_tick.lock() = Some(start);

        log::info!(
            "🔄 启动定时轮询，间隔 {} 秒",
            self.inner.interval.as_secs()
        );
        let first = self.inner.sync_once(generation).await.map(|_| ());

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(start, inner.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let tick = ticker.tick().await;
                if !inner.is_current(generation) {
                    break;
                }
                *inner.next_tick.lock() = Some(tick + inner.interval);
                let _ = inner.sync_once(generation).await;
            }
        });
        *self.inner.task.lock() = Some(task);

        first
    }

    /// 停止定时刷新，可重复调用
    pub async fn disconnect(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
            log::info!("🔌 定时轮询已停止");
        }
        *self.inner.next_tick.lock() = None;

        let mut status = self.inner.status.write();
        status.is_connected = false;
        status.is_syncing = false;
        status.next_sync_at = None;
    }

    /// 立即拉取一次，不重置定时节奏
    pub async fn force_sync(&self) -> Result<Arc<PollSnapshot>> {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        log::info!("🔄 手动触发同步");
        self.inner.sync_once(generation).await
    }

    pub fn on_update<F>(&self, handler: F)
    where
        F: Fn(Arc<PollSnapshot>) + Send + Sync + 'static,
    {
        self.inner.update_handlers.write().push(Arc::new(handler));
    }

    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.error_handlers.write().push(Arc::new(handler));
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    pub fn snapshot(&self) -> Option<Arc<PollSnapshot>> {
        self.inner.snapshot.read().clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.read().clone()
    }

    // ============= 派生统计 =============

    pub fn average_price(&self) -> f64 {
        self.snapshot().map_or(0.0, |s| s.average_price())
    }

    pub fn total_volume(&self) -> f64 {
        self.snapshot().map_or(0.0, |s| s.total_volume())
    }

    pub fn price_range(&self) -> Option<(f64, f64)> {
        self.snapshot().and_then(|s| s.price_range())
    }

    pub fn market(&self, market_id: &str) -> Option<MarketPrice> {
        self.snapshot().and_then(|s| s.market(market_id).cloned())
    }

    /// 从未同步成功，或最近一次成功同步早于`max_age`
    pub fn is_stale(&self, max_age: Duration) -> bool {
        match self.status().synced_at {
            Some(at) => Utc::now()
                .signed_duration_since(at)
                .to_std()
                .map_or(false, |age| age > max_age),
            None => true,
        }
    }
}

impl Drop for PeriodicSyncManager {
    fn drop(&mut self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
    }
}

impl SyncInner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// 下一次拉取的墙钟时间；未启动定时任务时按一个间隔估算
    fn next_sync_at(&self, synced_at: DateTime<Utc>) -> DateTime<Utc> {
        let remaining = match *self.next_tick.lock() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => self.interval,
        };
        synced_at + chrono::Duration::from_std(remaining).unwrap_or(chrono::Duration::zero())
    }

    async fn sync_once(&self, generation: u64) -> Result<Arc<PollSnapshot>> {
        let _guard = self.fetch_lock.lock().await;
        {
            let mut status = self.status.write();
            status.is_syncing = true;
            status.fetch_count += 1;
        }

        let result = self.fetcher.fetch().await;
        self.status.write().is_syncing = false;

        if !self.is_current(generation) {
            log::debug!("轮询已停止，丢弃本次结果");
            return Err(DashboardError::Other("同步已取消".to_string()));
        }

        match result {
            Ok(payload) => {
                let synced_at = Utc::now();
                let snapshot = Arc::new(PollSnapshot::from_payload(
                    payload,
                    synced_at,
                    self.next_sync_at(synced_at),
                ));

                // 整体替换，读者要么看到旧快照要么看到新快照
                *self.snapshot.write() = Some(snapshot.clone());
                {
                    let mut status = self.status.write();
                    status.is_connected = true;
                    status.last_error = None;
                    status.synced_at = Some(synced_at);
                    status.next_sync_at = Some(snapshot.next_sync_at);
                }

                log::info!(
                    "✅ 行情同步完成: {} 个市场，均价 {:.2}",
                    snapshot.markets.len(),
                    snapshot.average_price()
                );

                let handlers: Vec<UpdateHandler> = self.update_handlers.read().clone();
                for handler in handlers {
                    handler(snapshot.clone());
                }
                Ok(snapshot)
            }
            Err(e) => {
                let message = e.user_friendly_message();
                {
                    let mut status = self.status.write();
                    status.is_connected = false;
                    status.last_error = Some(message.clone());
                }
                if e.is_retryable() {
                    log::warn!("⚠️ 行情同步失败，等待下次定时刷新: {}", e);
                } else {
                    // 4xx、解析失败等重试大概率无效，提升日志级别便于排查
                    log::error!("❌ 行情同步失败，请检查轮询接口: {}", e);
                }

                let handlers: Vec<ErrorHandler> = self.error_handlers.read().clone();
                for handler in handlers {
                    handler(message.as_str());
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SnapshotPayload;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    struct ScriptedFetcher {
        calls: AtomicUsize,
        responses: Mutex<VecDeque<Result<SnapshotPayload>>>,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<Result<SnapshotPayload>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                responses: Mutex::new(responses.into()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SnapshotFetcher for ScriptedFetcher {
        async fn fetch(&self) -> Result<SnapshotPayload> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(payload(&[10.0])))
        }
    }

    fn payload(prices: &[f64]) -> SnapshotPayload {
        SnapshotPayload {
            markets: prices
                .iter()
                .enumerate()
                .map(|(i, price)| MarketPrice {
                    market_id: format!("M{}", i),
                    price: *price,
                    volume: 1.0,
                    high_24h: price + 1.0,
                    low_24h: price - 1.0,
                    change_24h: 0.0,
                })
                .collect(),
            ..Default::default()
        }
    }

    fn failure() -> Result<SnapshotPayload> {
        Err(DashboardError::HttpStatus {
            status: 502,
            message: "bad gateway".to_string(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_sync_does_not_reset_schedule() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let manager = PeriodicSyncManager::new(Duration::from_secs(60), fetcher.clone());

        manager.connect().await.unwrap();
        assert_eq!(fetcher.calls(), 1);

        sleep(Duration::from_secs(10)).await;
        let snapshot = manager.force_sync().await.unwrap();
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(
            (snapshot.next_sync_at - snapshot.synced_at).num_seconds(),
            50
        );

        sleep(Duration::from_secs(51)).await;
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(manager.status().fetch_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_schedule_and_snapshot() {
        let fetcher = ScriptedFetcher::new(vec![Ok(payload(&[10.0, 20.0])), failure()]);
        let manager = PeriodicSyncManager::new(Duration::from_secs(60), fetcher.clone());

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        manager.on_error(move |message| sink.lock().push(message.to_string()));

        manager.connect().await.unwrap();
        assert_eq!(manager.average_price(), 15.0);

        sleep(Duration::from_millis(60_500)).await;
        let status = manager.status();
        assert!(!status.is_connected);
        assert!(status.last_error.is_some());
        assert_eq!(errors.lock().len(), 1);
        // 失败时保留上一份快照
        assert_eq!(manager.average_price(), 15.0);

        sleep(Duration::from_secs(60)).await;
        let status = manager.status();
        assert!(status.is_connected);
        assert!(status.last_error.is_none());
        assert_eq!(manager.average_price(), 10.0);
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fetch_failure_still_schedules() {
        let fetcher = ScriptedFetcher::new(vec![failure()]);
        let manager = PeriodicSyncManager::new(Duration::from_secs(30), fetcher.clone());

        assert!(manager.connect().await.is_err());
        assert!(manager.is_running());
        assert!(manager.snapshot().is_none());
        assert_eq!(manager.average_price(), 0.0);

        sleep(Duration::from_millis(30_100)).await;
        assert_eq!(fetcher.calls(), 2);
        assert!(manager.status().is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_timer() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let manager = PeriodicSyncManager::new(Duration::from_secs(60), fetcher.clone());

        let updates = Arc::new(AtomicUsize::new(0));
        let sink = updates.clone();
        manager.on_update(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();
        assert_eq!(fetcher.calls(), 1);

        manager.disconnect().await;
        manager.disconnect().await;
        assert!(!manager.is_running());

        sleep(Duration::from_secs(600)).await;
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert!(manager.status().next_sync_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_derived_values_follow_latest_snapshot() {
        let fetcher = ScriptedFetcher::new(vec![Ok(payload(&[])), Ok(payload(&[30.0, 50.0]))]);
        let manager = PeriodicSyncManager::new(Duration::from_secs(60), fetcher);

        assert!(manager.is_stale(Duration::from_secs(60)));
        manager.force_sync().await.unwrap();
        assert_eq!(manager.average_price(), 0.0);
        assert_eq!(manager.price_range(), None);
        assert!(!manager.is_stale(Duration::from_secs(60)));

        manager.force_sync().await.unwrap();
        assert_eq!(manager.average_price(), 40.0);
        assert_eq!(manager.total_volume(), 2.0);
        assert_eq!(manager.price_range(), Some((29.0, 51.0)));
        assert_eq!(manager.market("M1").map(|m| m.price), Some(50.0));
    }
}
