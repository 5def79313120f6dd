/// 推送流连接管理器 - 单连接、指数退避重连、按类型分发事件
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use super::dispatcher::{EventDispatcher, SubscriptionId};
use super::transport::{transport_for_url, EventStream, StreamTransport};
use crate::core::config::StreamConfig;
use crate::core::error::{DashboardError, Result};
use crate::core::retry_policy::{ExponentialBackoffRetry, RetryConfig, RetryPolicy};
use crate::core::types::{EventKind, StreamEvent};

/// 连接状态
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// 供状态指示器展示的连接快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStatus {
    pub state: ConnectionState,
    /// 当前连续失败计数
    pub attempt: u32,
    /// 最近一次手动connect以来的自动重连次数
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

pub type StateHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// 一次connect对应的后台会话
struct Session {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct StreamConnectionManager {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    url: String,
    connect_timeout: Duration,
    policy: ExponentialBackoffRetry,
    transport: Arc<dyn StreamTransport>,
    dispatcher: EventDispatcher,
    state: RwLock<ConnectionState>,
    attempt: AtomicU32,
    reconnect_attempts: AtomicU32,
    generation: AtomicU64,
    last_error: RwLock<Option<String>>,
    connected_at: RwLock<Option<DateTime<Utc>>>,
    session: Mutex<Option<Session>>,
    state_handlers: RwLock<Vec<StateHandler>>,
    // connect/disconnect 串行执行
    lifecycle: tokio::sync::Mutex<()>,
}

impl StreamConnectionManager {
    pub fn new(config: &StreamConfig, transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                url: config.url.clone(),
                connect_timeout: config.connect_timeout(),
                policy: ExponentialBackoffRetry::new(RetryConfig::from(config)),
                transport,
                dispatcher: EventDispatcher::new(),
                state: RwLock::new(ConnectionState::Disconnected),
                attempt: AtomicU32::new(0),
                reconnect_attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                last_error: RwLock::new(None),
                connected_at: RwLock::new(None),
                session: Mutex::new(None),
                state_handlers: RwLock::new(Vec::new()),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// 按URL协议自动选择传输层
    pub fn from_config(config: &StreamConfig) -> Result<Self> {
        let transport = transport_for_url(&config.url)?;
        Ok(Self::new(config, transport))
    }

    /// 建立连接
    ///
    /// 挂起直到传输层打开、出错或超时。失败时状态置为`Error`并安排自动重连，
    /// 错误同时返回给调用方用于记录。
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;

        if self.state() == ConnectionState::Connected && self.inner.session.lock().is_some() {
            log::debug!("推送流已连接，忽略重复connect");
            return Ok(());
        }

        // 先关闭旧连接和待执行的重连
        self.inner.stop_session().await;
        let generation = self.inner.next_generation();
        self.inner.attempt.store(0, Ordering::SeqCst);
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);

        self.inner.set_state(ConnectionState::Connecting);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let (initial, result) = match self.inner.open_transport().await {
            Ok(stream) => {
                self.inner.mark_connected();
                (Some(stream), Ok(()))
            }
            Err(e) if !e.is_retryable() => {
                // 地址或鉴权类错误重连也不会好转，直接停在Error
                log::error!("❌ 推送流连接被拒绝，不再自动重连: {}", e);
                self.inner.mark_error(e.to_string());
                return Err(e);
            }
            Err(e) => {
                log::error!("❌ 推送流连接失败: {}", e);
                self.inner.mark_error(e.to_string());
                (None, Err(e))
            }
        };

        let task = tokio::spawn(run_session(
            self.inner.clone(),
            generation,
            cancel_rx,
            initial,
        ));
        *self.inner.session.lock() = Some(Session {
            cancel: cancel_tx,
            task,
        });

        result
    }

    /// 断开连接并取消待执行的重连，可重复调用
    pub async fn disconnect(&self) {
        let _guard = self.inner.lifecycle.lock().await;

        self.inner.next_generation();
        self.inner.stop_session().await;

        if self.state() != ConnectionState::Disconnected {
            log::info!("🔌 推送流已断开: {}", self.inner.url);
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// 订阅某类事件，回调按接收顺序调用
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe(kind, Arc::new(handler))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.dispatcher.unsubscribe(id)
    }

    /// 注册状态变更回调
    pub fn on_state_change<F>(&self, handler: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.inner.state_handlers.write().push(Arc::new(handler));
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            state: self.state(),
            attempt: self.inner.attempt.load(Ordering::SeqCst),
            reconnect_attempts: self.reconnect_attempts(),
            last_error: self.inner.last_error.read().clone(),
            connected_at: *self.inner.connected_at.read(),
            last_event_at: self.inner.dispatcher.last_event_at(),
            last_heartbeat: self.inner.dispatcher.last_heartbeat(),
        }
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.inner.dispatcher.last_heartbeat()
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.inner.dispatcher.last_event_at()
    }

    /// 超过`threshold`没有收到任何事件（含心跳）
    pub fn is_stale(&self, threshold: Duration) -> bool {
        match self.last_event_at() {
            Some(at) => {
                let age = Utc::now().signed_duration_since(at);
                age.to_std().map_or(false, |age| age > threshold)
            }
            None => true,
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }
}

impl Drop for StreamConnectionManager {
    fn drop(&mut self) {
        self.inner.next_generation();
        if let Some(session) = self.inner.session.lock().take() {
            let _ = session.cancel.send(true);
            session.task.abort();
        }
    }
}

impl StreamInner {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = {
            let mut current = self.state.write();
            let changed = *current != state;
            *current = state;
            changed
        };
        if changed {
            log::debug!("推送流状态变更: {:?}", state);
            let handlers: Vec<StateHandler> = self.state_handlers.read().clone();
            for handler in handlers {
                handler(state);
            }
        }
    }

    fn mark_connected(&self) {
        self.attempt.store(0, Ordering::SeqCst);
        *self.last_error.write() = None;
        *self.connected_at.write() = Some(Utc::now());
        log::info!("✅ 推送流连接成功: {}", self.url);
        self.set_state(ConnectionState::Connected);
    }

    fn mark_error(&self, reason: String) {
        *self.last_error.write() = Some(reason);
        self.set_state(ConnectionState::Error);
    }

    async fn open_transport(&self) -> Result<Box<dyn EventStream>> {
        match timeout(self.connect_timeout, self.transport.open(&self.url)).await {
            Ok(result) => result,
            Err(_) => Err(DashboardError::TimeoutError {
                operation: "推送流连接".to_string(),
                timeout_ms: self.connect_timeout.as_millis() as u64,
            }),
        }
    }

    /// 停止当前会话，返回时旧传输层已关闭
    async fn stop_session(&self) {
        let session = self.session.lock().take();
        if let Some(mut session) = session {
            let _ = session.cancel.send(true);
            if timeout(Duration::from_secs(2), &mut session.task)
                .await
                .is_err()
            {
                log::warn!("⚠️ 推送流会话未能及时退出，强制终止");
                session.task.abort();
            }
        }
    }

    /// 持续读帧并分发，返回连接结束的原因
    async fn pump(&self, generation: u64, stream: &mut dyn EventStream) -> String {
        let mut message_count: u64 = 0;
        loop {
            match stream.next_frame().await {
                Some(Ok(frame)) => {
                    if !self.is_current(generation) {
                        return "会话已失效".to_string();
                    }
                    self.dispatcher.dispatch(&frame);

                    message_count += 1;
                    if message_count % 500 == 0 {
                        log::debug!("推送流累计处理 {} 条消息", message_count);
                    }
                }
                Some(Err(e)) => return e.to_string(),
                None => return "连接被对端关闭".to_string(),
            }
        }
    }
}

/// 等待取消信号；发送端被丢弃同样视为取消
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// 会话主循环：读流 -> 失败后关闭旧连接 -> 退避 -> 重连，直到取消或次数耗尽
async fn run_session(
    inner: Arc<StreamInner>,
    generation: u64,
    mut cancel: watch::Receiver<bool>,
    mut current: Option<Box<dyn EventStream>>,
) {
    loop {
        if let Some(mut stream) = current.take() {
            let reason = tokio::select! {
                reason = inner.pump(generation, stream.as_mut()) => reason,
                _ = cancelled(&mut cancel) => {
                    stream.close().await;
                    return;
                }
            };
            stream.close().await;
            if !inner.is_current(generation) {
                return;
            }
            log::warn!("⚠️ 推送流中断: {}", reason);
            inner.mark_error(reason);
        }

        let attempt = inner.attempt.load(Ordering::SeqCst);
        if !inner.policy.should_retry(attempt) {
            log::error!(
                "❌ 达到最大重连次数: {}，停止自动重连，等待手动连接",
                inner.policy.max_retries()
            );
            return;
        }

        let delay = inner.policy.calculate_delay(attempt);
        inner.attempt.store(attempt + 1, Ordering::SeqCst);
        log::info!(
            "🔄 {}ms 后尝试重连 {}/{}",
            delay.as_millis(),
            attempt + 1,
            inner.policy.max_retries()
        );

        tokio::select! {
            _ = sleep(delay) => {}
            _ = cancelled(&mut cancel) => return,
        }
        if !inner.is_current(generation) {
            return;
        }

        inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
        inner.set_state(ConnectionState::Connecting);
        let opened = tokio::select! {
            result = inner.open_transport() => result,
            _ = cancelled(&mut cancel) => return,
        };

        match opened {
            Ok(stream) => {
                inner.mark_connected();
                current = Some(stream);
            }
            Err(e) => {
                inner.mark_error(e.to_string());
                if !e.is_retryable() {
                    log::error!("❌ 重连被拒绝，停止自动重连，等待手动连接: {}", e);
                    return;
                }
                log::warn!("重连失败: {}", e);
            }
        }
    }
}
