//! 看板协调器
//! 组合推送流、定时轮询与布局引擎的输出，并把用户操作转发给布局引擎
pub mod store;
pub mod view;

pub use store::{ConfigStore, InMemoryConfigStore};
pub use view::{DashboardView, LiveData};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::DashboardConfig;
use crate::core::error::{DashboardError, Result};
use crate::core::types::EventKind;
use crate::layout::{
    Breakpoint, LayoutEngine, OverlayOutcome, Placement, Widget, WidgetDraft, WidgetPatch,
};
use crate::stream::{ConnectionState, StreamConnectionManager, SubscriptionId};
use crate::sync::PeriodicSyncManager;

/// 用户操作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UserAction {
    AddWidget(WidgetDraft),
    UpdateWidget { id: String, patch: WidgetPatch },
    DeleteWidget { id: String },
    ChangeLayout {
        breakpoint: Breakpoint,
        placements: Vec<Placement>,
    },
    OpenOverlay,
    CloseOverlay,
}

/// 用户操作的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Added(Widget),
    Updated(Widget),
    Deleted(Widget),
    LayoutChanged(Vec<Widget>),
    /// 弹层打开期间的布局变更被忽略
    LayoutIgnored,
    OverlayOpened,
    OverlayClosed(OverlayOutcome),
}

/// 恢复前台时执行的动作
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeReport {
    pub resynced: bool,
    pub reconnected: bool,
}

pub struct DashboardOrchestrator {
    key: String,
    stream: Arc<StreamConnectionManager>,
    sync: Arc<PeriodicSyncManager>,
    engine: LayoutEngine,
    store: Arc<dyn ConfigStore>,
    live: Arc<RwLock<LiveData>>,
    stale_after: Duration,
    changes: Arc<watch::Sender<u64>>,
    subscriptions: Vec<SubscriptionId>,
    pending_save: Option<JoinHandle<()>>,
}

impl DashboardOrchestrator {
    pub fn new(
        key: impl Into<String>,
        stream: StreamConnectionManager,
        sync: PeriodicSyncManager,
        engine: LayoutEngine,
        store: Arc<dyn ConfigStore>,
        stale_after: Duration,
    ) -> Self {
        let (changes, _) = watch::channel(0u64);
        let mut orchestrator = Self {
            key: key.into(),
            stream: Arc::new(stream),
            sync: Arc::new(sync),
            engine,
            store,
            live: Arc::new(RwLock::new(LiveData::default())),
            stale_after,
            changes: Arc::new(changes),
            subscriptions: Vec::new(),
            pending_save: None,
        };
        orchestrator.wire_sources();
        orchestrator
    }

    /// 按配置创建推送流、轮询与布局引擎
    pub fn from_config(
        config: &DashboardConfig,
        key: impl Into<String>,
        store: Arc<dyn ConfigStore>,
    ) -> Result<Self> {
        let stream = StreamConnectionManager::from_config(&config.stream)?;
        let sync = PeriodicSyncManager::from_config(&config.sync)?;
        let engine = LayoutEngine::from_config(&config.layout);
        Ok(Self::new(
            key,
            stream,
            sync,
            engine,
            store,
            config.resume_stale_after(),
        ))
    }

    /// 订阅两个数据源，数据变化时通知视图
    fn wire_sources(&mut self) {
        for kind in EventKind::ALL {
            if kind == EventKind::Heartbeat {
                continue;
            }
            let live = self.live.clone();
            let changes = self.changes.clone();
            let id = self.stream.subscribe(kind, move |event| {
                if live.write().apply(event) {
                    changes.send_modify(|version| *version += 1);
                }
            });
            self.subscriptions.push(id);
        }

        let changes = self.changes.clone();
        self.stream.on_state_change(move |_| {
            changes.send_modify(|version| *version += 1);
        });

        let changes = self.changes.clone();
        self.sync.on_update(move |_| {
            changes.send_modify(|version| *version += 1);
        });
        let changes = self.changes.clone();
        self.sync.on_error(move |_| {
            changes.send_modify(|version| *version += 1);
        });
    }

    /// 加载已保存的布局并连接两个数据源
    ///
    /// 数据源首次连接失败只记录日志，推送流会在后台继续重连。
    pub async fn start(&mut self) {
        log::info!("🚀 启动看板: {}", self.key);

        match self.store.load(&self.key).await {
            Ok(Some(widgets)) => {
                self.engine.apply_external_config(widgets);
            }
            Ok(None) => log::info!("未找到已保存的布局，使用空看板"),
            Err(e) => log::warn!("⚠️ 加载布局失败，使用空看板: {}", e),
        }

        let (stream_result, sync_result) = tokio::join!(self.stream.connect(), self.sync.connect());
        if let Err(e) = stream_result {
            log::warn!("⚠️ 推送流首次连接失败，后台继续重连: {}", e);
        }
        if let Err(e) = sync_result {
            log::warn!("⚠️ 首次同步失败，等待下次定时刷新: {}", e);
        }

        self.notify();
    }

    /// 断开数据源并等待未完成的保存
    pub async fn shutdown(&mut self) {
        log::info!("🛑 关闭看板: {}", self.key);
        for id in self.subscriptions.drain(..) {
            self.stream.unsubscribe(id);
        }
        tokio::join!(self.stream.disconnect(), self.sync.disconnect());
        self.flush().await;
    }

    /// 重新从存储加载布局，按外部配置规则合并
    pub async fn reload_config(&mut self) -> Result<bool> {
        let widgets = self.store.load(&self.key).await?.unwrap_or_default();
        Ok(self.apply_external_config(widgets))
    }

    /// 合并外部下发的组件列表
    pub fn apply_external_config(&mut self, widgets: Vec<Widget>) -> bool {
        let recomputed = self.engine.apply_external_config(widgets);
        self.notify();
        recomputed
    }

    /// 处理一次用户操作
    pub fn handle(&mut self, action: UserAction) -> Result<ActionOutcome> {
        let outcome = match action {
            UserAction::AddWidget(draft) => {
                let widget = self.engine.add_widget(draft);
                self.persist();
                ActionOutcome::Added(widget)
            }
            UserAction::UpdateWidget { id, patch } => {
                let current = self.require_widget(&id)?;
                if !current.permissions.can_edit {
                    return Err(DashboardError::ValidationError {
                        field: id,
                        reason: "组件不允许编辑".to_string(),
                    });
                }
                let widget = self.engine.update_widget(&id, patch)?;
                self.persist();
                ActionOutcome::Updated(widget)
            }
            UserAction::DeleteWidget { id } => {
                let current = self.require_widget(&id)?;
                if !current.permissions.can_delete {
                    return Err(DashboardError::ValidationError {
                        field: id,
                        reason: "组件不允许删除".to_string(),
                    });
                }
                let widget = self.engine.remove_widget(&id)?;
                self.persist();
                ActionOutcome::Deleted(widget)
            }
            UserAction::ChangeLayout {
                breakpoint,
                placements,
            } => match self.engine.on_layout_change(breakpoint, &placements) {
                Some(widgets) => {
                    self.persist();
                    ActionOutcome::LayoutChanged(widgets)
                }
                None => ActionOutcome::LayoutIgnored,
            },
            UserAction::OpenOverlay => {
                self.engine.begin_overlay();
                ActionOutcome::OverlayOpened
            }
            UserAction::CloseOverlay => ActionOutcome::OverlayClosed(self.engine.end_overlay()),
        };

        self.notify();
        Ok(outcome)
    }

    /// 恢复前台：轮询数据过期则立即同步，推送流异常或断开则重连
    pub async fn on_resume(&self) -> ResumeReport {
        let mut report = ResumeReport::default();

        if self.sync.is_stale(self.stale_after) {
            log::info!("🔄 轮询数据已过期，立即同步");
            report.resynced = true;
            if let Err(e) = self.sync.force_sync().await {
                log::warn!("⚠️ 恢复时同步失败: {}", e);
            }
        }

        match self.stream.state() {
            ConnectionState::Error | ConnectionState::Disconnected => {
                log::info!("🔄 推送流未连接，尝试重连");
                report.reconnected = true;
                if let Err(e) = self.stream.connect().await {
                    log::warn!("⚠️ 恢复时重连失败: {}", e);
                }
            }
            ConnectionState::Connected | ConnectionState::Connecting => {}
        }

        report
    }

    /// 当前视图
    pub fn view(&self) -> DashboardView {
        let snapshot = self.sync.snapshot();
        DashboardView {
            widgets: self.engine.widgets(),
            layout: self.engine.layout(),
            overlay_open: self.engine.is_overlay_open(),
            live: self.live.read().clone(),
            average_price: snapshot.as_ref().map_or(0.0, |s| s.average_price()),
            total_volume: snapshot.as_ref().map_or(0.0, |s| s.total_volume()),
            snapshot,
            stream: self.stream.status(),
            sync: self.sync.status(),
        }
    }

    /// 视图版本号，任一数据源或布局变化时递增
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// 等待已发出的保存完成
    pub async fn flush(&mut self) {
        if let Some(task) = self.pending_save.take() {
            let _ = task.await;
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn engine(&self) -> &LayoutEngine {
        &self.engine
    }

    pub fn stream(&self) -> &StreamConnectionManager {
        &self.stream
    }

    pub fn sync(&self) -> &PeriodicSyncManager {
        &self.sync
    }

    fn require_widget(&self, id: &str) -> Result<Widget> {
        self.engine
            .widget(id)
            .ok_or_else(|| DashboardError::LayoutError(format!("组件不存在: {}", id)))
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }

    /// 后台保存当前组件列表，按发出顺序依次执行
    fn persist(&mut self) {
        let store = self.store.clone();
        let key = self.key.clone();
        let widgets = self.engine.widgets();
        let previous = self.pending_save.take();

        self.pending_save = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let count = widgets.len();
            match store.save(&key, widgets).await {
                Ok(()) => log::debug!("💾 布局已保存: {} ({} 个组件)", key, count),
                Err(e) => log::warn!("⚠️ 保存布局失败: {}", e),
            }
        }));
    }
}
