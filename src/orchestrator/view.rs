use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::core::types::{DemandSupply, MarketPrice, PollSnapshot, RenewableMix, StreamEvent};
use crate::layout::{GridLayout, Widget};
use crate::stream::{ConnectionState, StreamStatus};
use crate::sync::SyncStatus;

/// 推送流累积出的最新实时数据
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveData {
    pub market_prices: Vec<MarketPrice>,
    pub demand_supply: Option<DemandSupply>,
    pub renewable_mix: Option<RenewableMix>,
    pub client_id: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LiveData {
    /// 合并一条推送事件，返回数据是否变化
    pub fn apply(&mut self, event: &StreamEvent) -> bool {
        match event {
            StreamEvent::Connected(info) => {
                self.client_id = info.client_id.clone();
                return true;
            }
            StreamEvent::MarketPrices(prices) => self.merge_prices(prices),
            StreamEvent::RenewableMix(mix) => self.renewable_mix = Some(mix.clone()),
            StreamEvent::DemandSupply(ds) => self.demand_supply = Some(ds.clone()),
            StreamEvent::DashboardUpdate(update) => {
                if let Some(prices) = &update.market_prices {
                    self.merge_prices(prices);
                }
                if let Some(mix) = &update.renewable_mix {
                    self.renewable_mix = Some(mix.clone());
                }
                if let Some(ds) = &update.demand_supply {
                    self.demand_supply = Some(ds.clone());
                }
            }
            StreamEvent::Heartbeat => return false,
        }
        self.updated_at = Some(Utc::now());
        true
    }

    /// 按market_id更新，新市场追加到末尾
    fn merge_prices(&mut self, prices: &[MarketPrice]) {
        for price in prices {
            match self
                .market_prices
                .iter_mut()
                .find(|m| m.market_id == price.market_id)
            {
                Some(existing) => *existing = price.clone(),
                None => self.market_prices.push(price.clone()),
            }
        }
    }
}

/// 看板视图模型
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub widgets: Vec<Widget>,
    pub layout: GridLayout,
    pub overlay_open: bool,
    pub live: LiveData,
    #[serde(skip)]
    pub snapshot: Option<Arc<PollSnapshot>>,
    pub average_price: f64,
    pub total_volume: f64,
    pub stream: StreamStatus,
    pub sync: SyncStatus,
}

impl DashboardView {
    /// 单行状态摘要，用于日志
    pub fn status_line(&self) -> String {
        let stream = match self.stream.state {
            ConnectionState::Connected => "🟢 实时",
            ConnectionState::Connecting => "🟡 连接中",
            ConnectionState::Disconnected => "⚪ 未连接",
            ConnectionState::Error => "🔴 异常",
        };
        let sync = if self.sync.is_connected {
            "✅"
        } else {
            "⚠️"
        };
        format!(
            "{} (重连 {}) | 轮询 {} 均价 {:.2} 成交量 {:.1} | 实时市场 {} | 组件 {}",
            stream,
            self.stream.reconnect_attempts,
            sync,
            self.average_price,
            self.total_volume,
            self.live.market_prices.len(),
            self.widgets.len()
        )
    }
}
