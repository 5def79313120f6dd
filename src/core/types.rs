/// 统一的类型定义模块
/// 实时推送流与定时轮询共用的行情数据结构
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============= 行情数据 =============

/// 单个市场的价格记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPrice {
    pub market_id: String,
    pub price: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub high_24h: f64,
    #[serde(default)]
    pub low_24h: f64,
    #[serde(default)]
    pub change_24h: f64,
}

/// 供需快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemandSupply {
    pub demand: f64,
    pub supply: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl DemandSupply {
    /// 供给减需求，负值表示缺口
    pub fn balance(&self) -> f64 {
        self.supply - self.demand
    }
}

/// 可再生能源构成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewableMix {
    #[serde(default)]
    pub solar: f64,
    #[serde(default)]
    pub wind: f64,
    #[serde(default)]
    pub hydro: f64,
    #[serde(default)]
    pub other: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RenewableMix {
    pub fn total(&self) -> f64 {
        self.solar + self.wind + self.hydro + self.other
    }
}

/// 连接建立时服务端下发的握手信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedInfo {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// 组合更新，各部分均可缺省
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardUpdate {
    #[serde(default)]
    pub market_prices: Option<Vec<MarketPrice>>,
    #[serde(default)]
    pub renewable_mix: Option<RenewableMix>,
    #[serde(default)]
    pub demand_supply: Option<DemandSupply>,
}

// ============= 推送事件 =============

/// 推送事件类型标签
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    MarketPrices,
    RenewableMix,
    DemandSupply,
    DashboardUpdate,
    Heartbeat,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Connected,
        EventKind::MarketPrices,
        EventKind::RenewableMix,
        EventKind::DemandSupply,
        EventKind::DashboardUpdate,
        EventKind::Heartbeat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::MarketPrices => "market_prices",
            EventKind::RenewableMix => "renewable_mix",
            EventKind::DemandSupply => "demand_supply",
            EventKind::DashboardUpdate => "dashboard_update",
            EventKind::Heartbeat => "heartbeat",
        }
    }

    /// 解析线上的事件标签，未知标签返回None
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == label.trim())
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 类型化的推送事件
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected(ConnectedInfo),
    MarketPrices(Vec<MarketPrice>),
    RenewableMix(RenewableMix),
    DemandSupply(DemandSupply),
    DashboardUpdate(DashboardUpdate),
    Heartbeat,
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StreamEvent::Connected(_) => EventKind::Connected,
            StreamEvent::MarketPrices(_) => EventKind::MarketPrices,
            StreamEvent::RenewableMix(_) => EventKind::RenewableMix,
            StreamEvent::DemandSupply(_) => EventKind::DemandSupply,
            StreamEvent::DashboardUpdate(_) => EventKind::DashboardUpdate,
            StreamEvent::Heartbeat => EventKind::Heartbeat,
        }
    }

    /// 按事件类型解析JSON负载
    pub fn parse(kind: EventKind, payload: &str) -> Result<Self, serde_json::Error> {
        let payload = payload.trim();
        let event = match kind {
            EventKind::Heartbeat => StreamEvent::Heartbeat,
            EventKind::Connected => {
                if payload.is_empty() {
                    StreamEvent::Connected(ConnectedInfo::default())
                } else {
                    StreamEvent::Connected(serde_json::from_str(payload)?)
                }
            }
            EventKind::MarketPrices => StreamEvent::MarketPrices(serde_json::from_str(payload)?),
            EventKind::RenewableMix => StreamEvent::RenewableMix(serde_json::from_str(payload)?),
            EventKind::DemandSupply => StreamEvent::DemandSupply(serde_json::from_str(payload)?),
            EventKind::DashboardUpdate => {
                StreamEvent::DashboardUpdate(serde_json::from_str(payload)?)
            }
        };
        Ok(event)
    }
}

// ============= 轮询快照 =============

/// 轮询接口返回的原始负载
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPayload {
    #[serde(default)]
    pub markets: Vec<MarketPrice>,
    #[serde(default, alias = "demand_supply")]
    pub demand_supply: Option<DemandSupply>,
    #[serde(default, alias = "renewable_mix")]
    pub renewable_mix: Option<RenewableMix>,
}

/// 一次轮询产生的不可变快照
///
/// 均价与总成交量不存储，每次读取时从`markets`重新计算。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSnapshot {
    pub markets: Vec<MarketPrice>,
    pub demand_supply: Option<DemandSupply>,
    pub renewable_mix: Option<RenewableMix>,
    pub synced_at: DateTime<Utc>,
    pub next_sync_at: DateTime<Utc>,
}

impl PollSnapshot {
    pub fn from_payload(
        payload: SnapshotPayload,
        synced_at: DateTime<Utc>,
        next_sync_at: DateTime<Utc>,
    ) -> Self {
        Self {
            markets: payload.markets,
            demand_supply: payload.demand_supply,
            renewable_mix: payload.renewable_mix,
            synced_at,
            next_sync_at,
        }
    }

    /// 各市场价格的算术平均，无市场时为0
    pub fn average_price(&self) -> f64 {
        if self.markets.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.markets.iter().map(|m| m.price).sum();
        sum / self.markets.len() as f64
    }

    pub fn total_volume(&self) -> f64 {
        self.markets.iter().map(|m| m.volume).sum()
    }

    /// 全部市场24小时最低价与最高价
    pub fn price_range(&self) -> Option<(f64, f64)> {
        let mut iter = self.markets.iter();
        let first = iter.next()?;
        Some(iter.fold((first.low_24h, first.high_24h), |(low, high), m| {
            (low.min(m.low_24h), high.max(m.high_24h))
        }))
    }

    pub fn market(&self, market_id: &str) -> Option<&MarketPrice> {
        self.markets.iter().find(|m| m.market_id == market_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(id: &str, price: f64, volume: f64) -> MarketPrice {
        MarketPrice {
            market_id: id.to_string(),
            price,
            volume,
            high_24h: price + 5.0,
            low_24h: price - 5.0,
            change_24h: 0.0,
        }
    }

    #[test]
    fn test_event_kind_labels() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_label(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_label("market_prices\r"), Some(EventKind::MarketPrices));
        assert_eq!(EventKind::from_label("weather"), None);
    }

    #[test]
    fn test_parse_market_prices() {
        let payload = r#"[{"marketId":"DE-DA","price":84.5,"volume":1200,"high24h":90.1,"low24h":80.0,"change24h":-1.2}]"#;
        let event = StreamEvent::parse(EventKind::MarketPrices, payload).unwrap();
        match event {
            StreamEvent::MarketPrices(prices) => {
                assert_eq!(prices.len(), 1);
                assert_eq!(prices[0].market_id, "DE-DA");
                assert_eq!(prices[0].high_24h, 90.1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_heartbeat_ignores_payload() {
        let event = StreamEvent::parse(EventKind::Heartbeat, "not json").unwrap();
        assert_eq!(event, StreamEvent::Heartbeat);
        assert_eq!(event.kind(), EventKind::Heartbeat);
    }

    #[test]
    fn test_parse_malformed_payload() {
        assert!(StreamEvent::parse(EventKind::DemandSupply, "{\"demand\":").is_err());
        assert!(StreamEvent::parse(EventKind::MarketPrices, "{}").is_err());
    }

    #[test]
    fn test_parse_partial_dashboard_update() {
        let payload = r#"{"demandSupply":{"demand":410.0,"supply":395.5}}"#;
        let event = StreamEvent::parse(EventKind::DashboardUpdate, payload).unwrap();
        if let StreamEvent::DashboardUpdate(update) = event {
            assert!(update.market_prices.is_none());
            let ds = update.demand_supply.unwrap();
            assert!((ds.balance() + 14.5).abs() < 1e-9);
        } else {
            panic!("expected dashboard update");
        }
    }

    #[test]
    fn test_snapshot_payload_accepts_both_casings() {
        let camel: SnapshotPayload =
            serde_json::from_str(r#"{"markets":[],"demandSupply":{"demand":1.0,"supply":2.0}}"#)
                .unwrap();
        let snake: SnapshotPayload =
            serde_json::from_str(r#"{"markets":[],"demand_supply":{"demand":1.0,"supply":2.0}}"#)
                .unwrap();
        assert_eq!(camel, snake);
        assert!(snake.renewable_mix.is_none());
    }

    #[test]
    fn test_snapshot_derived_values() {
        let now = Utc::now();
        let snapshot = PollSnapshot::from_payload(
            SnapshotPayload {
                markets: vec![market("A", 100.0, 10.0), market("B", 50.0, 30.0)],
                ..Default::default()
            },
            now,
            now,
        );
        assert_eq!(snapshot.average_price(), 75.0);
        assert_eq!(snapshot.total_volume(), 40.0);
        assert_eq!(snapshot.price_range(), Some((45.0, 105.0)));
        assert!(snapshot.market("B").is_some());

        let empty = PollSnapshot::from_payload(SnapshotPayload::default(), now, now);
        assert_eq!(empty.average_price(), 0.0);
        assert_eq!(empty.total_volume(), 0.0);
        assert_eq!(empty.price_range(), None);
    }
}
