use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::sse::{RawFrame, DEFAULT_EVENT};
use crate::core::types::{EventKind, StreamEvent};

/// 订阅回调
pub type EventHandler = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// 订阅句柄，用于取消订阅
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// 单帧分发结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 已投递给n个订阅者
    Delivered(usize),
    /// 心跳，只刷新存活时间
    Heartbeat,
    /// 负载解析失败，已丢弃
    Malformed,
    /// 未知事件标签，已丢弃
    Unknown,
}

/// 按事件类型把帧解析并分发给订阅者
pub struct EventDispatcher {
    handlers: RwLock<HashMap<EventKind, Vec<(SubscriptionId, EventHandler)>>>,
    next_id: AtomicU64,
    last_heartbeat: RwLock<Option<DateTime<Utc>>>,
    last_event_at: RwLock<Option<DateTime<Utc>>>,
    malformed_count: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            last_heartbeat: RwLock::new(None),
            last_event_at: RwLock::new(None),
            malformed_count: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_insert_with(Vec::new)
            .push((id, handler));
        log::debug!("新增订阅: {} ({:?})", kind, id);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(sub_id, _)| *sub_id != id);
            if list.len() != before {
                return true;
            }
        }
        false
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, |list| list.len())
    }

    /// 解析并分发一帧
    ///
    /// 解析失败只记日志；单个订阅者panic不会影响其他订阅者。
    pub fn dispatch(&self, frame: &RawFrame) -> DispatchOutcome {
        // 未声明事件名的帧按信封格式解析
        let unwrapped;
        let frame = if frame.event == DEFAULT_EVENT {
            unwrapped = RawFrame::from_envelope(&frame.data);
            &unwrapped
        } else {
            frame
        };

        let kind = match EventKind::from_label(&frame.event) {
            Some(kind) => kind,
            None => {
                log::debug!("忽略未知事件类型: {}", frame.event);
                return DispatchOutcome::Unknown;
            }
        };

        let now = Utc::now();
        *self.last_event_at.write() = Some(now);

        if kind == EventKind::Heartbeat {
            *self.last_heartbeat.write() = Some(now);
            log::trace!("💓 收到心跳");
            return DispatchOutcome::Heartbeat;
        }

        let event = match StreamEvent::parse(kind, &frame.data) {
            Ok(event) => event,
            Err(e) => {
                self.malformed_count.fetch_add(1, Ordering::Relaxed);
                log::warn!("⚠️ {} 事件负载解析失败，已丢弃: {}", kind, e);
                return DispatchOutcome::Malformed;
            }
        };

        // 复制回调列表后释放锁，回调内可以再订阅
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                log::error!("❌ {} 事件订阅者处理时panic", kind);
            }
        }

        DispatchOutcome::Delivered(handlers.len())
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        *self.last_heartbeat.read()
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        *self.last_event_at.read()
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed_count.load(Ordering::Relaxed)
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(dispatcher: &EventDispatcher, kind: EventKind) -> Arc<Mutex<Vec<StreamEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher.subscribe(
            kind,
            Arc::new(move |event: &StreamEvent| sink.lock().push(event.clone())),
        );
        seen
    }

    #[test]
    fn test_delivers_in_order_to_matching_kind() {
        let dispatcher = EventDispatcher::new();
        let prices = recorder(&dispatcher, EventKind::MarketPrices);
        let demand = recorder(&dispatcher, EventKind::DemandSupply);

        dispatcher.dispatch(&RawFrame::new(
            "market_prices",
            r#"[{"marketId":"A","price":1.0}]"#,
        ));
        dispatcher.dispatch(&RawFrame::new(
            "market_prices",
            r#"[{"marketId":"B","price":2.0}]"#,
        ));

        let seen = prices.lock();
        assert_eq!(seen.len(), 2);
        match (&seen[0], &seen[1]) {
            (StreamEvent::MarketPrices(a), StreamEvent::MarketPrices(b)) => {
                assert_eq!(a[0].market_id, "A");
                assert_eq!(b[0].market_id, "B");
            }
            other => panic!("unexpected events: {:?}", other),
        }
        assert!(demand.lock().is_empty());
    }

    #[test]
    fn test_heartbeat_not_forwarded() {
        let dispatcher = EventDispatcher::new();
        let beats = recorder(&dispatcher, EventKind::Heartbeat);

        assert!(dispatcher.last_heartbeat().is_none());
        let outcome = dispatcher.dispatch(&RawFrame::new("heartbeat", ""));
        assert_eq!(outcome, DispatchOutcome::Heartbeat);
        assert!(beats.lock().is_empty());
        assert!(dispatcher.last_heartbeat().is_some());
    }

    #[test]
    fn test_malformed_payload_is_swallowed() {
        let dispatcher = EventDispatcher::new();
        let demand = recorder(&dispatcher, EventKind::DemandSupply);

        let outcome = dispatcher.dispatch(&RawFrame::new("demand_supply", "{broken"));
        assert_eq!(outcome, DispatchOutcome::Malformed);
        assert_eq!(dispatcher.malformed_count(), 1);

        let outcome = dispatcher.dispatch(&RawFrame::new(
            "demand_supply",
            r#"{"demand":5.0,"supply":6.0}"#,
        ));
        assert_eq!(outcome, DispatchOutcome::Delivered(1));
        assert_eq!(demand.lock().len(), 1);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_siblings() {
        let dispatcher = EventDispatcher::new();
        dispatcher.subscribe(
            EventKind::RenewableMix,
            Arc::new(|_: &StreamEvent| panic!("subscriber bug")),
        );
        let mix = recorder(&dispatcher, EventKind::RenewableMix);

        let outcome = dispatcher.dispatch(&RawFrame::new("renewable_mix", r#"{"solar":3.0}"#));
        assert_eq!(outcome, DispatchOutcome::Delivered(2));
        assert_eq!(mix.lock().len(), 1);
    }

    #[test]
    fn test_envelope_and_unknown_events() {
        let dispatcher = EventDispatcher::new();
        let connected = recorder(&dispatcher, EventKind::Connected);

        let outcome = dispatcher.dispatch(&RawFrame::new(
            "message",
            r#"{"type":"connected","data":{"clientId":"c-1"}}"#,
        ));
        assert_eq!(outcome, DispatchOutcome::Delivered(1));
        assert_eq!(
            connected.lock()[0],
            StreamEvent::Connected(crate::core::types::ConnectedInfo {
                client_id: Some("c-1".to_string()),
                message: None,
            })
        );

        assert_eq!(
            dispatcher.dispatch(&RawFrame::new("weather", "{}")),
            DispatchOutcome::Unknown
        );
    }

    #[test]
    fn test_unsubscribe() {
        let dispatcher = EventDispatcher::new();
        let id = dispatcher.subscribe(EventKind::Connected, Arc::new(|_: &StreamEvent| {}));
        assert_eq!(dispatcher.subscriber_count(EventKind::Connected), 1);
        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));
        assert_eq!(dispatcher.subscriber_count(EventKind::Connected), 0);
    }
}
