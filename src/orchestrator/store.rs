use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::core::error::Result;
use crate::layout::Widget;

/// 看板布局的持久化接口
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Vec<Widget>>>;

    async fn save(&self, key: &str, widgets: Vec<Widget>) -> Result<()>;
}

/// 进程内存储，随进程退出丢失
#[derive(Default)]
pub struct InMemoryConfigStore {
    entries: RwLock<HashMap<String, Vec<Widget>>>,
    saves: AtomicU64,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一份布局
    pub fn with_entry(key: impl Into<String>, widgets: Vec<Widget>) -> Self {
        let mut entries = HashMap::new();
        entries.insert(key.into(), widgets);
        Self {
            entries: RwLock::new(entries),
            saves: AtomicU64::new(0),
        }
    }

    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<Widget>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, widgets: Vec<Widget>) -> Result<()> {
        log::debug!("💾 保存布局 {}: {} 个组件", key, widgets.len());
        self.entries.write().await.insert(key.to_string(), widgets);
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Position;

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemoryConfigStore::new();
        assert!(store.load("alice").await.unwrap().is_none());

        let widget = Widget {
            id: "w1".to_string(),
            kind: "kpi".to_string(),
            title: "Demand".to_string(),
            position: Position::new(0, 0, 3, 2),
            config: serde_json::Value::Null,
            permissions: Default::default(),
        };
        store.save("alice", vec![widget.clone()]).await.unwrap();

        assert_eq!(store.load("alice").await.unwrap(), Some(vec![widget]));
        assert!(store.load("bob").await.unwrap().is_none());
        assert_eq!(store.save_count(), 1);
    }
}
