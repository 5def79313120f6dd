pub mod core;
pub mod layout;
pub mod orchestrator;
pub mod stream;
pub mod sync;
pub mod utils;

// 选择性导出，避免命名冲突
pub use crate::core::{config::*, error::*, types::*};
pub use layout::{Breakpoint, LayoutEngine, Placement, Position, Widget, WidgetDraft, WidgetPatch};
pub use orchestrator::{
    ActionOutcome, ConfigStore, DashboardOrchestrator, DashboardView, InMemoryConfigStore,
    UserAction,
};
pub use stream::{ConnectionState, StreamConnectionManager, StreamStatus};
pub use sync::{PeriodicSyncManager, SyncStatus};
pub use utils::logger::{init_logger, LogConfig};
