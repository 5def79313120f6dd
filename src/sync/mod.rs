pub mod fetcher;
pub mod manager;

pub use fetcher::{HttpSnapshotFetcher, SnapshotFetcher};
pub use manager::{PeriodicSyncManager, SyncStatus};
