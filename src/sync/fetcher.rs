use async_trait::async_trait;
use reqwest::header::ACCEPT;
use std::time::Duration;

use crate::core::config::SyncConfig;
use crate::core::error::{DashboardError, Result};
use crate::core::types::SnapshotPayload;

/// 轮询数据源
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch(&self) -> Result<SnapshotPayload>;
}

/// 通过HTTP GET拉取JSON快照
pub struct HttpSnapshotFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpSnapshotFetcher {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(config.url.clone(), config.request_timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SnapshotFetcher for HttpSnapshotFetcher {
    async fn fetch(&self) -> Result<SnapshotPayload> {
        log::debug!("📥 拉取行情快照: {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DashboardError::HttpStatus {
                status: status.as_u16(),
                message,
            });
        }

        let payload = response.json::<SnapshotPayload>().await?;
        Ok(payload)
    }
}
