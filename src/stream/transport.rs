/// 推送流传输层 - SSE 与 WebSocket 两种实现
use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::sse::{RawFrame, SseDecoder};
use crate::core::error::{DashboardError, Result};

// ============= Trait定义 =============

/// 已打开的事件流
#[async_trait]
pub trait EventStream: Send {
    /// 读取下一帧；`None`表示对端关闭
    async fn next_frame(&mut self) -> Option<Result<RawFrame>>;

    /// 主动关闭连接
    async fn close(&mut self);
}

/// 传输层工厂，每次调用打开一条新连接
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn EventStream>>;
}

/// 根据URL协议选择传输层：ws/wss 走 WebSocket，其余走 SSE
pub fn transport_for_url(url: &str) -> Result<Arc<dyn StreamTransport>> {
    let parsed = Url::parse(url)
        .map_err(|e| DashboardError::ConfigError(format!("推送流地址无效 {}: {}", url, e)))?;

    match parsed.scheme() {
        "ws" | "wss" => Ok(Arc::new(WebSocketTransport)),
        "http" | "https" => Ok(Arc::new(SseTransport::new())),
        other => Err(DashboardError::ConfigError(format!(
            "不支持的推送流协议: {}",
            other
        ))),
    }
}

// ============= SSE =============

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

/// 基于HTTP长连接的 text/event-stream 传输
#[derive(Clone)]
pub struct SseTransport {
    client: reqwest::Client,
}

impl SseTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for SseTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamTransport for SseTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn EventStream>> {
        log::info!("🔌 正在连接SSE推送流: {}", url);

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
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

        let body: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec())),
        );
        Ok(Box::new(SseEventStream {
            body: Some(body),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
        }))
    }
}

struct SseEventStream {
    body: Option<ByteStream>,
    decoder: SseDecoder,
    pending: VecDeque<RawFrame>,
}

#[async_trait]
impl EventStream for SseEventStream {
    async fn next_frame(&mut self) -> Option<Result<RawFrame>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(Ok(frame));
            }

            let body = self.body.as_mut()?;
            match body.next().await {
                Some(Ok(chunk)) => {
                    log::trace!("📥 接收SSE数据块: {} 字节", chunk.len());
                    self.pending.extend(self.decoder.feed(&chunk));
                }
                Some(Err(e)) => return Some(Err(DashboardError::NetworkError(e))),
                None => {
                    self.body = None;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        // 丢弃响应体即关闭底层连接
        if self.body.take().is_some() {
            log::info!("🔌 SSE连接已断开");
        }
        self.pending.clear();
    }
}

// ============= WebSocket =============

/// WebSocket传输，每个文本帧是`{"type":..., "data":...}`信封
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn EventStream>> {
        log::info!("🔌 正在连接WebSocket: {}", url);

        let (ws_stream, _) = connect_async(url).await.map_err(|e| {
            DashboardError::WebSocketError(format!("Connection failed: {}", e))
        })?;

        log::info!("✅ WebSocket连接成功: {}", url);
        Ok(Box::new(WsEventStream {
            ws_stream: Some(ws_stream),
        }))
    }
}

struct WsEventStream {
    ws_stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

#[async_trait]
impl EventStream for WsEventStream {
    async fn next_frame(&mut self) -> Option<Result<RawFrame>> {
        loop {
            let ws_stream = self.ws_stream.as_mut()?;
            match ws_stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    log::trace!(
                        "📥 接收WebSocket消息: {}",
                        if text.len() <= 200 {
                            text.as_str()
                        } else {
                            text.get(..200).unwrap_or(text.as_str())
                        }
                    );
                    return Some(Ok(RawFrame::from_envelope(&text)));
                }
                Some(Ok(Message::Ping(data))) => {
                    // 自动回复Pong
                    let _ = ws_stream.send(Message::Pong(data)).await;
                    log::trace!("🎾 回复WebSocket Ping");
                }
                Some(Ok(Message::Close(_))) => {
                    log::info!("🔚 WebSocket连接关闭");
                    self.ws_stream = None;
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Some(Err(DashboardError::WebSocketError(format!(
                        "Receive error: {}",
                        e
                    ))))
                }
                None => {
                    self.ws_stream = None;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut ws_stream) = self.ws_stream.take() {
            let _ = ws_stream.close(None).await;
            log::info!("🔌 WebSocket连接已断开");
        }
    }
}
