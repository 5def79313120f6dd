//! text/event-stream 帧解析
//!
//! 按行累积`event:`与`data:`字段，遇到空行产出一帧。
//! 输入按字节喂入，跨块截断的行和UTF-8字符会被缓存到下一块。
//! 单行超过上限时丢弃所在的整个事件，直到下一个空行再恢复解析。

/// 传输层读出的原始帧：事件标签 + 文本负载
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub event: String,
    pub data: String,
}

impl RawFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// 解析`{"type": ..., "data": ...}`信封；不是信封时作为`message`帧原样返回
    pub fn from_envelope(text: &str) -> Self {
        if let Ok(serde_json::Value::Object(mut map)) = serde_json::from_str(text) {
            if let Some(serde_json::Value::String(kind)) = map.remove("type") {
                let data = match map.remove("data") {
                    Some(serde_json::Value::String(s)) => s,
                    Some(value) => value.to_string(),
                    None => String::new(),
                };
                return Self::new(kind, data);
            }
        }
        Self::new(DEFAULT_EVENT, text)
    }
}

/// 未声明`event:`字段时的默认事件名
pub const DEFAULT_EVENT: &str = "message";

/// 单行最大字节数
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    max_line: usize,
    /// 正在丢弃超长行所在的事件
    discarding: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }

    fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            event: None,
            data: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    /// 喂入一段字节，返回其中完整的帧
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<RawFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if self.discarding {
                self.discarding = !line.is_empty();
                continue;
            }
            if line.len() > self.max_line {
                self.drop_event(line.len());
                continue;
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        // 迟迟没有换行，不再继续累积
        if self.buffer.len() > self.max_line {
            let pending = self.buffer.len();
            self.buffer.clear();
            if !self.discarding {
                self.drop_event(pending);
            }
        }
        frames
    }

    fn drop_event(&mut self, line_len: usize) {
        log::warn!(
            "⚠️ SSE单行长度 {} 字节超过上限 {}，丢弃当前事件",
            line_len,
            self.max_line
        );
        self.event = None;
        self.data.clear();
        self.discarding = true;
    }

    fn process_line(&mut self, line: &str) -> Option<RawFrame> {
        if line.is_empty() {
            return self.flush();
        }
        // 注释行，常用作保活
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id / retry 不参与事件分发
            _ => {}
        }
        None
    }

    fn flush(&mut self) -> Option<RawFrame> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        let event = self
            .event
            .take()
            .unwrap_or_else(|| DEFAULT_EVENT.to_string());
        let data = std::mem::take(&mut self.data).join("\n");
        Some(RawFrame { event, data })
    }
}
