//! Newline-delimited JSON framing for the chat response stream.
//!
//! A response is a sequence of [`StreamFrame`]s, each serialized as one JSON
//! object followed by a single `\n`. JSON string escaping guarantees that no
//! frame contains a raw newline, so receivers can split on `\n` regardless of
//! how the transport chunks the bytes.
//!
//! [`FrameSink`] is the producer side. It enforces the per-request state
//! machine `Idle -> Loading(n) -> Streaming -> Done | Failed`: loading
//! indicators accumulate, message content only ever grows, and exactly one
//! terminal frame closes the stream.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{ChatError, Result};
use crate::models::{Citation, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorIcon {
    Thinking,
    Searching,
    Understanding,
    Documents,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadingIndicator {
    pub status: String,
    pub icon: IndicatorIcon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamedMessage {
    pub role: Role,
    /// Everything generated so far, not a delta
    pub content: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Loading { indicator: LoadingIndicator },
    Message { message: StreamedMessage },
    Done { final_message: String },
    Error { indicator: LoadingIndicator },
}

impl StreamFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamFrame::Loading { .. } => "loading",
            StreamFrame::Message { .. } => "message",
            StreamFrame::Done { .. } => "done",
            StreamFrame::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Done { .. } | StreamFrame::Error { .. })
    }

    pub fn error(status: impl Into<String>) -> Self {
        StreamFrame::Error {
            indicator: LoadingIndicator {
                status: status.into(),
                icon: IndicatorIcon::Error,
            },
        }
    }

    /// One wire line: compact JSON plus a trailing newline
    pub fn encode(&self) -> Result<Bytes> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Loading(usize),
    Streaming,
    Done,
    Failed,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Done | StreamState::Failed)
    }
}

/// Request-scoped producer of frames. The pipeline is its only writer.
pub struct FrameSink {
    tx: mpsc::Sender<Bytes>,
    state: StreamState,
    indicators: Vec<LoadingIndicator>,
    last_content: String,
}

impl FrameSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            tx,
            state: StreamState::Idle,
            indicators: Vec::new(),
            last_content: String::new(),
        }
    }

    /// Sink plus the receiving end, with room for `capacity` buffered frames
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Append-only log of indicators emitted for this request
    pub fn indicators(&self) -> &[LoadingIndicator] {
        &self.indicators
    }

    async fn send(&self, frame: &StreamFrame) -> Result<()> {
        let line = frame.encode()?;
        self.tx
            .send(line)
            .await
            .map_err(|_| ChatError::StreamClosed)
    }

    fn reject(&self, frame: &'static str) -> ChatError {
        ChatError::InvalidTransition {
            from: self.state,
            frame,
        }
    }

    pub async fn indicate(&mut self, status: impl Into<String>, icon: IndicatorIcon) -> Result<()> {
        let count = match self.state {
            StreamState::Idle => 0,
            StreamState::Loading(n) => n,
            _ => return Err(self.reject("loading")),
        };
        let indicator = LoadingIndicator {
            status: status.into(),
            icon,
        };
        self.send(&StreamFrame::Loading {
            indicator: indicator.clone(),
        })
        .await?;
        self.indicators.push(indicator);
        self.state = StreamState::Loading(count + 1);
        Ok(())
    }

    /// Emit the cumulative content so far. Content must extend the previous frame's.
    pub async fn message(&mut self, content: &str, citations: &[Citation]) -> Result<()> {
        if self.state.is_terminal() || !content.starts_with(self.last_content.as_str()) {
            return Err(self.reject("message"));
        }
        self.send(&StreamFrame::Message {
            message: StreamedMessage {
                role: Role::Assistant,
                content: content.to_string(),
                citations: citations.to_vec(),
            },
        })
        .await?;
        self.last_content.clear();
        self.last_content.push_str(content);
        self.state = StreamState::Streaming;
        Ok(())
    }

    /// Close the stream successfully. A no-op once the stream has terminated.
    pub async fn done(&mut self, final_message: String) -> Result<()> {
        if self.state.is_terminal() {
            tracing::debug!("done frame ignored, stream already {:?}", self.state);
            return Ok(());
        }
        if final_message != self.last_content && self.state == StreamState::Streaming {
            return Err(self.reject("done"));
        }
        self.state = StreamState::Done;
        self.send(&StreamFrame::Done { final_message }).await
    }

    /// Close the stream with an error. A no-op once the stream has terminated.
    pub async fn error(&mut self, status: impl Into<String>) -> Result<()> {
        if self.state.is_terminal() {
            tracing::debug!("error frame ignored, stream already {:?}", self.state);
            return Ok(());
        }
        self.state = StreamState::Failed;
        self.send(&StreamFrame::error(status)).await
    }
}

impl Drop for FrameSink {
    fn drop(&mut self) {
        // A sink abandoned mid-request still owes the client a terminal frame
        if !self.state.is_terminal() {
            if let Ok(line) = StreamFrame::error("The response ended unexpectedly.").encode() {
                let _ = self.tx.try_send(line);
            }
        }
    }
}

/// Running buffer turning text deltas into cumulative content
#[derive(Debug, Default)]
pub struct TextAccumulator {
    buffer: String,
}

impl TextAccumulator {
    pub fn push(&mut self, delta: &str) -> &str {
        self.buffer.push_str(delta);
        &self.buffer
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn into_inner(self) -> String {
        self.buffer
    }
}

/// Reassembles newline-terminated lines from arbitrarily split byte chunks.
/// Lines are raw bytes; decoding them is the caller's job.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline
    scanned: usize,
}

impl LineBuffer {
    /// Complete lines found after appending `bytes`, without their terminators.
    /// Bytes after the last newline stay buffered for the next call.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.pending[from..].iter().position(|&b| b == b'\n') {
            let end = from + offset;
            let mut line = &self.pending[start..end];
            if let [rest @ .., b'\r'] = line {
                line = rest;
            }
            lines.push(line.to_vec());
            start = end + 1;
            from = start;
        }
        self.pending.drain(..start);
        self.scanned = self.pending.len();
        lines
    }

    /// Whatever is left once the byte stream has ended
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.scanned = 0;
        if self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }
}
