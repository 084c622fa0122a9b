//! Consumer side of the chat stream: decode NDJSON frames and fold them into
//! display state.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use reqwest::Client;
use std::collections::VecDeque;
use thiserror::Error;

use crate::config::ChatConfig;
use crate::models::{ChatRequest, Citation, Conversation, Message};
use crate::sources::{settled_len, strip_citations};
use crate::streaming::{LineBuffer, LoadingIndicator, StreamFrame};

#[derive(Error, Debug)]
pub enum FrameDecodeError {
    #[error("malformed frame {line:?}: {source}")]
    Malformed {
        line: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Decode(#[from] FrameDecodeError),

    #[error("unexpected {frame} frame after the stream finished")]
    AfterTerminal { frame: &'static str },

    #[error("stream ended without a done or error frame")]
    Truncated,

    #[error("{message}")]
    WordLimit { words: usize, message: String },
}

/// Splits received bytes into frames, buffering partial lines across reads
#[derive(Debug, Default)]
pub struct FrameDecoder {
    lines: LineBuffer,
}

impl FrameDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<StreamFrame>, FrameDecodeError> {
        self.lines
            .push(bytes)
            .into_iter()
            .filter_map(|line| parse_line(line).transpose())
            .collect()
    }

    /// A final frame that arrived without its trailing newline
    pub fn finish(&mut self) -> Result<Option<StreamFrame>, FrameDecodeError> {
        match self.lines.finish() {
            Some(line) => parse_line(line),
            None => Ok(None),
        }
    }
}

/// Blank lines are skipped. Invalid UTF-8 is malformed, never replaced.
fn parse_line(line: Vec<u8>) -> Result<Option<StreamFrame>, FrameDecodeError> {
    if line.trim_ascii().is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(&line)
        .map(Some)
        .map_err(|source| FrameDecodeError::Malformed {
            line: String::from_utf8_lossy(&line).into_owned(),
            source,
        })
}

pub type FrameStream = BoxStream<'static, Result<StreamFrame, ClientError>>;

struct DecodeState<S> {
    bytes: S,
    decoder: FrameDecoder,
    pending: VecDeque<StreamFrame>,
    finished: bool,
}

/// Decode a byte stream into frames. The first error ends the stream.
pub fn decode_frames<S, E>(bytes: S) -> FrameStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Into<ClientError>,
{
    let state = DecodeState {
        bytes,
        decoder: FrameDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };
    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(frame) = st.pending.pop_front() {
                return Some((Ok(frame), st));
            }
            if st.finished {
                return None;
            }
            let step = match st.bytes.next().await {
                Some(Ok(chunk)) => st.decoder.push(&chunk).map_err(ClientError::from),
                Some(Err(e)) => Err(e.into()),
                None => {
                    st.finished = true;
                    st.decoder
                        .finish()
                        .map(|last| last.into_iter().collect())
                        .map_err(ClientError::from)
                }
            };
            match step {
                Ok(frames) => st.pending.extend(frames),
                Err(e) => {
                    st.finished = true;
                    st.pending.clear();
                    return Some((Err(e), st));
                }
            }
        }
    })
    .boxed()
}

/// Display state of one streamed answer.
///
/// Indicators accumulate until the first message frame clears them; each
/// message frame replaces the content; an error frame is appended to the
/// indicator trail. Nothing is accepted after `done` or `error`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    indicators: Vec<LoadingIndicator>,
    content: String,
    citations: Vec<Citation>,
    streaming: bool,
    finished: bool,
    failed: bool,
}

impl Transcript {
    pub fn apply(&mut self, frame: StreamFrame) -> Result<(), ClientError> {
        if self.finished {
            return Err(ClientError::AfterTerminal {
                frame: frame.kind(),
            });
        }
        match frame {
            StreamFrame::Loading { indicator } => self.indicators.push(indicator),
            StreamFrame::Message { message } => {
                if !self.streaming {
                    self.indicators.clear();
                    self.streaming = true;
                }
                self.content = message.content;
                self.citations = message.citations;
            }
            StreamFrame::Done { final_message } => {
                self.indicators.clear();
                self.content = final_message;
                self.finished = true;
            }
            StreamFrame::Error { indicator } => {
                self.indicators.push(indicator);
                self.finished = true;
                self.failed = true;
            }
        }
        Ok(())
    }

    pub fn indicators(&self) -> &[LoadingIndicator] {
        &self.indicators
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Content with `[n]` markers removed. While streaming, a marker that is
    /// still arriving is held back so successive results only ever grow.
    pub fn content_without_citations(&self) -> String {
        let settled = if self.finished {
            self.content.len()
        } else {
            settled_len(&self.content)
        };
        strip_citations(&self.content[..settled])
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }
}

/// HTTP client for `POST /chat`
#[derive(Clone)]
pub struct ChatClient {
    http: Client,
    endpoint: String,
    bearer_token: Option<String>,
}

impl ChatClient {
    pub fn new(base_url: &str, bearer_token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: format!("{}/chat", base_url.trim_end_matches('/')),
            bearer_token,
        }
    }

    pub async fn send(&self, conversation: &Conversation) -> Result<FrameStream, ClientError> {
        let mut request = self.http.post(&self.endpoint).json(&ChatRequest {
            chat: conversation.clone(),
        });
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(decode_frames(response.bytes_stream().boxed()))
    }
}

/// A running conversation that starts with the assistant's greeting and
/// stops accepting questions once it grows past the word cutoff
pub struct ChatSession {
    client: ChatClient,
    conversation: Conversation,
    word_cutoff: usize,
    word_break_message: String,
}

impl ChatSession {
    pub fn new(client: ChatClient, chat: &ChatConfig) -> Self {
        Self {
            client,
            conversation: Conversation::new(vec![Message::assistant(
                chat.initial_message.clone(),
            )]),
            word_cutoff: chat.word_cutoff,
            word_break_message: chat.word_break_message.clone(),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Send `question` and fold the answer into a transcript, calling
    /// `on_update` after every frame. A completed answer is appended to the
    /// conversation; a failed one is not.
    pub async fn ask<F>(&mut self, question: &str, mut on_update: F) -> Result<Transcript, ClientError>
    where
        F: FnMut(&Transcript),
    {
        let mut next = self.conversation.clone();
        next.push(Message::user(question));
        let words = next.word_count();
        if words > self.word_cutoff {
            return Err(ClientError::WordLimit {
                words,
                message: self.word_break_message.clone(),
            });
        }

        let mut frames = self.client.send(&next).await?;
        self.conversation = next;

        let mut transcript = Transcript::default();
        while let Some(frame) = frames.next().await {
            transcript.apply(frame?)?;
            on_update(&transcript);
        }
        if !transcript.is_finished() {
            return Err(ClientError::Truncated);
        }
        if !transcript.is_failed() {
            self.conversation
                .push(Message::assistant(transcript.content().to_string()));
        }
        Ok(transcript)
    }
}
