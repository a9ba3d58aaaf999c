//! Server-Sent Events framing for the push channel.
//!
//! The server sends unnamed `data:` events, one [`BroadcastMessage`] per
//! event, plus periodic `:` comments as keep-alives.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use beacon_core::{BroadcastMessage, ClientError};
use futures::{Stream, StreamExt};

/// Default idle timeout. Keep-alive comments count as activity.
pub const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Incremental SSE decoder. Feed it arbitrary byte chunks; it yields the
/// `data` payload of every complete event.
///
/// Bytes are buffered until a whole event has arrived, so a multi-byte
/// character split across chunks decodes intact. A complete event that is
/// not valid UTF-8 yields [`ClientError::Decode`].
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete event from the buffer.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<String, ClientError>> {
        self.buffer.extend_from_slice(chunk);
        if self.buffer.contains(&b'\r') {
            self.buffer = normalize_crlf(&self.buffer);
        }

        let mut payloads = Vec::new();
        while let Some(pos) = find_event_end(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(data) = decode_block(block) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Option<Result<String, ClientError>> {
        decode_block(std::mem::take(&mut self.buffer))
    }
}

/// `\r\n` becomes `\n`. A trailing `\r` is kept; its `\n` may be in the
/// next chunk.
fn normalize_crlf(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied().peekable();
    while let Some(b) = iter.next() {
        if b == b'\r' && iter.peek() == Some(&b'\n') {
            continue;
        }
        out.push(b);
    }
    out
}

fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn decode_block(block: Vec<u8>) -> Option<Result<String, ClientError>> {
    match String::from_utf8(block) {
        Ok(text) => parse_event_block(&text).map(Ok),
        Err(e) => Some(Err(ClientError::Decode(format!("event is not UTF-8: {e}")))),
    }
}

/// Join the `data:` lines of one event block. Comment-only blocks
/// (keep-alives) and blocks without data yield `None`.
pub fn parse_event_block(block: &str) -> Option<String> {
    let mut data: Option<String> = None;
    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            match data.as_mut() {
                Some(buf) => {
                    buf.push('\n');
                    buf.push_str(value);
                }
                None => data = Some(value.to_owned()),
            }
        }
    }
    data
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, String>> + Send>>;

/// Wraps a byte stream and yields decoded push-channel messages.
///
/// If nothing at all arrives within the idle timeout the stream yields one
/// [`ClientError::StreamInterrupted`] and ends. Transport errors end it the
/// same way. Malformed payloads yield [`ClientError::Decode`] and the
/// stream keeps going.
pub struct SseStream {
    inner: ByteStream,
    decoder: SseDecoder,
    pending: Vec<Result<String, ClientError>>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    done: bool,
}

impl SseStream {
    pub fn new<S, B, E>(byte_stream: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: Into<bytes::Bytes>,
        E: std::fmt::Display,
    {
        Self::with_idle_timeout(byte_stream, SSE_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout<S, B, E>(byte_stream: S, idle_timeout: Duration) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: Into<bytes::Bytes>,
        E: std::fmt::Display,
    {
        let inner = byte_stream.map(|item| item.map(Into::into).map_err(|e| e.to_string()));
        Self {
            inner: Box::pin(inner),
            decoder: SseDecoder::new(),
            pending: Vec::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            done: false,
        }
    }

    fn next_pending(&mut self) -> Option<Result<BroadcastMessage, ClientError>> {
        if self.pending.is_empty() {
            return None;
        }
        let data = self.pending.remove(0);
        Some(data.and_then(|data| {
            serde_json::from_str(&data).map_err(|e| ClientError::Decode(e.to_string()))
        }))
    }
}

impl Stream for SseStream {
    type Item = Result<BroadcastMessage, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(item) = self.next_pending() {
            return Poll::Ready(Some(item));
        }
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(deadline);

                    let payloads = self.decoder.push(&bytes);
                    self.pending.extend(payloads);
                    if let Some(item) = self.next_pending() {
                        return Poll::Ready(Some(item));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(ClientError::StreamInterrupted(e))));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    if let Some(data) = self.decoder.finish() {
                        self.pending.push(data);
                    }
                    return Poll::Ready(self.next_pending());
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.done = true;
                        return Poll::Ready(Some(Err(ClientError::StreamInterrupted(format!(
                            "idle timeout after {}s",
                            self.idle_duration.as_secs()
                        )))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
