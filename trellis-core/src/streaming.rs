//! Streaming response bodies
//!
//! Rendered pages may be delivered as a pull-based byte stream instead of a
//! buffered string. Everything that produces or transforms such a body works
//! with [`BoxByteStream`], a boxed `Stream` of `Bytes` chunks.
//!
//! [`ByteStream`] is the push-based variant: a channel-backed stream fed by a
//! [`ByteStreamSender`], used for long-lived bodies such as Server-Sent Events.
//!
//! ```
//! use trellis_core::streaming::{ByteStream, collect_stream};
//!
//! # tokio_test_block_on(async {
//! let (stream, sender) = ByteStream::new();
//! tokio::spawn(async move {
//!     sender.send_str("Hello, ").await.ok();
//!     sender.send_str("World!").await.ok();
//! });
//! let body = collect_stream(Box::pin(stream)).await.unwrap();
//! assert_eq!(body, b"Hello, World!".to_vec());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

use crate::Error;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// A boxed, sendable byte stream used as a response body.
pub type BoxByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

/// Build a stream from already materialised chunks.
pub fn stream_from_chunks<I, C>(chunks: I) -> BoxByteStream
where
    I: IntoIterator<Item = C>,
    I::IntoIter: Send + 'static,
    C: Into<Bytes>,
{
    Box::pin(futures_util::stream::iter(
        chunks.into_iter().map(|c| Ok(c.into())),
    ))
}

/// Drain a stream into a single buffer.
pub async fn collect_stream(mut stream: BoxByteStream) -> Result<Vec<u8>, Error> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.to_vec())
}

// ============================================================================
// Channel-backed byte stream
// ============================================================================

/// A chunk of streaming data.
#[derive(Debug, Clone)]
enum StreamChunk {
    Bytes(Bytes),
    End,
    Error(String),
}

/// A stream of raw bytes fed through a channel.
pub struct ByteStream {
    receiver: mpsc::Receiver<StreamChunk>,
}

/// Sender half of a byte stream.
#[derive(Clone)]
pub struct ByteStreamSender {
    sender: mpsc::Sender<StreamChunk>,
    bytes_sent: Arc<AtomicU64>,
}

impl ByteStream {
    /// Create a new byte stream with default buffer size (64).
    pub fn new() -> (Self, ByteStreamSender) {
        Self::with_buffer_size(64)
    }

    /// Create a new byte stream with custom buffer size.
    pub fn with_buffer_size(size: usize) -> (Self, ByteStreamSender) {
        let (sender, receiver) = mpsc::channel(size);
        (
            Self { receiver },
            ByteStreamSender {
                sender,
                bytes_sent: Arc::new(AtomicU64::new(0)),
            },
        )
    }
}

impl Stream for ByteStream {
    type Item = Result<Bytes, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.receiver).poll_recv(cx) {
            Poll::Ready(Some(StreamChunk::Bytes(bytes))) => Poll::Ready(Some(Ok(bytes))),
            Poll::Ready(Some(StreamChunk::End)) | Poll::Ready(None) => Poll::Ready(None),
            Poll::Ready(Some(StreamChunk::Error(e))) => {
                Poll::Ready(Some(Err(Error::Internal(e))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl ByteStreamSender {
    /// Send bytes to the stream.
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<(), Error> {
        let bytes = data.into();
        let len = bytes.len() as u64;
        self.sender
            .send(StreamChunk::Bytes(bytes))
            .await
            .map_err(|e| Error::Internal(format!("Failed to send to stream: {}", e)))?;
        self.bytes_sent.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    /// Send a string to the stream.
    pub async fn send_str(&self, s: &str) -> Result<(), Error> {
        self.send(Bytes::copy_from_slice(s.as_bytes())).await
    }

    /// Send a Server-Sent Event frame.
    pub async fn send_event(&self, event: &ServerSentEvent) -> Result<(), Error> {
        self.send(event.to_frame()).await
    }

    /// Signal an error to the stream.
    pub async fn send_error(&self, error: impl Into<String>) -> Result<(), Error> {
        self.sender
            .send(StreamChunk::Error(error.into()))
            .await
            .map_err(|e| Error::Internal(format!("Failed to send error: {}", e)))
    }

    /// Close the stream.
    pub async fn close(&self) {
        let _ = self.sender.send(StreamChunk::End).await;
    }

    /// Get the total bytes sent so far.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Check if the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

// ============================================================================
// Server-Sent Events
// ============================================================================

/// A single Server-Sent Event.
#[derive(Debug, Clone)]
pub struct ServerSentEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
    pub retry: Option<u64>,
}

impl ServerSentEvent {
    /// Create an event with just data.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: None,
            data: data.into(),
            retry: None,
        }
    }

    /// Create an event with a type.
    pub fn with_event(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            ..Self::new(data)
        }
    }

    /// Encode to the `text/event-stream` wire format.
    pub fn to_frame(&self) -> String {
        let mut output = String::new();
        if let Some(ref id) = self.id {
            output.push_str(&format!("id: {}\n", id));
        }
        if let Some(ref event) = self.event {
            output.push_str(&format!("event: {}\n", event));
        }
        for line in self.data.lines() {
            output.push_str(&format!("data: {}\n", line));
        }
        if let Some(retry) = self.retry {
            output.push_str(&format!("retry: {}\n", retry));
        }
        output.push('\n');
        output
    }
}
