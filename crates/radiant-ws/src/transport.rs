// Socket transport behind the connection manager.
//
// The manager only needs "open this URL and give me its text frames until it
// closes". `TungsteniteConnector` does that over a real socket; the in-memory
// `MemoryConnector` does it for tests without opening ports.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

/// Text frames of one open socket. The stream ends when the socket closes;
/// an `Err` item is always the last one.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("websocket error: {0}")]
    Protocol(String),
}

/// Opens sockets for the connection manager.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<FrameStream, TransportError>;
}

// ---------------------------------------------------------------------------
// tokio-tungstenite
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<FrameStream, TransportError> {
        let (ws_stream, _response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| TransportError::Connect {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;
        Ok(text_frames(ws_stream))
    }
}

/// Reduce raw WebSocket messages to text payloads.
///
/// Binary, ping and pong frames are skipped. A close frame ends the stream;
/// a socket error is yielded once and then ends it.
pub fn text_frames<S>(messages: S) -> FrameStream
where
    S: Stream<Item = Result<Message, WsError>> + Send + Unpin + 'static,
{
    Box::pin(stream::unfold(Some(messages), |state| async move {
        let mut messages = state?;
        loop {
            match messages.next().await {
                Some(Ok(Message::Text(text))) => return Some((Ok(text.to_string()), Some(messages))),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Server sent close frame");
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some((Err(TransportError::Protocol(e.to_string())), None)),
                None => return None,
            }
        }
    }))
}

// ---------------------------------------------------------------------------
// In-memory transport
// ---------------------------------------------------------------------------

/// One call to `MemoryConnector::connect`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectAttempt {
    pub url: String,
    pub at: Instant,
    pub accepted: bool,
}

type FrameSender = mpsc::UnboundedSender<Result<String, TransportError>>;

#[derive(Default)]
struct MemoryInner {
    refuse: bool,
    attempts: Vec<ConnectAttempt>,
    sockets: HashMap<String, Vec<FrameSender>>,
    opened: usize,
}

/// In-process connector: every accepted connect creates a socket the test
/// drives with `push` and `close_all`.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    inner: Arc<Mutex<MemoryInner>>,
    closed: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnector")
            .field("open", &self.open_count())
            .field("connects", &self.connect_count())
            .finish()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// While set, every connect attempt fails.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse = refuse;
    }

    /// Send a text frame to every live socket for `url`. Returns how many
    /// sockets received it.
    pub fn push(&self, url: &str, text: &str) -> usize {
        let mut inner = self.lock();
        let Some(senders) = inner.sockets.get_mut(url) else {
            return 0;
        };
        senders.retain(|tx| tx.send(Ok(text.to_string())).is_ok());
        senders.len()
    }

    /// Fail every live socket for `url` with a transport error.
    pub fn fail_all(&self, url: &str, message: &str) {
        if let Some(senders) = self.lock().sockets.remove(url) {
            for tx in senders {
                let _ = tx.send(Err(TransportError::Protocol(message.to_string())));
            }
        }
    }

    /// Close every live socket for `url` from the server side.
    pub fn close_all(&self, url: &str) {
        self.lock().sockets.remove(url);
    }

    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.lock().attempts.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.lock().attempts.len()
    }

    /// Sockets accepted so far.
    pub fn opened_count(&self) -> usize {
        self.lock().opened
    }

    /// Sockets the client side has dropped.
    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.opened_count().saturating_sub(self.closed_count())
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<FrameStream, TransportError> {
        let mut inner = self.lock();
        let accepted = !inner.refuse;
        inner.attempts.push(ConnectAttempt {
            url: url.to_string(),
            at: Instant::now(),
            accepted,
        });
        if !accepted {
            return Err(TransportError::Connect {
                url: url.to_string(),
                message: "connection refused".into(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        inner.sockets.entry(url.to_string()).or_default().push(tx);
        inner.opened += 1;
        Ok(Box::pin(MemoryStream {
            rx,
            closed: self.closed.clone(),
        }))
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Result<String, TransportError>>,
    closed: Arc<AtomicUsize>,
}

impl Stream for MemoryStream {
    type Item = Result<String, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
