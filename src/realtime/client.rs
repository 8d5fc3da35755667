//! # Upstream Realtime Client
//!
//! Opens the upstream WebSocket and hands out a write handle.
//!
//! ## Connection Layout:
//! - The handshake request carries the bearer credential and the protocol
//!   version header
//! - The socket is split: the read half goes to the connection actor as a
//!   stream, the write half is owned by a small writer task fed through a channel
//! - Dropping or closing the [`UpstreamHandle`] closes the socket
//! - The writer queue is bounded by message count and by bytes, so a slow
//!   upstream cannot grow memory without limit

use crate::config::UpstreamConfig;
use crate::error::RelayError;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info};

pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type UpstreamSink = SplitSink<UpstreamSocket, Message>;
pub type UpstreamStream = SplitStream<UpstreamSocket>;

/// Messages the writer task may hold before sends are refused.
const WRITER_QUEUE_DEPTH: usize = 256;

/// JSON text the writer may hold for `max_audio_bytes` of queued audio
/// (base64 expansion plus room for the message envelopes).
pub fn writer_budget(max_audio_bytes: usize) -> usize {
    max_audio_bytes.div_ceil(3) * 4 + 64 * 1024
}

/// Build the handshake request for the upstream API.
///
/// ## Headers:
/// - `Authorization: Bearer <key>` when a key is configured
/// - `OpenAI-Beta: <beta_header>` when non-empty
pub fn build_request(config: &UpstreamConfig) -> Result<Request, RelayError> {
    let url = if config.model.is_empty() {
        config.url.clone()
    } else {
        let separator = if config.url.contains('?') { '&' } else { '?' };
        format!("{}{}model={}", config.url, separator, config.model)
    };

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| RelayError::Configuration(format!("invalid upstream URL '{}': {}", url, e)))?;

    let headers = request.headers_mut();

    if config.has_api_key() {
        let key = config.api_key.as_deref().unwrap_or_default().trim();
        let value = HeaderValue::from_str(&format!("Bearer {}", key))
            .map_err(|e| RelayError::Configuration(format!("invalid API key: {}", e)))?;
        headers.insert("Authorization", value);
    }

    if !config.beta_header.is_empty() {
        let value = HeaderValue::from_str(&config.beta_header)
            .map_err(|e| RelayError::Configuration(format!("invalid beta header: {}", e)))?;
        headers.insert("OpenAI-Beta", value);
    }

    Ok(request)
}

/// Connect to the upstream API and complete the WebSocket handshake.
///
/// No timeout or retry is applied; a failure is reported once to the caller.
pub async fn connect(config: &UpstreamConfig) -> Result<(UpstreamSink, UpstreamStream), RelayError> {
    let request = build_request(config)?;
    info!(url = %config.url, model = %config.model, "Connecting to upstream");

    let (socket, response) = connect_async(request).await?;
    debug!(status = %response.status(), "Upstream handshake complete");

    Ok(socket.split())
}

/// Write side of an upstream connection.
///
/// ## Rust Concepts:
/// - **mpsc::Sender + try_send**: sending never blocks the connection actor;
///   a full queue is reported instead of waited on
/// - **Arc<AtomicUsize>**: queued bytes, shared with the writer task that drains them
/// - **Clone**: not derived; one handle per session keeps ownership obvious
#[derive(Debug)]
pub struct UpstreamHandle {
    tx: mpsc::Sender<Message>,
    queued_bytes: Arc<AtomicUsize>,
    max_queued_bytes: usize,
}

impl UpstreamHandle {
    /// Spawn the writer task for `sink` and return the handle feeding it.
    ///
    /// The task ends after forwarding a Close frame, when the sink fails, or
    /// when every handle is dropped (closing the sink in all cases).
    pub fn spawn<S>(session_id: String, mut sink: S, max_queued_bytes: usize) -> Self
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: std::fmt::Display,
    {
        let (tx, mut rx) = mpsc::channel::<Message>(WRITER_QUEUE_DEPTH);
        let queued_bytes = Arc::new(AtomicUsize::new(0));
        let drained = Arc::clone(&queued_bytes);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let is_close = matches!(message, Message::Close(_));
                let len = match &message {
                    Message::Text(text) => text.len(),
                    _ => 0,
                };
                let sent = sink.send(message).await;
                drained.fetch_sub(len, Ordering::AcqRel);

                if let Err(e) = sent {
                    error!(session_id = %session_id, error = %e, "Failed to write to upstream");
                    break;
                }
                if is_close {
                    break;
                }
            }

            if let Err(e) = sink.close().await {
                debug!(session_id = %session_id, error = %e, "Upstream sink close failed");
            }
            debug!(session_id = %session_id, "Upstream writer finished");
        });

        Self {
            tx,
            queued_bytes,
            max_queued_bytes,
        }
    }

    /// Queue a text frame.
    ///
    /// ## Errors:
    /// - **BufferOverflow**: the queue is full (upstream is not keeping up); the text is dropped
    /// - **Upstream**: the writer task has stopped
    pub fn send_text(&self, text: String) -> Result<(), RelayError> {
        let len = text.len();
        let queued = self.queued_bytes.fetch_add(len, Ordering::AcqRel);

        let refused = if queued + len > self.max_queued_bytes {
            Some(RelayError::BufferOverflow {
                buffered: queued,
                incoming: len,
                limit: self.max_queued_bytes,
            })
        } else {
            match self.tx.try_send(Message::Text(text)) {
                Ok(()) => None,
                Err(TrySendError::Full(_)) => Some(RelayError::BufferOverflow {
                    buffered: queued,
                    incoming: len,
                    limit: self.max_queued_bytes,
                }),
                Err(TrySendError::Closed(_)) => Some(RelayError::Upstream("upstream writer is gone".to_string())),
            }
        };

        match refused {
            Some(err) => {
                self.queued_bytes.fetch_sub(len, Ordering::AcqRel);
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Ask the writer to send a Close frame and shut the socket.
    ///
    /// If the queue is full the Close frame is skipped; dropping the handle
    /// still ends the writer, which closes the sink once the queue drains.
    pub fn close(self) {
        let _ = self.tx.try_send(Message::Close(None));
    }
}
