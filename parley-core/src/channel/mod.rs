//! Duplex channel adapter.
//!
//! One persistent connection per session. Binary frames carry audio in both
//! directions; text frames carry the JSON events in [`events`].
//!
//! The transport ([`ws`]) is split into a reader task and a writer task. The
//! session actor only sees a [`ChannelWriter`] for sending and a stream of
//! [`ChannelEvent`]s for receiving, so it can be driven without a socket.

pub mod events;
pub mod ws;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::mpsc;
use tracing::trace;
use url::Url;

use crate::error::{ParleyError, Result};

/// What the transport delivers to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Binary(Vec<u8>),
    Text(String),
    /// Remote or local close. Terminal.
    Closed,
    /// Transport failure. Terminal.
    Error(String),
}

/// What the session hands to the transport writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Binary(Vec<u8>),
    Close,
}

/// Fire-and-forget sending half of a channel.
#[derive(Debug, Clone)]
pub struct ChannelWriter {
    tx: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl ChannelWriter {
    /// A writer whose output lands in the returned receiver. The transport
    /// drains it; tests inspect it directly.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                open: Arc::new(AtomicBool::new(true)),
            },
            rx,
        )
    }

    /// Whether the channel is currently open for sending.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Queue a binary payload. Silently dropped unless the channel is open.
    pub fn send(&self, payload: Vec<u8>) {
        if !self.is_open() {
            trace!(bytes = payload.len(), "channel not open, dropping payload");
            return;
        }
        let _ = self.tx.send(Outbound::Binary(payload));
    }

    /// Close the channel. Only the first call has an effect.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(Outbound::Close);
        }
    }

    /// The open flag alone, for transport tasks that must not keep the
    /// outbound queue alive. Transport tasks clear it when the socket ends.
    pub(crate) fn open_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.open)
    }
}

/// `<endpoint>?session=<id>`, keeping any query already on the endpoint.
///
/// # Errors
/// `ParleyError::InvalidEndpoint` unless the endpoint is an absolute `ws://`
/// or `wss://` URL.
pub fn session_url(endpoint: &str, session_id: &str) -> Result<String> {
    let mut url =
        Url::parse(endpoint.trim()).map_err(|e| ParleyError::InvalidEndpoint(e.to_string()))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ParleyError::InvalidEndpoint(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    url.query_pairs_mut().append_pair("session", session_id);
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_url_appends_query() {
        assert_eq!(
            session_url("ws://localhost:8000/ws/interview", "abc123").unwrap(),
            "ws://localhost:8000/ws/interview?session=abc123"
        );
    }

    #[test]
    fn session_url_keeps_existing_query_and_escapes_id() {
        assert_eq!(
            session_url("wss://api.example.com/ws?v=2", "a b&c").unwrap(),
            "wss://api.example.com/ws?v=2&session=a+b%26c"
        );
    }

    #[test]
    fn session_url_rejects_http_and_garbage() {
        assert!(matches!(
            session_url("http://example.com/ws", "x"),
            Err(ParleyError::InvalidEndpoint(_))
        ));
        assert!(session_url("not a url", "x").is_err());
    }

    #[test]
    fn send_is_dropped_once_closed() {
        let (writer, mut rx) = ChannelWriter::detached();
        writer.send(vec![1, 2]);
        writer.close();
        writer.close();
        writer.send(vec![3]);

        assert_eq!(rx.try_recv().unwrap(), Outbound::Binary(vec![1, 2]));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(rx.try_recv().is_err());
        assert!(!writer.is_open());
    }

    #[test]
    fn writer_reports_closed_when_transport_is_gone() {
        let (writer, rx) = ChannelWriter::detached();
        assert!(writer.is_open());
        drop(rx);
        assert!(!writer.is_open());
    }
}
