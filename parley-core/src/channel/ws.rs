//! WebSocket transport for the duplex channel.

use std::sync::atomic::Ordering;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{ChannelEvent, ChannelWriter, Outbound};
use crate::error::{ParleyError, Result};

/// Inbound queue depth between the reader task and the session actor.
pub const INBOUND_CAPACITY: usize = 256;

/// Open the channel and spawn its reader and writer tasks.
///
/// The returned receiver ends with exactly one `Closed` or `Error` event.
///
/// # Errors
/// `ParleyError::Channel` if the handshake fails.
pub async fn connect(url: &str) -> Result<(ChannelWriter, mpsc::Receiver<ChannelEvent>)> {
    let (stream, _response) = connect_async(url)
        .await
        .map_err(|e| ParleyError::Channel(format!("connect {url}: {e}")))?;
    info!(url, "channel open");

    let (mut sink, mut source) = stream.split();
    let (writer, mut outbound) = ChannelWriter::detached();
    let (events_tx, events_rx) = mpsc::channel(INBOUND_CAPACITY);

    // Fired by the reader when the peer goes away, so the writer can flush
    // tungstenite's close reply and drop the socket.
    let (peer_gone_tx, mut peer_gone) = oneshot::channel::<()>();

    let open = writer.open_flag();
    tokio::spawn(async move {
        loop {
            let item = tokio::select! {
                biased;
                item = outbound.recv() => item,
                _ = &mut peer_gone => None,
            };
            match item {
                Some(Outbound::Binary(bytes)) => {
                    if let Err(e) = sink.send(Message::Binary(bytes)).await {
                        warn!("channel send failed: {e}");
                        break;
                    }
                }
                Some(Outbound::Close) | None => break,
            }
        }
        open.store(false, Ordering::Release);
        // Also flushes a pending reply to the peer's close frame.
        if let Err(e) = sink.close().await {
            debug!("close handshake failed: {e}");
        }
        debug!("channel writer finished");
    });

    let read_open = writer.open_flag();
    tokio::spawn(async move {
        let terminal = loop {
            let event = match source.next().await {
                Some(Ok(Message::Binary(bytes))) => ChannelEvent::Binary(bytes),
                Some(Ok(Message::Text(text))) => ChannelEvent::Text(text),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "remote closed channel");
                    break ChannelEvent::Closed;
                }
                // Ping/pong is answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => break ChannelEvent::Error(e.to_string()),
                None => break ChannelEvent::Closed,
            };
            if events_tx.send(event).await.is_err() {
                // Session is gone; nobody to tell.
                read_open.store(false, Ordering::Release);
                let _ = peer_gone_tx.send(());
                return;
            }
        };
        read_open.store(false, Ordering::Release);
        let _ = peer_gone_tx.send(());
        let _ = events_tx.send(terminal).await;
        debug!("channel reader finished");
    });

    Ok((writer, events_rx))
}
