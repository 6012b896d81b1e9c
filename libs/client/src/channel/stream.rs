//! WebSocket byte streams.
//!
//! [`StreamTransport::open`] dials a URL with a protocol tag and yields a
//! [`ByteStream`]. A background reader owns the receive half: it forwards
//! data frames to the stream and flips its lifecycle watch to closed as soon
//! as the peer goes away, whether or not anyone is reading.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::{self, Error as WsError};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Data frames buffered ahead of the consumer; older unread frames win.
const FRAME_BUFFER: usize = 64;

/// Lifecycle of a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Open,
    Closed,
}

/// Opens byte streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamTransport;

impl StreamTransport {
    /// Open a stream to `url`, requesting the `protocol` subprotocol.
    pub async fn open(url: &str, protocol: &str) -> Result<ByteStream> {
        let connect_error = |source: WsError| ClientError::Connect {
            endpoint: url.to_string(),
            source,
        };

        let mut request = url.into_client_request().map_err(connect_error)?;
        let protocol_value = HeaderValue::from_str(protocol)
            .map_err(|e| connect_error(WsError::HttpFormat(e.into())))?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, protocol_value);

        let (ws, _response) = connect_async(request).await.map_err(connect_error)?;
        info!(url, protocol, "Stream opened");

        let (sink, source) = ws.split();
        let status = Arc::new(watch::Sender::new(StreamStatus::Open));
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_BUFFER);

        // The reader runs for the life of the connection so a peer close is
        // noticed even while nobody is receiving.
        let reader = tokio::spawn(read_frames(
            url.to_string(),
            source,
            frames_tx,
            Arc::clone(&status),
        ));

        Ok(ByteStream {
            url: url.to_string(),
            sink: Mutex::new(sink),
            frames: Mutex::new(frames_rx),
            status,
            reader,
        })
    }
}

/// Pump data frames from `source` into `frames` until the connection ends.
///
/// A peer close marks the stream closed at once; reading continues so the
/// close handshake completes.
async fn read_frames(
    url: String,
    mut source: SplitStream<WsStream>,
    frames: mpsc::Sender<Result<Bytes>>,
    status: Arc<watch::Sender<StreamStatus>>,
) {
    while let Some(message) = source.next().await {
        let frame = match message {
            Ok(Message::Text(text)) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(frame)) => {
                debug!(url = %url, ?frame, "Stream closed by peer");
                mark_closed(&url, &status);
                continue;
            }
            Ok(_) => continue,
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
            Err(e) => {
                debug!(url = %url, error = %e, "Stream read failed");
                mark_closed(&url, &status);
                let _ = frames.try_send(Err(ClientError::Stream(e)));
                break;
            }
        };
        // Never block on the consumer: a stalled reader would miss the close.
        match frames.try_send(Ok(frame)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(url = %url, "Receive buffer full; dropping frame");
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }
    mark_closed(&url, &status);
}

/// A bidirectional stream of data frames.
pub struct ByteStream {
    url: String,
    sink: Mutex<SplitSink<WsStream, Message>>,
    frames: Mutex<mpsc::Receiver<Result<Bytes>>>,
    status: Arc<watch::Sender<StreamStatus>>,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("url", &self.url)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl ByteStream {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_open(&self) -> bool {
        *self.status.borrow() == StreamStatus::Open
    }

    /// Lifecycle signal; flips to [`StreamStatus::Closed`] exactly once.
    pub fn status(&self) -> watch::Receiver<StreamStatus> {
        self.status.subscribe()
    }

    /// Send a text frame.
    pub async fn send_text(&self, text: String) -> Result<()> {
        self.send_message(Message::text(text)).await
    }

    /// Send a binary frame.
    pub async fn send(&self, data: Bytes) -> Result<()> {
        self.send_message(Message::binary(data)).await
    }

    async fn send_message(&self, message: Message) -> Result<()> {
        if !self.is_open() {
            return Err(ClientError::StreamClosed);
        }
        let result = self.sink.lock().await.send(message).await;
        result.map_err(|e| {
            mark_closed(&self.url, &self.status);
            stream_error(e)
        })
    }

    /// Receive the next data frame.
    ///
    /// Frames that arrived before the peer closed are still delivered;
    /// after that this returns `None`.
    pub async fn recv(&self) -> Result<Option<Bytes>> {
        match self.frames.lock().await.recv().await {
            Some(frame) => frame.map(Some),
            None => Ok(None),
        }
    }

    /// Close the stream. Safe to call more than once.
    ///
    /// Also completes the handshake when the peer closed first, so the
    /// connection is released even if nobody drained it.
    pub async fn close(&self) {
        mark_closed(&self.url, &self.status);
        if let Err(e) = self.sink.lock().await.close().await {
            debug!(url = %self.url, error = %e, "Stream already closed");
        }
    }
}

impl Drop for ByteStream {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn stream_error(error: tungstenite::Error) -> ClientError {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => ClientError::StreamClosed,
        other => ClientError::Stream(other),
    }
}

fn mark_closed(url: &str, status: &watch::Sender<StreamStatus>) {
    if status.send_replace(StreamStatus::Closed) == StreamStatus::Open {
        info!(url, "Stream closed");
    }
}
