//! Request/response framing over a [`ByteStream`].
//!
//! Each request carries a numeric `id`; the peer echoes it back. Exchanges
//! are serialized so a response is always read by the request that sent it.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::stream::ByteStream;
use crate::error::{ClientError, Result};

#[derive(Debug)]
pub(super) struct JsonLink {
    stream: ByteStream,
    next_id: AtomicU64,
    exchange: Mutex<()>,
}

impl JsonLink {
    pub(super) fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            next_id: AtomicU64::new(1),
            exchange: Mutex::new(()),
        }
    }

    pub(super) fn stream(&self) -> &ByteStream {
        &self.stream
    }

    /// Send `frame` with a fresh id and return the peer's matching response.
    pub(super) async fn request(&self, mut frame: Map<String, Value>) -> Result<Map<String, Value>> {
        let _exchange = self.exchange.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        frame.insert("id".to_string(), Value::from(id));
        self.stream
            .send_text(serde_json::to_string(&Value::Object(frame))?)
            .await?;
        trace!(url = %self.stream.url(), id, "Request sent");

        loop {
            let Some(data) = self.stream.recv().await? else {
                return Err(ClientError::StreamClosed);
            };
            let response: Map<String, Value> = serde_json::from_slice(&data)?;
            match response.get("id").and_then(Value::as_u64) {
                Some(rid) if rid == id => return Ok(response),
                other => {
                    debug!(url = %self.stream.url(), expected = id, got = ?other, "Skipping unrelated frame");
                }
            }
        }
    }
}
