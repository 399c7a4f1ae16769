// Transport abstraction
// The connection manager only sees a frame sink and an ordered stream of transport events,
// so the native WebSocket client and in-memory test doubles are interchangeable.

use crate::error::StreamError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Requested, orderly shutdown
pub const NORMAL_CLOSURE: u16 = 1000;
/// Connection lost without a close handshake
pub const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Text frame from the server
    Frame(String),
    /// Transport-level error; a `Closed` event always follows
    Error(String),
    Closed { code: u16, reason: String },
}

/// Outbound half of an open connection
pub trait FrameSink: Send + Sync {
    /// Queue a text frame. Fails synchronously when the connection is already dead.
    fn send_text(&self, text: String) -> Result<(), StreamError>;

    /// Start an orderly close with `code`
    fn close(&self, code: u16, reason: &str);

    /// Tear the connection down without a close handshake
    fn terminate(&self);
}

/// An open connection
pub struct Transport {
    pub sink: Arc<dyn FrameSink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens connections to an endpoint. Resolving the future means the
/// connection is open; dropping it abandons the attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &str) -> Result<Transport, StreamError>;
}
