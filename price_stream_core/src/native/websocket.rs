// Native WebSocket transport using tokio-tungstenite

use crate::error::StreamError;
use crate::transport::{Connector, FrameSink, Transport, TransportEvent, ABNORMAL_CLOSURE};
use async_trait::async_trait;
use futures_util::{stream::StreamExt, SinkExt};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Close frame carried no status code
const NO_STATUS_RECEIVED: u16 = 1005;

/// How long a client close waits for the peer's echo before the socket is dropped
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);

enum Outbound {
    Text(String),
    Pong(Vec<u8>),
    Close(u16, String),
}

/// Opens WebSocket connections with tokio-tungstenite
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    close_grace: Duration,
}

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self::with_close_grace(DEFAULT_CLOSE_GRACE)
    }

    pub fn with_close_grace(close_grace: Duration) -> Self {
        Self { close_grace }
    }
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, endpoint: &str) -> Result<Transport, StreamError> {
        debug!("Opening WebSocket to {}", endpoint);
        let (ws_stream, _) = connect_async(endpoint)
            .await
            .map_err(|e| StreamError::Connect(format!("{}: {}", endpoint, e)))?;
        info!("WebSocket to {} open", endpoint);

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // ---------- writer ----------
        let writer_events = event_tx.clone();
        let writer = tokio::spawn(async move {
            while let Some(cmd) = out_rx.recv().await {
                let (msg, closing) = match cmd {
                    Outbound::Text(text) => (Message::Text(text), false),
                    Outbound::Pong(data) => (Message::Pong(data), false),
                    Outbound::Close(code, reason) => (
                        Message::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        })),
                        true,
                    ),
                };
                if let Err(e) = write.send(msg).await {
                    warn!("WebSocket write failed: {}", e);
                    let _ = writer_events.send(TransportEvent::Error(e.to_string()));
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        // ---------- reader ----------
        let pong_tx = out_tx.clone();
        let reader = tokio::spawn(async move {
            loop {
                let event = match read.next().await {
                    Some(Ok(Message::Text(text))) => TransportEvent::Frame(text),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(_) => {
                            debug!("Ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = pong_tx.send(Outbound::Pong(data));
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (u16::from(f.code), f.reason.into_owned()),
                            None => (NO_STATUS_RECEIVED, String::new()),
                        };
                        let _ = event_tx.send(TransportEvent::Closed { code, reason });
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                        let _ = event_tx.send(TransportEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: e.to_string(),
                        });
                        break;
                    }
                    None => {
                        let _ = event_tx.send(TransportEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: "stream ended".to_string(),
                        });
                        break;
                    }
                };
                if event_tx.send(event).is_err() {
                    break;
                }
            }
        });

        let sink = WsSink {
            outbound: out_tx,
            reader: reader.abort_handle(),
            writer: writer.abort_handle(),
            close_grace: self.close_grace,
        };
        Ok(Transport {
            sink: Arc::new(sink),
            events: event_rx,
        })
    }
}

struct WsSink {
    outbound: mpsc::UnboundedSender<Outbound>,
    reader: AbortHandle,
    writer: AbortHandle,
    close_grace: Duration,
}

impl FrameSink for WsSink {
    fn send_text(&self, text: String) -> Result<(), StreamError> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| StreamError::Send("WebSocket writer has stopped".to_string()))
    }

    fn close(&self, code: u16, reason: &str) {
        if self.outbound.send(Outbound::Close(code, reason.to_string())).is_err() {
            self.terminate();
            return;
        }
        // The reader normally ends on the peer's close echo; drop the socket if it never comes
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.terminate();
            return;
        };
        let (reader, writer, grace) = (self.reader.clone(), self.writer.clone(), self.close_grace);
        runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            debug!("Close grace of {:?} elapsed; dropping WebSocket", grace);
            reader.abort();
            writer.abort();
        });
    }

    fn terminate(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}
