use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::error::SessionError;
use crate::types::{ClientEvent, EncodedMediaChunk, ServerEvent};

mod config;
mod consts;

pub use config::{ChannelConfig, ChannelConfigBuilder};

pub type EventTx = tokio::sync::mpsc::Sender<ServerEvent>;

/// Send side of the duplex connection to the agent. Inbound events arrive
/// on the sender handed to [`ChannelConnector::connect`], in arrival order,
/// starting with `ServerEvent::Opened`.
pub trait Channel: Send {
    /// Queues one media chunk, fire-and-forget. Must not block the caller.
    fn send(&mut self, chunk: EncodedMediaChunk) -> Result<(), SessionError>;

    /// Drops the connection and stops event delivery. Idempotent.
    fn close(&mut self);
}

#[async_trait]
pub trait ChannelConnector: Send {
    async fn connect(&self, events: EventTx) -> Result<Box<dyn Channel>, SessionError>;
}

/// Default channel implementation over a WebSocket. The socket is split
/// into a writer task fed by a bounded queue and a reader task that
/// deserializes server events onto the caller's event sender.
pub struct WsConnector {
    config: ChannelConfig,
}

impl WsConnector {
    pub fn new(config: ChannelConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, events: EventTx) -> Result<Box<dyn Channel>, SessionError> {
        let request = config::build_request(&self.config).map_err(SessionError::channel)?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(SessionError::channel)?;
        tracing::info!("channel connected: {}", self.config.base_url());

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) =
            tokio::sync::mpsc::channel::<ClientEvent>(consts::SEND_QUEUE_CAPACITY);

        // Opened goes out before the reader task starts so the consumer
        // sees it ahead of any server event.
        events
            .send(ServerEvent::Opened)
            .await
            .map_err(|_| SessionError::channel("event consumer dropped"))?;

        let send_handle = tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::error!("failed to send message: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to serialize event: {}", e);
                    }
                }
            }
            if let Err(e) = write.close().await {
                tracing::debug!("socket close: {}", e);
            }
        });

        let recv_handle = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                if events.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::error!(
                                    "failed to deserialize event: {}, text=> {:?}",
                                    e,
                                    text
                                );
                            }
                        }
                    }
                    Ok(Message::Binary(bin)) => {
                        tracing::warn!("unexpected binary message: {} bytes", bin.len());
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::info!("connection closed: {:?}", frame);
                        let reason = frame.map(|f| f.reason.to_string());
                        let _ = events.send(ServerEvent::Closed { reason }).await;
                        break;
                    }
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        let _ = events
                            .send(ServerEvent::Error {
                                detail: e.to_string(),
                            })
                            .await;
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Box::new(WsChannel {
            out_tx: Some(out_tx),
            send_handle,
            recv_handle,
        }))
    }
}

pub struct WsChannel {
    out_tx: Option<tokio::sync::mpsc::Sender<ClientEvent>>,
    send_handle: tokio::task::JoinHandle<()>,
    recv_handle: tokio::task::JoinHandle<()>,
}

impl Channel for WsChannel {
    fn send(&mut self, chunk: EncodedMediaChunk) -> Result<(), SessionError> {
        let out_tx = self.out_tx.as_ref().ok_or(SessionError::SendFailure)?;
        out_tx
            .try_send(ClientEvent::MediaChunkAppend { chunk })
            .map_err(|_| SessionError::SendFailure)
    }

    fn close(&mut self) {
        if self.out_tx.take().is_some() {
            // Dropping the queue ends the writer task, which closes the
            // socket; the reader is cut off directly.
            self.recv_handle.abort();
            tracing::debug!("channel closed");
        }
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.close();
        self.send_handle.abort();
    }
}
