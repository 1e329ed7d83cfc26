//! Sensor Stream WebSocket Client
//!
//! Maintains the connection to the sensor stream endpoint: decoded frames
//! fan in to the owner through an event channel, outbound frames are queued
//! on a command channel by the [`StreamHandle`] and written by the
//! connection task. On connection loss the client backs off and reconnects;
//! the owner sees `Closed`/`Open` events and resets its state accordingly.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, JsonCodec};
use super::messages::{ClientFrame, ServerFrame};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{SensorSelection, Transport, ValuesRequest};

/// Errors that can occur in the stream client.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Codec error on an outbound frame.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,

    /// Connection closed by the endpoint.
    #[error("connection closed")]
    ConnectionClosed,

    /// `run` was called twice on the same client.
    #[error("stream client is already running")]
    AlreadyRunning,
}

/// Events emitted by the stream client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Connection established.
    Open,
    /// Connection lost; registry state is stale.
    Closed,
    /// Backing off before another connection attempt.
    Reconnecting {
        /// Attempt number since the last successful connection.
        attempt: u32,
    },
    /// A metadata delta arrived.
    Metadata(crate::domain::metadata::MetadataDelta),
    /// A value batch arrived.
    Update(crate::application::ports::ValueBatch),
    /// The endpoint sent an undecodable frame.
    ProtocolError(String),
}

/// Configuration for the stream client.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// WebSocket URL of the sensor stream endpoint.
    pub url: String,
    /// Reconnection behavior.
    pub reconnect: ReconnectConfig,
}

impl StreamClientConfig {
    /// Configuration with default reconnection behavior.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Outbound side of the stream: implements the [`Transport`] port by
/// queueing frames onto the connection task. Sends are fire-and-forget; a
/// frame queued while the link is down is dropped with the connection.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    commands: mpsc::UnboundedSender<ClientFrame>,
}

impl StreamHandle {
    fn send(&self, frame: ClientFrame) {
        if self.commands.send(frame).is_err() {
            tracing::debug!("outbound frame dropped, stream client is gone");
        }
    }
}

impl Transport for StreamHandle {
    fn get_metadata(&self) {
        self.send(ClientFrame::GetMetadata);
    }

    fn get_values(&self, request: ValuesRequest) {
        self.send(ClientFrame::GetValues(request));
    }

    fn request_realtime_updates(&self, sensors: SensorSelection) {
        self.send(ClientFrame::RequestRealtimeUpdates { sensors });
    }
}

/// WebSocket client for the sensor stream endpoint.
pub struct StreamClient {
    config: StreamClientConfig,
    codec: JsonCodec,
    event_tx: mpsc::Sender<StreamEvent>,
    commands: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<ClientFrame>>>,
    cancel: CancellationToken,
}

impl StreamClient {
    /// Create a client and its outbound handle.
    #[must_use]
    pub fn new(
        config: StreamClientConfig,
        event_tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, StreamHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            config,
            codec: JsonCodec::new(),
            event_tx,
            commands: parking_lot::Mutex::new(Some(command_rx)),
            cancel,
        });
        (
            client,
            StreamHandle {
                commands: command_tx,
            },
        )
    }

    /// Run the connection loop until cancelled or the attempt budget runs
    /// out.
    ///
    /// # Errors
    ///
    /// [`StreamClientError::AlreadyRunning`] when called twice, or
    /// [`StreamClientError::MaxReconnectAttemptsExceeded`] when reconnection
    /// gives up.
    pub async fn run(self: Arc<Self>) -> Result<(), StreamClientError> {
        let mut commands = self
            .commands
            .lock()
            .take()
            .ok_or(StreamClientError::AlreadyRunning)?;
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("stream client cancelled");
                return Ok(());
            }

            match self.connect_and_run(&mut commands, &mut policy).await {
                Ok(()) => {
                    tracing::info!("stream connection closed gracefully");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stream connection error");
                    let _ = self.event_tx.send(StreamEvent::Closed).await;

                    let Some(delay) = policy.next_delay() else {
                        return Err(StreamClientError::MaxReconnectAttemptsExceeded);
                    };
                    let attempt = policy.attempt_count();
                    tracing::info!(attempt, delay_ms = delay.as_millis(), "reconnecting");
                    let _ = self
                        .event_tx
                        .send(StreamEvent::Reconnecting { attempt })
                        .await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("stream client cancelled during backoff");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn connect_and_run(
        &self,
        commands: &mut mpsc::UnboundedReceiver<ClientFrame>,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), StreamClientError> {
        tracing::info!(url = %self.config.url, "connecting to sensor stream");
        let (ws_stream, _response) = tokio_tungstenite::connect_async(&self.config.url).await?;
        let (mut write, mut read) = ws_stream.split();

        policy.reset();
        let _ = self.event_tx.send(StreamEvent::Open).await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                command = commands.recv() => {
                    let Some(frame) = command else {
                        // every handle dropped; nothing can drive the stream
                        return Ok(());
                    };
                    let json = self.codec.encode(&frame)?;
                    write.send(Message::Text(json.into())).await?;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text).await,
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("endpoint sent close frame");
                            return Err(StreamClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(StreamClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Decode one text message and forward it as an event. A malformed
    /// frame is reported but does not drop the connection.
    async fn handle_text(&self, text: &str) {
        match self.codec.decode(text) {
            Ok(ServerFrame::Metadata(delta)) => {
                let _ = self.event_tx.send(StreamEvent::Metadata(delta)).await;
            }
            Ok(ServerFrame::Update(batch)) => {
                let _ = self.event_tx.send(StreamEvent::Update(batch)).await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "undecodable frame from endpoint");
                let _ = self
                    .event_tx
                    .send(StreamEvent::ProtocolError(err.to_string()))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::resolution::Resolution;

    #[tokio::test]
    async fn handle_queues_frames_for_the_connection_task() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = StreamHandle { commands: tx };

        handle.get_metadata();
        handle.get_values(ValuesRequest::single("d1", "s1", Resolution::Minute, 0, 1));

        assert_eq!(rx.recv().await, Some(ClientFrame::GetMetadata));
        assert!(matches!(rx.recv().await, Some(ClientFrame::GetValues(_))));
    }

    #[tokio::test]
    async fn handle_survives_a_dropped_client() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = StreamHandle { commands: tx };
        drop(rx);
        // must not panic
        handle.get_metadata();
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let (event_tx, _event_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let (client, _handle) = StreamClient::new(
            StreamClientConfig::new("ws://127.0.0.1:1/nowhere"),
            event_tx,
            cancel.clone(),
        );

        // steal the command receiver the way run() would
        assert!(client.commands.lock().take().is_some());

        let err = client.run().await.unwrap_err();
        assert!(matches!(err, StreamClientError::AlreadyRunning));
    }

    #[tokio::test]
    async fn events_flow_from_decoded_frames() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let (client, _handle) = StreamClient::new(
            StreamClientConfig::new("ws://127.0.0.1:1/nowhere"),
            event_tx,
            cancel,
        );

        client
            .handle_text(r#"{"type":"update","resolution":"second","values":{}}"#)
            .await;
        assert!(matches!(event_rx.recv().await, Some(StreamEvent::Update(_))));

        client.handle_text("not json").await;
        assert!(matches!(
            event_rx.recv().await,
            Some(StreamEvent::ProtocolError(_))
        ));
    }
}
