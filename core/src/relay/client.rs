//! Relay Client — multiplexes every handler over one relay connection
//!
//! The client owns one websocket to the relay at a time. Per connection it
//! spawns a read task that decodes inbound frames and dispatches them to
//! handlers; its own task waits on whichever comes first, a packet from any
//! handler's producer (encoded and sent) or the read task ending (the
//! connection is dropped and redialed). Producer tasks are started once and
//! survive reconnects.

use super::protocol::{binary_frame, frame_message, websocket_config, CLIENT_NAME_HEADER};
use crate::handler::{HandlerContext, HandlerError, Handlers, History, Producers};
use crate::message::{human_size, CodecError, Packet, PacketCodec};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Relay client configuration
#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    /// Relay websocket URL, e.g. `ws://127.0.0.1:6679/`
    pub url: String,
    /// Display name sent to the relay; the relay falls back to our address
    pub name: Option<String>,
    /// First retry delay after a failed dial
    pub retry_min: Duration,
    /// Upper bound on the retry delay
    pub retry_max: Duration,
    /// Added to the retry delay after every consecutive failure
    pub retry_step: Duration,
    /// Time allowed for one dial (TCP connect + upgrade)
    pub connect_timeout: Duration,
    /// Capacity of each handler's producer channel
    pub producer_buffer: usize,
    /// Transport limits; must admit every frame the codec produces
    pub websocket: WebSocketConfig,
}

impl Default for RelayClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            name: None,
            retry_min: Duration::from_secs(3),
            retry_max: Duration::from_secs(20),
            retry_step: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            producer_buffer: crate::handler::registry::PRODUCER_BUFFER,
            websocket: websocket_config(),
        }
    }
}

/// Relay client error types
#[derive(Debug, Error)]
pub enum RelayClientError {
    #[error("Invalid relay URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("Invalid client name {0:?}")]
    InvalidName(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] tungstenite::Error),
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),
}

/// Why one inbound frame was not delivered to a handler.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to decode packet from server: {0}")]
    Codec(#[from] CodecError),
    #[error("recv an invalid packet without type")]
    MissingType,
    #[error("recv an invalid packet with an unknown type {0:?}")]
    UnknownType(String),
    #[error("handler {kind:?} failed to handle packet: {source}")]
    Handler {
        kind: String,
        #[source]
        source: HandlerError,
    },
}

/// Linear retry delay: `min`, `min + step`, … capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    step: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, step: Duration) -> Self {
        let min = min.min(max);
        Self {
            min,
            max,
            step,
            current: min,
        }
    }

    pub fn from_config(config: &RelayClientConfig) -> Self {
        Self::new(config.retry_min, config.retry_max, config.retry_step)
    }

    /// Delay to wait before the next attempt; grows for the one after.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_add(self.step).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Client-side multiplexer between local handlers and the relay.
pub struct RelayClient {
    config: RelayClientConfig,
    codec: Arc<PacketCodec>,
    handlers: Handlers,
    history: Arc<History>,
}

impl RelayClient {
    /// Create a client. Fails if the URL or name cannot form a valid
    /// upgrade request.
    pub fn new(
        config: RelayClientConfig,
        codec: Arc<PacketCodec>,
        handlers: Handlers,
        history: Arc<History>,
    ) -> Result<Self, RelayClientError> {
        let client = Self {
            config,
            codec,
            handlers,
            history,
        };
        client.request()?;
        Ok(client)
    }

    pub fn config(&self) -> &RelayClientConfig {
        &self.config
    }

    /// Build the upgrade request for one dial.
    pub fn request(&self) -> Result<Request, RelayClientError> {
        let mut request = self.config.url.as_str().into_client_request().map_err(|source| {
            RelayClientError::InvalidUrl {
                url: self.config.url.clone(),
                source,
            }
        })?;

        if let Some(name) = self.config.name.as_deref().filter(|n| !n.is_empty()) {
            let value = HeaderValue::from_str(name)
                .map_err(|_| RelayClientError::InvalidName(name.to_string()))?;
            request.headers_mut().insert(CLIENT_NAME_HEADER, value);
        }

        Ok(request)
    }

    /// Run forever: start the producers, then keep a connection alive and
    /// shuttle packets across it.
    pub async fn run(self) {
        let mut producers = self.handlers.spawn_producers(self.config.producer_buffer);
        info!(handlers = ?self.handlers.names(), "handler producers started");

        let mut backoff = Backoff::from_config(&self.config);
        loop {
            let ws = self.dial(&mut backoff).await;
            self.serve(ws, &mut producers).await;
            warn!("connection to server lost, reconnecting");
        }
    }

    /// Drive one connection until its read task ends.
    async fn serve(&self, ws: WsStream, producers: &mut Producers) {
        let (mut sink, stream) = ws.split();
        let mut reader = tokio::spawn(read_loop(
            stream,
            Arc::clone(&self.codec),
            self.handlers.clone(),
            Arc::clone(&self.history),
        ));

        loop {
            tokio::select! {
                _ = &mut reader => return,
                Some((name, packet)) = producers.next() => {
                    self.send(&mut sink, name, packet).await;
                }
            }
        }
    }

    /// Stamp, encode and write one produced packet. Failures are logged and
    /// never end the connection.
    async fn send(
        &self,
        sink: &mut SplitSink<WsStream, Message>,
        handler: String,
        packet: Packet,
    ) {
        let packet = packet.with_kind(handler);
        let frame = match self.codec.encode(&packet) {
            Ok(frame) => frame,
            Err(e) => {
                error!(handler = %packet.kind, "failed to encode packet: {}", e);
                return;
            }
        };

        if let Err(e) = sink.send(frame_message(&frame)).await {
            error!(handler = %packet.kind, "failed to send data to server: {}", e);
            return;
        }
        info!(
            handler = %packet.kind,
            "send {} data to server, meta: {}",
            human_size(packet.data.len()),
            packet.metadata_lossy()
        );
    }

    /// Dial until it works, sleeping per `backoff` between attempts.
    async fn dial(&self, backoff: &mut Backoff) -> WsStream {
        loop {
            match self.connect().await {
                Ok(ws) => {
                    backoff.reset();
                    info!(url = %self.config.url, "connected to server");
                    return ws;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    error!(
                        "failed to dial server: {}, we will retry in {}s",
                        e,
                        delay.as_secs_f32()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn connect(&self) -> Result<WsStream, RelayClientError> {
        let request = self.request()?;
        let timeout = self.config.connect_timeout;
        let connecting = connect_async_with_config(request, Some(self.config.websocket), true);
        let (ws, _response) = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| RelayClientError::Timeout(timeout))?
            .map_err(RelayClientError::ConnectionFailed)?;
        Ok(ws)
    }
}

/// Read frames until the connection fails, dispatching each one.
async fn read_loop(
    mut stream: SplitStream<WsStream>,
    codec: Arc<PacketCodec>,
    handlers: Handlers,
    history: Arc<History>,
) {
    info!("begin to recv message");
    while let Some(result) = stream.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                error!("failed to recv message from server: {}", e);
                return;
            }
        };
        if message.is_close() {
            info!("server closed the connection");
            return;
        }
        let Some(frame) = binary_frame(message) else {
            continue;
        };

        match dispatch(&frame, &codec, &handlers, &history) {
            Ok(()) => {}
            Err(e @ (DispatchError::MissingType | DispatchError::UnknownType(_))) => {
                warn!("{}, discarded it", e);
            }
            Err(e) => error!("{}", e),
        }
    }
    error!("connection closed by server");
}

/// Decode one inbound frame and hand it to the handler named in it.
pub fn dispatch(
    frame: &[u8],
    codec: &PacketCodec,
    handlers: &Handlers,
    history: &History,
) -> Result<(), DispatchError> {
    let packet = codec.decode(frame)?;
    if packet.kind.is_empty() {
        return Err(DispatchError::MissingType);
    }
    let handler = handlers
        .get(&packet.kind)
        .ok_or_else(|| DispatchError::UnknownType(packet.kind.clone()))?;

    let span = tracing::info_span!("handler", handler = %packet.kind);
    span.in_scope(|| {
        info!(
            "recv {} data from server, meta: {}",
            human_size(packet.data.len()),
            packet.metadata_lossy()
        );
        let ctx = HandlerContext {
            span: &span,
            history,
            packet: &packet,
        };
        handler.consume(&ctx)
    })
    .map_err(|source| DispatchError::Handler {
        kind: packet.kind.clone(),
        source,
    })
}

// ============================================================================
// TESTS
// ============================================================================
