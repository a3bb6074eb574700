//! Connection session — one accepted websocket client on the relay
//!
//! The session upgrades the stream, registers the client with the
//! [`Distributor`], then runs two loops: the read loop (this task) forwards
//! every binary frame to `broadcast`, the write loop (a spawned task) drains
//! the client's channel into the socket. Teardown happens once, when the read
//! loop ends: deregister, tell the writer to stop, and let it finish the
//! close handshake (bounded by [`CLOSE_TIMEOUT`]).
//! Deregistration is tied to a guard value, so it also happens if the
//! session task is aborted.

use super::distributor::Distributor;
use super::protocol::{binary_frame, frame_message, websocket_config, Frame, CLIENT_NAME_HEADER};
use super::server::RelayError;
use crate::message::human_size;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tracing::{debug, error, info, warn, Instrument};

/// How long the writer gets to send the closing handshake.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Serve one accepted connection until the client goes away.
///
/// Returns an error only when the websocket upgrade itself fails; once the
/// client is registered, every exit path is a normal disconnect.
pub async fn serve_connection<S>(
    stream: S,
    addr: SocketAddr,
    distributor: Arc<Distributor>,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut requested: Option<String> = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        requested = request
            .headers()
            .get(CLIENT_NAME_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned);
        Ok(response)
    };
    let ws = accept_hdr_async_with_config(stream, callback, Some(websocket_config()))
        .await
        .map_err(|e| RelayError::Handshake(addr, e))?;

    let addr_str = addr.to_string();
    let requested = requested.unwrap_or_else(|| {
        warn!(addr = %addr_str, "client does not have a name, use remote addr");
        addr_str.clone()
    });

    let (name, outbound) = distributor.register(&requested);
    let span = if name == addr_str {
        tracing::info_span!("session", client = %name)
    } else {
        tracing::info_span!("session", client = %name, addr = %addr_str)
    };

    let registration = Registration { name, distributor };
    run_session(ws, registration, outbound)
        .instrument(span)
        .await;
    Ok(())
}

/// Deregisters the client when dropped, so every way out of a session
/// (including a panic or an aborted task) releases the name exactly once.
struct Registration {
    name: String,
    distributor: Arc<Distributor>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.distributor.deregister(&self.name);
        debug!(client = %self.name, "client deregistered");
    }
}

async fn run_session<S>(
    ws: WebSocketStream<S>,
    registration: Registration,
    outbound: mpsc::Receiver<Frame>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    info!("new client connected to server");

    let (sink, mut stream) = ws.split();
    let (stop, stopped) = oneshot::channel();
    let mut writer = tokio::spawn(write_loop(sink, outbound, stopped).in_current_span());

    loop {
        match stream.next().await {
            Some(Ok(Message::Close(_))) | None => {
                info!("connection closed");
                break;
            }
            Some(Ok(message)) => {
                let Some(frame) = binary_frame(message) else {
                    continue;
                };
                debug!(size = %human_size(frame.len()), "recv data");
                let delivered = registration
                    .distributor
                    .broadcast(&registration.name, frame);
                debug!(delivered, "frame broadcast");
            }
            Some(Err(e)) => {
                error!("failed to read message from client: {}", e);
                break;
            }
        }
    }

    drop(registration);
    let _ = stop.send(());
    if tokio::time::timeout(CLOSE_TIMEOUT, &mut writer).await.is_err() {
        warn!("writer did not finish closing in time, aborting it");
        writer.abort();
        let _ = writer.await;
    }
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::Receiver<Frame>,
    mut stop: oneshot::Receiver<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = &mut stop => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(e) = sink.send(frame_message(&frame)).await {
            error!("failed to write message: {}", e);
            continue;
        }
        debug!(size = %human_size(frame.len()), "send data");
    }

    // Flushes the close reply queued when the client's Close was read, or
    // starts the handshake when the read side failed.
    if let Err(e) = sink.close().await {
        debug!("failed to close connection: {}", e);
    }
}
