//! Handlers — pluggable producers/consumers of packets
//!
//! A handler watches some local resource and emits packets whenever it has
//! new data (`produce`), and applies packets received from other clients to
//! its local sink (`consume`). Handlers are looked up by name: the name a
//! handler is registered under is stamped into every packet it produces, and
//! inbound packets are routed back to the handler of the same name.

pub mod history;
pub mod registry;

pub use history::History;
pub use registry::{HandlerBuilder, HandlerRegistry, Handlers, Producers, RegistryError};

use crate::message::Packet;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Received empty data")]
    EmptyData,
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Handler backend unavailable: {0}")]
    Unavailable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// Everything a handler sees while consuming one inbound packet.
pub struct HandlerContext<'a> {
    /// Span tagged with the handler name; consume already runs inside it.
    pub span: &'a tracing::Span,
    /// Shared, append-only activity log
    pub history: &'a History,
    /// The packet being delivered
    pub packet: &'a Packet,
}

/// Producer/consumer capability implemented by every handler.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Watch the local resource and push packets into `sink` for as long as
    /// the process lives. Packets are sent unstamped; the multiplexer fills
    /// in `kind`. Returns only if the sink closes or the watch fails.
    async fn produce(&self, sink: mpsc::Sender<Packet>);

    /// Apply one inbound packet locally.
    fn consume(&self, ctx: &HandlerContext<'_>) -> Result<(), HandlerError>;
}
