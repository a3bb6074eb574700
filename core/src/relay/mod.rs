//! Relay — websocket broker and the client that multiplexes handlers over it
//!
//! The relay keeps no state beyond the set of connected clients: every
//! binary frame a client sends is copied to every other client. Frames are
//! opaque here; only clients holding the shared passphrase can read them.

pub mod client;
pub mod distributor;
pub mod protocol;
pub mod server;
pub mod session;

pub use client::{dispatch, Backoff, DispatchError, RelayClient, RelayClientConfig, RelayClientError};
pub use distributor::{Distributor, RelayStats, CLIENT_CHANNEL_CAPACITY};
pub use protocol::{Frame, CLIENT_NAME_HEADER, DEFAULT_LISTEN_ADDR};
pub use server::{RelayError, RelayServer, RelayServerConfig};
pub use session::serve_connection;
