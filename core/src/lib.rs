// relayshare core — share local state between machines through a relay
//
// Clients connect to one relay, which copies every frame to every other
// client. Handlers on each client produce packets from local resources and
// consume the packets other clients send. Everything on the wire is sealed
// with a key derived from a shared passphrase.

pub mod crypto;
pub mod handler;
pub mod message;
pub mod relay;

pub use crypto::{CryptoError, PacketCipher};
pub use handler::{
    Handler, HandlerContext, HandlerError, HandlerRegistry, Handlers, History, RegistryError,
};
pub use message::{human_size, CodecError, Packet, PacketCodec, MAX_FRAME_SIZE};
pub use relay::{
    dispatch, Backoff, DispatchError, Distributor, RelayClient, RelayClientConfig,
    RelayClientError, RelayError, RelayServer, RelayServerConfig, RelayStats,
};
