// Message module — packet type and wire codec

pub mod codec;
pub mod types;

pub use codec::{CodecError, PacketCodec, MAX_FRAME_SIZE};
pub use types::{human_size, Packet};
