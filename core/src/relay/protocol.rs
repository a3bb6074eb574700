//! Relay wire protocol — websocket framing shared by server and client
//!
//! The transport is a websocket: the client opens it with an HTTP upgrade
//! request optionally carrying its display name in the [`CLIENT_NAME_HEADER`]
//! header. After the upgrade every binary message is exactly one encoded
//! packet; other message types are ignored by both sides.
//!
//! Both ends use [`websocket_config`], so the transport accepts every frame
//! the codec is willing to produce.

use crate::message::MAX_FRAME_SIZE;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;

/// Upgrade-request header carrying the client's display name.
pub const CLIENT_NAME_HEADER: &str = "client-name";

/// Default relay listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:6679";

/// One opaque wire frame. Shared between every recipient of a broadcast.
pub type Frame = Arc<[u8]>;

/// Websocket limits shared by the relay and its clients: one message (and
/// one frame, since messages are not fragmented) may carry up to
/// [`MAX_FRAME_SIZE`] bytes.
pub fn websocket_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_FRAME_SIZE);
    config.max_frame_size = Some(MAX_FRAME_SIZE);
    config
}

/// Extract the frame carried by a websocket message, if it is binary.
pub fn binary_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Binary(data) => Some(Frame::from(data)),
        _ => None,
    }
}

/// Build the websocket message for an outbound frame.
pub fn frame_message(frame: &[u8]) -> Message {
    Message::Binary(frame.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_binary_messages_carry_frames() {
        let frame = binary_frame(Message::Binary(vec![1, 2, 3])).unwrap();
        assert_eq!(&frame[..], &[1, 2, 3]);

        assert!(binary_frame(Message::Text("hello".into())).is_none());
        assert!(binary_frame(Message::Ping(vec![1])).is_none());
        assert!(binary_frame(Message::Close(None)).is_none());
    }

    #[test]
    fn test_websocket_config_admits_codec_frames() {
        let config = websocket_config();
        assert_eq!(config.max_message_size, Some(MAX_FRAME_SIZE));
        assert_eq!(config.max_frame_size, Some(MAX_FRAME_SIZE));
        assert!(MAX_FRAME_SIZE > 16 << 20);
    }

    #[test]
    fn test_frame_message_is_binary() {
        assert_eq!(frame_message(&[9, 8]), Message::Binary(vec![9, 8]));
    }
}
