// Packet codec — bincode serialization wrapped in passphrase encryption

use super::types::Packet;
use crate::crypto::{CryptoError, PacketCipher};
use thiserror::Error;

/// Maximum accepted frame size: 64 MiB. The relay transport is configured
/// with the same cap (see `relay::protocol::websocket_config`), so anything
/// `encode` accepts can cross the relay.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max {max})", max = MAX_FRAME_SIZE)]
    TooLarge(usize),
    #[error("Failed to serialize packet: {0}")]
    Serialize(#[source] bincode::Error),
    #[error("Malformed packet: {0}")]
    Deserialize(#[source] bincode::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Turns packets into wire frames and back.
///
/// One codec is built at startup from the configured passphrase and shared
/// by reference between the send path and the read task.
#[derive(Debug)]
pub struct PacketCodec {
    cipher: PacketCipher,
}

impl PacketCodec {
    /// Build a codec for the given passphrase (`None`/empty ⇒ unencrypted).
    pub fn new(passphrase: Option<&str>) -> Result<Self, CodecError> {
        Ok(Self {
            cipher: PacketCipher::new(passphrase)?,
        })
    }

    pub fn with_cipher(cipher: PacketCipher) -> Self {
        Self { cipher }
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_encrypted()
    }

    /// Serialize (type, metadata, data) and seal the result.
    pub fn encode(&self, packet: &Packet) -> Result<Vec<u8>, CodecError> {
        let plain = bincode::serialize(packet).map_err(CodecError::Serialize)?;
        let frame = self.cipher.seal(&plain)?;

        if frame.len() > MAX_FRAME_SIZE {
            return Err(CodecError::TooLarge(frame.len()));
        }

        Ok(frame)
    }

    /// Open a frame and deserialize the packet inside it.
    pub fn decode(&self, frame: &[u8]) -> Result<Packet, CodecError> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(CodecError::TooLarge(frame.len()));
        }

        let plain = self.cipher.open(frame)?;
        bincode::deserialize(&plain).map_err(CodecError::Deserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip() -> Packet {
        Packet::new("text", "hello").with_kind("clip")
    }

    #[test]
    fn test_packet_roundtrip_encrypted() {
        let codec = PacketCodec::new(Some("secret")).unwrap();
        assert!(codec.is_encrypted());

        let frame = codec.encode(&clip()).unwrap();
        assert_eq!(codec.decode(&frame).unwrap(), clip());
    }

    #[test]
    fn test_insecure_frame_is_plain_bincode() {
        let codec = PacketCodec::new(None).unwrap();
        let frame = codec.encode(&clip()).unwrap();

        assert_eq!(frame, bincode::serialize(&clip()).unwrap());
        assert_eq!(codec.decode(&frame).unwrap(), clip());
    }

    #[test]
    fn test_unstamped_packet_survives_encoding() {
        let codec = PacketCodec::new(Some("k")).unwrap();
        let packet = Packet::new("", "");
        let frame = codec.encode(&packet).unwrap();
        assert!(codec.decode(&frame).unwrap().kind.is_empty());
    }

    #[test]
    fn test_garbage_rejected() {
        let codec = PacketCodec::new(None).unwrap();
        assert!(matches!(
            codec.decode(&[0xFF; 3]),
            Err(CodecError::Deserialize(_))
        ));

        let codec = PacketCodec::new(Some("k")).unwrap();
        assert!(matches!(
            codec.decode(&[0u8; 8]),
            Err(CodecError::Crypto(CryptoError::Truncated(8)))
        ));
    }

    #[test]
    fn test_reject_oversized_decode() {
        let codec = PacketCodec::new(None).unwrap();
        let big = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(matches!(codec.decode(&big), Err(CodecError::TooLarge(_))));
    }

    #[test]
    fn test_rekey_invalidates_old_frames() {
        let old = PacketCodec::new(Some("group-a")).unwrap();
        let frame = old.encode(&clip()).unwrap();

        let new = PacketCodec::new(Some("group-b")).unwrap();
        assert!(matches!(
            new.decode(&frame),
            Err(CodecError::Crypto(CryptoError::DecryptFailed))
        ));
    }
}
