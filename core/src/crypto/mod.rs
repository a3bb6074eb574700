// Cryptography module — passphrase-keyed frame encryption

pub mod encrypt;

pub use encrypt::{CryptoError, PacketCipher, NONCE_LEN, TAG_LEN};
