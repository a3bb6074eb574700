// Passphrase encryption: SHA-256(passphrase) + XChaCha20-Poly1305
//
// Flow:
// 1. KDF: SHA-256(passphrase) → 32-byte symmetric key
// 2. Generate a random 24-byte nonce per call
// 3. Encrypt: XChaCha20-Poly1305(key, nonce, plaintext)
// 4. Output: nonce || ciphertext || tag
//
// An absent or empty passphrase selects insecure mode: seal/open pass the
// bytes through unchanged. Every client sharing a relay must agree on the
// passphrase, otherwise their frames are undecryptable to each other.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroize;

/// Length of the random nonce prepended to every sealed frame.
pub const NONCE_LEN: usize = 24;

/// Length of the Poly1305 authentication tag appended by the cipher.
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key material")]
    InvalidKey,
    #[error("Ciphertext too short: {0} bytes (need at least {min})", min = NONCE_LEN + TAG_LEN)]
    Truncated(usize),
    #[error("Encryption failed")]
    EncryptFailed,
    #[error("Decryption failed: invalid ciphertext or wrong passphrase")]
    DecryptFailed,
}

/// Symmetric cipher derived from a shared passphrase.
///
/// Re-keying means building a new `PacketCipher`; frames sealed under the
/// old passphrase can no longer be opened.
pub struct PacketCipher {
    cipher: Option<XChaCha20Poly1305>,
}

impl PacketCipher {
    /// Build a cipher from an optional passphrase.
    ///
    /// `None` and `Some("")` both select insecure (pass-through) mode.
    pub fn new(passphrase: Option<&str>) -> Result<Self, CryptoError> {
        let passphrase = match passphrase {
            Some(p) if !p.is_empty() => p,
            _ => return Ok(Self::insecure()),
        };

        let mut key = derive_key(passphrase);
        let cipher = XChaCha20Poly1305::new_from_slice(&key).map_err(|_| CryptoError::InvalidKey);
        key.zeroize();

        Ok(Self {
            cipher: Some(cipher?),
        })
    }

    /// Pass-through cipher for trusted networks.
    pub fn insecure() -> Self {
        Self { cipher: None }
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let Some(cipher) = &self.cipher else {
            return Ok(plaintext.to_vec());
        };

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptFailed)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a frame produced by [`PacketCipher::seal`].
    ///
    /// Fails closed: no plaintext is returned unless the tag verifies.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let Some(cipher) = &self.cipher else {
            return Ok(sealed.to_vec());
        };

        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Truncated(sealed.len()));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = XNonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

impl std::fmt::Debug for PacketCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketCipher")
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}

/// Derive the 32-byte symmetric key from the passphrase.
fn derive_key(passphrase: &str) -> [u8; 32] {
    let mut digest = Sha256::digest(passphrase.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    digest.as_mut_slice().zeroize();
    key
}
