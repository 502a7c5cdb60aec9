use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use thiserror::Error;

/// Sealed token layout: `version ‖ nonce ‖ ciphertext+tag`, encoded
/// URL-safe without padding because the token rides in a query string.
const VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum SealError {
    #[error("sealing key must decode to {KEY_LEN} bytes")]
    InvalidKey,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("token is not a valid sealed envelope")]
    InvalidToken,
}

/// AEAD sealer for ticket payloads. The authentication tag makes
/// tampering detectable; a fresh random nonce per ticket makes two
/// tickets for the same subject different on the wire.
pub struct TicketSealer {
    cipher: ChaCha20Poly1305,
}

impl TicketSealer {
    /// Build from the base64-encoded 256-bit key in configuration.
    pub fn new(key_base64: &str) -> Result<Self, SealError> {
        let bytes = STANDARD
            .decode(key_base64.trim())
            .map_err(|_| SealError::InvalidKey)?;
        if bytes.len() != KEY_LEN {
            return Err(SealError::InvalidKey);
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(Self::from_key(&key))
    }

    pub fn from_key(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Generate a fresh key, base64-encoded for configuration files.
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_LEN];
        chacha20poly1305::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut key);
        STANDARD.encode(key)
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<String, SealError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        chacha20poly1305::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| SealError::EncryptionFailed)?;

        let mut envelope = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        envelope.push(VERSION);
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(envelope))
    }

    pub fn open(&self, token: &str) -> Result<Vec<u8>, SealError> {
        let envelope = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| SealError::InvalidToken)?;

        // version byte + nonce + at least the 16-byte tag
        if envelope.len() < 1 + NONCE_LEN + 16 || envelope[0] != VERSION {
            return Err(SealError::InvalidToken);
        }

        let (nonce_bytes, ciphertext) = envelope[1..].split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| SealError::InvalidToken)
    }
}
