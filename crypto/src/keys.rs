//! Key and token generation.
//!
//! Share keys are handed to people (pasted into messages, rendered as QR
//! codes), so they are encoded as URL-safe base64 without padding. Decoding
//! tolerates surrounding whitespace but nothing else.

use crate::aes_gcm::{Aes256GcmEncryptor, KEY_LEN};
use crate::error::{CryptoError, CryptoResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric key protecting one share envelope.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ShareKey([u8; KEY_LEN]);

impl ShareKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        Self(KeyGenerator::generate_aes256_key())
    }

    /// Parse the textual form produced by [`ShareKey::encode`]
    pub fn decode(encoded: &str) -> CryptoResult<Self> {
        let mut bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::InvalidKey("not URL-safe base64".to_string()))?;

        let result = <[u8; KEY_LEN]>::try_from(bytes.as_slice())
            .map(Self)
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                got: bytes.len(),
            });
        bytes.zeroize();
        result
    }

    /// Textual form for out-of-band transmission
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Build the encryptor for this key
    pub fn encryptor(&self) -> CryptoResult<Aes256GcmEncryptor> {
        Aes256GcmEncryptor::new(self.0)
    }
}

impl fmt::Debug for ShareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ShareKey(<redacted>)")
    }
}

/// Secure key generation utilities
pub struct KeyGenerator;

impl KeyGenerator {
    /// Generate a cryptographically secure random key
    pub fn generate_aes256_key() -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Random opaque identifier of `bytes` bytes of entropy, URL-safe encoded
    pub fn random_token(bytes: usize) -> String {
        let mut buf = vec![0u8; bytes];
        OsRng.fill_bytes(&mut buf);
        URL_SAFE_NO_PAD.encode(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::Encryptor;

    #[test]
    fn test_key_generation() {
        let key1 = KeyGenerator::generate_aes256_key();
        let key2 = KeyGenerator::generate_aes256_key();

        assert_ne!(key1, key2);
    }

    #[test]
    fn test_share_key_text_form() {
        let key = ShareKey::generate();
        let encoded = key.encode();

        // 32 bytes -> 43 chars without padding
        assert_eq!(encoded.len(), 43);
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));

        let decoded = ShareKey::decode(&format!("  {encoded}\n")).unwrap();
        assert_eq!(decoded.encode(), encoded);
    }

    #[test]
    fn test_share_key_rejects_garbage() {
        assert!(matches!(
            ShareKey::decode("definitely not a key!"),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(matches!(
            ShareKey::decode("c2hvcnQ"),
            Err(CryptoError::InvalidKeyLength { expected: 32, got: 5 })
        ));
    }

    #[test]
    fn test_share_key_encryptor_roundtrip() {
        let key = ShareKey::generate();
        let sealed = key.encryptor().unwrap().encrypt(b"payload", b"aad").unwrap();

        let same = ShareKey::decode(&key.encode()).unwrap();
        let opened = same.encryptor().unwrap().decrypt(&sealed, b"aad").unwrap();
        assert_eq!(opened, b"payload");
    }

    #[test]
    fn test_debug_redacts() {
        let key = ShareKey::generate();
        assert_eq!(format!("{key:?}"), "ShareKey(<redacted>)");
    }

    #[test]
    fn test_random_token() {
        let a = KeyGenerator::random_token(16);
        let b = KeyGenerator::random_token(16);
        assert_ne!(a, b);
        assert_eq!(a.len(), 22);
    }
}
