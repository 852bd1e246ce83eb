use crate::encryption::{EncryptionResult, Encryptor};
use crate::error::CryptoError;
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use zeroize::ZeroizeOnDrop;

/// Length of an AES-256 key in bytes
pub const KEY_LEN: usize = 32;

/// Length of a GCM nonce in bytes (96 bits)
pub const NONCE_LEN: usize = 12;

/// AES-256-GCM encryptor with memory security
///
/// This implementation provides:
/// - AES-256 in Galois/Counter Mode
/// - 96-bit random nonces, one per message
/// - Authentication tags covering ciphertext and associated data
/// - Memory zeroization on drop
#[derive(ZeroizeOnDrop)]
pub struct Aes256GcmEncryptor {
    #[zeroize(skip)]
    cipher: Aes256Gcm,
    /// Raw key, zeroized on drop
    key: [u8; KEY_LEN],
    /// Key version written into every sealed payload
    #[zeroize(skip)]
    key_version: u32,
}

impl Aes256GcmEncryptor {
    /// Create a new encryptor with a 32-byte key
    pub fn new(key: [u8; KEY_LEN]) -> EncryptionResult<Self> {
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| CryptoError::InvalidKey("rejected by AES-256-GCM".to_string()))?;

        Ok(Self {
            cipher,
            key,
            key_version: 1,
        })
    }

    /// Create from a key slice, checking its length
    pub fn from_slice(key: &[u8]) -> EncryptionResult<Self> {
        let key: [u8; KEY_LEN] = key.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            got: key.len(),
        })?;
        Self::new(key)
    }

    /// Create with specific key version
    pub fn with_version(mut self, version: u32) -> Self {
        self.key_version = version;
        self
    }

    /// Get the current key version
    pub fn version(&self) -> u32 {
        self.key_version
    }

    /// Encrypt with versioned format: "v{version}:{nonce_b64}:{ciphertext_b64}"
    fn encrypt_versioned(&self, plaintext: &[u8], aad: &[u8]) -> EncryptionResult<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok(format!(
            "v{}:{}:{}",
            self.key_version,
            BASE64.encode(nonce_bytes),
            BASE64.encode(&ciphertext)
        ))
    }

    /// Decrypt with versioned format
    fn decrypt_versioned(&self, encrypted: &str, aad: &[u8]) -> EncryptionResult<Vec<u8>> {
        let mut parts = encrypted.split(':');
        let (Some(version), Some(nonce_b64), Some(ciphertext_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::InvalidFormat(
                "expected v{version}:{nonce}:{ciphertext}".to_string(),
            ));
        };

        let version = version
            .strip_prefix('v')
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| CryptoError::InvalidFormat("bad version tag".to_string()))?;

        if version != self.key_version {
            return Err(CryptoError::UnsupportedKeyVersion {
                version,
                supported: self.key_version,
            });
        }

        let nonce_bytes = BASE64
            .decode(nonce_b64)
            .map_err(|_| CryptoError::InvalidFormat("nonce is not base64".to_string()))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(CryptoError::InvalidNonce(nonce_bytes.len()));
        }
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = BASE64
            .decode(ciphertext_b64)
            .map_err(|_| CryptoError::InvalidFormat("ciphertext is not base64".to_string()))?;

        self.cipher
            .decrypt(nonce, Payload { msg: ciphertext.as_ref(), aad })
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl Encryptor for Aes256GcmEncryptor {
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> EncryptionResult<String> {
        self.encrypt_versioned(plaintext, aad)
    }

    fn decrypt(&self, sealed: &str, aad: &[u8]) -> EncryptionResult<Vec<u8>> {
        self.decrypt_versioned(sealed, aad)
    }

    fn algorithm(&self) -> &str {
        "AES-256-GCM"
    }
}

/// Helpers for string payloads
impl Aes256GcmEncryptor {
    pub fn encrypt_string(&self, plaintext: &str, aad: &[u8]) -> EncryptionResult<String> {
        self.encrypt_versioned(plaintext.as_bytes(), aad)
    }

    pub fn decrypt_string(&self, encrypted: &str, aad: &[u8]) -> EncryptionResult<String> {
        let plaintext_bytes = self.decrypt_versioned(encrypted, aad)?;
        String::from_utf8(plaintext_bytes).map_err(|_| CryptoError::InvalidUtf8)
    }
}
