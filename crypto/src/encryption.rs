use crate::error::CryptoError;

/// Result type for encryption operations
pub type EncryptionResult<T> = Result<T, CryptoError>;

/// Authenticated encryption of opaque payloads.
///
/// `aad` is authenticated but not encrypted; decryption fails unless the
/// same bytes are supplied again.
pub trait Encryptor: Send + Sync {
    /// Encrypt data into the implementation's text-safe sealed form
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> EncryptionResult<String>;

    /// Decrypt data produced by [`Encryptor::encrypt`]
    fn decrypt(&self, sealed: &str, aad: &[u8]) -> EncryptionResult<Vec<u8>>;

    /// Get the encryption algorithm name
    fn algorithm(&self) -> &str;
}
