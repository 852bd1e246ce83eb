use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    /// Authentication tag mismatch: wrong key, wrong associated data or
    /// tampered ciphertext. Deliberately carries no detail.
    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Unsupported key version {version}, only version {supported} is supported")]
    UnsupportedKeyVersion { version: u32, supported: u32 },

    #[error("Invalid encrypted data format: {0}")]
    InvalidFormat(String),

    #[error("Invalid nonce length: {0}")]
    InvalidNonce(usize),

    #[error("Invalid UTF-8 in decrypted data")]
    InvalidUtf8,
}

pub type CryptoResult<T> = Result<T, CryptoError>;
