//! Cryptographic utilities for FieldRisk share envelopes
//!
//! Provides:
//! - Random 256-bit share keys with a text form safe for messages and QR codes
//! - AES-256-GCM sealing with associated data, in a versioned text format
//! - Random opaque tokens for store-assigned identifiers
//!
//! Key material is zeroized on drop and never printed by `Debug`.
//!
//! # Example
//!
//! ```rust
//! use crypto::{Encryptor, ShareKey};
//!
//! let key = ShareKey::generate();
//! let sealed = key.encryptor()?.encrypt(b"assessment", b"expiry")?;
//!
//! let received = ShareKey::decode(&key.encode())?;
//! let opened = received.encryptor()?.decrypt(&sealed, b"expiry")?;
//! assert_eq!(opened, b"assessment");
//! # Ok::<(), crypto::CryptoError>(())
//! ```

pub mod aes_gcm;
pub mod encryption;
pub mod error;
pub mod keys;

pub use aes_gcm::Aes256GcmEncryptor;
pub use encryption::{EncryptionResult, Encryptor};
pub use error::{CryptoError, CryptoResult};
pub use keys::{KeyGenerator, ShareKey};
