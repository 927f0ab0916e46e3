//! Field-level encryption for change records.
//!
//! Every non-null property value leaving this device is serialized to CBOR and
//! sealed with AES-256-GCM before it is queued.
//!
//! ## Envelope
//!
//! `scheme (1 byte) || nonce (12 bytes) || ciphertext || tag (16 bytes)`
//!
//! The scheme byte lets data sealed under a user-supplied key coexist with
//! data sealed under the derived v1 key. The field's [`TypeTag`] is bound as
//! associated data, so a swapped tag fails authentication.
//!
//! ## Errors
//!
//! Malformed envelopes (empty, unknown scheme, truncated, undecodable payload,
//! tag mismatch) are [`CryptoError::Decode`]; failed authentication is
//! [`CryptoError::Integrity`]. Callers skip the affected field either way.
//!
//! ## Usage
//!
//! ```ignore
//! use tidesync_core::crypto::{FieldCipher, KeyMaterial};
//!
//! let material = KeyMaterial::new("app-key", "account-key", device_id);
//! let cipher = FieldCipher::new(&material)?;
//!
//! let field = cipher.encrypt_value(TypeTag::Text, &FieldValue::from("Ann"))?;
//! assert_eq!(cipher.decrypt_value(&field)?, FieldValue::from("Ann"));
//! ```
//!
//! [`TypeTag`]: tidesync_protocol::TypeTag

mod cipher;
mod error;
mod key;

pub use cipher::{decrypt, encrypt, FieldCipher, NONCE_SIZE, SCHEME_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{EncryptionKey, EncryptionScheme, KeyMaterial, KEY_SIZE};
