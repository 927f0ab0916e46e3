//! Key material and encryption schemes.

use super::error::{CryptoError, CryptoResult};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use tidesync_protocol::DeviceId;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// HKDF info string for the v1 field key.
const V1_INFO: &[u8] = b"tidesync-field-key-v1";

/// Encryption scheme, written as the first byte of every sealed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionScheme {
    /// AES-256-GCM under a key derived from the application and account keys.
    Aes256V1,
    /// AES-256-GCM under a caller-supplied key.
    UserSupplied,
}

impl EncryptionScheme {
    /// Converts to the scheme byte.
    pub fn to_code(self) -> u8 {
        match self {
            EncryptionScheme::Aes256V1 => 1,
            EncryptionScheme::UserSupplied => 2,
        }
    }

    /// Converts from the scheme byte.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(EncryptionScheme::Aes256V1),
            2 => Some(EncryptionScheme::UserSupplied),
            _ => None,
        }
    }
}

/// Encryption key for AES-256-GCM.
///
/// The key is automatically zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random encryption key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::invalid_key_size(bytes.len(), KEY_SIZE));
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the key as a byte slice.
    ///
    /// # Security
    ///
    /// Don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Derives the v1 field key with HKDF-SHA256.
    ///
    /// The account key is the input key material and the application key is
    /// the salt, so two applications sharing an account never share keys.
    pub fn derive_v1(application_key: &str, account_key: &str) -> CryptoResult<Self> {
        let hk = Hkdf::<Sha256>::new(Some(application_key.as_bytes()), account_key.as_bytes());

        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(V1_INFO, &mut bytes)
            .map_err(|_| CryptoError::key_derivation_failed("HKDF expand failed"))?;

        Ok(Self { bytes })
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Identity and key material supplied once at initialization.
///
/// Immutable for the lifetime of the engine. Secrets are zeroized on drop.
#[derive(Clone)]
pub struct KeyMaterial {
    application_key: String,
    account_key: String,
    device_id: DeviceId,
    user_key: Option<EncryptionKey>,
}

impl KeyMaterial {
    /// Creates key material using the [`EncryptionScheme::Aes256V1`] scheme.
    pub fn new(
        application_key: impl Into<String>,
        account_key: impl Into<String>,
        device_id: DeviceId,
    ) -> Self {
        Self {
            application_key: application_key.into(),
            account_key: account_key.into(),
            device_id,
            user_key: None,
        }
    }

    /// Switches new encryptions to [`EncryptionScheme::UserSupplied`] with `key`.
    ///
    /// Fields sealed under the v1 key stay readable.
    #[must_use]
    pub fn with_user_key(mut self, key: EncryptionKey) -> Self {
        self.user_key = Some(key);
        self
    }

    /// Returns the application key.
    pub fn application_key(&self) -> &str {
        &self.application_key
    }

    /// Returns the account key.
    pub fn account_key(&self) -> &str {
        &self.account_key
    }

    /// Returns the device id.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Returns the user-supplied key, if any.
    pub fn user_key(&self) -> Option<&EncryptionKey> {
        self.user_key.as_ref()
    }

    /// Scheme used for new encryptions.
    pub fn scheme(&self) -> EncryptionScheme {
        if self.user_key.is_some() {
            EncryptionScheme::UserSupplied
        } else {
            EncryptionScheme::Aes256V1
        }
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.application_key.zeroize();
        self.account_key.zeroize();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("application_key", &"[REDACTED]")
            .field("account_key", &"[REDACTED]")
            .field("device_id", &self.device_id)
            .field("scheme", &self.scheme())
            .finish()
    }
}
