//! AES-256-GCM field cipher.

use super::error::{CryptoError, CryptoResult};
use super::key::{EncryptionKey, EncryptionScheme, KeyMaterial};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use tidesync_protocol::{from_cbor, to_cbor, EncryptedField, FieldValue, TypeTag};
use tracing::debug;

/// Size of the scheme prefix in bytes.
pub const SCHEME_SIZE: usize = 1;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encrypts and decrypts individual field values.
///
/// Pure and reentrant: a cipher can be shared across threads without locking.
pub struct FieldCipher {
    scheme: EncryptionScheme,
    v1: Aes256Gcm,
    user: Option<Aes256Gcm>,
}

impl FieldCipher {
    /// Builds a cipher from key material.
    ///
    /// The v1 key is always derived so that legacy fields remain readable
    /// after a user-supplied key is configured.
    pub fn new(material: &KeyMaterial) -> CryptoResult<Self> {
        let v1_key = EncryptionKey::derive_v1(material.application_key(), material.account_key())?;
        debug!(scheme = ?material.scheme(), device = %material.device_id(), "field cipher ready");
        Ok(Self {
            scheme: material.scheme(),
            v1: Self::aes(&v1_key),
            user: material.user_key().map(Self::aes),
        })
    }

    fn aes(key: &EncryptionKey) -> Aes256Gcm {
        Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()))
    }

    /// Scheme used for new encryptions.
    pub fn scheme(&self) -> EncryptionScheme {
        self.scheme
    }

    fn cipher_for(&self, scheme: EncryptionScheme) -> Option<&Aes256Gcm> {
        match scheme {
            EncryptionScheme::Aes256V1 => Some(&self.v1),
            EncryptionScheme::UserSupplied => self.user.as_ref(),
        }
    }

    /// Encrypts a value under `tag`.
    ///
    /// Nulls are never encrypted: they become an empty [`TypeTag::Null`] field
    /// whatever tag the schema declares.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::TagMismatch`] if `value` cannot be stored under
    /// `tag`.
    pub fn encrypt_value(&self, tag: TypeTag, value: &FieldValue) -> CryptoResult<EncryptedField> {
        if value.is_null() {
            return Ok(EncryptedField::null());
        }
        if !tag.accepts(value) {
            return Err(CryptoError::TagMismatch { tag });
        }

        let plaintext =
            to_cbor(value).map_err(|e| CryptoError::encryption_failed(e.to_string()))?;
        let ciphertext = self.seal(tag, &plaintext)?;
        Ok(EncryptedField::new(tag, ciphertext))
    }

    /// Decrypts a field back into its value.
    ///
    /// Usable on its own, e.g. to inspect queued records.
    ///
    /// # Errors
    ///
    /// [`CryptoError::Decode`] for malformed input, [`CryptoError::Integrity`]
    /// when authentication fails.
    pub fn decrypt_value(&self, field: &EncryptedField) -> CryptoResult<FieldValue> {
        if field.tag == TypeTag::Null {
            if !field.ciphertext.is_empty() {
                return Err(CryptoError::decode("null field carries a payload"));
            }
            return Ok(FieldValue::Null);
        }

        let plaintext = self.open(field.tag, &field.ciphertext)?;
        let value: FieldValue = from_cbor(&plaintext)
            .map_err(|e| CryptoError::decode(format!("payload: {e}")))?;

        if !field.tag.accepts(&value) {
            return Err(CryptoError::decode(format!(
                "payload does not fit type tag {:?}",
                field.tag
            )));
        }
        Ok(value)
    }

    /// Seals raw bytes with the type tag as associated data.
    ///
    /// The output format is `scheme || nonce || ciphertext || tag`.
    pub fn seal(&self, tag: TypeTag, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let cipher = self
            .cipher_for(self.scheme)
            .ok_or_else(|| CryptoError::encryption_failed("no key for configured scheme"))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let aad = [tag.to_code()];
        let payload = Payload {
            msg: plaintext,
            aad: &aad,
        };

        let ciphertext = cipher
            .encrypt(nonce, payload)
            .map_err(|_| CryptoError::encryption_failed("encryption error"))?;

        let mut result = Vec::with_capacity(SCHEME_SIZE + NONCE_SIZE + ciphertext.len());
        result.push(self.scheme.to_code());
        result.extend_from_slice(&nonce_bytes);
        result.extend(ciphertext);

        Ok(result)
    }

    /// Opens bytes produced by [`seal`](Self::seal).
    ///
    /// The same tag must be supplied as was used to seal.
    pub fn open(&self, tag: TypeTag, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
        let (&scheme_code, rest) = sealed
            .split_first()
            .ok_or_else(|| CryptoError::decode("empty ciphertext"))?;

        let scheme = EncryptionScheme::from_code(scheme_code)
            .ok_or_else(|| CryptoError::decode(format!("unknown scheme {scheme_code}")))?;
        let cipher = self
            .cipher_for(scheme)
            .ok_or_else(|| CryptoError::decode(format!("no key for scheme {scheme:?}")))?;

        if rest.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::decode("ciphertext too short"));
        }

        let nonce = Nonce::from_slice(&rest[..NONCE_SIZE]);
        let aad = [tag.to_code()];
        let payload = Payload {
            msg: &rest[NONCE_SIZE..],
            aad: &aad,
        };

        cipher
            .decrypt(nonce, payload)
            .map_err(|_| CryptoError::integrity())
    }
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher")
            .field("cipher", &"Aes256Gcm")
            .field("scheme", &self.scheme)
            .field("user_key", &self.user.is_some())
            .finish()
    }
}

/// Encrypts one value with freshly derived keys.
///
/// Prefer a long-lived [`FieldCipher`] when sealing many values.
pub fn encrypt(material: &KeyMaterial, tag: TypeTag, value: &FieldValue) -> CryptoResult<EncryptedField> {
    FieldCipher::new(material)?.encrypt_value(tag, value)
}

/// Decrypts one field with freshly derived keys.
pub fn decrypt(material: &KeyMaterial, field: &EncryptedField) -> CryptoResult<FieldValue> {
    FieldCipher::new(material)?.decrypt_value(field)
}
