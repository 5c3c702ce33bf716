//! Master key material.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{evp_bytes_to_key, SecureRandom};
use crate::error::{Error, Result};

/// Long-term symmetric key shared by both ends of the tunnel.
///
/// Never used to seal directly; every stream derives its own subkey.
/// Automatically zeroized when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey(Vec<u8>);

impl MasterKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Stretch a password into a `key_len`-byte key.
    pub fn from_password(password: &str, key_len: usize) -> Self {
        let key = evp_bytes_to_key(password.as_bytes(), key_len);
        Self(key.to_vec())
    }

    /// Decode a base64 key (standard alphabet, padded or not).
    pub fn from_base64(encoded: &str) -> Result<Self> {
        use base64::{
            engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
            Engine,
        };

        let trimmed = encoded.trim();
        let bytes = STANDARD
            .decode(trimmed)
            .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
            .map_err(|e| Error::config(format!("invalid base64 key: {}", e)))?;
        Ok(Self(bytes))
    }

    /// Generate a random key of `key_len` bytes.
    pub fn random(key_len: usize) -> Self {
        let mut bytes = vec![0u8; key_len];
        SecureRandom::fill(&mut bytes);
        Self(bytes)
    }

    /// Encode as standard base64.
    pub fn to_base64(&self) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine};
        STANDARD.encode(&self.0)
    }

    /// Get the raw key bytes.
    ///
    /// # Security
    ///
    /// Handle with care - this is secret key material.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MasterKey({} bytes)", self.0.len())
    }
}
