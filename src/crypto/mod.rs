//! Cryptographic primitives for the relay.
//!
//! This module provides:
//! - AEAD ciphers (ChaCha20-Poly1305, AES-GCM) behind a single
//!   [`AeadCipher`] that owns its nonce sequence
//! - `EVP_BytesToKey` password stretching and HKDF-SHA1 subkey derivation
//! - Secure random salts
//!
//! All secret material is zeroized on drop to prevent memory leakage.

mod aead;
mod kdf;
mod keys;
mod random;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use aead::{AeadCipher, Nonce};
pub use kdf::{derive_subkey, evp_bytes_to_key, SUBKEY_INFO};
pub use keys::MasterKey;
pub use random::SecureRandom;

use crate::error::{Error, Result};

/// Size of AEAD nonce in bytes (96 bits for every supported method)
pub const NONCE_SIZE: usize = 12;

/// Size of AEAD authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Supported AEAD methods.
///
/// Key, salt, nonce and tag widths are fixed per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherKind {
    /// `chacha20-ietf-poly1305`
    ChaCha20Poly1305,
    /// `aes-256-gcm`
    Aes256Gcm,
    /// `aes-128-gcm`
    Aes128Gcm,
}

impl CipherKind {
    /// All supported methods.
    pub const ALL: [CipherKind; 3] = [
        CipherKind::ChaCha20Poly1305,
        CipherKind::Aes256Gcm,
        CipherKind::Aes128Gcm,
    ];

    /// Method name as used in configuration files.
    pub const fn name(self) -> &'static str {
        match self {
            CipherKind::ChaCha20Poly1305 => "chacha20-ietf-poly1305",
            CipherKind::Aes256Gcm => "aes-256-gcm",
            CipherKind::Aes128Gcm => "aes-128-gcm",
        }
    }

    /// Key length in bytes.
    pub const fn key_len(self) -> usize {
        match self {
            CipherKind::ChaCha20Poly1305 | CipherKind::Aes256Gcm => 32,
            CipherKind::Aes128Gcm => 16,
        }
    }

    /// Salt length in bytes (equal to the key length).
    pub const fn salt_len(self) -> usize {
        self.key_len()
    }

    /// Nonce length in bytes.
    pub const fn nonce_len(self) -> usize {
        NONCE_SIZE
    }

    /// Tag length in bytes.
    pub const fn tag_len(self) -> usize {
        TAG_SIZE
    }
}

impl FromStr for CipherKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chacha20-ietf-poly1305" | "chacha20-poly1305" => Ok(CipherKind::ChaCha20Poly1305),
            "aes-256-gcm" => Ok(CipherKind::Aes256Gcm),
            "aes-128-gcm" => Ok(CipherKind::Aes128Gcm),
            _ => Err(Error::UnsupportedCipher(s.to_string())),
        }
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cipher method plus master key, shared by every session of a server.
///
/// Hands out a fresh [`AeadCipher`] per stream direction, keyed with the
/// subkey derived from that direction's salt.
#[derive(Clone)]
pub struct CryptoContext {
    kind: CipherKind,
    master_key: Arc<MasterKey>,
}

impl CryptoContext {
    /// Create a context, checking the key length against the method.
    pub fn new(kind: CipherKind, master_key: MasterKey) -> Result<Self> {
        if master_key.len() != kind.key_len() {
            return Err(Error::crypto(format!(
                "{} needs a {}-byte key, got {}",
                kind,
                kind.key_len(),
                master_key.len()
            )));
        }
        Ok(Self {
            kind,
            master_key: Arc::new(master_key),
        })
    }

    /// Create a context from a password via `EVP_BytesToKey`.
    pub fn from_password(kind: CipherKind, password: &str) -> Self {
        Self {
            kind,
            master_key: Arc::new(MasterKey::from_password(password, kind.key_len())),
        }
    }

    /// Cipher method.
    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    /// Build a cipher for one stream direction from its salt.
    pub fn cipher_for_salt(&self, salt: &[u8]) -> Result<AeadCipher> {
        if salt.len() != self.kind.salt_len() {
            return Err(Error::crypto(format!(
                "salt must be {} bytes, got {}",
                self.kind.salt_len(),
                salt.len()
            )));
        }
        let subkey = derive_subkey(self.master_key.as_bytes(), salt, self.kind.key_len())?;
        AeadCipher::new(self.kind, &subkey)
    }

    /// Generate a fresh salt and the cipher keyed from it.
    pub fn new_outbound(&self) -> Result<(Vec<u8>, AeadCipher)> {
        let mut salt = vec![0u8; self.kind.salt_len()];
        SecureRandom::fill(&mut salt);
        let cipher = self.cipher_for_salt(&salt)?;
        Ok((salt, cipher))
    }
}

impl fmt::Debug for CryptoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoContext")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_kind_parameters() {
        assert_eq!(CipherKind::ChaCha20Poly1305.key_len(), 32);
        assert_eq!(CipherKind::Aes256Gcm.salt_len(), 32);
        assert_eq!(CipherKind::Aes128Gcm.key_len(), 16);
        for kind in CipherKind::ALL {
            assert_eq!(kind.nonce_len(), 12);
            assert_eq!(kind.tag_len(), 16);
            assert_eq!(kind.name().parse::<CipherKind>().unwrap(), kind);
        }
        assert!("rc4-md5".parse::<CipherKind>().is_err());
    }

    #[test]
    fn test_context_rejects_wrong_key_length() {
        let key = MasterKey::from_bytes(vec![0u8; 16]);
        assert!(CryptoContext::new(CipherKind::ChaCha20Poly1305, key).is_err());
    }

    #[test]
    fn test_both_sides_derive_same_cipher() {
        let ctx = CryptoContext::from_password(CipherKind::ChaCha20Poly1305, "foobar");
        let (salt, mut sender) = ctx.new_outbound().unwrap();
        let mut receiver = ctx.cipher_for_salt(&salt).unwrap();

        let sealed = sender.seal(b"hello relay", b"").unwrap();
        assert_eq!(receiver.open(&sealed, b"").unwrap(), b"hello relay");
    }

    #[test]
    fn test_different_salts_give_different_streams() {
        let ctx = CryptoContext::from_password(CipherKind::Aes256Gcm, "foobar");
        let (salt_a, mut a) = ctx.new_outbound().unwrap();
        let (salt_b, mut b) = ctx.new_outbound().unwrap();
        assert_ne!(salt_a, salt_b);
        assert_ne!(a.seal(b"same", b"").unwrap(), b.seal(b"same", b"").unwrap());
    }
}
