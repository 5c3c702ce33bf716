//! Authenticated Encryption with Associated Data (AEAD).
//!
//! [`AeadCipher`] wraps one of the supported primitives together with the
//! nonce sequence for a single key. Callers never pass a nonce: every
//! successful seal or open consumes the current nonce and advances it,
//! so a (key, nonce) pair is used at most once.

use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead as AeadTrait, KeyInit, Payload},
    ChaCha20Poly1305,
};

use crate::crypto::{CipherKind, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};

/// A nonce (number used once) for AEAD operations.
///
/// Little-endian counter over all 12 bytes, starting at zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// The first nonce of every key.
    pub const fn zero() -> Self {
        Self([0u8; NONCE_SIZE])
    }

    /// Create a nonce from a 64-bit counter value.
    pub fn new(counter: u64) -> Self {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..8].copy_from_slice(&counter.to_le_bytes());
        Self(nonce)
    }

    /// Create a nonce from raw bytes.
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw nonce bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    /// Increment the counter with carry across every byte.
    ///
    /// Returns `false` when the counter wrapped back to zero.
    pub fn increment(&mut self) -> bool {
        for byte in self.0.iter_mut() {
            let (next, carry) = byte.overflowing_add(1);
            *byte = next;
            if !carry {
                return true;
            }
        }
        false
    }
}

impl From<u64> for Nonce {
    fn from(counter: u64) -> Self {
        Self::new(counter)
    }
}

enum Primitive {
    ChaCha20Poly1305(Box<ChaCha20Poly1305>),
    Aes256Gcm(Box<Aes256Gcm>),
    Aes128Gcm(Box<Aes128Gcm>),
}

/// AEAD cipher bound to one key and its nonce sequence.
pub struct AeadCipher {
    kind: CipherKind,
    primitive: Primitive,
    nonce: Nonce,
    exhausted: bool,
}

impl AeadCipher {
    /// Create a cipher for `kind` keyed with `key`.
    pub fn new(kind: CipherKind, key: &[u8]) -> Result<Self> {
        if key.len() != kind.key_len() {
            return Err(Error::crypto(format!(
                "{} key must be {} bytes, got {}",
                kind,
                kind.key_len(),
                key.len()
            )));
        }
        let invalid = |_| Error::crypto("invalid key length");
        let primitive = match kind {
            CipherKind::ChaCha20Poly1305 => {
                Primitive::ChaCha20Poly1305(Box::new(ChaCha20Poly1305::new_from_slice(key).map_err(invalid)?))
            }
            CipherKind::Aes256Gcm => {
                Primitive::Aes256Gcm(Box::new(Aes256Gcm::new_from_slice(key).map_err(invalid)?))
            }
            CipherKind::Aes128Gcm => {
                Primitive::Aes128Gcm(Box::new(Aes128Gcm::new_from_slice(key).map_err(invalid)?))
            }
        };
        Ok(Self {
            kind,
            primitive,
            nonce: Nonce::zero(),
            exhausted: false,
        })
    }

    /// Cipher method.
    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    /// Nonce the next seal or open will use.
    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    /// Encrypt plaintext with associated authenticated data.
    ///
    /// Returns ciphertext || tag (16 bytes appended) and advances the nonce.
    pub fn seal(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        self.check_nonce()?;
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        let nonce = GenericArray::from_slice(self.nonce.as_bytes());
        let sealed = match &self.primitive {
            Primitive::ChaCha20Poly1305(c) => c.encrypt(nonce, payload),
            Primitive::Aes256Gcm(c) => c.encrypt(nonce, payload),
            Primitive::Aes128Gcm(c) => c.encrypt(nonce, payload),
        }
        .map_err(|_| Error::crypto("encryption failed"))?;
        self.advance();
        Ok(sealed)
    }

    /// Decrypt ciphertext || tag with associated authenticated data.
    ///
    /// Fails closed: on any mismatch no plaintext is returned and the nonce
    /// does not move.
    pub fn open(&mut self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        self.check_nonce()?;
        if ciphertext.len() < TAG_SIZE {
            return Err(Error::Authentication);
        }
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        let nonce = GenericArray::from_slice(self.nonce.as_bytes());
        let plaintext = match &self.primitive {
            Primitive::ChaCha20Poly1305(c) => c.decrypt(nonce, payload),
            Primitive::Aes256Gcm(c) => c.decrypt(nonce, payload),
            Primitive::Aes128Gcm(c) => c.decrypt(nonce, payload),
        }
        .map_err(|_| Error::Authentication)?;
        self.advance();
        Ok(plaintext)
    }

    fn check_nonce(&self) -> Result<()> {
        if self.exhausted {
            return Err(Error::NonceExhausted);
        }
        Ok(())
    }

    fn advance(&mut self) {
        if !self.nonce.increment() {
            self.exhausted = true;
        }
    }
}

/// Calculate the ciphertext length for a given plaintext length.
pub const fn ciphertext_len(plaintext_len: usize) -> usize {
    plaintext_len + TAG_SIZE
}
