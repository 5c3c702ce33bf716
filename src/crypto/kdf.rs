//! Key Derivation Functions.
//!
//! Two steps turn configuration into per-stream keys:
//!
//! 1. `EVP_BytesToKey` (MD5, one round) stretches a password into the
//!    master key.
//! 2. HKDF-SHA1 expands the master key with the stream's random salt into
//!    the subkey that actually seals chunks.

use hkdf::Hkdf;
use md5::{Digest, Md5};
use sha1::Sha1;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// HKDF info string for subkey derivation.
pub const SUBKEY_INFO: &[u8] = b"ss-subkey";

/// OpenSSL `EVP_BytesToKey` with MD5 and no salt, truncated to `key_len`.
pub fn evp_bytes_to_key(password: &[u8], key_len: usize) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(Vec::with_capacity(key_len + 16));
    let mut prev: Option<[u8; 16]> = None;

    while key.len() < key_len {
        let mut hasher = Md5::new();
        if let Some(prev) = prev {
            hasher.update(prev);
        }
        hasher.update(password);
        let digest: [u8; 16] = hasher.finalize().into();
        key.extend_from_slice(&digest);
        prev = Some(digest);
    }

    key.truncate(key_len);
    key
}

/// Derive the per-stream subkey from the master key and salt.
pub fn derive_subkey(master_key: &[u8], salt: &[u8], key_len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let hk = Hkdf::<Sha1>::new(Some(salt), master_key);
    let mut okm = Zeroizing::new(vec![0u8; key_len]);
    hk.expand(SUBKEY_INFO, &mut okm)
        .map_err(|_| Error::crypto("HKDF expansion failed"))?;
    Ok(okm)
}
