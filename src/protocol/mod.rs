//! Stream transforms applied to relayed bytes.
//!
//! A [`ProtocolHook`] is invoked with a [`ByteBuffer`] holding freshly
//! received bytes and answers with one of three outcomes:
//!
//! - `Ok(HookOutcome::NeedMore)`: not enough input yet, read more and call
//!   again;
//! - `Err(_)`: the input is malformed or failed authentication, the session
//!   must be aborted;
//! - `Ok(HookOutcome::Ready(n))`: the buffer now holds exactly `n` bytes of
//!   output, to be forwarded and then reset.
//!
//! The set of hooks is closed: pass-through, AEAD encrypt, AEAD decrypt.

pub mod address;
mod aead;

pub use address::{Address, AddressType};
pub use aead::{AeadDecryptor, AeadEncryptor, LENGTH_SIZE, MAX_CHUNK_SIZE};

use crate::buffer::ByteBuffer;
use crate::crypto::CryptoContext;
use crate::error::Result;

/// Outcome of a successful hook invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Insufficient input; read more and re-invoke.
    NeedMore,
    /// The buffer holds this many bytes of output.
    Ready(usize),
}

/// Per-direction stream transform, chosen once per session.
pub enum ProtocolHook {
    /// Forwards bytes unchanged
    Plain,
    /// Plaintext in, salt + sealed chunks out
    Encrypt(AeadEncryptor),
    /// Salt + sealed chunks in, plaintext out
    Decrypt(AeadDecryptor),
}

impl ProtocolHook {
    /// Encrypting hook with a fresh salt.
    pub fn encryptor(ctx: &CryptoContext) -> Result<Self> {
        Ok(ProtocolHook::Encrypt(AeadEncryptor::new(ctx)?))
    }

    /// Decrypting hook waiting for the peer's salt.
    pub fn decryptor(ctx: &CryptoContext) -> Self {
        ProtocolHook::Decrypt(AeadDecryptor::new(ctx.clone()))
    }

    /// Transform the bytes staged in `buf`.
    pub fn process(&mut self, buf: &mut ByteBuffer) -> Result<HookOutcome> {
        match self {
            ProtocolHook::Plain => Ok(if buf.is_empty() {
                HookOutcome::NeedMore
            } else {
                HookOutcome::Ready(buf.len())
            }),
            ProtocolHook::Encrypt(enc) => enc.process(buf),
            ProtocolHook::Decrypt(dec) => dec.process(buf),
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolHook::Plain => "plain",
            ProtocolHook::Encrypt(_) => "encrypt",
            ProtocolHook::Decrypt(_) => "decrypt",
        }
    }
}

impl std::fmt::Debug for ProtocolHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProtocolHook({})", self.name())
    }
}
