//! AEAD chunk framing.
//!
//! Each direction of the encrypted stream is:
//!
//! ```text
//! [salt] { [len(2, BE) + tag(16)] [payload(len) + tag(16)] }*
//! ```
//!
//! The length and the payload are sealed separately, each under the next
//! nonce of the direction's cipher.

use crate::buffer::ByteBuffer;
use crate::crypto::{AeadCipher, CryptoContext, TAG_SIZE};
use crate::error::{Error, Result};
use crate::protocol::HookOutcome;

/// Largest payload a single chunk may carry.
pub const MAX_CHUNK_SIZE: usize = 0x3fff;

/// Size of the plaintext length prefix.
pub const LENGTH_SIZE: usize = 2;

/// Turns plaintext into salt-prefixed sealed chunks.
pub struct AeadEncryptor {
    cipher: AeadCipher,
    /// Salt not yet sent to the peer
    salt: Option<Vec<u8>>,
}

impl AeadEncryptor {
    /// Create an encryptor with a fresh random salt.
    pub fn new(ctx: &CryptoContext) -> Result<Self> {
        let (salt, cipher) = ctx.new_outbound()?;
        Ok(Self {
            cipher,
            salt: Some(salt),
        })
    }

    /// Replace the staged plaintext in `buf` with its sealed framing.
    pub fn process(&mut self, buf: &mut ByteBuffer) -> Result<HookOutcome> {
        if buf.is_empty() {
            return Ok(HookOutcome::NeedMore);
        }

        let plaintext = buf.take();
        if let Some(salt) = self.salt.take() {
            buf.extend_from_slice(&salt);
        }

        for chunk in plaintext.chunks(MAX_CHUNK_SIZE) {
            let len = (chunk.len() as u16).to_be_bytes();
            let sealed_len = self.cipher.seal(&len, b"")?;
            let sealed_payload = self.cipher.seal(chunk, b"")?;
            buf.extend_from_slice(&sealed_len);
            buf.extend_from_slice(&sealed_payload);
        }

        Ok(HookOutcome::Ready(buf.len()))
    }
}

/// Turns salt-prefixed sealed chunks back into plaintext.
///
/// Ciphertext that does not yet form a whole chunk is carried over to the
/// next invocation.
pub struct AeadDecryptor {
    ctx: CryptoContext,
    cipher: Option<AeadCipher>,
    carry: ByteBuffer,
    /// Payload length of a chunk whose length prefix was already opened
    pending_len: Option<usize>,
}

impl AeadDecryptor {
    /// Create a decryptor that expects the peer's salt first.
    pub fn new(ctx: CryptoContext) -> Self {
        Self {
            ctx,
            cipher: None,
            carry: ByteBuffer::new(),
            pending_len: None,
        }
    }

    /// Replace the ciphertext staged in `buf` with every plaintext chunk it
    /// completes.
    pub fn process(&mut self, buf: &mut ByteBuffer) -> Result<HookOutcome> {
        self.carry.append_data(buf);
        buf.reset();

        let cipher = match self.cipher.as_mut() {
            Some(cipher) => cipher,
            None => {
                let salt_len = self.ctx.kind().salt_len();
                if self.carry.len() < salt_len {
                    return Ok(HookOutcome::NeedMore);
                }
                let cipher = self.ctx.cipher_for_salt(&self.carry.get_const_buffer()[..salt_len])?;
                self.carry.dequeue(salt_len);
                self.cipher.insert(cipher)
            }
        };

        loop {
            let len = match self.pending_len {
                Some(len) => len,
                None => {
                    if self.carry.len() < LENGTH_SIZE + TAG_SIZE {
                        break;
                    }
                    let prefix = cipher.open(&self.carry.get_const_buffer()[..LENGTH_SIZE + TAG_SIZE], b"")?;
                    self.carry.dequeue(LENGTH_SIZE + TAG_SIZE);
                    let len = u16::from_be_bytes([prefix[0], prefix[1]]) as usize;
                    if len > MAX_CHUNK_SIZE {
                        return Err(Error::ChunkTooLarge {
                            len,
                            max: MAX_CHUNK_SIZE,
                        });
                    }
                    if len == 0 {
                        return Err(Error::InvalidChunk("zero-length chunk".into()));
                    }
                    self.pending_len = Some(len);
                    len
                }
            };

            if self.carry.len() < len + TAG_SIZE {
                break;
            }
            let payload = cipher.open(&self.carry.get_const_buffer()[..len + TAG_SIZE], b"")?;
            self.carry.dequeue(len + TAG_SIZE);
            self.pending_len = None;
            buf.extend_from_slice(&payload);
        }

        if buf.is_empty() {
            Ok(HookOutcome::NeedMore)
        } else {
            Ok(HookOutcome::Ready(buf.len()))
        }
    }
}
