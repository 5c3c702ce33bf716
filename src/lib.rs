//! # ssrelay
//!
//! A lightweight AEAD-encrypted TCP relay. The local side accepts SOCKS5
//! connections and tunnels them to the server side, which decrypts the
//! target address and relays to it.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Server / CLI (listener, config, plugin, metrics)       │
//! ├─────────────────────────────────────────────────────────┤
//! │  RelaySession (negotiate → resolve → connect → relay)   │
//! ├─────────────────────────────────────────────────────────┤
//! │  Proxy (Peer, HeaderNegotiator, relay loop, SOCKS5)     │
//! ├─────────────────────────────────────────────────────────┤
//! │  Protocol hooks (plain, AEAD chunk encrypt / decrypt)   │
//! ├─────────────────────────────────────────────────────────┤
//! │  Crypto (ChaCha20-Poly1305, AES-GCM, HKDF-SHA1, EVP)    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire format
//!
//! Each direction of the encrypted leg starts with a random salt, followed
//! by chunks of `[sealed u16 length][sealed payload]`. The first plaintext
//! the client sends is the target address header
//! (`atyp + address + port`).

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod buffer;
pub mod cli;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod proxy;
pub mod server;

pub use error::{Error, Result};

pub use buffer::ByteBuffer;
pub use crypto::{CipherKind, CryptoContext};
pub use protocol::{Address, HookOutcome, ProtocolHook};
pub use server::{Config, Server};
