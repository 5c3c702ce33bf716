//! Relay session building blocks.
//!
//! Peers with idle control, the header negotiator, the per-direction relay
//! loop with its teardown, name resolution and the SOCKS5 front end used by
//! the local side.

pub mod negotiate;
pub mod peer;
pub mod relay;
pub mod resolve;
pub mod socks5;

pub use negotiate::{HeaderNegotiator, NegotiateStep, Negotiated};
pub use peer::{Peer, PeerControl, PeerReader, PeerWriter};
pub use relay::{relay_direction, CloseReason, Teardown};
pub use resolve::{resolve_address, Resolver, SystemResolver};
