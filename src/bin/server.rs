//! Relay server binary.
//!
//! Usage: ssrelay-server [OPTIONS]
//!
//! Accepts encrypted connections, reads the target from the decrypted
//! header and relays to it.
//!
//! Examples:
//!   ssrelay-server -b 0.0.0.0:8388 -k secret
//!   ssrelay-server -c server.json
//!   ssrelay-server --genkey -m aes-256-gcm

use clap::Parser;

use ssrelay::cli::{self, Args};
use ssrelay::server::Mode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run(Args::parse(), Mode::Server).await
}
