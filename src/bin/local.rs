//! Local SOCKS5 side binary.
//!
//! Usage: ssrelay-local [OPTIONS]
//!
//! Accepts SOCKS5 CONNECT requests and tunnels them to a relay server.
//!
//! Examples:
//!   ssrelay-local -s relay.example.com:8388 -b 127.0.0.1:1080 -k secret
//!   ssrelay-local -c local.toml

use clap::Parser;

use ssrelay::cli::{self, Args};
use ssrelay::server::Mode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run(Args::parse(), Mode::Local).await
}
