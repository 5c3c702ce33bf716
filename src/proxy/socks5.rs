//! SOCKS5 front end for the local side.
//!
//! Only the no-auth method and the CONNECT command are supported. The
//! address portion of the request is left in the peer's buffer so that it
//! can be negotiated like any other address header.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};
use crate::protocol::AddressType;
use crate::proxy::peer::Peer;

/// Protocol version byte
pub const SOCKS_VERSION: u8 = 0x05;

/// "No authentication required" method
pub const METHOD_NO_AUTH: u8 = 0x00;

/// "No acceptable methods" reply
pub const METHOD_NOT_ACCEPTABLE: u8 = 0xff;

/// CONNECT command
pub const CMD_CONNECT: u8 = 0x01;

/// Reply codes.
pub mod reply {
    /// Succeeded
    pub const SUCCEEDED: u8 = 0x00;
    /// Command not supported
    pub const COMMAND_NOT_SUPPORTED: u8 = 0x07;
    /// Address type not supported
    pub const ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;
}

/// Reply with `code` and an all-zero IPv4 bound address.
pub fn reply_bytes(code: u8) -> [u8; 10] {
    [SOCKS_VERSION, code, 0x00, AddressType::Ipv4 as u8, 0, 0, 0, 0, 0, 0]
}

/// Run the method negotiation and consume the request prefix
/// (`ver cmd rsv`).
///
/// On return the peer's buffer starts with the request's `atyp` byte.
pub async fn accept_request<S>(peer: &mut Peer<S>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Greeting: ver nmethods methods...
    fill(peer, 2).await?;
    let (ver, nmethods) = {
        let buf = peer.buffer().get_const_buffer();
        (buf[0], buf[1] as usize)
    };
    if ver != SOCKS_VERSION {
        return Err(Error::socks5(format!("unsupported version {}", ver)));
    }
    fill(peer, 2 + nmethods).await?;
    let offers_no_auth = peer.buffer().get_const_buffer()[2..2 + nmethods].contains(&METHOD_NO_AUTH);
    peer.buffer_mut().dequeue(2 + nmethods);

    if !offers_no_auth {
        peer.write_all(&[SOCKS_VERSION, METHOD_NOT_ACCEPTABLE]).await?;
        return Err(Error::socks5("client offers no acceptable method"));
    }
    peer.write_all(&[SOCKS_VERSION, METHOD_NO_AUTH]).await?;

    // Request: ver cmd rsv atyp ...
    fill(peer, 4).await?;
    let (ver, cmd, atyp) = {
        let buf = peer.buffer().get_const_buffer();
        (buf[0], buf[1], buf[3])
    };
    if ver != SOCKS_VERSION {
        return Err(Error::socks5(format!("unsupported version {}", ver)));
    }
    if cmd != CMD_CONNECT {
        peer.write_all(&reply_bytes(reply::COMMAND_NOT_SUPPORTED)).await?;
        return Err(Error::socks5(format!("unsupported command {}", cmd)));
    }
    if AddressType::from_u8(atyp).is_none() {
        peer.write_all(&reply_bytes(reply::ADDRESS_TYPE_NOT_SUPPORTED)).await?;
        return Err(Error::socks5(format!("unsupported address type {}", atyp)));
    }
    peer.buffer_mut().dequeue(3);
    Ok(())
}

/// Tell the client the connection is established.
pub async fn send_success<S>(peer: &mut Peer<S>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    peer.write_all(&reply_bytes(reply::SUCCEEDED)).await
}

async fn fill<S>(peer: &mut Peer<S>, len: usize) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let staged = peer.buffer().len();
    if staged < len && peer.read_at_least(len - staged).await? < len - staged {
        return Err(Error::socks5("connection closed during handshake"));
    }
    Ok(())
}
