//! SOCKS5-style target address header.
//!
//! Wire format: `atyp(1) + address + port(2, big-endian)` where the address
//! is 4 bytes for IPv4, 16 bytes for IPv6, or `len(1) + len` bytes for a
//! domain name.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use bytes::BufMut;

use crate::error::{Error, Result};

/// Address type byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    /// 4-byte IPv4 address
    Ipv4 = 0x01,
    /// Length-prefixed domain name
    Domain = 0x03,
    /// 16-byte IPv6 address
    Ipv6 = 0x04,
}

impl AddressType {
    /// Decode the address type byte.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Ipv4),
            0x03 => Some(Self::Domain),
            0x04 => Some(Self::Ipv6),
            _ => None,
        }
    }
}

/// Target of a relay session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// Literal IP address and port
    Socket(SocketAddr),
    /// Domain name and port, resolved by the relay
    Domain(String, u16),
}

impl Address {
    /// Address type used on the wire.
    pub fn address_type(&self) -> AddressType {
        match self {
            Address::Socket(SocketAddr::V4(_)) => AddressType::Ipv4,
            Address::Socket(SocketAddr::V6(_)) => AddressType::Ipv6,
            Address::Domain(..) => AddressType::Domain,
        }
    }

    /// Destination port.
    pub fn port(&self) -> u16 {
        match self {
            Address::Socket(addr) => addr.port(),
            Address::Domain(_, port) => *port,
        }
    }

    /// Host part, as a string suitable for resolution.
    pub fn host(&self) -> String {
        match self {
            Address::Socket(addr) => addr.ip().to_string(),
            Address::Domain(domain, _) => domain.clone(),
        }
    }

    /// How many more bytes `buf` needs before it holds a complete header.
    ///
    /// Returns 0 when the header is complete, or when the address type is
    /// unknown (so that [`Address::parse`] reports it as malformed).
    pub fn need_more(buf: &[u8]) -> usize {
        let Some(&atyp) = buf.first() else {
            return 1;
        };
        let total = match AddressType::from_u8(atyp) {
            Some(AddressType::Ipv4) => 1 + 4 + 2,
            Some(AddressType::Ipv6) => 1 + 16 + 2,
            Some(AddressType::Domain) => match buf.get(1) {
                Some(&len) => 1 + 1 + len as usize + 2,
                None => return 1,
            },
            None => return 0,
        };
        total.saturating_sub(buf.len())
    }

    /// Decode a complete header from the front of `buf`.
    ///
    /// Returns the address and the number of header bytes consumed; any
    /// bytes after that belong to the payload.
    pub fn parse(buf: &[u8]) -> Result<(Address, usize)> {
        if buf.is_empty() {
            return Err(Error::malformed("empty address header"));
        }
        let atyp = AddressType::from_u8(buf[0])
            .ok_or_else(|| Error::malformed(format!("unknown address type: 0x{:02x}", buf[0])))?;
        if Self::need_more(buf) > 0 {
            return Err(Error::malformed("address header truncated"));
        }

        match atyp {
            AddressType::Ipv4 => {
                let ip = Ipv4Addr::new(buf[1], buf[2], buf[3], buf[4]);
                let port = u16::from_be_bytes([buf[5], buf[6]]);
                Ok((Address::Socket(SocketAddr::V4(SocketAddrV4::new(ip, port))), 7))
            }
            AddressType::Ipv6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[1..17]);
                let port = u16::from_be_bytes([buf[17], buf[18]]);
                let addr = SocketAddrV6::new(Ipv6Addr::from(octets), port, 0, 0);
                Ok((Address::Socket(SocketAddr::V6(addr)), 19))
            }
            AddressType::Domain => {
                let len = buf[1] as usize;
                if len == 0 {
                    return Err(Error::malformed("empty domain name"));
                }
                let domain = std::str::from_utf8(&buf[2..2 + len])
                    .map_err(|_| Error::malformed("domain name is not UTF-8"))?;
                let port = u16::from_be_bytes([buf[2 + len], buf[3 + len]]);
                Ok((Address::Domain(domain.to_string(), port), 4 + len))
            }
        }
    }

    /// Encoded header length.
    pub fn serialized_len(&self) -> usize {
        match self {
            Address::Socket(SocketAddr::V4(_)) => 7,
            Address::Socket(SocketAddr::V6(_)) => 19,
            Address::Domain(domain, _) => 4 + domain.len(),
        }
    }

    /// Append the wire encoding to `buf`.
    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u8(self.address_type() as u8);
        match self {
            Address::Socket(SocketAddr::V4(addr)) => buf.put_slice(&addr.ip().octets()),
            Address::Socket(SocketAddr::V6(addr)) => buf.put_slice(&addr.ip().octets()),
            Address::Domain(domain, _) => {
                let len = u8::try_from(domain.len())
                    .map_err(|_| Error::malformed("domain name longer than 255 bytes"))?;
                buf.put_u8(len);
                buf.put_slice(domain.as_bytes());
            }
        }
        buf.put_u16(self.port());
        Ok(())
    }

    /// Wire encoding as a fresh vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.serialized_len());
        self.write_to(&mut buf)?;
        Ok(buf)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Socket(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Socket(addr) => write!(f, "{}", addr),
            Address::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4_addr() {
        let header = [0x01, 0x7f, 0x00, 0x00, 0x01, 0x00, 0x50];
        assert_eq!(Address::need_more(&header), 0);

        let (addr, len) = Address::parse(&header).unwrap();
        assert_eq!(addr.address_type(), AddressType::Ipv4);
        assert_eq!(addr, Address::Socket("127.0.0.1:80".parse().unwrap()));
        assert_eq!(len, 7);
    }

    #[test]
    fn test_parse_domain_addr() {
        let header = [0x03, 0x03, b'f', b'o', b'o', 0x01, 0xbb];
        let (addr, len) = Address::parse(&header).unwrap();
        assert_eq!(addr, Address::Domain("foo".into(), 443));
        assert_eq!(addr.to_string(), "foo:443");
        assert_eq!(len, 7);
    }

    #[test]
    fn test_parse_ipv6_addr() {
        let mut header = vec![0x04];
        header.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        header.extend_from_slice(&8080u16.to_be_bytes());
        let (addr, len) = Address::parse(&header).unwrap();
        assert_eq!(addr, Address::Socket("[::1]:8080".parse().unwrap()));
        assert_eq!(len, 19);
    }

    #[test]
    fn test_need_more_progression() {
        assert_eq!(Address::need_more(&[]), 1);
        assert_eq!(Address::need_more(&[0x01]), 6);
        assert_eq!(Address::need_more(&[0x01, 1, 2]), 4);
        assert_eq!(Address::need_more(&[0x04]), 18);
        assert_eq!(Address::need_more(&[0x03]), 1);
        assert_eq!(Address::need_more(&[0x03, 0x03]), 5);
        assert_eq!(Address::need_more(&[0x03, 0x03, b'f', b'o', b'o', 0x01]), 1);
    }

    #[test]
    fn test_surplus_is_not_consumed() {
        let header = [0x01, 10, 0, 0, 1, 0x00, 0x16, b'G', b'E', b'T'];
        assert_eq!(Address::need_more(&header), 0);
        let (_, len) = Address::parse(&header).unwrap();
        assert_eq!(&header[len..], b"GET");
    }

    #[test]
    fn test_malformed_headers() {
        assert!(matches!(Address::parse(&[0x02, 0, 0]), Err(Error::MalformedHeader(_))));
        assert_eq!(Address::need_more(&[0x02]), 0);
        assert!(Address::parse(&[0x01, 1, 2]).is_err());
        assert!(Address::parse(&[0x03, 0x00, 0x00, 0x50]).is_err());
        assert!(Address::parse(&[0x03, 0x02, 0xff, 0xfe, 0x00, 0x50]).is_err());
    }

    #[test]
    fn test_encode_matches_parse() {
        for addr in [
            Address::Socket("93.184.216.34:443".parse().unwrap()),
            Address::Socket("[2001:db8::1]:53".parse().unwrap()),
            Address::Domain("example.com".into(), 8443),
        ] {
            let bytes = addr.to_bytes().unwrap();
            assert_eq!(bytes.len(), addr.serialized_len());
            assert_eq!(Address::parse(&bytes).unwrap(), (addr.clone(), bytes.len()));
        }
    }

    #[test]
    fn test_domain_too_long() {
        let addr = Address::Domain("a".repeat(256), 80);
        assert!(addr.to_bytes().is_err());
    }
}
