//! Incremental address header negotiation.
//!
//! Bytes arrive from the client in arbitrary fragments. Each fragment is
//! passed through the session's [`ProtocolHook`]; validated output
//! accumulates until [`Address::need_more`] reports a complete header.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::protocol::{Address, HookOutcome, ProtocolHook};
use crate::proxy::peer::Peer;

/// Parsed header plus the payload bytes that followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Requested target
    pub address: Address,
    /// Exact header bytes as received
    pub header: Vec<u8>,
    /// Bytes past the header, the start of the payload stream
    pub surplus: Vec<u8>,
}

/// Result of feeding one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiateStep {
    /// Read at least this many more bytes, then feed again
    NeedMore(usize),
    /// Header complete
    Done(Negotiated),
}

/// Accumulates hook output until a full header is present.
#[derive(Debug, Default)]
pub struct HeaderNegotiator {
    header: ByteBuffer,
}

impl HeaderNegotiator {
    /// Create an empty negotiator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` over the bytes staged in `buf` and try to parse a header.
    ///
    /// `buf` is drained of whatever the hook produced.
    pub fn feed(&mut self, hook: &mut ProtocolHook, buf: &mut ByteBuffer) -> Result<NegotiateStep> {
        if let HookOutcome::Ready(n) = hook.process(buf)? {
            self.header.extend_from_slice(&buf.get_const_buffer()[..n]);
            buf.reset();
        }

        let accumulated = self.header.get_const_buffer();
        let need = Address::need_more(accumulated);
        if need > 0 {
            return Ok(NegotiateStep::NeedMore(need));
        }

        let (address, consumed) = Address::parse(accumulated)?;
        let negotiated = Negotiated {
            address,
            header: accumulated[..consumed].to_vec(),
            surplus: accumulated[consumed..].to_vec(),
        };
        self.header.reset();
        Ok(NegotiateStep::Done(negotiated))
    }

    /// Drive [`feed`](Self::feed) with reads from `peer` until a header is
    /// complete.
    pub async fn negotiate<S>(&mut self, hook: &mut ProtocolHook, peer: &mut Peer<S>) -> Result<Negotiated>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            match self.feed(hook, peer.buffer_mut())? {
                NegotiateStep::Done(negotiated) => return Ok(negotiated),
                NegotiateStep::NeedMore(at_least) => {
                    tracing::trace!(at_least, "header incomplete");
                    if peer.read_at_least(at_least).await? == 0 {
                        return Err(Error::Network(std::io::ErrorKind::UnexpectedEof.into()));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;
    use tokio::io::AsyncWriteExt;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::crypto::{CipherKind, CryptoContext};
    use crate::proxy::peer::PeerControl;

    const IPV4_HEADER: [u8; 7] = [0x01, 0x7f, 0x00, 0x00, 0x01, 0x00, 0x50];

    fn feed_fragments(hook: &mut ProtocolHook, wire: &[u8], cuts: &[usize]) -> Result<Option<Negotiated>> {
        let mut negotiator = HeaderNegotiator::new();
        let mut buf = ByteBuffer::new();
        let mut pos = 0;
        let mut cut = cuts.iter().cycle();
        while pos < wire.len() {
            let end = (pos + cut.next().copied().unwrap_or(1)).min(wire.len());
            buf.extend_from_slice(&wire[pos..end]);
            pos = end;
            if let NegotiateStep::Done(neg) = negotiator.feed(hook, &mut buf)? {
                let mut neg = neg;
                neg.surplus.extend_from_slice(&wire[pos..]);
                return Ok(Some(neg));
            }
        }
        Ok(None)
    }

    #[test]
    fn test_ipv4_header_in_one_piece() {
        let mut hook = ProtocolHook::Plain;
        let neg = feed_fragments(&mut hook, &IPV4_HEADER, &[7]).unwrap().unwrap();
        assert_eq!(neg.address, Address::Socket("127.0.0.1:80".parse().unwrap()));
        assert_eq!(neg.header, IPV4_HEADER);
        assert!(neg.surplus.is_empty());
    }

    #[test]
    fn test_need_more_reports_exact_shortfall() {
        let mut negotiator = HeaderNegotiator::new();
        let mut hook = ProtocolHook::Plain;
        let mut buf = ByteBuffer::from(&[0x03, 0x03, b'f'][..]);
        assert_eq!(negotiator.feed(&mut hook, &mut buf).unwrap(), NegotiateStep::NeedMore(4));
        assert!(buf.is_empty());

        buf.extend_from_slice(&[b'o', b'o', 0x01, 0xbb, b'G', b'E', b'T']);
        let NegotiateStep::Done(neg) = negotiator.feed(&mut hook, &mut buf).unwrap() else {
            panic!("header should be complete");
        };
        assert_eq!(neg.address, Address::Domain("foo".into(), 443));
        assert_eq!(neg.surplus, b"GET");
    }

    #[test]
    fn test_unknown_address_type_is_fatal() {
        let mut negotiator = HeaderNegotiator::new();
        let mut buf = ByteBuffer::from(&[0x05, 0, 0, 0][..]);
        assert!(matches!(
            negotiator.feed(&mut ProtocolHook::Plain, &mut buf),
            Err(Error::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_encrypted_header_with_payload() {
        let ctx = CryptoContext::from_password(CipherKind::Aes256Gcm, "negotiate");
        let mut enc = ProtocolHook::encryptor(&ctx).unwrap();
        let mut wire = ByteBuffer::from(&[&IPV4_HEADER[..], b"hello"].concat()[..]);
        enc.process(&mut wire).unwrap();

        let mut dec = ProtocolHook::decryptor(&ctx);
        let neg = feed_fragments(&mut dec, wire.get_const_buffer(), &[3, 11, 1]).unwrap().unwrap();
        assert_eq!(neg.address, Address::Socket("127.0.0.1:80".parse().unwrap()));
        assert_eq!(neg.surplus, b"hello");
    }

    #[tokio::test]
    async fn test_negotiate_over_peer() {
        let (a, mut b) = tokio::io::duplex(64);
        let ctl = PeerControl::new("client", Duration::from_secs(5), CancellationToken::new());
        let mut peer = Peer::new(a, Arc::clone(&ctl));

        tokio::spawn(async move {
            b.write_all(&[0x03, 0x03]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            b.write_all(&[b'f', b'o', b'o', 0x01, 0xbb, b'!']).await.unwrap();
            // Keep the stream open until the reader is done
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let neg = HeaderNegotiator::new()
            .negotiate(&mut ProtocolHook::Plain, &mut peer)
            .await
            .unwrap();
        assert_eq!(neg.address, Address::Domain("foo".into(), 443));
        assert_eq!(neg.surplus, b"!");
    }

    #[tokio::test]
    async fn test_negotiate_eof_before_header() {
        let (a, mut b) = tokio::io::duplex(64);
        let ctl = PeerControl::new("client", Duration::from_secs(5), CancellationToken::new());
        let mut peer = Peer::new(a, ctl);

        b.write_all(&[0x01, 10]).await.unwrap();
        drop(b);

        let err = HeaderNegotiator::new()
            .negotiate(&mut ProtocolHook::Plain, &mut peer)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    fn header_strategy() -> impl Strategy<Value = Vec<u8>> {
        prop_oneof![
            (any::<[u8; 4]>(), any::<u16>()).prop_map(|(ip, port)| {
                let mut h = vec![0x01];
                h.extend_from_slice(&ip);
                h.extend_from_slice(&port.to_be_bytes());
                h
            }),
            (any::<[u8; 16]>(), any::<u16>()).prop_map(|(ip, port)| {
                let mut h = vec![0x04];
                h.extend_from_slice(&ip);
                h.extend_from_slice(&port.to_be_bytes());
                h
            }),
            ("[a-z0-9.-]{1,64}", any::<u16>()).prop_map(|(domain, port)| {
                let mut h = vec![0x03, domain.len() as u8];
                h.extend_from_slice(domain.as_bytes());
                h.extend_from_slice(&port.to_be_bytes());
                h
            }),
        ]
    }

    proptest! {
        #[test]
        fn prop_fragmentation_does_not_change_result(
            header in header_strategy(),
            payload in prop::collection::vec(any::<u8>(), 0..64),
            cuts in prop::collection::vec(1usize..8, 1..16),
        ) {
            let wire = [header.clone(), payload.clone()].concat();
            let whole = feed_fragments(&mut ProtocolHook::Plain, &wire, &[wire.len()]).unwrap().unwrap();
            let pieces = feed_fragments(&mut ProtocolHook::Plain, &wire, &cuts).unwrap().unwrap();

            prop_assert_eq!(&whole.header, &header);
            prop_assert_eq!(&whole.address, &pieces.address);
            prop_assert_eq!(&pieces.header, &header);
            prop_assert_eq!(&pieces.surplus, &payload);
        }

        #[test]
        fn prop_encrypted_fragmentation_does_not_change_result(
            header in header_strategy(),
            cuts in prop::collection::vec(1usize..40, 1..16),
        ) {
            let ctx = CryptoContext::from_password(CipherKind::ChaCha20Poly1305, "prop");
            let mut enc = ProtocolHook::encryptor(&ctx).unwrap();
            let mut wire = ByteBuffer::from(&header[..]);
            enc.process(&mut wire).unwrap();

            let mut dec = ProtocolHook::decryptor(&ctx);
            let neg = feed_fragments(&mut dec, wire.get_const_buffer(), &cuts).unwrap().unwrap();
            let (expected, _) = Address::parse(&header).unwrap();
            prop_assert_eq!(neg.address, expected);
            prop_assert!(neg.surplus.is_empty());
        }
    }
}
