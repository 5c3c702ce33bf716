//! Target name resolution.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::protocol::Address;

/// Resolves a target address into an ordered list of candidates.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `host:port`. An empty list is an error.
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>>;
}

/// Resolver backed by the system's `getaddrinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| Error::Resolve(format!("{}:{}: {}", host, port, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::Resolve(format!("{}:{}: no addresses", host, port)));
        }
        Ok(addrs)
    }
}

/// Candidates for `address`, consulting `resolver` only for domain names.
pub async fn resolve_address(resolver: &dyn Resolver, address: &Address) -> Result<Vec<SocketAddr>> {
    match address {
        Address::Socket(addr) => Ok(vec![*addr]),
        Address::Domain(host, port) => resolver.resolve(host, *port).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unreachable;

    #[async_trait]
    impl Resolver for Unreachable {
        async fn resolve(&self, host: &str, _port: u16) -> Result<Vec<SocketAddr>> {
            Err(Error::Resolve(host.to_string()))
        }
    }

    #[tokio::test]
    async fn test_literal_address_skips_resolver() {
        let addr: SocketAddr = "10.0.0.1:443".parse().unwrap();
        let candidates = resolve_address(&Unreachable, &Address::Socket(addr)).await.unwrap();
        assert_eq!(candidates, vec![addr]);
    }

    #[tokio::test]
    async fn test_domain_uses_resolver() {
        let err = resolve_address(&Unreachable, &Address::Domain("example.invalid".into(), 80))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Resolve(_)));
    }

    #[tokio::test]
    async fn test_system_resolver_localhost() {
        let addrs = SystemResolver.resolve("localhost", 8080).await.unwrap();
        assert!(addrs.iter().all(|a| a.port() == 8080 && a.ip().is_loopback()));
    }
}
