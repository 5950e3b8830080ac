use std::fmt;
use std::net::SocketAddr;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::BoxFuture;
use tracing::trace;

use super::config::{Family, Transport};
use super::{tcp, udp};
use crate::error::TransportError;

/// One serialized message to deliver to a server, and the transport to use.
#[derive(Clone)]
pub struct WireRequest {
    pub server: String,
    pub port: u16,
    pub transport: Transport,
    pub payload: Bytes,
}

impl WireRequest {
    /// The id of the message being sent.
    pub fn id(&self) -> Option<u16> {
        crate::codec::message_id(&self.payload)
    }
}

impl fmt::Debug for WireRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireRequest")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("transport", &self.transport)
            .field("len", &self.payload.len())
            .finish()
    }
}

/// Delivers [`WireRequest`]s over real sockets.
///
/// Each call opens a fresh socket or stream, sends one message and waits for
/// the response carrying the same id. Deadlines are applied by the caller.
#[derive(Debug, Clone, Default)]
pub struct NetworkTransport {
    _private: (),
}

impl NetworkTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl tower::Service<WireRequest> for NetworkTransport {
    type Response = Bytes;
    type Error = TransportError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: WireRequest) -> Self::Future {
        Box::pin(async move {
            let address = resolve(&req.server, req.port, req.transport.family()).await?;
            trace!(%address, transport = %req.transport, "delivering message");
            if req.transport.is_datagram() {
                udp::exchange(address, req.payload).await
            } else {
                tcp::exchange(address, req.payload).await
            }
        })
    }
}

async fn resolve(host: &str, port: u16, family: Family) -> Result<SocketAddr, TransportError> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    let mut addresses = tokio::net::lookup_host((bare, port)).await?;
    addresses
        .find(|address| match family {
            Family::Any => true,
            Family::V4 => address.is_ipv4(),
            Family::V6 => address.is_ipv6(),
        })
        .ok_or_else(|| TransportError::NoAddress {
            host: host.to_string(),
            family: family.name(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_literal_addresses_by_family() {
        let v4 = resolve("127.0.0.1", 53, Family::V4).await.unwrap();
        assert_eq!(v4, "127.0.0.1:53".parse().unwrap());

        let v6 = resolve("[::1]", 5353, Family::Any).await.unwrap();
        assert_eq!(v6, "[::1]:5353".parse().unwrap());

        assert!(matches!(
            resolve("127.0.0.1", 53, Family::V6).await,
            Err(TransportError::NoAddress { family: "ipv6", .. })
        ));
    }
}
