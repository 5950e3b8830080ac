use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::UdpSocket;
use tokio_util::udp::UdpFramed;
use tracing::trace;

use crate::codec::{WireCodec, message_id};
use crate::error::TransportError;

/// Send one datagram from a fresh ephemeral socket and wait for the matching
/// reply.
///
/// Datagrams from other peers, or carrying another id, are discarded.
pub(super) async fn exchange(destination: SocketAddr, payload: Bytes) -> Result<Bytes, TransportError> {
    let bind: SocketAddr = if destination.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    let id = message_id(&payload);

    let mut framed = UdpFramed::new(socket, WireCodec::datagram());
    framed.send((payload, destination)).await?;

    loop {
        match framed.next().await {
            Some(Ok((response, from))) if from == destination && message_id(&response) == id => {
                return Ok(response);
            }
            Some(Ok((response, from))) => {
                trace!(%from, id = ?message_id(&response), "discarding unexpected datagram");
            }
            Some(Err(error)) => return Err(error),
            None => return Err(TransportError::Closed),
        }
    }
}
