use std::net::SocketAddr;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::trace;

use crate::codec::{WireCodec, message_id};
use crate::error::TransportError;

/// Send one length-prefixed message over a fresh stream and read frames until
/// the response with the same id arrives.
pub(super) async fn exchange(destination: SocketAddr, payload: Bytes) -> Result<Bytes, TransportError> {
    let stream = TcpStream::connect(destination).await?;
    stream.set_nodelay(true)?;
    let id = message_id(&payload);

    let mut framed = Framed::new(stream, WireCodec::stream());
    framed.send(payload).await?;

    while let Some(frame) = framed.next().await {
        let response = frame?;
        if message_id(&response) == id {
            return Ok(response);
        }
        trace!(id = ?message_id(&response), "discarding unexpected frame");
    }
    Err(TransportError::Closed)
}
