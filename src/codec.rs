use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::TransportError;

/// The wire codec for raw DNS messages defined in RFC 1035.
///
/// Messages are carried as opaque bytes so that transaction signatures can be
/// computed and verified over exactly what crossed the wire. Connection-oriented
/// transports prefix each message with its two byte length (RFC 1035 §4.2.2);
/// datagrams carry exactly one message.
#[derive(Debug, Clone, Copy)]
pub struct WireCodec {
    length_delimited: bool,
}

impl WireCodec {
    pub fn stream() -> Self {
        Self {
            length_delimited: true,
        }
    }

    pub fn datagram() -> Self {
        Self {
            length_delimited: false,
        }
    }

    fn parse_length(&mut self, src: &mut BytesMut) -> Option<usize> {
        if src.len() < 2 {
            // Not enough data to read length marker
            return None;
        }

        let mut length_bytes = [0u8; 2];
        length_bytes.copy_from_slice(&src[..2]);
        let length = u16::from_be_bytes(length_bytes) as usize;

        if src.len() < (length + 2) {
            src.reserve((length + 2) - src.len());
            // Not enough data to read entire message
            return None;
        }
        trace!("decode len={length}");
        src.advance(2);
        Some(length)
    }
}

impl Decoder for WireCodec {
    type Item = Bytes;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let length = if self.length_delimited {
            match self.parse_length(src) {
                Some(length) => length,
                None => return Ok(None),
            }
        } else {
            src.len()
        };

        if length == 0 && src.is_empty() {
            // No data to decode.
            return Ok(None);
        }

        trace!("decode buffer={}", src.len());
        Ok(Some(src.split_to(length).freeze()))
    }
}

impl Encoder<Bytes> for WireCodec {
    type Error = TransportError;

    fn encode(&mut self, message: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let n = message.len();
        if self.length_delimited {
            let length = u16::try_from(n).map_err(|_| {
                TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "message exceeds 65535 bytes",
                ))
            })?;
            dst.reserve(n + 2);
            dst.put_u16(length);
        } else {
            dst.reserve(n);
        }

        trace!("encode len={n}");
        dst.put(message);
        Ok(())
    }
}

/// Read the message id from the first two bytes of a wire message.
pub fn message_id(wire: &[u8]) -> Option<u16> {
    wire.get(..2).map(|id| u16::from_be_bytes([id[0], id[1]]))
}
