//! TKEY record data (RFC 2930).
//!
//! hickory has no TKEY type, so the rdata travels as an unknown record and is
//! encoded here with hickory's binary encoder and decoder.

use hickory_proto::ProtoError;
use hickory_proto::rr::rdata::NULL;
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncodable, BinEncoder};

use crate::error::ProtocolError;

pub const TKEY_TYPE: u16 = 249;

pub fn record_type() -> RecordType {
    RecordType::from(TKEY_TYPE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ServerAssignment,
    DiffieHellman,
    GssApi,
    ResolverAssignment,
    Delete,
    Other(u16),
}

impl From<u16> for Mode {
    fn from(value: u16) -> Self {
        match value {
            1 => Mode::ServerAssignment,
            2 => Mode::DiffieHellman,
            3 => Mode::GssApi,
            4 => Mode::ResolverAssignment,
            5 => Mode::Delete,
            other => Mode::Other(other),
        }
    }
}

impl From<Mode> for u16 {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::ServerAssignment => 1,
            Mode::DiffieHellman => 2,
            Mode::GssApi => 3,
            Mode::ResolverAssignment => 4,
            Mode::Delete => 5,
            Mode::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TKey {
    pub algorithm: Name,
    pub inception: u32,
    pub expiration: u32,
    pub mode: Mode,
    pub error: u16,
    pub key: Vec<u8>,
    pub other: Vec<u8>,
}

fn emit_sized(
    encoder: &mut BinEncoder<'_>,
    data: &[u8],
    field: &str,
) -> Result<(), ProtoError> {
    let len = u16::try_from(data.len())
        .map_err(|_| ProtoError::from(format!("TKEY {field} longer than 65535 bytes")))?;
    encoder.emit_u16(len)?;
    encoder.emit_vec(data)
}

impl BinEncodable for TKey {
    fn emit(&self, encoder: &mut BinEncoder<'_>) -> Result<(), ProtoError> {
        // The algorithm name is never compressed.
        self.algorithm.emit_as_canonical(encoder, true)?;
        encoder.emit_u32(self.inception)?;
        encoder.emit_u32(self.expiration)?;
        encoder.emit_u16(u16::from(self.mode))?;
        encoder.emit_u16(self.error)?;
        emit_sized(encoder, &self.key, "key")?;
        emit_sized(encoder, &self.other, "other data")
    }
}

impl<'r> BinDecodable<'r> for TKey {
    fn read(decoder: &mut BinDecoder<'r>) -> Result<Self, ProtoError> {
        let algorithm = Name::read(decoder)?;
        let inception = decoder.read_u32()?.unverified();
        let expiration = decoder.read_u32()?.unverified();
        let mode = Mode::from(decoder.read_u16()?.unverified());
        let error = decoder.read_u16()?.unverified();
        let key_len = decoder.read_u16()?.unverified();
        let key = decoder.read_vec(usize::from(key_len))?.unverified();
        let other_len = decoder.read_u16()?.unverified();
        let other = decoder.read_vec(usize::from(other_len))?.unverified();

        Ok(Self {
            algorithm,
            inception,
            expiration,
            mode,
            error,
            key,
            other,
        })
    }
}

impl TKey {
    /// Decode exactly one TKEY rdata.
    pub fn from_rdata(rdata: &[u8]) -> Result<Self, ProtocolError> {
        let mut decoder = BinDecoder::new(rdata);
        let tkey = Self::read(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(ProtocolError::Wire("trailing bytes after TKEY record"));
        }
        Ok(tkey)
    }

    /// Wrap as a class ANY record owned by `key_name`.
    pub fn into_record(self, key_name: Name) -> Result<Record, ProtocolError> {
        let rdata = RData::Unknown {
            code: record_type(),
            rdata: NULL::with(self.to_bytes()?),
        };
        let mut record = Record::from_rdata(key_name, 0, rdata);
        record.set_dns_class(DNSClass::ANY);
        Ok(record)
    }

    /// Extract TKEY data from a record, whichever way hickory decoded it.
    pub fn from_record(record: &Record) -> Option<Result<Self, ProtocolError>> {
        if u16::from(record.record_type()) != TKEY_TYPE {
            return None;
        }
        Some(
            record
                .data()
                .to_bytes()
                .map_err(ProtocolError::Dns)
                .and_then(|rdata| Self::from_rdata(&rdata)),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use hickory_proto::op::Message;

    use super::*;

    fn tkey() -> TKey {
        TKey {
            algorithm: Name::from_str("gss-tsig.").unwrap(),
            inception: 1_700_000_000,
            expiration: 1_700_086_400,
            mode: Mode::GssApi,
            error: 0,
            key: vec![0x60, 0x82, 0x01, 0x02],
            other: Vec::new(),
        }
    }

    #[test]
    fn survives_a_message_round_trip() {
        let key_name = Name::from_str("abc.sig-ns1.example.com.").unwrap();
        let mut message = Message::new();
        message.add_additional(tkey().into_record(key_name.clone()).unwrap());

        let parsed = Message::from_vec(&message.to_vec().unwrap()).unwrap();
        let record = parsed
            .additionals()
            .iter()
            .find(|record| u16::from(record.record_type()) == TKEY_TYPE)
            .expect("tkey record");
        assert_eq!(record.name(), &key_name);
        assert_eq!(record.dns_class(), DNSClass::ANY);
        assert_eq!(TKey::from_record(record).unwrap().unwrap(), tkey());
    }

    #[test]
    fn algorithm_name_is_not_compressed() {
        let bytes = tkey().to_bytes().unwrap();
        assert_eq!(&bytes[..10], b"\x08gss-tsig\x00");
    }

    #[test]
    fn rejects_short_and_padded_rdata() {
        let bytes = tkey().to_bytes().unwrap();
        assert!(TKey::from_rdata(&bytes[..bytes.len() - 1]).is_err());

        let mut padded = bytes;
        padded.push(0);
        assert!(matches!(
            TKey::from_rdata(&padded),
            Err(ProtocolError::Wire(_))
        ));
    }

    #[test]
    fn oversized_tokens_are_refused() {
        let tkey = TKey {
            key: vec![0; usize::from(u16::MAX) + 1],
            ..tkey()
        };
        assert!(tkey.into_record(Name::root()).is_err());
    }

    #[test]
    fn modes() {
        assert_eq!(Mode::from(3), Mode::GssApi);
        assert_eq!(u16::from(Mode::Delete), 5);
        assert_eq!(Mode::from(42), Mode::Other(42));
    }
}
