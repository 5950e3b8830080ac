//! Transaction signatures (RFC 8945).
//!
//! Record layout, the digest input and stripping a received signature all
//! come from hickory's TSIG support. Keys only compute and check MACs, so a
//! static HMAC key and a negotiated security context sign the same way.
//!
//! Verification works on the bytes received rather than a re-serialized
//! message, so the digest covers exactly what crossed the wire.

use hickory_proto::ProtoError;
use hickory_proto::dnssec::rdata::tsig::{
    TSIG, TsigAlgorithm, make_tsig_record, message_tbs, signed_bitmessage_to_buf,
};
use hickory_proto::dnssec::rdata::DNSSECRData;
use hickory_proto::op::Message;
use hickory_proto::rr::{Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecoder, BinEncodable};
use tracing::trace;

use crate::error::{AuthenticationError, ExchangeError, ProtocolError, TsigErrorCode};

/// Allowed clock skew, in seconds, for every signature this crate produces.
pub const FUDGE: u16 = 300;

/// Anything that can produce and check TSIG message authentication codes.
pub trait TsigKey: Send + Sync {
    /// Owner name of the TSIG record.
    fn key_name(&self) -> &Name;

    fn tsig_algorithm(&self) -> TsigAlgorithm;

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, AuthenticationError>;

    fn verify(&self, data: &[u8], mac: &[u8]) -> Result<(), AuthenticationError>;
}

/// A message with its transaction signature appended.
#[derive(Debug, Clone)]
pub struct Signed {
    pub wire: Vec<u8>,
    pub mac: Vec<u8>,
    pub time_signed: u64,
}

/// The outcome of checking a response for a transaction signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verified {
    Signed { mac: Vec<u8> },
    Unsigned,
}

/// Sign `message` and serialize it with the TSIG record last.
///
/// `prior_mac` is the MAC of the request when signing a response, and `None`
/// when signing a request.
pub fn sign(
    message: &Message,
    key: &dyn TsigKey,
    prior_mac: Option<&[u8]>,
    time_signed: u64,
) -> Result<Signed, ExchangeError> {
    let pre_tsig = TSIG::new(
        key.tsig_algorithm(),
        time_signed,
        FUDGE,
        Vec::new(),
        message.id(),
        0,
        Vec::new(),
    );
    let tbs = message_tbs(prior_mac, message, &pre_tsig, key.key_name())?;
    let mac = key.sign(&tbs)?;

    let mut signed = message.clone();
    signed.add_tsig(make_tsig_record(
        key.key_name().clone(),
        pre_tsig.set_mac(mac.clone()),
    ));
    let wire = signed.to_vec()?;

    trace!(key = %key.key_name(), time_signed, "signed message");
    Ok(Signed {
        wire,
        mac,
        time_signed,
    })
}

/// Check the transaction signature on a message, if it carries one.
pub fn verify(
    message: &[u8],
    key: &dyn TsigKey,
    prior_mac: Option<&[u8]>,
    now: u64,
) -> Result<Verified, ExchangeError> {
    if !is_signed(message)? {
        return Ok(Verified::Unsigned);
    }

    let (signed_data, record) = signed_bitmessage_to_buf(prior_mac, message, true)?;
    let tsig = tsig_of(&record)?;

    // Algorithm names compare case-insensitively; hickory keeps unknown
    // spellings such as a lowercase `hmac-md5.sig-alg.reg.int` as written.
    if record.name() != key.key_name()
        || tsig.algorithm().to_name() != key.tsig_algorithm().to_name()
    {
        return Err(AuthenticationError::Tsig(TsigErrorCode::BadKey).into());
    }

    let error = error_code(tsig)?;
    if error != 0 {
        return Err(AuthenticationError::Tsig(TsigErrorCode::from(error)).into());
    }

    key.verify(&signed_data, tsig.mac())?;

    if now.abs_diff(tsig.time()) > u64::from(tsig.fudge()) {
        return Err(AuthenticationError::TimeSkew {
            signed: tsig.time(),
            now,
            fudge: tsig.fudge(),
        }
        .into());
    }

    Ok(Verified::Signed {
        mac: tsig.mac().to_vec(),
    })
}

/// Whether a message ends in a TSIG record.
pub fn is_signed(message: &[u8]) -> Result<bool, ProtocolError> {
    Ok(signature(message)?.is_some())
}

/// The key a message was signed with, if it was signed.
pub fn key_name(message: &[u8]) -> Result<Option<Name>, ProtocolError> {
    Ok(signature(message)?.map(|record| record.name().clone()))
}

fn signature(message: &[u8]) -> Result<Option<Record>, ProtocolError> {
    let mut message = Message::from_vec(message)?;
    Ok(message
        .take_signature()
        .into_iter()
        .find(|record| record.record_type() == RecordType::TSIG))
}

fn tsig_of(record: &Record) -> Result<&TSIG, ProtocolError> {
    match record.data() {
        RData::DNSSEC(DNSSECRData::TSIG(tsig)) => Ok(tsig),
        _ => Err(ProtocolError::Wire("signature record is not a TSIG")),
    }
}

/// The error field of a TSIG record, read back from its rdata.
fn error_code(tsig: &TSIG) -> Result<u16, ProtoError> {
    let rdata = tsig.to_bytes()?;
    let mut decoder = BinDecoder::new(&rdata);
    TsigAlgorithm::read(&mut decoder)?;
    // time signed and fudge
    decoder.read_slice(8)?;
    let mac_len = decoder.read_u16()?.unverified();
    decoder.read_slice(usize::from(mac_len))?;
    // original id
    decoder.read_u16()?;
    Ok(decoder.read_u16()?.unverified())
}
