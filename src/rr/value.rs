use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use hickory_proto::rr::rdata::{self, MX, NULL, SRV, TXT};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::BinEncodable;

use super::text::{self, normalize_ipv4};
use super::ttl::TimeToLive;
use crate::error::ProtocolError;

const MAX_CAA_TAG_LEN: usize = u8::MAX as usize;

/// The typed value of one resource record, for the record types the update
/// client manages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordValue {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(Name),
    Mx {
        preference: u16,
        exchange: Name,
    },
    Ns(Name),
    Ptr(Name),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: Name,
    },
    Txt(Vec<String>),
    Caa {
        flags: u8,
        tag: String,
        value: String,
    },
}

impl RecordValue {
    pub fn record_type(&self) -> RecordType {
        match self {
            RecordValue::A(_) => RecordType::A,
            RecordValue::Aaaa(_) => RecordType::AAAA,
            RecordValue::Cname(_) => RecordType::CNAME,
            RecordValue::Mx { .. } => RecordType::MX,
            RecordValue::Ns(_) => RecordType::NS,
            RecordValue::Ptr(_) => RecordType::PTR,
            RecordValue::Srv { .. } => RecordType::SRV,
            RecordValue::Txt(_) => RecordType::TXT,
            RecordValue::Caa { .. } => RecordType::CAA,
        }
    }

    /// Wire record data for this value.
    pub fn to_rdata(&self) -> RData {
        match self {
            RecordValue::A(address) => RData::A(rdata::A(*address)),
            RecordValue::Aaaa(address) => RData::AAAA(rdata::AAAA(*address)),
            RecordValue::Cname(name) => RData::CNAME(rdata::CNAME(name.clone())),
            RecordValue::Mx {
                preference,
                exchange,
            } => RData::MX(MX::new(*preference, exchange.clone())),
            RecordValue::Ns(name) => RData::NS(rdata::NS(name.clone())),
            RecordValue::Ptr(name) => RData::PTR(rdata::PTR(name.clone())),
            RecordValue::Srv {
                priority,
                weight,
                port,
                target,
            } => RData::SRV(SRV::new(*priority, *weight, *port, target.clone())),
            RecordValue::Txt(strings) => RData::TXT(TXT::new(strings.clone())),
            // Carried as raw bytes so the tag and value reach the wire as given.
            // The tag length is one octet; anything past 255 bytes is cut.
            RecordValue::Caa { flags, tag, value } => {
                let tag = &tag.as_bytes()[..tag.len().min(MAX_CAA_TAG_LEN)];
                let tag_len = u8::try_from(tag.len()).unwrap_or(u8::MAX);
                let mut raw = Vec::with_capacity(2 + tag.len() + value.len());
                raw.push(*flags);
                raw.push(tag_len);
                raw.extend_from_slice(tag);
                raw.extend_from_slice(value.as_bytes());
                RData::Unknown {
                    code: RecordType::CAA,
                    rdata: NULL::with(raw),
                }
            }
        }
    }

    pub fn from_rdata(data: &RData) -> Result<Self, ProtocolError> {
        let value = match data {
            RData::A(address) => RecordValue::A(address.0),
            RData::AAAA(address) => RecordValue::Aaaa(address.0),
            RData::CNAME(name) => RecordValue::Cname(name.0.clone()),
            RData::MX(mx) => RecordValue::Mx {
                preference: mx.preference(),
                exchange: mx.exchange().clone(),
            },
            RData::NS(name) => RecordValue::Ns(name.0.clone()),
            RData::PTR(name) => RecordValue::Ptr(name.0.clone()),
            RData::SRV(srv) => RecordValue::Srv {
                priority: srv.priority(),
                weight: srv.weight(),
                port: srv.port(),
                target: srv.target().clone(),
            },
            RData::TXT(txt) => RecordValue::Txt(
                txt.txt_data()
                    .iter()
                    .map(|data| String::from_utf8_lossy(data).into_owned())
                    .collect(),
            ),
            other if other.record_type() == RecordType::CAA => caa_from_wire(&other.to_bytes()?)?,
            other => {
                return Err(ProtocolError::MalformedRecord {
                    text: other.to_string(),
                    reason: format!("unsupported record type {}", other.record_type()),
                });
            }
        };
        Ok(value)
    }

    /// Parse the presentation form of a value, e.g. `10 mail.example.com.`
    /// for an MX record.
    pub fn parse(record_type: RecordType, input: &str) -> Result<Self, ProtocolError> {
        let fields = text::tokenize(input)?;
        let malformed = |reason: &str| ProtocolError::MalformedRecord {
            text: input.to_string(),
            reason: reason.to_string(),
        };
        let expect = |count: usize| {
            if fields.len() == count {
                Ok(())
            } else {
                Err(malformed(&format!(
                    "{record_type} takes {count} field(s), got {}",
                    fields.len()
                )))
            }
        };
        let number = |field: &str| {
            field
                .parse::<u16>()
                .map_err(|_| malformed(&format!("{field:?} is not a 16-bit number")))
        };

        let value = match record_type {
            RecordType::A => {
                expect(1)?;
                RecordValue::A(
                    normalize_ipv4(&fields[0])
                        .parse()
                        .map_err(|_| malformed("invalid IPv4 address"))?,
                )
            }
            RecordType::AAAA => {
                expect(1)?;
                RecordValue::Aaaa(
                    fields[0]
                        .parse()
                        .map_err(|_| malformed("invalid IPv6 address"))?,
                )
            }
            RecordType::CNAME => {
                expect(1)?;
                RecordValue::Cname(fqdn(&fields[0])?)
            }
            RecordType::NS => {
                expect(1)?;
                RecordValue::Ns(fqdn(&fields[0])?)
            }
            RecordType::PTR => {
                expect(1)?;
                RecordValue::Ptr(fqdn(&fields[0])?)
            }
            RecordType::MX => {
                expect(2)?;
                RecordValue::Mx {
                    preference: number(&fields[0])?,
                    exchange: fqdn(&fields[1])?,
                }
            }
            RecordType::SRV => {
                expect(4)?;
                RecordValue::Srv {
                    priority: number(&fields[0])?,
                    weight: number(&fields[1])?,
                    port: number(&fields[2])?,
                    target: fqdn(&fields[3])?,
                }
            }
            RecordType::TXT => {
                if fields.is_empty() {
                    return Err(malformed("TXT needs at least one string"));
                }
                RecordValue::Txt(fields)
            }
            RecordType::CAA => {
                expect(3)?;
                let flags = fields[0]
                    .parse::<u8>()
                    .map_err(|_| malformed("CAA flags must be 0-255"))?;
                if fields[1].is_empty() || !fields[1].bytes().all(|b| b.is_ascii_alphanumeric()) {
                    return Err(malformed("CAA tag must be alphanumeric"));
                }
                if fields[1].len() > MAX_CAA_TAG_LEN {
                    return Err(malformed("CAA tag is longer than 255 bytes"));
                }
                RecordValue::Caa {
                    flags,
                    tag: fields[1].to_ascii_lowercase(),
                    value: fields[2].clone(),
                }
            }
            other => return Err(malformed(&format!("unsupported record type {other}"))),
        };
        Ok(value)
    }
}

impl fmt::Display for RecordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordValue::A(address) => write!(f, "{address}"),
            RecordValue::Aaaa(address) => write!(f, "{address}"),
            RecordValue::Cname(name) | RecordValue::Ns(name) | RecordValue::Ptr(name) => {
                write!(f, "{name}")
            }
            RecordValue::Mx {
                preference,
                exchange,
            } => write!(f, "{preference} {exchange}"),
            RecordValue::Srv {
                priority,
                weight,
                port,
                target,
            } => write!(f, "{priority} {weight} {port} {target}"),
            RecordValue::Txt(strings) => {
                for (i, string) in strings.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    text::write_quoted(f, string)?;
                }
                Ok(())
            }
            RecordValue::Caa { flags, tag, value } => {
                write!(f, "{flags} {tag} ")?;
                text::write_quoted(f, value)
            }
        }
    }
}

fn fqdn(text: &str) -> Result<Name, ProtocolError> {
    if !text.ends_with('.') {
        return Err(ProtocolError::NotFullyQualified(text.to_string()));
    }
    Ok(Name::from_str(text)?)
}

fn caa_from_wire(raw: &[u8]) -> Result<RecordValue, ProtocolError> {
    let malformed = |reason: &str| ProtocolError::MalformedRecord {
        text: format!("{raw:02x?}"),
        reason: reason.to_string(),
    };
    let [flags, tag_len, rest @ ..] = raw else {
        return Err(malformed("CAA record too short"));
    };
    let tag_len = usize::from(*tag_len);
    if rest.len() < tag_len {
        return Err(malformed("CAA tag runs past the record"));
    }
    let (tag, value) = rest.split_at(tag_len);
    Ok(RecordValue::Caa {
        flags: *flags,
        tag: String::from_utf8_lossy(tag).into_owned(),
        value: String::from_utf8_lossy(value).into_owned(),
    })
}

/// Extract the typed value and TTL of a wire record, which must be of the
/// `expected` type.
pub fn decode(
    record: &Record,
    expected: RecordType,
) -> Result<(RecordValue, TimeToLive), ProtocolError> {
    if record.record_type() != expected {
        return Err(ProtocolError::UnexpectedRecordType {
            expected,
            actual: record.record_type(),
        });
    }
    let value = RecordValue::from_rdata(record.data())?;
    Ok((value, TimeToLive::from(record.ttl())))
}
