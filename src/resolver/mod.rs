//! Zone discovery: find the zone that owns a name by walking up its labels
//! and asking the server for an SOA at each suffix.

use std::str::FromStr;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RecordType};
use tracing::{debug, trace};

use crate::client::Exchange;
use crate::error::{ExchangeError, ProtocolError, ServerError};

/// Locates the authoritative zone for record names.
#[derive(Debug, Clone)]
pub struct ZoneResolver<E> {
    exchange: E,
    authenticate: bool,
}

impl<E> ZoneResolver<E> {
    /// SOA queries are signed unless [`ZoneResolver::with_authentication`]
    /// turns that off.
    pub fn new(exchange: E) -> Self {
        Self {
            exchange,
            authenticate: true,
        }
    }

    pub fn with_authentication(mut self, authenticate: bool) -> Self {
        self.authenticate = authenticate;
        self
    }
}

impl<E: Exchange> ZoneResolver<E> {
    /// Split a fully qualified name into its zone and the record name
    /// relative to that zone.
    ///
    /// The record name is empty when `fqdn` is the zone apex.
    pub async fn resolve(&self, fqdn: &str) -> Result<(Name, String), ExchangeError> {
        if !fqdn.ends_with('.') {
            return Err(ProtocolError::NotFullyQualified(fqdn.to_string()).into());
        }
        let name = Name::from_str(fqdn)?;

        let zone = self
            .find_zone(&name)
            .await?
            .ok_or_else(|| ProtocolError::NoAuthority(name.clone()))?;

        let record = relative_name(&name, &zone)?;
        debug!(%name, %zone, %record, "resolved zone");
        Ok((zone, record))
    }

    async fn find_zone(&self, name: &Name) -> Result<Option<Name>, ExchangeError> {
        let labels = name.num_labels();
        for keep in (1..=labels).rev() {
            let suffix = name.trim_to(usize::from(keep));
            trace!(%suffix, "looking for SOA");

            let response = self
                .exchange
                .exchange(soa_query(&suffix), self.authenticate)
                .await?;

            match response.response_code() {
                ResponseCode::NoError => {}
                ResponseCode::NXDomain => continue,
                code => return Err(ServerError::new(self.exchange.server(), code).into()),
            }

            // The first SOA or CNAME in the answer decides: an alias never
            // names a zone, even when the server follows it to one.
            let decisive = response.answers().iter().find(|record| {
                matches!(record.record_type(), RecordType::SOA | RecordType::CNAME)
            });
            match decisive {
                Some(record) if record.record_type() == RecordType::SOA => {
                    return Ok(Some(record.name().clone()));
                }
                Some(_) => trace!(%suffix, "suffix is an alias, moving up"),
                None => {}
            }
        }
        Ok(None)
    }
}

fn soa_query(name: &Name) -> Message {
    let mut message = Message::new();
    message
        .set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name.clone(), RecordType::SOA));
    message
}

/// The labels of `name` above `zone`, joined with dots.
fn relative_name(name: &Name, zone: &Name) -> Result<String, ProtocolError> {
    let labels: Vec<&[u8]> = name.iter().collect();
    let zone_labels: Vec<&[u8]> = zone.iter().collect();

    let shared = labels
        .iter()
        .rev()
        .zip(zone_labels.iter().rev())
        .take_while(|(a, b)| a.eq_ignore_ascii_case(b))
        .count();
    if shared == 0 {
        return Err(ProtocolError::NoSharedLabels {
            name: name.clone(),
            zone: zone.clone(),
        });
    }

    let prefix = &labels[..labels.len() - shared];
    if prefix.is_empty() {
        return Ok(String::new());
    }
    let mut relative = Name::from_labels(prefix.iter().copied())?;
    relative.set_fqdn(false);
    Ok(relative.to_string())
}
