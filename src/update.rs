//! Dynamic update (RFC 2136) messages and the record-set operations built on
//! them.

use std::fmt;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use tracing::{debug, info};

use crate::client::Exchange;
use crate::error::{ExchangeError, ProtocolError, ServerError};
use crate::rr::{RecordSet, RecordValue};

/// An update message for one zone.
///
/// The zone is carried in the question section as an SOA query and the
/// changes in the authority section, in the order they are added.
#[derive(Debug, Clone)]
pub struct Update {
    message: Message,
    statements: Vec<String>,
}

impl Update {
    pub fn new(zone: &Name) -> Self {
        let mut message = Message::new();
        message
            .set_id(rand::random())
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Update)
            .add_query(Query::query(zone.clone(), RecordType::SOA));
        Self {
            message,
            statements: Vec::new(),
        }
    }

    /// Add one record to its RRset.
    pub fn insert(&mut self, rrset: &RecordSet, value: &RecordValue) -> &mut Self {
        self.statements.push(format!("add {}", rrset.encode(value)));
        self.message.add_name_server(rrset.record(value));
        self
    }

    /// Delete one record from an RRset, matched on name, type and value.
    pub fn remove(&mut self, name: &Name, value: &RecordValue) -> &mut Self {
        self.statements
            .push(format!("delete {name} {} {value}", value.record_type()));
        let mut record = Record::from_rdata(name.clone(), 0, value.to_rdata());
        record.set_dns_class(DNSClass::NONE);
        self.message.add_name_server(record);
        self
    }

    /// Delete a whole RRset.
    pub fn remove_rrset(&mut self, name: &Name, record_type: RecordType) -> &mut Self {
        self.statements.push(format!("delete {name} {record_type}"));
        let mut record = Record::from_rdata(name.clone(), 0, RData::Update0(record_type));
        record.set_dns_class(DNSClass::ANY);
        self.message.add_name_server(record);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.statements.join("; "))
    }
}

/// Join a zone and a record name relative to it.
///
/// An empty record name refers to the zone apex.
pub fn owner(zone: &Name, record: &str) -> Result<Name, ProtocolError> {
    let record = record.trim_end_matches('.');
    if record.is_empty() && zone.is_root() {
        return Err(ProtocolError::MalformedRecord {
            text: String::new(),
            reason: "zone and record name are both empty".into(),
        });
    }
    if record.is_empty() {
        return Ok(zone.clone());
    }
    Ok(Name::from_ascii(record)?.append_domain(zone)?)
}

/// Read and write whole record sets on the server.
#[derive(Debug, Clone)]
pub struct RecordSetUpdater<E> {
    exchange: E,
}

impl<E> RecordSetUpdater<E> {
    pub fn new(exchange: E) -> Self {
        Self { exchange }
    }
}

impl<E: Exchange> RecordSetUpdater<E> {
    /// The current records of `record_type` at `name`, or `None` if the name
    /// or the RRset does not exist.
    pub async fn read(
        &self,
        name: &Name,
        record_type: RecordType,
    ) -> Result<Option<RecordSet>, ExchangeError> {
        let mut message = Message::new();
        message
            .set_id(rand::random())
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true)
            .add_query(Query::query(name.clone(), record_type));

        let response = self.exchange.exchange(message, true).await?;
        match response.response_code() {
            ResponseCode::NoError => {}
            ResponseCode::NXDomain => return Ok(None),
            code => {
                return Err(ServerError::new(self.exchange.server(), code)
                    .with_record(format!("{name} {record_type}"))
                    .into());
            }
        }

        Ok(RecordSet::from_records(
            name,
            record_type,
            response.answers(),
        )?)
    }

    /// Replace whatever RRset exists at the name with `rrset`.
    pub async fn create(&self, zone: &Name, rrset: &RecordSet) -> Result<(), ExchangeError> {
        let mut update = Update::new(zone);
        update.remove_rrset(rrset.name(), rrset.record_type());
        for value in rrset.values() {
            update.insert(rrset, value);
        }
        self.apply(update).await
    }

    /// Move the server from `old` to `new`, sending only the differences.
    ///
    /// A TTL change re-inserts every value so the new TTL applies to the
    /// whole set.
    pub async fn update(
        &self,
        zone: &Name,
        old: &RecordSet,
        new: &RecordSet,
    ) -> Result<(), ExchangeError> {
        let mut update = Update::new(zone);

        if old.name() != new.name() || old.record_type() != new.record_type() {
            update.remove_rrset(old.name(), old.record_type());
            for value in new.values() {
                update.insert(new, value);
            }
            return self.apply(update).await;
        }

        for value in old.values().iter().filter(|value| !new.contains(value)) {
            update.remove(old.name(), value);
        }

        let ttl_changed = old.ttl() != new.ttl();
        for value in new
            .values()
            .iter()
            .filter(|value| ttl_changed || !old.contains(value))
        {
            update.insert(new, value);
        }

        if update.is_empty() {
            debug!(name = %new.name(), "record set unchanged");
            return Ok(());
        }
        self.apply(update).await
    }

    /// Remove the RRset of `record_type` at `name`.
    pub async fn delete(
        &self,
        zone: &Name,
        name: &Name,
        record_type: RecordType,
    ) -> Result<(), ExchangeError> {
        let mut update = Update::new(zone);
        update.remove_rrset(name, record_type);
        self.apply(update).await
    }

    async fn apply(&self, update: Update) -> Result<(), ExchangeError> {
        let statements = update.to_string();
        let response = self.exchange.exchange(update.into_message(), true).await?;
        match response.response_code() {
            ResponseCode::NoError => {
                info!(%statements, "update applied");
                Ok(())
            }
            code => Err(ServerError::new(self.exchange.server(), code)
                .with_record(statements)
                .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    use super::*;
    use crate::rr::TimeToLive;

    fn name(text: &str) -> Name {
        Name::from_str(text).unwrap()
    }

    #[test]
    fn update_sections() {
        let zone = name("example.com.");
        let owner = name("www.example.com.");
        let mut rrset = RecordSet::new(owner.clone(), RecordType::A, TimeToLive::from_secs(300));
        let value = RecordValue::A(Ipv4Addr::new(192, 0, 2, 1));
        rrset.push(value.clone()).unwrap();

        let mut update = Update::new(&zone);
        update
            .remove_rrset(&owner, RecordType::A)
            .insert(&rrset, &value)
            .remove(&owner, &RecordValue::A(Ipv4Addr::new(192, 0, 2, 9)));

        let message = update.message();
        assert_eq!(message.op_code(), OpCode::Update);
        assert_eq!(message.queries()[0].name(), &zone);
        assert_eq!(message.queries()[0].query_type(), RecordType::SOA);

        let changes = message.name_servers();
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].dns_class(), DNSClass::ANY);
        assert_eq!(changes[0].record_type(), RecordType::A);
        assert_eq!(changes[0].ttl(), 0);
        assert_eq!(changes[1].dns_class(), DNSClass::IN);
        assert_eq!(changes[1].ttl(), 300);
        assert_eq!(changes[2].dns_class(), DNSClass::NONE);
        assert_eq!(changes[2].ttl(), 0);

        // The update survives serialization.
        let parsed = Message::from_vec(&message.to_vec().unwrap()).unwrap();
        assert_eq!(parsed.name_servers().len(), 3);

        assert_eq!(
            update.to_string(),
            "delete www.example.com. A; add www.example.com. 300 A 192.0.2.1; \
             delete www.example.com. A 192.0.2.9"
        );
    }

    #[test]
    fn owners_join_zone_and_record() {
        let zone = name("example.com.");
        assert_eq!(owner(&zone, "www").unwrap(), name("www.example.com."));
        assert_eq!(owner(&zone, "").unwrap(), zone);
        assert_eq!(owner(&zone, "a.b").unwrap(), name("a.b.example.com."));
        assert!(owner(&Name::root(), "").is_err());
    }
}
