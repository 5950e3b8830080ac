use hickory_proto::rr::{DNSClass, Name, Record, RecordType};

use super::text;
use super::ttl::TimeToLive;
use super::value::{RecordValue, decode};
use crate::error::ProtocolError;

/// A set of records sharing owner name and type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSet {
    name: Name,
    record_type: RecordType,
    ttl: TimeToLive,
    values: Vec<RecordValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("record does not belong in this set: {0} mismatch")]
pub struct Mismatch(pub &'static str);

impl RecordSet {
    pub fn new(name: Name, record_type: RecordType, ttl: TimeToLive) -> Self {
        Self {
            name,
            record_type,
            ttl,
            values: Vec::new(),
        }
    }

    /// Collect the records of `record_type` owned by `name` out of a response
    /// section. Returns `None` when there are none.
    ///
    /// The set's TTL is the minimum TTL across the records.
    pub fn from_records<'r>(
        name: &Name,
        record_type: RecordType,
        records: impl IntoIterator<Item = &'r Record>,
    ) -> Result<Option<Self>, ProtocolError> {
        let mut rrset: Option<RecordSet> = None;
        for record in records {
            if record.record_type() != record_type || record.name() != name {
                continue;
            }
            let (value, ttl) = decode(record, record_type)?;
            let rrset = rrset.get_or_insert_with(|| RecordSet::new(name.clone(), record_type, ttl));
            rrset.ttl = rrset.ttl.min(ttl);
            if !rrset.values.contains(&value) {
                rrset.values.push(value);
            }
        }
        Ok(rrset)
    }

    /// Label of the Resource Record Set
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// `RecordType` of the Resource Record Set
    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// Time to Live for this RecordSet
    pub fn ttl(&self) -> TimeToLive {
        self.ttl
    }

    pub fn set_ttl(&mut self, ttl: TimeToLive) {
        self.ttl = ttl;
    }

    pub fn values(&self) -> &[RecordValue] {
        &self.values
    }

    pub fn contains(&self, value: &RecordValue) -> bool {
        self.values.contains(value)
    }

    /// Returns true if there are no records in this set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of records in this set
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Add a value, ignoring duplicates. Returns whether the set changed.
    pub fn push(&mut self, value: RecordValue) -> Result<bool, Mismatch> {
        if value.record_type() != self.record_type {
            return Err(Mismatch("type"));
        }
        if self.values.contains(&value) {
            return Ok(false);
        }
        self.values.push(value);
        Ok(true)
    }

    /// Wire records for every value, class IN.
    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.values.iter().map(move |value| self.record(value))
    }

    pub(crate) fn record(&self, value: &RecordValue) -> Record {
        let mut record = Record::from_rdata(self.name.clone(), self.ttl.into(), value.to_rdata());
        record.set_dns_class(DNSClass::IN);
        record
    }

    /// Presentation text for one of this set's values.
    pub fn encode(&self, value: &RecordValue) -> String {
        text::encode(&self.name, self.ttl, value)
    }
}
