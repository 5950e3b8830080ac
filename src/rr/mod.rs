//! Resource record values and their wire and presentation forms.

mod rset;
mod text;
mod ttl;
mod value;

pub use self::rset::{Mismatch, RecordSet};
pub use self::text::{encode, ipv4_eq, normalize_ipv4, parse_record};
pub use self::ttl::TimeToLive;
pub use self::value::{RecordValue, decode};

pub use hickory_proto::rr::Name;
