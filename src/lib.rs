pub mod auth;
pub mod client;
pub mod codec;
pub mod error;
pub mod resolver;
pub mod rr;
pub mod update;

pub use self::auth::{Algorithm, Authentication, StaticKey};
pub use self::client::{Client, ClientConfiguration, ConnectionConfig, Exchange, Transport};
pub use self::error::ExchangeError;
pub use self::resolver::ZoneResolver;
pub use self::rr::{RecordSet, RecordValue, TimeToLive};
pub use self::update::{RecordSetUpdater, Update};
