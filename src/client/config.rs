//! Connection and authentication configuration for the update client.
//!
//! [`ClientConfiguration`] is the serialized form, read from TOML and
//! overridden from the environment. [`ClientConfiguration::validate`] turns it
//! into the [`ConnectionConfig`] used by the exchange engine and at most one
//! [`Authentication`] scheme.

use std::fmt;
use std::num::IntErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use zeroize::Zeroizing;

use crate::auth::{Algorithm, Authentication, Credential, NegotiatedContext, StaticKey};
use crate::error::{ConfigError, ProtocolError};

pub const DEFAULT_PORT: u16 = 53;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_UDP_SIZE: u16 = 4096;

/// Address family a transport is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Any,
    V4,
    V6,
}

impl Family {
    pub fn name(&self) -> &'static str {
        match self {
            Family::Any => "any",
            Family::V4 => "ipv4",
            Family::V6 => "ipv6",
        }
    }
}

/// One of the six transport modes understood by the exchange engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Udp,
    Udp4,
    Udp6,
    Tcp,
    Tcp4,
    Tcp6,
}

impl Transport {
    pub fn is_datagram(&self) -> bool {
        matches!(self, Transport::Udp | Transport::Udp4 | Transport::Udp6)
    }

    pub fn family(&self) -> Family {
        match self {
            Transport::Udp | Transport::Tcp => Family::Any,
            Transport::Udp4 | Transport::Tcp4 => Family::V4,
            Transport::Udp6 | Transport::Tcp6 => Family::V6,
        }
    }

    /// The connection-oriented counterpart for the same address family.
    pub fn escalate(&self) -> Result<Transport, ProtocolError> {
        match self {
            Transport::Udp => Ok(Transport::Tcp),
            Transport::Udp4 => Ok(Transport::Tcp4),
            Transport::Udp6 => Ok(Transport::Tcp6),
            other => Err(ProtocolError::UnknownTransport(other.to_string())),
        }
    }

    /// The connection-oriented counterpart, or itself when already a stream.
    pub fn stream(&self) -> Transport {
        self.escalate().unwrap_or(*self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Udp => "udp",
            Transport::Udp4 => "udp4",
            Transport::Udp6 => "udp6",
            Transport::Tcp => "tcp",
            Transport::Tcp4 => "tcp4",
            Transport::Tcp6 => "tcp6",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "udp" => Ok(Transport::Udp),
            "udp4" => Ok(Transport::Udp4),
            "udp6" => Ok(Transport::Udp6),
            "tcp" => Ok(Transport::Tcp),
            "tcp4" => Ok(Transport::Tcp4),
            "tcp6" => Ok(Transport::Tcp6),
            other => Err(ProtocolError::UnknownTransport(other.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for Transport {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Everything the exchange engine needs to reach the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub server: String,
    pub port: u16,
    pub transport: Transport,
    pub timeout: Duration,
    pub retries: u32,
    pub max_payload: u16,
}

impl ConnectionConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: DEFAULT_PORT,
            transport: Transport::Udp,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            max_payload: DEFAULT_UDP_SIZE,
        }
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_max_payload(mut self, max_payload: u64) -> Self {
        self.max_payload = clamp_payload(max_payload);
        self
    }

    /// `host:port`, used for diagnostics.
    pub fn address(&self) -> String {
        if self.server.contains(':') && !self.server.starts_with('[') {
            format!("[{}]:{}", self.server, self.port)
        } else {
            format!("{}:{}", self.server, self.port)
        }
    }
}

/// Oversized payload limits are clamped to the 16-bit protocol maximum.
fn clamp_payload(value: u64) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

/// Serialized client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfiguration {
    pub server: Option<String>,
    pub port: Option<u16>,
    pub transport: Option<String>,
    #[serde(default, deserialize_with = "duration::deserialize")]
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub udp_size: Option<u64>,

    pub key_name: Option<String>,
    pub key_algorithm: Option<String>,
    pub key_secret: Option<Zeroizing<String>>,

    pub gssapi: Option<GssapiConfiguration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GssapiConfiguration {
    pub realm: Option<String>,
    pub username: Option<String>,
    pub password: Option<Zeroizing<String>>,
    pub keytab: Option<PathBuf>,
}

impl GssapiConfiguration {
    fn is_empty(&self) -> bool {
        self.realm.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.keytab.is_none()
    }
}

impl ClientConfiguration {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Apply overrides from the process environment.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_vars(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn with_vars<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());

        if let Some(server) = get("DNS_UPDATE_SERVER") {
            self.server = Some(server);
        }
        if let Some(port) = get("DNS_UPDATE_PORT") {
            self.port = Some(parse_field("port", &port)?);
        }
        if let Some(transport) = get("DNS_UPDATE_TRANSPORT") {
            self.transport = Some(transport);
        }
        if let Some(timeout) = get("DNS_UPDATE_TIMEOUT") {
            self.timeout = Some(duration::parse(&timeout).ok_or(ConfigError::InvalidValue {
                field: "timeout",
                value: timeout,
            })?);
        }
        if let Some(retries) = get("DNS_UPDATE_RETRIES") {
            self.retries = Some(parse_field("retries", &retries)?);
        }
        if let Some(size) = get("DNS_UPDATE_UDP_SIZE") {
            self.udp_size = Some(parse_payload(&size)?);
        }
        if let Some(name) = get("DNS_UPDATE_KEYNAME") {
            self.key_name = Some(name);
        }
        if let Some(algorithm) = get("DNS_UPDATE_KEYALGORITHM") {
            self.key_algorithm = Some(algorithm);
        }
        if let Some(secret) = get("DNS_UPDATE_KEYSECRET") {
            self.key_secret = Some(Zeroizing::new(secret));
        }

        let mut gssapi = self.gssapi.take().unwrap_or_default();
        if let Some(realm) = get("KRB5_REALM") {
            gssapi.realm = Some(realm);
        }
        if let Some(username) = get("KRB5_USERNAME") {
            gssapi.username = Some(username);
        }
        if let Some(password) = get("KRB5_PASSWORD") {
            gssapi.password = Some(Zeroizing::new(password));
        }
        if let Some(keytab) = get("KRB5_KEYTAB") {
            gssapi.keytab = Some(PathBuf::from(keytab));
        }
        if !gssapi.is_empty() {
            self.gssapi = Some(gssapi);
        }

        Ok(self)
    }

    /// Check the configuration and split it into its connection and
    /// authentication halves.
    pub fn validate(&self) -> Result<(ConnectionConfig, Option<Authentication>), ConfigError> {
        let server = self
            .server
            .clone()
            .filter(|server| !server.is_empty())
            .ok_or(ConfigError::InvalidValue {
                field: "server",
                value: String::new(),
            })?;

        let mut connection = ConnectionConfig::new(server);
        if let Some(port) = self.port {
            connection.port = port;
        }
        if let Some(transport) = &self.transport {
            connection.transport = transport.parse()?;
        }
        if let Some(timeout) = self.timeout {
            connection.timeout = timeout;
        }
        if let Some(retries) = self.retries {
            connection.retries = retries;
        }
        if let Some(size) = self.udp_size {
            connection = connection.with_max_payload(size);
        }

        let static_key = self.static_key()?;
        let negotiated = match &self.gssapi {
            Some(gssapi) if !gssapi.is_empty() => Some(negotiated_context(gssapi)?),
            _ => None,
        };

        let authentication = match (static_key, negotiated) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingAuthentication),
            (Some(key), None) => Some(Authentication::StaticKey(key)),
            (None, Some(context)) => Some(Authentication::Negotiated(context)),
            (None, None) => None,
        };

        Ok((connection, authentication))
    }

    fn static_key(&self) -> Result<Option<StaticKey>, ConfigError> {
        match (&self.key_name, &self.key_secret) {
            (None, None) if self.key_algorithm.is_none() => Ok(None),
            (Some(name), Some(secret)) => {
                let algorithm = match &self.key_algorithm {
                    Some(algorithm) => algorithm.parse()?,
                    None => Algorithm::HmacMd5,
                };
                Ok(Some(StaticKey::from_base64(name, secret, algorithm)?))
            }
            _ => Err(ConfigError::IncompleteKey),
        }
    }
}

fn negotiated_context(gssapi: &GssapiConfiguration) -> Result<NegotiatedContext, ConfigError> {
    let realm = gssapi
        .realm
        .clone()
        .filter(|realm| !realm.is_empty())
        .ok_or(ConfigError::IncompleteGssapi("a realm"))?;

    let credential = Credential::select(
        gssapi.username.as_deref(),
        gssapi.password.clone(),
        gssapi.keytab.clone(),
    )
    .ok_or(ConfigError::IncompleteGssapi(
        "a password or keytab when a username is set",
    ))?;

    Ok(NegotiatedContext { realm, credential })
}

/// Payload sizes too large for any integer still clamp rather than fail.
fn parse_payload(value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(size) => Ok(size),
        Err(error) if *error.kind() == IntErrorKind::PosOverflow => Ok(u64::MAX),
        Err(_) => Err(ConfigError::InvalidValue {
            field: "udp_size",
            value: value.to_string(),
        }),
    }
}

fn parse_field<T: FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field,
        value: value.to_string(),
    })
}

mod duration {
    use std::time::Duration;

    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
            Some(Raw::Text(text)) => parse(&text)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {text:?}"))),
        }
    }

    /// Parse `"250ms"`, `"3s"`, `"2m"` or a bare number of seconds.
    pub(super) fn parse(text: &str) -> Option<Duration> {
        let text = text.trim();
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let (number, unit) = text.split_at(split);
        let number: u64 = number.parse().ok()?;
        match unit {
            "" | "s" => Some(Duration::from_secs(number)),
            "ms" => Some(Duration::from_millis(number)),
            "m" => Some(Duration::from_secs(number.checked_mul(60)?)),
            _ => None,
        }
    }
}
