use std::io;

use hickory_proto::ProtoError;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{Name, RecordType};

/// Failure to move bytes to or from the server.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("timed out waiting for a response")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("no {family} address found for {host}")]
    NoAddress { host: String, family: &'static str },

    #[error("connection closed before a response was received")]
    Closed,
}

/// Malformed input or output at the DNS protocol level. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown transport: {0}")]
    UnknownTransport(String),

    #[error("malformed record {text:?}: {reason}")]
    MalformedRecord { text: String, reason: String },

    #[error("didn't get a record of the expected type: expected {expected}, got {actual}")]
    UnexpectedRecordType {
        expected: RecordType,
        actual: RecordType,
    },

    #[error("name is not fully qualified: {0}")]
    NotFullyQualified(String),

    #[error("no authority record found for {0}")]
    NoAuthority(Name),

    #[error("name {name} shares no labels with zone {zone}")]
    NoSharedLabels { name: Name, zone: Name },

    #[error("dns protocol error: {0}")]
    Dns(#[from] ProtoError),

    #[error("response id {response} does not match request id {request}")]
    MismatchedId { request: u16, response: u16 },

    #[error("malformed wire data: {0}")]
    Wire(&'static str),
}

/// Static-key misconfiguration or security-context negotiation failure.
#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError {
    #[error("authentication required but neither a key nor a security context is configured")]
    NotConfigured,

    #[error("key name must be fully qualified: {0}")]
    InvalidKeyName(String),

    #[error("key secret is not valid base64")]
    InvalidSecret(#[source] data_encoding::DecodeError),

    #[error("unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("no security mechanism available to negotiate a context")]
    NoMechanism,

    #[error("security context negotiation failed: {0}")]
    Negotiation(String),

    #[error("server rejected transaction signature: {0}")]
    Tsig(TsigErrorCode),

    #[error("response signature does not verify")]
    BadSignature,

    #[error("response signature time {signed} is outside {fudge}s of {now}")]
    TimeSkew { signed: u64, now: u64, fudge: u16 },

    #[error("security mechanism: {0}")]
    Mechanism(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Extended TSIG error codes (RFC 8945 §5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsigErrorCode {
    BadSig,
    BadKey,
    BadTime,
    BadTrunc,
    Other(u16),
}

impl From<u16> for TsigErrorCode {
    fn from(value: u16) -> Self {
        match value {
            16 => TsigErrorCode::BadSig,
            17 => TsigErrorCode::BadKey,
            18 => TsigErrorCode::BadTime,
            22 => TsigErrorCode::BadTrunc,
            other => TsigErrorCode::Other(other),
        }
    }
}

impl std::fmt::Display for TsigErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TsigErrorCode::BadSig => f.write_str("BADSIG"),
            TsigErrorCode::BadKey => f.write_str("BADKEY"),
            TsigErrorCode::BadTime => f.write_str("BADTIME"),
            TsigErrorCode::BadTrunc => f.write_str("BADTRUNC"),
            TsigErrorCode::Other(code) => write!(f, "TSIG error {code}"),
        }
    }
}

/// A non-success response code other than name-not-found.
#[derive(Debug, thiserror::Error)]
#[error("{server} responded {code} ({name}){}", .record.as_deref().map(|r| format!(" applying {r:?}")).unwrap_or_default())]
pub struct ServerError {
    pub server: String,
    pub code: u16,
    pub name: String,
    pub record: Option<String>,
}

impl ServerError {
    pub fn new(server: impl Into<String>, response_code: ResponseCode) -> Self {
        Self {
            server: server.into(),
            code: u16::from(response_code),
            name: response_code.to_string(),
            record: None,
        }
    }

    pub fn with_record(mut self, record: impl Into<String>) -> Self {
        self.record = Some(record.into());
        self
    }

    pub fn response_code(&self) -> ResponseCode {
        self.code.into()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("transport error talking to {server}: {source}")]
    Transport {
        server: String,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

impl ExchangeError {
    pub fn transport(server: impl Into<String>, source: TransportError) -> Self {
        ExchangeError::Transport {
            server: server.into(),
            source,
        }
    }

    /// Only transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::Transport { .. })
    }
}

impl From<ProtoError> for ExchangeError {
    fn from(error: ProtoError) -> Self {
        ExchangeError::Protocol(ProtocolError::Dns(error))
    }
}

/// Errors loading or validating a [`crate::client::ClientConfiguration`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading configuration: {0}")]
    Io(#[from] io::Error),

    #[error("parsing configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    #[error("a static key and a gssapi block cannot both be configured")]
    ConflictingAuthentication,

    #[error("key_name, key_secret and key_algorithm must be set together")]
    IncompleteKey,

    #[error("gssapi requires {0}")]
    IncompleteGssapi(&'static str),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Authentication(#[from] AuthenticationError),
}
