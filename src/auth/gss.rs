//! Security-context (GSS-TSIG, RFC 3645) authentication.
//!
//! The Kerberos exchange itself sits behind [`GssMechanism`] and
//! [`GssContext`]; this module owns everything around it:
//!
//! * choosing which credential to present,
//! * the TKEY handshake that establishes a context with the server, as a
//!   sans-IO [`Negotiation`] driven by the client,
//! * the registry of live contexts, and
//! * the [`SecurityContextHandle`] that signs exactly one exchange and is
//!   released afterwards.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use hickory_proto::dnssec::rdata::tsig::TsigAlgorithm;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name};
use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::tkey::{self, Mode, TKey};
use super::tsig::TsigKey;
use crate::error::{AuthenticationError, ProtocolError};

/// How long a negotiated key is requested to stay valid on the server.
pub const CONTEXT_LIFETIME_SECS: u32 = 86_400;

/// Credential material presented when establishing a context.
#[derive(Clone)]
pub enum Credential {
    Password {
        username: String,
        password: Zeroizing<String>,
    },
    Keytab {
        username: String,
        path: PathBuf,
    },
    /// Whatever identity the process already holds.
    Ambient,
}

impl Credential {
    /// Pick the credential path in priority order: password, keytab, ambient.
    ///
    /// Returns `None` when a username is given without any secret material.
    pub fn select(
        username: Option<&str>,
        password: Option<Zeroizing<String>>,
        keytab: Option<PathBuf>,
    ) -> Option<Credential> {
        match username.filter(|username| !username.is_empty()) {
            None => Some(Credential::Ambient),
            Some(username) => match (password, keytab) {
                (Some(password), _) => Some(Credential::Password {
                    username: username.to_string(),
                    password,
                }),
                (None, Some(path)) => Some(Credential::Keytab {
                    username: username.to_string(),
                    path,
                }),
                (None, None) => None,
            },
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Credential::Password { username, .. } | Credential::Keytab { username, .. } => {
                Some(username)
            }
            Credential::Ambient => None,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            Credential::Keytab { username, path } => f
                .debug_struct("Keytab")
                .field("username", username)
                .field("path", path)
                .finish(),
            Credential::Ambient => f.write_str("Ambient"),
        }
    }
}

/// Parameters for negotiating security contexts.
#[derive(Debug, Clone)]
pub struct NegotiatedContext {
    pub realm: String,
    pub credential: Credential,
}

/// The server principal a context is established with, `DNS/host@REALM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePrincipal {
    pub service: String,
    pub host: String,
    pub realm: String,
}

impl ServicePrincipal {
    pub fn dns(host: impl Into<String>, realm: impl Into<String>) -> Self {
        Self {
            service: "DNS".into(),
            host: host.into(),
            realm: realm.into(),
        }
    }
}

impl fmt::Display for ServicePrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.service, self.host, self.realm)
    }
}

/// A GSS-API mechanism able to start client contexts, normally Kerberos.
pub trait GssMechanism: Send + Sync + 'static {
    fn initiate(
        &self,
        credential: &Credential,
        target: &ServicePrincipal,
    ) -> Result<Box<dyn GssContext>, AuthenticationError>;
}

/// One client-side GSS-API security context.
pub trait GssContext: Send + 'static {
    /// Feed the server's token (none on the first call) and get the next
    /// token to send, if any.
    fn step(&mut self, token: Option<&[u8]>) -> Result<Option<Vec<u8>>, AuthenticationError>;

    fn is_complete(&self) -> bool;

    fn get_mic(&mut self, message: &[u8]) -> Result<Vec<u8>, AuthenticationError>;

    fn verify_mic(&mut self, message: &[u8], mic: &[u8]) -> Result<(), AuthenticationError>;
}

type SharedContext = Arc<Mutex<Box<dyn GssContext>>>;

/// Live security contexts, keyed by their TKEY key name.
#[derive(Clone, Default)]
pub struct ContextRegistry {
    contexts: Arc<Mutex<HashMap<Name, SharedContext>>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }

    pub fn contains(&self, key_name: &Name) -> bool {
        self.contexts.lock().contains_key(key_name)
    }

    fn insert(&self, key_name: Name, context: SharedContext) {
        self.contexts.lock().insert(key_name, context);
    }

    fn remove(&self, key_name: &Name) -> Option<SharedContext> {
        self.contexts.lock().remove(key_name)
    }
}

impl fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("contexts", &self.len())
            .finish()
    }
}

/// A unique key name for a new context: `<uuid>.sig-<server>.`
pub fn key_name_for(server: &str) -> Result<Name, ProtocolError> {
    let host = server.trim_end_matches('.').replace(':', "-");
    Name::from_str(&format!("{}.sig-{host}.", Uuid::new_v4().simple())).map_err(ProtocolError::Dns)
}

/// `gss-tsig.`, as carried in TKEY records.
fn algorithm() -> Name {
    let mut name = TsigAlgorithm::Gss.to_name();
    name.set_fqdn(true);
    name
}

fn tkey_query(
    key_name: &Name,
    mode: Mode,
    token: Vec<u8>,
    now: u32,
) -> Result<Message, ProtocolError> {
    let mut query = Query::query(key_name.clone(), tkey::record_type());
    query.set_query_class(DNSClass::ANY);

    let tkey = TKey {
        algorithm: algorithm(),
        inception: now,
        expiration: now.saturating_add(CONTEXT_LIFETIME_SECS),
        mode,
        error: 0,
        key: token,
        other: Vec::new(),
    };

    let mut message = Message::new();
    message
        .set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(false)
        .add_query(query);
    message.add_additional(tkey.into_record(key_name.clone())?);
    Ok(message)
}

/// Progress of a [`Negotiation`] after consuming a server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Another TKEY round trip is needed.
    Continue,
    Complete,
}

/// The TKEY handshake that establishes one security context.
///
/// The caller sends [`Negotiation::query`], feeds the reply to
/// [`Negotiation::advance`], and repeats until it reports
/// [`Progress::Complete`].
pub struct Negotiation {
    key_name: Name,
    context: Box<dyn GssContext>,
    pending: Option<Vec<u8>>,
    rounds: usize,
}

impl Negotiation {
    /// Guard against a mechanism that never completes.
    pub const MAX_ROUNDS: usize = 8;

    pub fn start(
        mechanism: &dyn GssMechanism,
        credential: &Credential,
        target: &ServicePrincipal,
        key_name: Name,
    ) -> Result<Self, AuthenticationError> {
        debug!(%target, key = %key_name, user = ?credential.username(), "negotiating security context");
        let mut context = mechanism.initiate(credential, target)?;
        let pending = context.step(None)?;
        if pending.is_none() && !context.is_complete() {
            return Err(AuthenticationError::Negotiation(
                "mechanism produced no initial token".into(),
            ));
        }
        Ok(Self {
            key_name,
            context,
            pending,
            rounds: 0,
        })
    }

    pub fn key_name(&self) -> &Name {
        &self.key_name
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_none() && self.context.is_complete()
    }

    /// The next TKEY query to send, if a token is waiting.
    pub fn query(&self, now: u32) -> Result<Option<Message>, ProtocolError> {
        self.pending
            .as_ref()
            .map(|token| tkey_query(&self.key_name, Mode::GssApi, token.clone(), now))
            .transpose()
    }

    pub fn advance(&mut self, response: &Message) -> Result<Progress, AuthenticationError> {
        self.rounds += 1;
        if self.rounds > Self::MAX_ROUNDS {
            return Err(AuthenticationError::Negotiation(format!(
                "no context after {} rounds",
                Self::MAX_ROUNDS
            )));
        }

        if response.response_code() != ResponseCode::NoError {
            return Err(AuthenticationError::Negotiation(format!(
                "server answered TKEY with {}",
                response.response_code()
            )));
        }

        let tkey = response
            .answers()
            .iter()
            .filter(|record| record.name() == &self.key_name)
            .find_map(TKey::from_record)
            .ok_or_else(|| AuthenticationError::Negotiation("no TKEY in response".into()))?
            .map_err(|error| AuthenticationError::Negotiation(error.to_string()))?;

        if tkey.error != 0 {
            return Err(AuthenticationError::Negotiation(format!(
                "server returned TKEY error {}",
                tkey.error
            )));
        }
        if tkey.mode != Mode::GssApi {
            return Err(AuthenticationError::Negotiation(format!(
                "unexpected TKEY mode {:?}",
                tkey.mode
            )));
        }

        trace!(key = %self.key_name, len = tkey.key.len(), "received server token");
        self.pending = self.context.step(Some(&tkey.key))?;

        if self.is_complete() {
            Ok(Progress::Complete)
        } else if self.pending.is_none() {
            Err(AuthenticationError::Negotiation(
                "context incomplete but no token to send".into(),
            ))
        } else {
            Ok(Progress::Continue)
        }
    }

    /// Register the established context and hand out its handle.
    pub fn finish(
        self,
        registry: &ContextRegistry,
    ) -> Result<SecurityContextHandle, AuthenticationError> {
        if !self.is_complete() {
            return Err(AuthenticationError::Negotiation(
                "context is not established".into(),
            ));
        }
        let context: SharedContext = Arc::new(Mutex::new(self.context));
        registry.insert(self.key_name.clone(), context.clone());
        debug!(key = %self.key_name, "security context established");
        Ok(SecurityContextHandle {
            key_name: self.key_name,
            context,
            registry: registry.clone(),
        })
    }
}

impl fmt::Debug for Negotiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiation")
            .field("key_name", &self.key_name)
            .field("rounds", &self.rounds)
            .field("pending", &self.pending.as_ref().map(Vec::len))
            .finish()
    }
}

/// An established security context, good for signing one exchange.
///
/// Dropping the handle removes the context from its registry; the server-side
/// key is deleted by [`SecurityContextHandle::delete_query`] beforehand when
/// the client can still reach the server.
pub struct SecurityContextHandle {
    key_name: Name,
    context: SharedContext,
    registry: ContextRegistry,
}

impl SecurityContextHandle {
    /// A TKEY delete for this context's key, to be signed with the context.
    pub fn delete_query(&self, now: u32) -> Result<Message, ProtocolError> {
        tkey_query(&self.key_name, Mode::Delete, Vec::new(), now)
    }
}

impl TsigKey for SecurityContextHandle {
    fn key_name(&self) -> &Name {
        &self.key_name
    }

    fn tsig_algorithm(&self) -> TsigAlgorithm {
        TsigAlgorithm::Gss
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, AuthenticationError> {
        self.context.lock().get_mic(data)
    }

    fn verify(&self, data: &[u8], mac: &[u8]) -> Result<(), AuthenticationError> {
        self.context
            .lock()
            .verify_mic(data, mac)
            .map_err(|_| AuthenticationError::BadSignature)
    }
}

impl Drop for SecurityContextHandle {
    fn drop(&mut self) {
        if self.registry.remove(&self.key_name).is_some() {
            trace!(key = %self.key_name, "security context released");
        }
    }
}

impl fmt::Debug for SecurityContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContextHandle")
            .field("key_name", &self.key_name)
            .finish()
    }
}
