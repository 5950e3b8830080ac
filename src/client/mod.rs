//! The exchange engine: send one DNS message to the configured server and
//! return a validated response.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hickory_proto::op::{Message, ResponseCode};
use tracing::{debug, warn};

use crate::auth::gss::{self, Negotiation, Progress};
use crate::auth::tsig::{self, TsigKey};
use crate::auth::{
    Authentication, ContextRegistry, GssMechanism, NegotiatedContext, SecurityContextHandle,
    ServicePrincipal,
};
use crate::error::{AuthenticationError, ConfigError, ExchangeError, ServerError, TransportError};

pub use self::config::{
    ClientConfiguration, ConnectionConfig, Family, GssapiConfiguration, Transport,
};
pub use self::session::Response;
pub use self::transport::{NetworkTransport, WireRequest};

pub mod config;
mod session;
mod tcp;
mod transport;
mod udp;

use self::session::{ExchangeSession, unix_now};

/// Something that can carry a DNS message to a server and bring back the
/// response.
///
/// Name-not-found and other response codes are returned as responses, not
/// errors; interpreting them is up to the caller.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn exchange(&self, message: Message, authenticate: bool)
    -> Result<Message, ExchangeError>;

    /// The server address, for diagnostics.
    fn server(&self) -> String;
}

#[async_trait]
impl<'a, E: Exchange + ?Sized> Exchange for &'a E {
    async fn exchange(
        &self,
        message: Message,
        authenticate: bool,
    ) -> Result<Message, ExchangeError> {
        (**self).exchange(message, authenticate).await
    }

    fn server(&self) -> String {
        (**self).server()
    }
}

#[async_trait]
impl<E: Exchange + ?Sized> Exchange for Arc<E> {
    async fn exchange(
        &self,
        message: Message,
        authenticate: bool,
    ) -> Result<Message, ExchangeError> {
        (**self).exchange(message, authenticate).await
    }

    fn server(&self) -> String {
        (**self).server()
    }
}

/// A dynamic-update client bound to one server.
pub struct Client<T = NetworkTransport> {
    config: ConnectionConfig,
    authentication: Option<Authentication>,
    mechanism: Option<Arc<dyn GssMechanism>>,
    contexts: ContextRegistry,
    transport: T,
}

impl Client {
    pub fn new(config: ConnectionConfig) -> Self {
        Client {
            config,
            authentication: None,
            mechanism: None,
            contexts: ContextRegistry::new(),
            transport: NetworkTransport::new(),
        }
    }

    pub fn from_configuration(configuration: &ClientConfiguration) -> Result<Self, ConfigError> {
        let (config, authentication) = configuration.validate()?;
        let mut client = Client::new(config);
        client.mechanism = authentication.as_ref().and_then(default_mechanism);
        Ok(match authentication {
            Some(authentication) => client.with_authentication(authentication),
            None => client,
        })
    }
}

/// The mechanism installed for configured authentication, if one is built in.
fn default_mechanism(authentication: &Authentication) -> Option<Arc<dyn GssMechanism>> {
    match authentication {
        #[cfg(feature = "kerberos")]
        Authentication::Negotiated(_) => Some(Arc::new(crate::auth::KerberosMechanism::new())),
        _ => None,
    }
}

impl<T> Client<T> {
    /// Replace the network transport, e.g. with an in-memory service.
    pub fn with_transport<U>(self, transport: U) -> Client<U> {
        Client {
            config: self.config,
            authentication: self.authentication,
            mechanism: self.mechanism,
            contexts: self.contexts,
            transport,
        }
    }

    pub fn with_authentication(mut self, authentication: impl Into<Authentication>) -> Self {
        self.authentication = Some(authentication.into());
        self
    }

    /// The GSS-API mechanism used to negotiate security contexts.
    pub fn with_security_mechanism(mut self, mechanism: Arc<dyn GssMechanism>) -> Self {
        self.mechanism = Some(mechanism);
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Security contexts currently alive for this client.
    pub fn security_contexts(&self) -> &ContextRegistry {
        &self.contexts
    }
}

impl<T> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("authentication", &self.authentication)
            .field("mechanism", &self.mechanism.is_some())
            .field("contexts", &self.contexts)
            .finish()
    }
}

impl<T> Client<T>
where
    T: tower::Service<WireRequest, Response = Bytes, Error = TransportError>
        + Clone
        + Send
        + Sync
        + 'static,
    T::Future: Send,
{
    async fn send(
        &self,
        config: &ConnectionConfig,
        message: Message,
        key: Option<&dyn TsigKey>,
    ) -> Result<Response, ExchangeError> {
        ExchangeSession::new(config)
            .run(&self.transport, message, key)
            .await
    }

    /// Negotiation traffic always goes over a stream; GSS tokens rarely fit a
    /// datagram.
    fn negotiation_config(&self) -> ConnectionConfig {
        self.config
            .clone()
            .with_transport(self.config.transport.stream())
    }

    /// Establish a fresh security context with the server.
    async fn negotiate(
        &self,
        context: &NegotiatedContext,
    ) -> Result<SecurityContextHandle, ExchangeError> {
        let mechanism = self
            .mechanism
            .as_deref()
            .ok_or(AuthenticationError::NoMechanism)?;
        let host = self.config.server.trim_end_matches('.');
        let target = ServicePrincipal::dns(host, context.realm.clone());
        let key_name = gss::key_name_for(host)?;

        let mut negotiation = Negotiation::start(mechanism, &context.credential, &target, key_name)?;
        let config = self.negotiation_config();

        let mut last = None;
        while let Some(query) = negotiation.query(tkey_time())? {
            let response = self
                .send(&config, query, None)
                .await
                .map_err(|error| AuthenticationError::Negotiation(error.to_string()))?;
            let progress = negotiation.advance(&response.message)?;
            last = Some(response);
            if progress == Progress::Complete {
                break;
            }
        }

        let handle = negotiation.finish(&self.contexts)?;
        if let Some(response) = last {
            tsig::verify(&response.wire, &handle, None, unix_now())?;
        }
        Ok(handle)
    }

    /// Delete the context on the server, best effort, and forget it locally.
    async fn release(&self, handle: SecurityContextHandle) {
        let response = match handle.delete_query(tkey_time()) {
            Ok(query) => {
                self.send(&self.negotiation_config(), query, Some(&handle))
                    .await
            }
            Err(error) => Err(error.into()),
        };
        let outcome = response.and_then(|response| match response.message.response_code() {
            ResponseCode::NoError => Ok(()),
            code => Err(ExchangeError::from(ServerError::new(
                self.config.address(),
                code,
            ))),
        });

        match outcome {
            Ok(()) => debug!(key = %handle.key_name(), "security context deleted"),
            Err(error) => {
                warn!(key = %handle.key_name(), %error, "failed to release security context")
            }
        }
    }
}

#[async_trait]
impl<T> Exchange for Client<T>
where
    T: tower::Service<WireRequest, Response = Bytes, Error = TransportError>
        + Clone
        + Send
        + Sync
        + 'static,
    T::Future: Send,
{
    async fn exchange(
        &self,
        message: Message,
        authenticate: bool,
    ) -> Result<Message, ExchangeError> {
        if !authenticate {
            return Ok(self.send(&self.config, message, None).await?.message);
        }

        match &self.authentication {
            None => Err(AuthenticationError::NotConfigured.into()),
            Some(Authentication::StaticKey(key)) => {
                Ok(self.send(&self.config, message, Some(key)).await?.message)
            }
            Some(Authentication::Negotiated(context)) => {
                let handle = self.negotiate(context).await?;
                let result = self.send(&self.config, message, Some(&handle)).await;
                self.release(handle).await;
                Ok(result?.message)
            }
        }
    }

    fn server(&self) -> String {
        self.config.address()
    }
}

fn tkey_time() -> u32 {
    u32::try_from(unix_now()).unwrap_or(u32::MAX)
}
