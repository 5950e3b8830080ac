//! The send / evaluate / escalate loop behind every exchange.
//!
//! An [`ExchangeSession`] lives for one call. It owns the retry budget, the
//! transport currently in use and whether the EDNS0 resize has been tried,
//! and steps through [`State`] until it reaches `Done` or `Fatal`.
//!
//! * Transport failures (including timeouts) and SERVFAIL responses consume
//!   one retry each. Total attempts never exceed `retries + 1` per transport.
//! * The first truncated response adds an EDNS0 OPT record advertising the
//!   configured payload size. The second switches a datagram transport to
//!   its stream counterpart. A third is a protocol error.

use bytes::Bytes;
use hickory_proto::op::{Edns, Message, ResponseCode};
use tower::ServiceExt;
use tracing::{debug, trace, warn};

use super::config::{ConnectionConfig, Transport};
use super::transport::WireRequest;
use crate::auth::tsig::{self, TsigKey, Verified};
use crate::codec::message_id;
use crate::error::{ExchangeError, ProtocolError, TransportError};

/// A validated response and the exact bytes it arrived as.
#[derive(Debug, Clone)]
pub struct Response {
    pub message: Message,
    pub wire: Bytes,
    pub transport: Transport,
}

#[derive(Debug)]
pub(crate) enum State {
    Send,
    Evaluate(Response),
    Escalate,
    Fatal(ExchangeError),
    Done(Response),
}

#[derive(Debug)]
pub(crate) struct ExchangeSession<'c> {
    config: &'c ConnectionConfig,
    transport: Transport,
    retries: u32,
    resized: bool,
    attempts: u32,
}

impl<'c> ExchangeSession<'c> {
    pub(crate) fn new(config: &'c ConnectionConfig) -> Self {
        Self {
            config,
            transport: config.transport,
            retries: config.retries,
            resized: false,
            attempts: 0,
        }
    }

    /// Drive `message` to a final response over `service`, signing every
    /// attempt with `key` when one is given.
    pub(crate) async fn run<S>(
        mut self,
        service: &S,
        mut message: Message,
        key: Option<&dyn TsigKey>,
    ) -> Result<Response, ExchangeError>
    where
        S: tower::Service<WireRequest, Response = Bytes, Error = TransportError> + Clone,
    {
        let mut state = State::Send;
        loop {
            state = match state {
                State::Send => self.send(service, &message, key).await,
                State::Evaluate(response) => self.evaluate(response),
                State::Escalate => self.escalate(&mut message),
                State::Fatal(error) => return Err(error),
                State::Done(response) => {
                    debug!(
                        server = %self.config.address(),
                        attempts = self.attempts,
                        rcode = %response.message.response_code(),
                        "exchange complete"
                    );
                    return Ok(response);
                }
            };
        }
    }

    async fn send<S>(&mut self, service: &S, message: &Message, key: Option<&dyn TsigKey>) -> State
    where
        S: tower::Service<WireRequest, Response = Bytes, Error = TransportError> + Clone,
    {
        self.attempts += 1;

        let signed = match key {
            Some(key) => tsig::sign(message, key, None, unix_now())
                .map(|signed| (signed.wire, Some(signed.mac))),
            None => message
                .to_vec()
                .map(|wire| (wire, None))
                .map_err(ExchangeError::from),
        };
        let (payload, request_mac) = match signed {
            Ok(signed) => signed,
            Err(error) => return State::Fatal(error),
        };

        let request = WireRequest {
            server: self.config.server.clone(),
            port: self.config.port,
            transport: self.transport,
            payload: Bytes::from(payload),
        };

        debug!(
            server = %self.config.address(),
            transport = %self.transport,
            attempt = self.attempts,
            id = message.id(),
            "message out"
        );
        trace!(?message, "message out");

        let outcome = tokio::time::timeout(self.config.timeout, service.clone().oneshot(request))
            .await
            .unwrap_or(Err(TransportError::Timeout));

        match outcome {
            Ok(wire) => match self.receive(message.id(), wire, key, request_mac.as_deref()) {
                Ok(response) => State::Evaluate(response),
                Err(error) => State::Fatal(error),
            },
            Err(error) if self.retries > 0 => {
                self.retries -= 1;
                debug!(%error, remaining = self.retries, "retrying after transport error");
                State::Send
            }
            Err(error) => State::Fatal(ExchangeError::transport(self.config.address(), error)),
        }
    }

    fn receive(
        &self,
        id: u16,
        wire: Bytes,
        key: Option<&dyn TsigKey>,
        request_mac: Option<&[u8]>,
    ) -> Result<Response, ExchangeError> {
        let response_id = message_id(&wire).ok_or(ProtocolError::Wire("empty response"))?;
        if response_id != id {
            return Err(ProtocolError::MismatchedId {
                request: id,
                response: response_id,
            }
            .into());
        }

        let message = Message::from_vec(&wire)?;
        debug!(
            id,
            rcode = %message.response_code(),
            truncated = message.truncated(),
            answers = message.answer_count(),
            "message in"
        );
        trace!(?message, "message in");

        // Truncated responses are retried, not trusted, so they are not verified.
        if let Some(key) = key.filter(|_| !message.truncated()) {
            match tsig::verify(&wire, key, request_mac, unix_now())? {
                Verified::Signed { .. } => trace!(key = %key.key_name(), "response signature verified"),
                Verified::Unsigned => {
                    warn!(key = %key.key_name(), "unsigned response to a signed request")
                }
            }
        }

        Ok(Response {
            message,
            wire,
            transport: self.transport,
        })
    }

    fn evaluate(&mut self, response: Response) -> State {
        if response.message.response_code() == ResponseCode::ServFail && self.retries > 0 {
            self.retries -= 1;
            debug!(remaining = self.retries, "retrying after SERVFAIL");
            return State::Send;
        }

        if response.message.truncated() {
            return State::Escalate;
        }

        State::Done(response)
    }

    fn escalate(&mut self, message: &mut Message) -> State {
        if !self.resized {
            self.resized = true;
            self.retries = self.config.retries;
            message
                .extensions_mut()
                .get_or_insert_with(Edns::new)
                .set_max_payload(self.config.max_payload)
                .set_version(0);
            debug!(max_payload = self.config.max_payload, "truncated, retrying with EDNS0");
            return State::Send;
        }

        match self.transport.escalate() {
            Ok(transport) => {
                debug!(from = %self.transport, to = %transport, "truncated, switching transport");
                self.transport = transport;
                self.retries = self.config.retries;
                State::Send
            }
            Err(error) => State::Fatal(error.into()),
        }
    }
}

/// Seconds since the epoch, as used in signatures.
pub(crate) fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::str::FromStr;
    use std::sync::Arc;
    use std::time::Duration;

    use hickory_proto::op::{MessageType, OpCode, Query};
    use hickory_proto::rr::{Name, RecordType};
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone)]
    enum Reply {
        Timeout,
        Code(ResponseCode),
        Truncated,
    }

    #[derive(Debug, Default)]
    struct Log {
        requests: Vec<(Transport, bool)>,
    }

    fn scripted(
        replies: Vec<Reply>,
    ) -> (
        impl tower::Service<WireRequest, Response = Bytes, Error = TransportError> + Clone,
        Arc<Mutex<Log>>,
    ) {
        let replies = Arc::new(Mutex::new(VecDeque::from(replies)));
        let log = Arc::new(Mutex::new(Log::default()));
        let seen = log.clone();
        let service = tower::service_fn(move |request: WireRequest| {
            let replies = replies.clone();
            let log = log.clone();
            async move {
                let query = Message::from_vec(&request.payload).unwrap();
                log.lock()
                    .requests
                    .push((request.transport, query.extensions().is_some()));
                let reply = replies.lock().pop_front().unwrap_or(Reply::Timeout);
                let mut response = query.clone();
                response.set_message_type(MessageType::Response);
                match reply {
                    Reply::Timeout => return Err(TransportError::Timeout),
                    Reply::Code(code) => {
                        response.set_response_code(code);
                    }
                    Reply::Truncated => {
                        response.set_truncated(true);
                    }
                }
                Ok(Bytes::from(response.to_vec().unwrap()))
            }
        });
        (service, seen)
    }

    fn query() -> Message {
        let mut message = Message::new();
        message
            .set_id(7)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .add_query(Query::query(
                Name::from_str("example.com.").unwrap(),
                RecordType::SOA,
            ));
        message
    }

    fn config(retries: u32) -> ConnectionConfig {
        ConnectionConfig::new("ns1.example.com")
            .with_retries(retries)
            .with_timeout(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn timeouts_exhaust_the_budget() {
        let config = config(3);
        let (service, log) = scripted(vec![]);
        let result = ExchangeSession::new(&config).run(&service, query(), None).await;

        assert!(matches!(
            result,
            Err(ExchangeError::Transport {
                source: TransportError::Timeout,
                ..
            })
        ));
        assert_eq!(log.lock().requests.len(), 4);
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let config = config(0);
        let (service, log) = scripted(vec![Reply::Code(ResponseCode::ServFail)]);
        let response = ExchangeSession::new(&config)
            .run(&service, query(), None)
            .await
            .unwrap();
        assert_eq!(response.message.response_code(), ResponseCode::ServFail);
        assert_eq!(log.lock().requests.len(), 1);
    }

    #[tokio::test]
    async fn nxdomain_is_a_result() {
        let config = config(2);
        let (service, log) = scripted(vec![Reply::Code(ResponseCode::NXDomain)]);
        let response = ExchangeSession::new(&config)
            .run(&service, query(), None)
            .await
            .unwrap();
        assert_eq!(response.message.response_code(), ResponseCode::NXDomain);
        assert_eq!(log.lock().requests.len(), 1);
    }

    #[tokio::test]
    async fn truncation_resizes_then_escalates() {
        let config = config(1).with_max_payload(1232);
        let (service, log) = scripted(vec![
            Reply::Truncated,
            Reply::Truncated,
            Reply::Code(ResponseCode::NoError),
        ]);
        let response = ExchangeSession::new(&config)
            .run(&service, query(), None)
            .await
            .unwrap();

        assert_eq!(response.transport, Transport::Tcp);
        assert_eq!(
            log.lock().requests,
            vec![
                (Transport::Udp, false),
                (Transport::Udp, true),
                (Transport::Tcp, true),
            ]
        );
    }

    #[tokio::test]
    async fn truncation_over_stream_is_fatal() {
        let config = config(0).with_transport(Transport::Tcp6);
        let (service, log) = scripted(vec![Reply::Truncated, Reply::Truncated]);
        let result = ExchangeSession::new(&config).run(&service, query(), None).await;

        assert!(matches!(
            result,
            Err(ExchangeError::Protocol(ProtocolError::UnknownTransport(ref t))) if t == "tcp6"
        ));
        assert_eq!(log.lock().requests.len(), 2);
    }

    #[tokio::test]
    async fn escalation_resets_retries() {
        let config = config(1).with_transport(Transport::Udp4);
        let (service, log) = scripted(vec![
            Reply::Truncated,
            Reply::Timeout,
            Reply::Truncated,
            Reply::Timeout,
            Reply::Code(ResponseCode::NoError),
        ]);
        let response = ExchangeSession::new(&config)
            .run(&service, query(), None)
            .await
            .unwrap();
        assert_eq!(response.transport, Transport::Tcp4);
        assert_eq!(log.lock().requests.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_servers_time_out() {
        let config = config(1);
        let attempts = Arc::new(Mutex::new(0));
        let counter = attempts.clone();
        let service = tower::service_fn(move |_: WireRequest| {
            *counter.lock() += 1;
            async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, TransportError>(Bytes::new())
            }
        });

        let result = ExchangeSession::new(&config).run(&service, query(), None).await;
        assert!(matches!(
            result,
            Err(ExchangeError::Transport {
                source: TransportError::Timeout,
                ..
            })
        ));
        assert_eq!(*attempts.lock(), 2);
    }
}
