#![allow(unused)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::BoxFuture;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::Record;
use walnut_update::auth::tkey::{Mode, TKEY_TYPE, TKey};
use walnut_update::auth::{Credential, GssContext, GssMechanism, ServicePrincipal};
use walnut_update::client::WireRequest;
use walnut_update::error::{AuthenticationError, TransportError};

/// Registers a global default tracing subscriber when called for the first time. This is intended
/// for use in tests.
pub fn subscribe() {
    static INSTALL_TRACING_SUBSCRIBER: Once = Once::new();
    INSTALL_TRACING_SUBSCRIBER.call_once(|| {
        let subscriber = tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .finish();
        tracing::subscriber::set_global_default(subscriber).unwrap();
    });
}

/// What a scripted server does with one request.
pub enum Reply {
    Timeout,
    Message(Message),
    Raw(Bytes),
}

type Handler = dyn Fn(&WireRequest, Message) -> Reply + Send + Sync;

/// An in-memory transport that records every request and answers from a
/// closure.
#[derive(Clone)]
pub struct ScriptedTransport {
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<WireRequest>>>,
}

impl ScriptedTransport {
    pub fn new(handler: impl Fn(&WireRequest, Message) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer from a fixed sequence of replies, timing out once it runs dry.
    pub fn sequence(replies: Vec<Box<dyn Fn(Message) -> Reply + Send + Sync>>) -> Self {
        let next = AtomicUsize::new(0);
        Self::new(move |_, query| {
            let index = next.fetch_add(1, Ordering::SeqCst);
            match replies.get(index) {
                Some(reply) => reply(query),
                None => Reply::Timeout,
            }
        })
    }

    pub fn requests(&self) -> Vec<WireRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.requests()
            .iter()
            .map(|request| Message::from_vec(&request.payload).unwrap())
            .collect()
    }
}

impl tower::Service<WireRequest> for ScriptedTransport {
    type Response = Bytes;
    type Error = TransportError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: WireRequest) -> Self::Future {
        self.requests.lock().unwrap().push(req.clone());
        let query = Message::from_vec(&req.payload).expect("client sent a valid message");
        let reply = (self.handler)(&req, query);
        Box::pin(async move {
            match reply {
                Reply::Timeout => Err(TransportError::Timeout),
                Reply::Message(message) => Ok(Bytes::from(message.to_vec().unwrap())),
                Reply::Raw(bytes) => Ok(bytes),
            }
        })
    }
}

/// A bare response to `query`: same id, opcode and question.
pub fn response_to(query: &Message, code: ResponseCode) -> Message {
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_op_code(query.op_code())
        .set_response_code(code)
        .add_queries(query.queries().to_vec());
    response
}

pub fn answer(query: &Message, records: Vec<Record>) -> Message {
    let mut response = response_to(query, ResponseCode::NoError);
    response.add_answers(records);
    response
}

/// The TKEY carried in the additional section of a negotiation or delete
/// query, if any.
pub fn tkey_of(query: &Message) -> Option<TKey> {
    query
        .additionals()
        .iter()
        .find_map(TKey::from_record)
        .map(|tkey| tkey.unwrap())
}

pub fn is_tkey_query(query: &Message) -> bool {
    query
        .queries()
        .first()
        .is_some_and(|q| u16::from(q.query_type()) == TKEY_TYPE)
}

/// Answer a TKEY negotiation step by echoing the client's token.
pub fn echo_tkey(query: &Message) -> Message {
    let question = query.queries()[0].clone();
    let mut tkey = tkey_of(query).expect("negotiation carries a TKEY");
    tkey.error = 0;
    let record = tkey.into_record(question.name().clone()).unwrap();
    answer(query, vec![record])
}

/// A mechanism whose contexts complete after the server echoes the initial
/// token `rounds` times. MICs are the length of the signed data.
#[derive(Debug, Clone, Default)]
pub struct FakeMechanism {
    pub rounds: usize,
    pub fail: bool,
    pub initiated: Arc<AtomicUsize>,
}

impl FakeMechanism {
    pub fn new(rounds: usize) -> Self {
        Self {
            rounds,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

struct FakeContext {
    remaining: usize,
    started: bool,
}

pub const TOKEN: &[u8] = b"krb5-token";

impl GssMechanism for FakeMechanism {
    fn initiate(
        &self,
        _credential: &Credential,
        target: &ServicePrincipal,
    ) -> Result<Box<dyn GssContext>, AuthenticationError> {
        self.initiated.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AuthenticationError::Negotiation(format!(
                "no ticket for {target}"
            )));
        }
        Ok(Box::new(FakeContext {
            remaining: self.rounds,
            started: false,
        }))
    }
}

impl GssContext for FakeContext {
    fn step(&mut self, token: Option<&[u8]>) -> Result<Option<Vec<u8>>, AuthenticationError> {
        match token {
            None if !self.started => {
                self.started = true;
                Ok(Some(TOKEN.to_vec()))
            }
            Some(token) if self.started && token == TOKEN => {
                self.remaining = self.remaining.saturating_sub(1);
                Ok((self.remaining > 0).then(|| TOKEN.to_vec()))
            }
            _ => Err(AuthenticationError::Negotiation("unexpected token".into())),
        }
    }

    fn is_complete(&self) -> bool {
        self.started && self.remaining == 0
    }

    fn get_mic(&mut self, message: &[u8]) -> Result<Vec<u8>, AuthenticationError> {
        Ok((message.len() as u64).to_be_bytes().to_vec())
    }

    fn verify_mic(&mut self, message: &[u8], mic: &[u8]) -> Result<(), AuthenticationError> {
        if mic == (message.len() as u64).to_be_bytes() {
            Ok(())
        } else {
            Err(AuthenticationError::BadSignature)
        }
    }
}
