use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::{Name, Record, RecordType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use walnut_update::client::{Client, ConnectionConfig, Exchange, Transport};
use walnut_update::rr::RecordValue;

mod support;
use support::{answer, response_to, subscribe};

/// A TCP listener and a UDP socket sharing one loopback port.
async fn bind_pair() -> (TcpListener, UdpSocket) {
    for _ in 0..16 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        if let Ok(socket) = UdpSocket::bind((Ipv4Addr::LOCALHOST, port)).await {
            return (listener, socket);
        }
    }
    panic!("no free loopback port for both udp and tcp");
}

fn full_answer(query: &Message) -> Message {
    let name = query.queries()[0].name().clone();
    let records = (1..=3)
        .map(|last| {
            Record::from_rdata(
                name.clone(),
                300,
                RecordValue::A(Ipv4Addr::new(192, 0, 2, last)).to_rdata(),
            )
        })
        .collect();
    answer(query, records)
}

/// Answers every datagram with a truncated empty response and every stream
/// request in full.
struct TruncatingServer {
    address: SocketAddr,
    datagrams: Arc<AtomicUsize>,
    streams: Arc<AtomicUsize>,
}

impl TruncatingServer {
    async fn start() -> Self {
        let (listener, socket) = bind_pair().await;
        let address = listener.local_addr().unwrap();
        let datagrams = Arc::new(AtomicUsize::new(0));
        let streams = Arc::new(AtomicUsize::new(0));

        let counter = datagrams.clone();
        tokio::spawn(async move {
            let mut buf = vec![0; 4096];
            loop {
                let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let query = Message::from_vec(&buf[..len]).unwrap();
                let mut response = response_to(&query, ResponseCode::NoError);
                response.set_truncated(true);
                socket
                    .send_to(&response.to_vec().unwrap(), peer)
                    .await
                    .unwrap();
            }
        });

        let counter = streams.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let len = stream.read_u16().await.unwrap();
                    let mut buf = vec![0; usize::from(len)];
                    stream.read_exact(&mut buf).await.unwrap();
                    let query = Message::from_vec(&buf).unwrap();
                    let response = full_answer(&query).to_vec().unwrap();
                    stream.write_u16(response.len() as u16).await.unwrap();
                    stream.write_all(&response).await.unwrap();
                    stream.flush().await.unwrap();
                });
            }
        });

        Self {
            address,
            datagrams,
            streams,
        }
    }

    fn config(&self, transport: Transport) -> ConnectionConfig {
        let mut config = ConnectionConfig::new("127.0.0.1")
            .with_transport(transport)
            .with_timeout(Duration::from_secs(2))
            .with_retries(0);
        config.port = self.address.port();
        config
    }
}

fn a_query(name: &str) -> Message {
    let mut message = Message::new();
    message
        .set_id(rand::random())
        .set_recursion_desired(true)
        .add_query(hickory_proto::op::Query::query(
            Name::from_str(name).unwrap(),
            RecordType::A,
        ));
    message
}

#[tokio::test]
async fn truncated_datagrams_escalate_to_a_stream() {
    subscribe();

    let server = TruncatingServer::start().await;
    let client = Client::new(server.config(Transport::Udp4));

    let response = client
        .exchange(a_query("www.example.com."), false)
        .await
        .unwrap();

    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(!response.truncated());
    assert_eq!(response.answers().len(), 3);
    assert_eq!(server.datagrams.load(Ordering::SeqCst), 2);
    assert_eq!(server.streams.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stream_transport_skips_datagrams() {
    subscribe();

    let server = TruncatingServer::start().await;
    let client = Client::new(server.config(Transport::Tcp4));

    let response = client
        .exchange(a_query("www.example.com."), false)
        .await
        .unwrap();

    assert_eq!(response.answers().len(), 3);
    assert_eq!(server.datagrams.load(Ordering::SeqCst), 0);
    assert_eq!(server.streams.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn silent_servers_time_out() {
    subscribe();

    // Bound but never read from.
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let mut config = ConnectionConfig::new("127.0.0.1")
        .with_transport(Transport::Udp4)
        .with_timeout(Duration::from_millis(100))
        .with_retries(1);
    config.port = socket.local_addr().unwrap().port();

    let result = Client::new(config)
        .exchange(a_query("www.example.com."), false)
        .await;
    let error = result.unwrap_err();
    assert!(error.is_retryable(), "{error}");
}
