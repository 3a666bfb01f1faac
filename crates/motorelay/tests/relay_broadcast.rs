#![allow(missing_docs)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use motorelay::config::RelayConfig;
use motorelay::{PositionSample, Registry, Relay, RelayMessage, SubjectId};

type Peer = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct RunningRelay {
    addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for RunningRelay {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn start_relay() -> RunningRelay {
    let config = RelayConfig {
        bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        ..RelayConfig::default()
    };
    let relay = Relay::bind(&config).await.unwrap();
    let addr = relay.local_addr().unwrap();
    let registry = relay.registry();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(relay.run(async {
        let _ = rx.await;
    }));

    RunningRelay {
        addr,
        registry,
        shutdown: Some(tx),
    }
}

async fn connect(addr: SocketAddr) -> Peer {
    let (ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
    ws
}

async fn wait_for_peers(registry: &Registry, expected: usize) {
    timeout(Duration::from_secs(2), async {
        while registry.len() != expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("registry never reached {expected} peers"));
}

async fn next_data(peer: &mut Peer) -> Message {
    timeout(Duration::from_secs(2), async {
        loop {
            match peer.next().await {
                Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => return message,
                Some(Ok(_)) => {}
                other => panic!("peer stream ended: {other:?}"),
            }
        }
    })
    .await
    .expect("no message received")
}

async fn assert_silent(peer: &mut Peer) {
    let received = timeout(Duration::from_millis(150), peer.next()).await;
    assert!(received.is_err(), "unexpected message: {received:?}");
}

fn location(timestamp: i64) -> String {
    RelayMessage::location(
        SubjectId::new("moto-1"),
        PositionSample::new(-23.55, -46.63, timestamp),
    )
    .encode()
    .unwrap()
}

#[tokio::test]
async fn broadcast_reaches_every_other_peer() {
    let relay = start_relay().await;
    let mut a = connect(relay.addr).await;
    let mut b = connect(relay.addr).await;
    let mut c = connect(relay.addr).await;
    wait_for_peers(&relay.registry, 3).await;

    a.send(Message::Text(location(1))).await.unwrap();
    assert_eq!(next_data(&mut b).await, Message::Text(location(1)));
    assert_eq!(next_data(&mut c).await, Message::Text(location(1)));
    assert_silent(&mut a).await;

    b.close(None).await.unwrap();
    drop(b);
    wait_for_peers(&relay.registry, 2).await;

    a.send(Message::Text(location(2))).await.unwrap();
    assert_eq!(next_data(&mut c).await, Message::Text(location(2)));
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn abrupt_disconnect_is_deregistered() {
    let relay = start_relay().await;
    let mut a = connect(relay.addr).await;
    let b = connect(relay.addr).await;
    wait_for_peers(&relay.registry, 2).await;

    // Drop without a close handshake.
    drop(b);
    wait_for_peers(&relay.registry, 1).await;

    a.send(Message::Text(location(1))).await.unwrap();
    assert_silent(&mut a).await;
    assert_eq!(relay.registry.len(), 1);
}

#[tokio::test]
async fn malformed_frames_are_not_forwarded() {
    let relay = start_relay().await;
    let mut a = connect(relay.addr).await;
    let mut b = connect(relay.addr).await;
    wait_for_peers(&relay.registry, 2).await;

    a.send(Message::Text("not json".to_string())).await.unwrap();
    a.send(Message::Text(r#"{"type":"teleport","data":1}"#.to_string()))
        .await
        .unwrap();
    a.send(Message::Text(location(3))).await.unwrap();

    assert_eq!(next_data(&mut b).await, Message::Text(location(3)));
    assert_eq!(relay.registry.len(), 2);
}

#[tokio::test]
async fn binary_frames_are_forwarded_verbatim() {
    let relay = start_relay().await;
    let mut a = connect(relay.addr).await;
    let mut b = connect(relay.addr).await;
    wait_for_peers(&relay.registry, 2).await;

    let payload = location(4).into_bytes();
    a.send(Message::Binary(payload.clone())).await.unwrap();
    assert_eq!(next_data(&mut b).await, Message::Binary(payload));
}

#[tokio::test]
async fn status_messages_are_relayed() {
    let relay = start_relay().await;
    let mut a = connect(relay.addr).await;
    let mut b = connect(relay.addr).await;
    wait_for_peers(&relay.registry, 2).await;

    let status = RelayMessage::status(Some(SubjectId::new("moto-1")), "engine off")
        .encode()
        .unwrap();
    b.send(Message::Text(status.clone())).await.unwrap();
    assert_eq!(next_data(&mut a).await, Message::Text(status));
}
