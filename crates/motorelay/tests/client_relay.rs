#![allow(missing_docs)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};

use motorelay::config::{RelayConfig, TrackerConfig};
use motorelay::route::summarize;
use motorelay::{
    ConnectionState, PositionSample, Registry, Relay, RelayMessage, ReplaySource, SampleStore,
    Storage, StreamClient, StreamClientConfig, SubjectId, Tracker, TrackerEvent, Viewport,
};

async fn start_relay() -> (SocketAddr, Arc<Registry>, oneshot::Sender<()>) {
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
    (addr, registry, tx)
}

fn client_config(addr: SocketAddr) -> StreamClientConfig {
    StreamClientConfig {
        url: format!("ws://{addr}"),
        base_delay: Duration::from_millis(10),
        max_attempts: 3,
        connect_timeout: Duration::from_secs(2),
        send_buffer: 64,
    }
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

/// A client that forwards everything it receives into a channel.
async fn viewer(addr: SocketAddr) -> (StreamClient, mpsc::UnboundedReceiver<RelayMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut client = StreamClient::new(client_config(addr));
    client.on_message(move |message| {
        let _ = tx.send(message);
    });
    client.connect().await.unwrap();
    (client, rx)
}

#[tokio::test]
async fn clients_exchange_messages_through_relay() {
    let (addr, registry, _shutdown) = start_relay().await;
    let (publisher, mut publisher_inbox) = viewer(addr).await;
    let (_watcher, mut inbox) = viewer(addr).await;
    wait_for_peers(&registry, 2).await;

    let message = RelayMessage::location(
        SubjectId::new("moto-1"),
        PositionSample::new(-23.5505, -46.6333, 1_700_000_000_000).with_speed(11.0),
    );
    assert!(publisher.send(&message));

    let received = timeout(Duration::from_secs(2), inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, message);

    // The sender never hears its own message.
    assert!(timeout(Duration::from_millis(150), publisher_inbox.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn client_gives_up_when_relay_is_down() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = StreamClient::new(client_config(addr));
    let err = client.connect().await.unwrap_err();

    assert!(err.is_fatal_connectivity());
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(!client.send(&RelayMessage::status(None, "hello")));
}

#[tokio::test]
async fn client_reconnects_after_relay_restart() {
    let (addr, _registry, shutdown) = start_relay().await;
    let mut config = client_config(addr);
    config.max_attempts = 50;
    let client = StreamClient::new(config);
    let mut session = client.session();
    client.connect().await.unwrap();

    shutdown.send(()).unwrap();
    timeout(
        Duration::from_secs(2),
        session.wait_for(|s| s.state != ConnectionState::Open),
    )
    .await
    .unwrap()
    .unwrap();

    // Bring a relay back on the same port.
    let relay = Relay::bind(&RelayConfig {
        bind: addr,
        ..RelayConfig::default()
    })
    .await
    .unwrap();
    let (_tx, rx) = oneshot::channel::<()>();
    tokio::spawn(relay.run(async {
        let _ = rx.await;
    }));

    timeout(
        Duration::from_secs(5),
        session.wait_for(|s| s.state == ConnectionState::Open),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(client.is_open());
}

#[tokio::test]
async fn tracked_samples_are_relayed_and_recorded() {
    let (addr, registry, _shutdown) = start_relay().await;
    let (_watcher, mut inbox) = viewer(addr).await;

    let client = Arc::new(StreamClient::new(client_config(addr)));
    client.connect().await.unwrap();
    wait_for_peers(&registry, 2).await;

    let subject = SubjectId::new("moto-7");
    let ride: Vec<PositionSample> = (0..5)
        .map(|i| {
            PositionSample::new(
                -23.55 - f64::from(i) * 0.001,
                -46.63 + f64::from(i) * 0.0015,
                1_000 + i64::from(i) * 15_000,
            )
        })
        .collect();

    let store = Arc::new(Storage::open_in_memory().unwrap());
    let mut tracker = Tracker::new(
        Arc::clone(&client),
        Arc::clone(&store) as Arc<dyn SampleStore>,
        TrackerConfig::default(),
    );
    let mut events = tracker
        .start(
            subject.clone(),
            Box::new(ReplaySource::from_samples(
                ride.clone(),
                Duration::from_millis(5),
            )),
        )
        .await
        .unwrap();

    let mut relayed = 0;
    loop {
        match timeout(Duration::from_secs(2), events.recv()).await.unwrap() {
            Some(TrackerEvent::Sample { relayed: true, .. }) => relayed += 1,
            Some(TrackerEvent::Finished) | None => break,
            Some(other) => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(relayed, ride.len());

    for expected in &ride {
        let message = timeout(Duration::from_secs(2), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.subject(), Some(&subject));
        assert_eq!(message.sample(), Some(expected));
    }

    let stored = store.load(&subject).unwrap();
    assert_eq!(stored, ride);
    let summary = summarize(&stored, Viewport::default());
    assert_eq!(
        tracker.totals().distance_km.to_bits(),
        summary.total_distance_km.to_bits()
    );
    assert!(client.is_open());
}
