//! End-to-end scenarios from spec §8, driven against [`Broker`] the way a
//! real server would: each simulated client is its own [`ProtocolEngine`]
//! fed frames through a [`MockConnection`].

use std::sync::{Arc, Once};

use stomp_broker_core::auth::AllowAllAuthenticator;
use stomp_broker_core::broker::Broker;
use stomp_broker_core::connection::{ConnectionHandle, MockConnection};
use stomp_broker_core::frame::Frame;
use stomp_broker_core::scheduler::{RandomQueueScheduler, RandomSubscriberScheduler};
use stomp_broker_core::store::MemoryQueueStore;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

static TRACING: Once = Once::new();

/// Installs a `tracing` subscriber for the duration of the test binary, so
/// `tracing::debug!`/`warn!` calls in the engine and managers are visible
/// with `cargo test -- --nocapture`, matching the `FmtSubscriber` setup in
/// the SMPP client crate's `send_sms` example.
fn init_tracing() {
    TRACING.call_once(|| {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("setting default subscriber failed");
    });
}

fn broker() -> Broker {
    init_tracing();
    Broker::new(
        Arc::new(MemoryQueueStore::new()),
        Arc::new(AllowAllAuthenticator),
        Arc::new(RandomSubscriberScheduler),
        Arc::new(RandomQueueScheduler),
    )
}

fn connect_frame() -> Frame {
    let mut frame = Frame::new("CONNECT");
    frame.set_header("accept-version", "1.2");
    frame.set_header("token", "good");
    frame
}

#[tokio::test]
async fn scenario_1_connect_subscribe_send_to_queue_one_subscriber() {
    let broker = broker();

    let (conn_a, mut outbox_a) = MockConnection::new();
    let mut engine_a = broker.engine_for(ConnectionHandle::new(conn_a));
    engine_a.process_frame(connect_frame()).await;
    let connected = outbox_a.try_recv().unwrap();
    assert_eq!(connected.command(), "CONNECTED");
    assert!(connected.header("session").is_some());

    let mut subscribe = Frame::new("SUBSCRIBE");
    subscribe.set_header("id", "s1");
    subscribe.set_header("destination", "/queue/a");
    engine_a.process_frame(subscribe).await;

    let (conn_b, mut outbox_b) = MockConnection::new();
    let mut engine_b = broker.engine_for(ConnectionHandle::new(conn_b));
    engine_b.process_frame(connect_frame()).await;
    outbox_b.try_recv().unwrap(); // CONNECTED

    let mut send = Frame::with_body("SEND", b"hello".to_vec());
    send.set_header("destination", "/queue/a");
    engine_b.process_frame(send).await;

    let message = outbox_a.try_recv().unwrap();
    assert_eq!(message.command(), "MESSAGE");
    assert_eq!(message.header("destination"), Some("/queue/a"));
    assert_eq!(message.header("subscription"), Some("s1"));
    assert!(!message.header("message-id").unwrap().is_empty());
    assert_eq!(message.body(), b"hello");

    assert!(outbox_b.try_recv().is_err());
}

#[tokio::test]
async fn scenario_2_send_to_queue_with_no_subscribers_then_subscribe() {
    use stomp_broker_core::store::QueueStore;

    let store: Arc<dyn QueueStore> = Arc::new(MemoryQueueStore::new());
    let broker = Broker::new(
        store.clone(),
        Arc::new(AllowAllAuthenticator),
        Arc::new(RandomSubscriberScheduler),
        Arc::new(RandomQueueScheduler),
    );

    let (conn_b, mut outbox_b) = MockConnection::new();
    let mut engine_b = broker.engine_for(ConnectionHandle::new(conn_b));
    engine_b.process_frame(connect_frame()).await;
    outbox_b.try_recv().unwrap();

    let mut send = Frame::with_body("SEND", b"m1".to_vec());
    send.set_header("destination", "/queue/b");
    engine_b.process_frame(send).await;

    let (conn_a, mut outbox_a) = MockConnection::new();
    let mut engine_a = broker.engine_for(ConnectionHandle::new(conn_a));
    engine_a.process_frame(connect_frame()).await;
    outbox_a.try_recv().unwrap();

    let mut subscribe = Frame::new("SUBSCRIBE");
    subscribe.set_header("id", "s1");
    subscribe.set_header("destination", "/queue/b");
    engine_a.process_frame(subscribe).await;

    // Per spec §8 scenario 2: subscribing does not itself drain the store —
    // delivery of already-stored frames to a newly-arrived subscriber is a
    // drainer's job, out of scope here. Assert only that the frame is still
    // stored, and that A's outbox stays empty.
    assert!(store.has_frames("/queue/b").await);
    assert!(outbox_a.try_recv().is_err());
}

#[tokio::test]
async fn scenario_3_topic_fan_out() {
    let broker = broker();

    let mut engines = Vec::new();
    let mut outboxes = Vec::new();
    for id in ["sa", "sb", "sc"] {
        let (conn, outbox) = MockConnection::new();
        let mut engine = broker.engine_for(ConnectionHandle::new(conn));
        engine.process_frame(connect_frame()).await;
        outboxes.push(outbox);
        outboxes.last_mut().unwrap().try_recv().unwrap(); // CONNECTED

        let mut subscribe = Frame::new("SUBSCRIBE");
        subscribe.set_header("id", id);
        subscribe.set_header("destination", "/topic/x");
        engine.process_frame(subscribe).await;
        engines.push(engine);
    }

    let (conn_d, mut outbox_d) = MockConnection::new();
    let mut engine_d = broker.engine_for(ConnectionHandle::new(conn_d));
    engine_d.process_frame(connect_frame()).await;
    outbox_d.try_recv().unwrap();

    let mut send = Frame::with_body("SEND", b"hi".to_vec());
    send.set_header("destination", "/topic/x");
    engine_d.process_frame(send).await;

    for (expected_id, outbox) in ["sa", "sb", "sc"].iter().zip(outboxes.iter_mut()) {
        let message = outbox.try_recv().unwrap();
        assert_eq!(message.command(), "MESSAGE");
        assert_eq!(message.body(), b"hi");
        assert_eq!(message.header("subscription"), Some(*expected_id));
    }
    assert!(outbox_d.try_recv().is_err());
}

#[tokio::test]
async fn scenario_4_failing_topic_subscriber_is_pruned() {
    let broker = broker();

    let (conn_a, mut outbox_a) = MockConnection::new();
    let handle_a = ConnectionHandle::new(conn_a);
    let mut engine_a = broker.engine_for(handle_a);
    engine_a.process_frame(connect_frame()).await;
    outbox_a.try_recv().unwrap();
    let mut sub_a = Frame::new("SUBSCRIBE");
    sub_a.set_header("id", "sa");
    sub_a.set_header("destination", "/topic/x");
    engine_a.process_frame(sub_a).await;

    let (conn_b, _outbox_b) = MockConnection::new();
    conn_b.set_fail_sends(true);
    let mut engine_b = broker.engine_for(ConnectionHandle::new(conn_b));
    engine_b.process_frame(connect_frame()).await;
    let mut sub_b = Frame::new("SUBSCRIBE");
    sub_b.set_header("id", "sb");
    sub_b.set_header("destination", "/topic/x");
    engine_b.process_frame(sub_b).await;

    let (conn_c, mut outbox_c) = MockConnection::new();
    let mut engine_c = broker.engine_for(ConnectionHandle::new(conn_c));
    engine_c.process_frame(connect_frame()).await;
    outbox_c.try_recv().unwrap();
    let mut sub_c = Frame::new("SUBSCRIBE");
    sub_c.set_header("id", "sc");
    sub_c.set_header("destination", "/topic/x");
    engine_c.process_frame(sub_c).await;

    let (conn_d, mut outbox_d) = MockConnection::new();
    let mut engine_d = broker.engine_for(ConnectionHandle::new(conn_d));
    engine_d.process_frame(connect_frame()).await;
    outbox_d.try_recv().unwrap();
    let mut send = Frame::with_body("SEND", b"hi".to_vec());
    send.set_header("destination", "/topic/x");
    engine_d.process_frame(send).await;

    assert_eq!(outbox_a.try_recv().unwrap().body(), b"hi");
    assert_eq!(outbox_c.try_recv().unwrap().body(), b"hi");

    let remaining = broker.topic_manager().subscriber_count(Some("/topic/x"));
    assert_eq!(remaining, 2);
}

#[tokio::test]
async fn scenario_5_receipt_on_subscribe() {
    let broker = broker();

    let (conn_a, mut outbox_a) = MockConnection::new();
    let mut engine_a = broker.engine_for(ConnectionHandle::new(conn_a));
    engine_a.process_frame(connect_frame()).await;
    outbox_a.try_recv().unwrap();

    let mut subscribe = Frame::new("SUBSCRIBE");
    subscribe.set_header("id", "s1");
    subscribe.set_header("destination", "/queue/q");
    subscribe.set_header("receipt", "r42");
    engine_a.process_frame(subscribe).await;

    let receipt = outbox_a.try_recv().unwrap();
    assert_eq!(receipt.command(), "RECEIPT");
    assert_eq!(receipt.header("receipt-id"), Some("r42"));
    assert_eq!(broker.queue_manager().subscriber_count(Some("/queue/q")), 1);
}

#[tokio::test]
async fn scenario_6_command_before_connect_yields_error() {
    let broker = broker();

    let (conn, mut outbox) = MockConnection::new();
    let mut engine = broker.engine_for(ConnectionHandle::new(conn));

    let mut send = Frame::with_body("SEND", b"body".to_vec());
    send.set_header("destination", "/queue/x");
    engine.process_frame(send).await;

    let error = outbox.try_recv().unwrap();
    assert_eq!(error.command(), "ERROR");
    assert!(error.header("message").unwrap().contains("Not connected"));
}
