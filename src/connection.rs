//! Connection port: the abstract bidirectional frame transport the engine
//! and managers speak to, and an in-memory double used by this crate's own
//! tests (and usable by integrators writing their own).
//!
//! Any real transport — TCP wrapped in a `Framed<_, StompCodec>`, a
//! WebSocket adapter — implements [`ConnectionPort`] and is otherwise
//! invisible to the routing core (spec §4.2).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::EngineError;
use crate::frame::Frame;

/// Capability set a concrete transport must provide. No other capability
/// is assumed by the routing core (spec §4.2).
#[async_trait]
pub trait ConnectionPort: Send + Sync {
    /// Receives one full frame, suspending until available.
    /// Fails with [`EngineError::ClientDisconnected`] on EOF.
    async fn receive_frame(&self) -> Result<Frame, EngineError>;

    /// Sends one frame, suspending until the write is accepted.
    async fn send_frame(&self, frame: Frame) -> Result<(), EngineError>;

    /// Whether this connection advertises it will acknowledge delivery —
    /// consulted by the reliability-preferring subscriber scheduler
    /// (spec §4.4). Default: not reliable.
    fn reliable_subscriber(&self) -> bool {
        false
    }
}

/// A cloneable handle to a connection, compared by identity rather than
/// structurally — two handles are equal iff they point at the same
/// connection object, matching spec §3's "(connection reference,
/// subscription-id)" equality for `Subscription`.
#[derive(Clone)]
pub struct ConnectionHandle(pub Arc<dyn ConnectionPort>);

impl ConnectionHandle {
    pub fn new(port: Arc<dyn ConnectionPort>) -> Self {
        ConnectionHandle(port)
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const () as usize).hash(state);
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionHandle({:p})", Arc::as_ptr(&self.0))
    }
}

impl std::ops::Deref for ConnectionHandle {
    type Target = dyn ConnectionPort;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

/// An in-memory [`ConnectionPort`] double backed by `tokio::sync::mpsc`
/// channels, for tests that don't need a real socket.
///
/// `inbox` holds frames waiting to be "received" (as if sent by the
/// simulated client); `outbox` captures frames the broker "sends" to this
/// connection, so a test can assert on them afterwards.
pub struct MockConnection {
    inbox: Mutex<tokio::sync::mpsc::UnboundedReceiver<Frame>>,
    inbox_tx: tokio::sync::mpsc::UnboundedSender<Frame>,
    outbox_tx: tokio::sync::mpsc::UnboundedSender<Frame>,
    reliable: AtomicBool,
    fail_sends: AtomicBool,
}

impl MockConnection {
    /// Creates a connected pair: returns the `ConnectionPort` the broker
    /// will drive, and an outbox receiver the test reads delivered frames
    /// from.
    pub fn new() -> (Arc<MockConnection>, tokio::sync::mpsc::UnboundedReceiver<Frame>) {
        let (inbox_tx, inbox_rx) = tokio::sync::mpsc::unbounded_channel();
        let (outbox_tx, outbox_rx) = tokio::sync::mpsc::unbounded_channel();
        let conn = Arc::new(MockConnection {
            inbox: Mutex::new(inbox_rx),
            inbox_tx,
            outbox_tx,
            reliable: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        });
        (conn, outbox_rx)
    }

    /// Queues a frame as though the simulated client had sent it.
    pub fn push_client_frame(&self, frame: Frame) {
        let _ = self.inbox_tx.send(frame);
    }

    /// Marks this connection as advertising reliable delivery.
    pub fn set_reliable(&self, reliable: bool) {
        self.reliable.store(reliable, Ordering::SeqCst);
    }

    /// After this is set, `send_frame` fails, simulating a misbehaving
    /// subscriber connection (used to test topic-subscriber pruning).
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionPort for MockConnection {
    async fn receive_frame(&self) -> Result<Frame, EngineError> {
        let mut inbox = self.inbox.lock().await;
        inbox.recv().await.ok_or(EngineError::ClientDisconnected)
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), EngineError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(EngineError::Other("mock connection send failure".into()));
        }
        self.outbox_tx
            .send(frame)
            .map_err(|_| EngineError::ClientDisconnected)
    }

    fn reliable_subscriber(&self) -> bool {
        self.reliable.load(Ordering::SeqCst)
    }
}
