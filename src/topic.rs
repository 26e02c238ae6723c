//! Topic manager: fans a SEND frame out to every current subscriber of a
//! destination, with no buffering (spec §4.6). Failing subscriber
//! connections are pruned after the fan-out completes, so a delivery
//! failure never affects other subscribers and iteration is never mutated
//! mid-loop.

use std::sync::Arc;

use uuid::Uuid;

use crate::connection::ConnectionHandle;
use crate::error::{EngineError, ProtocolError};
use crate::frame::Frame;
use crate::registry::SubscriptionRegistry;

pub struct TopicManager {
    registry: Arc<SubscriptionRegistry>,
}

impl TopicManager {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        TopicManager { registry }
    }

    pub fn subscriber_count(&self, destination: Option<&str>) -> usize {
        self.registry.subscriber_count(destination)
    }

    pub fn subscribe(&self, connection: ConnectionHandle, destination: &str, id: &str) {
        self.registry.subscribe(connection, destination, id);
    }

    pub fn unsubscribe(&self, connection: &ConnectionHandle, destination: &str, id: &str) {
        self.registry.unsubscribe(connection, destination, id);
    }

    pub fn disconnect(&self, connection: &ConnectionHandle) {
        self.registry.disconnect(connection);
    }

    /// Sends an independent copy of `frame` to every current subscriber of
    /// its destination. A subscriber whose `send_frame` fails is logged and
    /// collected, then unsubscribed once fan-out has finished.
    pub async fn send(&self, mut frame: Frame) -> Result<(), EngineError> {
        let dest = frame
            .header("destination")
            .ok_or(ProtocolError::MissingDestination)?
            .to_string();

        frame.set_command("MESSAGE");
        if frame.header("message-id").is_none() {
            frame.set_header("message-id", Uuid::new_v4().to_string());
        }

        let subscribers = self.registry.subscribers(&dest);
        let mut failed = Vec::new();
        for subscriber in &subscribers {
            let mut copy = frame.clone();
            copy.set_header("subscription", subscriber.id.clone());
            if let Err(e) = subscriber.connection.send_frame(copy).await {
                tracing::warn!(
                    destination = %dest,
                    subscription = %subscriber.id,
                    error = %e,
                    "delivery failed; subscriber will be pruned"
                );
                failed.push(subscriber.clone());
            }
        }

        for subscriber in failed {
            self.unsubscribe(&subscriber.connection, &dest, &subscriber.id);
        }

        Ok(())
    }

    pub async fn close(&self) {
        tracing::info!("shutting down topic manager");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MockConnection;

    #[tokio::test]
    async fn fans_out_to_every_subscriber_with_own_id() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let manager = TopicManager::new(registry);

        let (conn_a, mut outbox_a) = MockConnection::new();
        let (conn_b, mut outbox_b) = MockConnection::new();
        let (conn_c, mut outbox_c) = MockConnection::new();
        let a = ConnectionHandle::new(conn_a);
        let b = ConnectionHandle::new(conn_b);
        let c = ConnectionHandle::new(conn_c);
        manager.subscribe(a, "/topic/x", "sa");
        manager.subscribe(b, "/topic/x", "sb");
        manager.subscribe(c, "/topic/x", "sc");

        let mut send = Frame::with_body("SEND", b"hi".to_vec());
        send.set_header("destination", "/topic/x");
        manager.send(send).await.unwrap();

        let m_a = outbox_a.try_recv().unwrap();
        let m_b = outbox_b.try_recv().unwrap();
        let m_c = outbox_c.try_recv().unwrap();
        assert_eq!(m_a.body(), b"hi");
        assert_eq!(m_b.body(), b"hi");
        assert_eq!(m_c.body(), b"hi");
        assert_eq!(m_a.header("subscription"), Some("sa"));
        assert_eq!(m_b.header("subscription"), Some("sb"));
        assert_eq!(m_c.header("subscription"), Some("sc"));
    }

    #[tokio::test]
    async fn failing_subscriber_is_pruned_others_still_delivered() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let manager = TopicManager::new(registry.clone());

        let (conn_a, mut outbox_a) = MockConnection::new();
        let (conn_b, _outbox_b) = MockConnection::new();
        let (conn_c, mut outbox_c) = MockConnection::new();
        conn_b.set_fail_sends(true);
        let a = ConnectionHandle::new(conn_a);
        let b = ConnectionHandle::new(conn_b);
        let c = ConnectionHandle::new(conn_c);
        manager.subscribe(a, "/topic/x", "sa");
        manager.subscribe(b, "/topic/x", "sb");
        manager.subscribe(c, "/topic/x", "sc");

        let mut send = Frame::with_body("SEND", b"hi".to_vec());
        send.set_header("destination", "/topic/x");
        manager.send(send).await.unwrap();

        assert!(outbox_a.try_recv().is_ok());
        assert!(outbox_c.try_recv().is_ok());
        assert_eq!(registry.subscriber_count(Some("/topic/x")), 2);
        let remaining = registry.subscribers("/topic/x");
        assert!(remaining.iter().all(|s| s.id != "sb"));
    }
}
