//! Top-level broker wiring: owns the shared ports and managers, and builds
//! one [`ProtocolEngine`] per accepted connection (spec §5 "ambient
//! wiring").
//!
//! This is the one piece of the core with no direct original-source
//! counterpart to port line-for-line — the Python original wires its
//! equivalent objects together in a dependency-injection container at
//! app-startup time, which Rust expresses more plainly as a builder over
//! `Arc`s.

use std::sync::Arc;

use crate::auth::Authenticator;
use crate::connection::ConnectionHandle;
use crate::engine::ProtocolEngine;
use crate::queue::QueueManager;
use crate::registry::SubscriptionRegistry;
use crate::scheduler::{QueueScheduler, SubscriberScheduler};
use crate::store::QueueStore;
use crate::topic::TopicManager;

/// Shared broker-scope state: one subscription registry, one queue manager,
/// one topic manager, one authenticator, fanned out to every connection.
pub struct Broker {
    authenticator: Arc<dyn Authenticator>,
    queue_manager: Arc<QueueManager>,
    topic_manager: Arc<TopicManager>,
}

impl Broker {
    pub fn new(
        store: Arc<dyn QueueStore>,
        authenticator: Arc<dyn Authenticator>,
        subscriber_scheduler: Arc<dyn SubscriberScheduler>,
        queue_scheduler: Arc<dyn QueueScheduler>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let queue_manager = Arc::new(QueueManager::new(
            store,
            registry.clone(),
            subscriber_scheduler,
            queue_scheduler,
        ));
        let topic_manager = Arc::new(TopicManager::new(registry));
        Broker {
            authenticator,
            queue_manager,
            topic_manager,
        }
    }

    /// Builds a fresh [`ProtocolEngine`] bound to `connection`, sharing this
    /// broker's managers and authenticator. Call `.run()` on the result to
    /// drive the session (typically spawned as its own task per accepted
    /// connection).
    pub fn engine_for(&self, connection: ConnectionHandle) -> ProtocolEngine {
        ProtocolEngine::new(
            connection,
            self.authenticator.clone(),
            self.queue_manager.clone(),
            self.topic_manager.clone(),
        )
    }

    pub fn queue_manager(&self) -> &Arc<QueueManager> {
        &self.queue_manager
    }

    pub fn topic_manager(&self) -> &Arc<TopicManager> {
        &self.topic_manager
    }

    /// Shuts down the store and schedulers. Does not touch in-flight
    /// connections; callers are expected to have stopped accepting new ones
    /// and drained existing sessions first.
    pub async fn close(&self) {
        tracing::info!("shutting down broker");
        self.queue_manager.close().await;
    }
}
