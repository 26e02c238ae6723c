//! Pluggable delivery-scheduling policies (spec §4.4).
//!
//! Two independent capabilities — which subscriber gets a queue message,
//! and which queue a connection should be served from — are modeled as
//! small traits rather than a class hierarchy, so operators can substitute
//! weighted/round-robin/QoS-aware policies without touching the delivery
//! path (spec §9 design note).

use rand::seq::SliceRandom;

use crate::connection::ConnectionHandle;
use crate::frame::Frame;
use crate::registry::Subscription;

/// Chooses which subscriber should receive a given message.
///
/// Determinism is not promised; callers must not assume a specific choice
/// (spec §4.4).
pub trait SubscriberScheduler: Send + Sync {
    fn choice(&self, subscribers: &[Subscription], message: &Frame) -> Option<Subscription>;

    /// Optional teardown hook, mirroring the original source's `hasattr(...,
    /// 'close')` duck-typed cleanup (SPEC_FULL.md §3). Default: no-op.
    fn close(&self) {}
}

/// Chooses which queue destination to favor for a given connection.
pub trait QueueScheduler: Send + Sync {
    fn choice(&self, destinations: &[String], connection: &ConnectionHandle) -> Option<String>;

    fn close(&self) {}
}

/// Default policy: uniform random pick among all eligible subscribers.
#[derive(Default)]
pub struct RandomSubscriberScheduler;

impl SubscriberScheduler for RandomSubscriberScheduler {
    fn choice(&self, subscribers: &[Subscription], _message: &Frame) -> Option<Subscription> {
        subscribers.choose(&mut rand::thread_rng()).cloned()
    }
}

/// Prefers subscribers whose connection advertises `reliable_subscriber()`;
/// falls back to a uniform pick over everyone when none are reliable.
#[derive(Default)]
pub struct ReliabilityPreferringSubscriberScheduler;

impl SubscriberScheduler for ReliabilityPreferringSubscriberScheduler {
    fn choice(&self, subscribers: &[Subscription], _message: &Frame) -> Option<Subscription> {
        let reliable: Vec<&Subscription> = subscribers
            .iter()
            .filter(|s| s.connection.reliable_subscriber())
            .collect();
        if !reliable.is_empty() {
            reliable.choose(&mut rand::thread_rng()).map(|s| (*s).clone())
        } else {
            subscribers.choose(&mut rand::thread_rng()).cloned()
        }
    }
}

/// Default policy: uniform random pick among candidate destinations.
#[derive(Default)]
pub struct RandomQueueScheduler;

impl QueueScheduler for RandomQueueScheduler {
    fn choice(&self, destinations: &[String], _connection: &ConnectionHandle) -> Option<String> {
        destinations.choose(&mut rand::thread_rng()).cloned()
    }
}
