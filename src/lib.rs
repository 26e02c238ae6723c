//! Core routing engine for a STOMP 1.2 message broker.
//!
//! This crate implements the transport-agnostic half of a broker: frame
//! codec, connection port, subscription registry, delivery schedulers,
//! queue store port, queue/topic managers, authenticator port, and the
//! per-session protocol engine. It does not open sockets or run a server
//! loop — a binary wraps [`broker::Broker`] around a real listener and a
//! real [`connection::ConnectionPort`] implementation.

pub mod auth;
pub mod broker;
pub mod connection;
pub mod engine;
pub mod error;
pub mod frame;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod topic;
