//! Protocol engine: the per-connection STOMP 1.2 state machine (spec §4.8).
//!
//! One [`ProtocolEngine`] is built per accepted connection and owns that
//! connection's session state (`Initial` / `Connected` / `Closed`). It reads
//! frames from its [`ConnectionHandle`] in a loop, dispatches each to the
//! queue or topic manager, and converts handler errors into ERROR frames
//! rather than letting them tear the session down (spec §7 error boundary).

use std::sync::Arc;

use uuid::Uuid;

use crate::auth::Authenticator;
use crate::connection::ConnectionHandle;
use crate::error::{AuthError, EngineError, ProtocolError};
use crate::frame::{is_recognized_command, Frame};
use crate::queue::QueueManager;
use crate::topic::TopicManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Initial,
    Connected,
    Closed,
}

/// Commands recognized by the codec but with no dispatch handler: either
/// transaction/ack bookkeeping out of scope for this core (spec Non-goals),
/// or server-only frames a well-behaved client never sends.
const INERT_COMMANDS: &[&str] = &["begin", "commit", "abort", "ack", "nack"];
const SERVER_ONLY_COMMANDS: &[&str] = &["connected", "message", "error", "receipt"];

/// Drives one client connection through CONNECT, a run of SEND/SUBSCRIBE/
/// UNSUBSCRIBE frames, and DISCONNECT (spec §4.8).
pub struct ProtocolEngine {
    connection: ConnectionHandle,
    authenticator: Arc<dyn Authenticator>,
    queue_manager: Arc<QueueManager>,
    topic_manager: Arc<TopicManager>,
    state: SessionState,
}

impl ProtocolEngine {
    pub fn new(
        connection: ConnectionHandle,
        authenticator: Arc<dyn Authenticator>,
        queue_manager: Arc<QueueManager>,
        topic_manager: Arc<TopicManager>,
    ) -> Self {
        ProtocolEngine {
            connection,
            authenticator,
            queue_manager,
            topic_manager,
            state: SessionState::Initial,
        }
    }

    /// Drives the session to completion: reads frames until the transport
    /// closes or a DISCONNECT is processed, then unwinds subscriptions and
    /// in-flight deliveries on every exit path (spec §5).
    pub async fn run(&mut self) {
        loop {
            let frame = match self.connection.receive_frame().await {
                Ok(frame) => frame,
                Err(EngineError::ClientDisconnected) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "error receiving frame; ending session");
                    break;
                }
            };
            self.process_frame(frame).await;
            if self.state == SessionState::Closed {
                break;
            }
        }
        self.unbind().await;
    }

    /// Dispatches one frame and converts any handler error into an ERROR
    /// frame sent back on this connection (spec §7). On success, honors the
    /// receipt law: a frame carrying a `receipt` header, for any command
    /// other than the literal CONNECT, gets a matching RECEIPT frame (a
    /// receipted STOMP frame — the CONNECT alias — does get one).
    pub async fn process_frame(&mut self, frame: Frame) {
        let cmd = frame.command_lower();

        if !is_recognized_command(&cmd) {
            self.send_error(ProtocolError::UnknownCommand(frame.command().to_string())).await;
            return;
        }

        if self.state != SessionState::Connected && cmd != "connect" && cmd != "stomp" {
            self.send_error(ProtocolError::NotConnected).await;
            return;
        }

        let receipt_id = frame.header("receipt").map(str::to_string);
        // Spec §4.8: withheld only when the command was literally CONNECT.
        // A receipted STOMP frame (the CONNECT alias) does get a RECEIPT —
        // matching protocol.py's `process_frame`, which compares the bound
        // handler to `self.connect` specifically, not to the STOMP alias.
        let is_connect = cmd == "connect";

        match self.dispatch(&cmd, frame).await {
            Ok(()) => {
                if let (Some(receipt_id), false) = (receipt_id, is_connect) {
                    if let Err(e) = self.connection.send_frame(Frame::receipt(receipt_id)).await {
                        tracing::warn!(error = %e, "failed to send receipt frame");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, command = %cmd, "frame handling failed");
                self.send_error(e).await;
            }
        }
    }

    async fn dispatch(&mut self, cmd: &str, frame: Frame) -> Result<(), EngineError> {
        match cmd {
            "connect" | "stomp" => self.handle_connect(frame).await,
            "send" => self.queue_or_topic_send(frame).await,
            "subscribe" => self.handle_subscribe(frame),
            "unsubscribe" => self.handle_unsubscribe(frame),
            "disconnect" => self.handle_disconnect().await,
            _ if INERT_COMMANDS.contains(&cmd) => Ok(()),
            _ if SERVER_ONLY_COMMANDS.contains(&cmd) => {
                Err(ProtocolError::NoHandlerForCommand(cmd.to_string()).into())
            }
            other => Err(ProtocolError::UnknownCommand(other.to_string()).into()),
        }
    }

    /// CONNECT/STOMP: validates `accept-version`, authenticates the bearer
    /// `token` header, and, on success, replies CONNECTED with a fresh
    /// session id (spec §4.8).
    ///
    /// A missing or unsupported `accept-version` is answered directly with
    /// a version-tagged ERROR frame rather than going through the generic
    /// error boundary, since it needs `version`/`content-type` headers in
    /// addition to the `message` header every ERROR frame carries
    /// (spec §3, §4.8) — see DESIGN.md for the version-mismatch framing
    /// decision.
    async fn handle_connect(&mut self, frame: Frame) -> Result<(), EngineError> {
        let accept_version = frame.header("accept-version");
        let supported = accept_version
            .map(|v| v.split(',').map(str::trim).any(|v| v == "1.2"))
            .unwrap_or(false);

        if accept_version.is_none() {
            self.send_version_error("No protocol version specified, specify 'accept-version' header")
                .await;
            return Ok(());
        }
        if !supported {
            self.send_version_error("Supported protocol versions are 1.2").await;
            return Ok(());
        }

        let token = frame.header("token").ok_or(AuthError::TokenMissing)?;
        if !self.authenticator.authenticate_from_token(token).await {
            return Err(AuthError::Rejected.into());
        }

        let session_id = Uuid::new_v4().to_string();
        self.state = SessionState::Connected;
        tracing::debug!(session = %session_id, "session connected");
        self.connection
            .send_frame(Frame::connected(session_id))
            .await
    }

    async fn queue_or_topic_send(&self, frame: Frame) -> Result<(), EngineError> {
        let dest = frame
            .header("destination")
            .ok_or(ProtocolError::MissingDestination)?
            .to_string();
        if dest.starts_with("/queue/") {
            self.queue_manager.send(frame).await
        } else {
            self.topic_manager.send(frame).await
        }
    }

    fn handle_subscribe(&self, frame: Frame) -> Result<(), EngineError> {
        let id = frame
            .header("id")
            .ok_or(ProtocolError::MissingSubscriptionId)?
            .to_string();
        let dest = frame
            .header("destination")
            .ok_or(ProtocolError::MissingDestination)?
            .to_string();
        if dest.starts_with("/queue/") {
            self.queue_manager.subscribe(self.connection.clone(), &dest, &id);
        } else {
            self.topic_manager.subscribe(self.connection.clone(), &dest, &id);
        }
        Ok(())
    }

    fn handle_unsubscribe(&self, frame: Frame) -> Result<(), EngineError> {
        let id = frame
            .header("id")
            .ok_or(ProtocolError::MissingSubscriptionId)?
            .to_string();
        let dest = frame
            .header("destination")
            .ok_or(ProtocolError::MissingDestination)?
            .to_string();
        if dest.starts_with("/queue/") {
            self.queue_manager.unsubscribe(&self.connection, &dest, &id);
        } else {
            self.topic_manager.unsubscribe(&self.connection, &dest, &id);
        }
        Ok(())
    }

    async fn handle_disconnect(&mut self) -> Result<(), EngineError> {
        tracing::debug!("session disconnected by client");
        self.state = SessionState::Closed;
        Ok(())
    }

    /// Unsubscribes this connection from every destination and requeues any
    /// frame in flight to it. Called on every exit path from [`run`](Self::run),
    /// including transport errors, so it must be idempotent with respect to
    /// an already-clean connection.
    async fn unbind(&self) {
        self.queue_manager.disconnect(&self.connection).await;
        self.topic_manager.disconnect(&self.connection);
    }

    async fn send_error(&self, err: impl Into<EngineError>) {
        let err = err.into();
        let message = err.to_string();
        if let Err(e) = self
            .connection
            .send_frame(Frame::error_frame(message.clone(), message.into_bytes()))
            .await
        {
            tracing::warn!(error = %e, "failed to send ERROR frame");
        }
    }

    async fn send_version_error(&self, body: &str) {
        let mut frame = Frame::error_frame(body, body.as_bytes().to_vec());
        frame.set_header("version", "1.2");
        if let Err(e) = self.connection.send_frame(frame).await {
            tracing::warn!(error = %e, "failed to send version-mismatch ERROR frame");
        }
    }
}
