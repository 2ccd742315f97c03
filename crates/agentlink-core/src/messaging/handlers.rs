//! Typed event dispatch.
//!
//! Maps event types to registered handlers. One handler per event type;
//! registering again replaces the previous handler. Events without a
//! handler are dropped, which the connection loop logs as a warning since
//! unhandled types are expected during protocol evolution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::message::AgentMessage;
use crate::error::Result;
use crate::identity::AgentIdentity;
use crate::protocol::{
    AckPayload, AuthResult, ErrorPayload, EventType, HeartbeatPayload, PresencePayload,
    TypingPayload,
};

/// Everything the subsystem surfaces to the application layer.
#[derive(Debug, Clone)]
pub enum Event {
    /// A decrypted, verified agent message.
    Message(AgentMessage),
    /// The local connection authenticated.
    Connected(AuthResult),
    /// The local connection closed; `reason` is set for remote-initiated
    /// shutdowns.
    Disconnected {
        /// Reason reported by the remote side, if any.
        reason: Option<String>,
    },
    /// The connection entered the error state or a frame-level fault
    /// occurred.
    ConnectionError {
        /// Sanitized description.
        detail: String,
    },
    /// A peer acknowledged one of our messages.
    Ack(AckPayload),
    /// A first-contact introduction was verified and the peer pinned.
    PeerIntroduced(AgentIdentity),
    /// A peer's presence changed.
    Presence(PresencePayload),
    /// A peer started or stopped typing.
    Typing(TypingPayload),
    /// A peer liveness signal.
    Heartbeat(HeartbeatPayload),
    /// An error report from the remote side.
    RemoteError(ErrorPayload),
}

impl Event {
    /// The event type this dispatches under.
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Message(message) => message.event_type(),
            Event::Connected(_) => EventType::Connect,
            Event::Disconnected { .. } => EventType::Disconnect,
            Event::ConnectionError { .. } => EventType::Error,
            Event::Ack(_) => EventType::Ack,
            Event::PeerIntroduced(_) => EventType::Handshake,
            Event::Presence(_) => EventType::Presence,
            Event::Typing(_) => EventType::Typing,
            Event::Heartbeat(_) => EventType::Heartbeat,
            Event::RemoteError(_) => EventType::Error,
        }
    }
}

/// A registered event callback.
///
/// Handlers run inline on the connection task in arrival order, so one
/// conversation's messages reach the application in transport order. Slow
/// work belongs on a task the handler spawns, not in the handler itself.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    async fn handle(&self, event: Event) -> Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Result<()> + Send + Sync,
{
    async fn handle(&self, event: Event) -> Result<()> {
        (self.0)(event)
    }
}

/// Dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events delivered to a handler.
    pub handled: u64,
    /// Events with no registered handler.
    pub unhandled: u64,
    /// Handler invocations that returned an error.
    pub failed: u64,
}

/// Registry mapping event types to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<EventType, Arc<dyn EventHandler>>>,
    handled: AtomicU64,
    unhandled: AtomicU64,
    failed: AtomicU64,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type`, replacing any previous one.
    pub async fn register(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        if handlers.insert(event_type, handler).is_some() {
            debug!(%event_type, "replacing registered handler");
        }
    }

    /// Register a plain closure for `event_type`.
    pub async fn register_fn<F>(&self, event_type: EventType, f: F)
    where
        F: Fn(Event) -> Result<()> + Send + Sync + 'static,
    {
        self.register(event_type, Arc::new(FnHandler(f))).await;
    }

    /// Remove the handler for `event_type`. Returns whether one existed.
    pub async fn unregister(&self, event_type: EventType) -> bool {
        self.handlers.write().await.remove(&event_type).is_some()
    }

    /// Whether a handler is registered for `event_type`.
    pub async fn has_handler(&self, event_type: EventType) -> bool {
        self.handlers.read().await.contains_key(&event_type)
    }

    /// Dispatch `event` to its handler.
    ///
    /// Returns `Ok(true)` when a handler ran, `Ok(false)` when none was
    /// registered, and the handler's error when it failed.
    pub async fn dispatch(&self, event: Event) -> Result<bool> {
        let event_type = event.event_type();
        let handler = self.handlers.read().await.get(&event_type).cloned();

        let Some(handler) = handler else {
            self.unhandled.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        };

        match handler.handle(event).await {
            Ok(()) => {
                self.handled.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// Current dispatch counters.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            handled: self.handled.load(Ordering::Relaxed),
            unhandled: self.unhandled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
