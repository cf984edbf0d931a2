//! # Event Bus System
//!
//! Broadcasts what the gateway does with credentials and requests using
//! `tokio::sync::broadcast`, so applications can observe refreshes, replays
//! and rejections without wrapping the gateway.
//!
//! ## Overview
//!
//! - **Event Types**: `AuthEvent` for the credential lifecycle and
//!   `GatewayEvent` for per-request outcomes, wrapped in `CoreEvent`
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ```text
//! ┌──────────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ Refresh          ├────────>│           ├────────────>│ Subscriber │
//! │ coordinator      │         │ EventBus  │             └────────────┘
//! └──────────────────┘         │           │
//! ┌──────────────────┐  emit   │           │  subscribe  ┌────────────┐
//! │ Request gateway  ├────────>│           ├────────────>│ Subscriber │
//! └──────────────────┘         └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Auth(AuthEvent::TokenRefreshing { ticket: 1 }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.description(), "Refreshing credential");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! `emit` fails when nobody is subscribed; the gateway uses `publish`, which
//! drops events nobody listens to.
//! Events never carry credential values.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published and received through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Credential lifecycle events
    Auth(AuthEvent),
    /// Per-request gateway events
    Gateway(GatewayEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Gateway(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::RefreshFailed { .. }) => EventSeverity::Error,
            CoreEvent::Gateway(GatewayEvent::RequestRejected { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::CredentialCleared { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::TokenRefreshed { .. }) => EventSeverity::Info,
            CoreEvent::Auth(AuthEvent::CredentialStored { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Events describing the shared credential and its refreshes.
///
/// `ticket` identifies one refresh operation; every waiter that joined the
/// operation observes the same ticket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// A refresh operation started.
    TokenRefreshing { ticket: u64 },
    /// A refresh operation produced a new credential.
    TokenRefreshed {
        ticket: u64,
        /// Expiry hint of the new credential (Unix epoch seconds), if known.
        expires_at: Option<i64>,
    },
    /// A refresh operation failed.
    RefreshFailed {
        ticket: u64,
        /// Failure kind name, e.g. `RefreshDenied`.
        kind: String,
        message: String,
    },
    /// A credential was installed outside of a refresh (sign-in).
    CredentialStored { expires_at: Option<i64> },
    /// The stored credential was removed.
    CredentialCleared { reason: String },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::TokenRefreshing { .. } => "Refreshing credential",
            AuthEvent::TokenRefreshed { .. } => "Credential refreshed",
            AuthEvent::RefreshFailed { .. } => "Credential refresh failed",
            AuthEvent::CredentialStored { .. } => "Credential stored",
            AuthEvent::CredentialCleared { .. } => "Credential cleared",
        }
    }
}

// ============================================================================
// Gateway Events
// ============================================================================

/// Events describing what happened to individual requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum GatewayEvent {
    /// A request was replayed once with a refreshed credential.
    RequestReplayed { request_id: String, target: String },
    /// A request ended with an error delivered to its caller.
    RequestRejected {
        request_id: String,
        target: String,
        /// Failure kind name, e.g. `AuthFailure`.
        kind: String,
    },
}

impl GatewayEvent {
    fn description(&self) -> &str {
        match self {
            GatewayEvent::RequestReplayed { .. } => "Request replayed with refreshed credential",
            GatewayEvent::RequestRejected { .. } => "Request rejected",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast channel shared by the coordinator, the gateway and subscribers.
///
/// Clones publish into the same channel. Receivers that fall more than
/// `capacity` events behind get `RecvError::Lagged`; publishers never wait.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `event`, returning how many subscribers will see it.
    ///
    /// Fails only when nobody is subscribed.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Publish `event` when someone is listening; otherwise drop it.
    pub fn publish(&self, event: CoreEvent) {
        if self.sender.receiver_count() > 0 {
            let _ = self.sender.send(event);
        }
    }

    /// New receiver; it sees events published from now on.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(16);
    /// let _subscriber = event_bus.subscribe();
    /// assert_eq!(event_bus.subscriber_count(), 1);
    /// ```
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A receiver that skips events its predicate rejects.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let gateway_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Gateway(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn wants(&self, event: &CoreEvent) -> bool {
        match &self.filter {
            Some(predicate) => predicate(event),
            None => true,
        }
    }

    /// Next accepted event.
    ///
    /// `RecvError::Lagged` is not fatal; the stream keeps going from the
    /// oldest event still buffered. `RecvError::Closed` means every bus
    /// handle was dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.wants(&event) {
                return Ok(event);
            }
        }
    }

    /// Next accepted event already buffered, or `None`.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        use broadcast::error::TryRecvError;

        loop {
            let event = match self.receiver.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(n)) => return Some(Err(RecvError::Lagged(n))),
                Err(TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            };
            if self.wants(&event) {
                return Some(Ok(event));
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}
