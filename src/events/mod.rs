//! Session event bus
//!
//! Maps each [`EventKind`] to an ordered list of listeners. Dispatch is
//! synchronous and runs listeners in registration order; a panicking
//! listener is logged and skipped so later listeners still run.
//!
//! The registry lock is never held while a listener runs, so listeners are
//! free to register, remove, or call back into the session.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;

use crate::protocol::ProtocolMessage;
use crate::session::ConnectionStatus;

/// Event kinds a caller can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The transport opened
    Connected,
    /// The transport closed, by either side
    Disconnected,
    /// Any well-formed inbound message, before its kind-specific event
    Message,
    /// Recognized speech
    Transcription,
    /// Assistant reply text
    Response,
    /// Synthesized audio from the service
    AudioChunk,
    /// Service-side status payload
    StatusUpdate,
    /// A failure on any path
    Error,
    /// A reconnect attempt was scheduled
    Reconnecting,
    /// A reconnect attempt succeeded
    Reconnected,
    /// Reconnect attempts ran out
    ReconnectFailed,
    /// The session's own status changed
    StatusChanged,
}

impl EventKind {
    /// All kinds
    pub const ALL: [Self; 12] = [
        Self::Connected,
        Self::Disconnected,
        Self::Message,
        Self::Transcription,
        Self::Response,
        Self::AudioChunk,
        Self::StatusUpdate,
        Self::Error,
        Self::Reconnecting,
        Self::Reconnected,
        Self::ReconnectFailed,
        Self::StatusChanged,
    ];

    /// Event name as exposed to external collaborators
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Message => "message",
            Self::Transcription => "transcription",
            Self::Response => "response",
            Self::AudioChunk => "audio_chunk",
            Self::StatusUpdate => "status_update",
            Self::Error => "error",
            Self::Reconnecting => "reconnecting",
            Self::Reconnected => "reconnected",
            Self::ReconnectFailed => "reconnect_failed",
            Self::StatusChanged => "status_changed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an error report came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The transport could not be opened
    TransportOpen,
    /// An inbound frame was not a valid envelope
    FrameParse,
    /// The open transport reported an error
    Transport,
    /// A send was attempted with no open transport
    NotConnected,
    /// A frame could not be serialized or written
    Send,
    /// Microphone or encoder failure
    Capture,
    /// Audio decode or playback failure
    Playback,
    /// The service sent an `error` message
    Remote,
}

/// Payload of an `error` event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    /// Category
    pub kind: ErrorKind,
    /// Short description
    pub message: String,
    /// Underlying cause, where available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorReport {
    /// Create a report with no details
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Attach the underlying cause
    #[must_use]
    pub fn with_cause(mut self, cause: &impl std::fmt::Display) -> Self {
        self.details = Some(Value::String(cause.to_string()));
        self
    }
}

/// An event emitted by a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Transport opened
    Connected,
    /// Transport closed
    Disconnected {
        /// Close code, if the peer sent one
        code: Option<u16>,
        /// Close reason, if the peer sent one
        reason: Option<String>,
    },
    /// Any recognised inbound message, before kind-specific dispatch
    Message(ProtocolMessage),
    /// Recognised speech
    Transcription(Value),
    /// Generated response text
    Response(Value),
    /// Raw synthesized audio payload
    AudioChunk(Value),
    /// Service status report
    StatusUpdate(Value),
    /// Something went wrong
    Error(ErrorReport),
    /// A reconnect attempt has been scheduled
    Reconnecting {
        /// 1-based attempt number
        attempt: u32,
        /// Configured maximum
        max_attempts: u32,
    },
    /// The transport reopened after one or more reconnect attempts
    Reconnected {
        /// Attempts it took
        attempts: u32,
    },
    /// Reconnection gave up; no further attempts are scheduled
    ReconnectFailed {
        /// Attempts made
        attempts: u32,
    },
    /// The session status changed
    StatusChanged(ConnectionStatus),
}

impl SessionEvent {
    /// The kind listeners subscribe to for this event
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::Message(_) => EventKind::Message,
            Self::Transcription(_) => EventKind::Transcription,
            Self::Response(_) => EventKind::Response,
            Self::AudioChunk(_) => EventKind::AudioChunk,
            Self::StatusUpdate(_) => EventKind::StatusUpdate,
            Self::Error(_) => EventKind::Error,
            Self::Reconnecting { .. } => EventKind::Reconnecting,
            Self::Reconnected { .. } => EventKind::Reconnected,
            Self::ReconnectFailed { .. } => EventKind::ReconnectFailed,
            Self::StatusChanged(_) => EventKind::StatusChanged,
        }
    }
}

/// Listener callback
pub type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Handle identifying one registration, used to remove it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered listener registry with failure-isolated dispatch
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
}

impl EventBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<(ListenerId, Listener)>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener; it runs after every listener already registered for `kind`
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener
    ///
    /// Returns `false` if `id` was not registered for `kind`.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut registry = self.registry();
        let Some(list) = registry.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        before != list.len()
    }

    /// Number of listeners registered for `kind`
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry().get(&kind).map_or(0, Vec::len)
    }

    /// Dispatch an event to its listeners in registration order
    pub fn emit(&self, event: &SessionEvent) {
        let kind = event.kind();
        let snapshot: Vec<Listener> = self
            .registry()
            .get(&kind)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::error!(event = %kind, "event listener panicked");
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry();
        let counts: HashMap<&str, usize> = registry
            .iter()
            .map(|(kind, list)| (kind.as_str(), list.len()))
            .collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}
