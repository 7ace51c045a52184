//! Security events.
//!
//! Engines emit an [`Event`] for every issuance, rejection, replay detection
//! and revocation through an [`EventListener`]. Events carry identifiers only:
//! never codes, tokens or secrets.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Client registered.
    ClientRegistered,
    /// Client metadata updated.
    ClientUpdated,

    /// Authorization code issued.
    CodeIssued,
    /// Authorization request rejected.
    AuthorizationRejected,

    /// Code exchanged for tokens.
    CodeToToken,
    /// Code exchange failed.
    CodeToTokenError,
    /// An already consumed code was presented again.
    CodeReplayDetected,
    /// Refresh token rotated.
    RefreshToken,
    /// Refresh grant rejected.
    RefreshTokenError,
    /// An already used refresh token was presented again.
    RefreshTokenReuseDetected,
    /// Introspection answered.
    IntrospectToken,
    /// Revocation request processed.
    RevokeGrant,

    /// Signing key rotated.
    KeyRotated,
}

/// Whether the operation behind an event went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    /// Completed.
    Success,
    /// Rejected or aborted.
    Failure,
}

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// UUIDv7, so ids sort by time.
    pub id: Uuid,
    /// When the event was built.
    pub timestamp: DateTime<Utc>,
    /// Kind.
    pub event_type: EventType,
    /// Result.
    pub outcome: EventOutcome,
    /// Client involved, if known.
    pub client_id: Option<String>,
    /// End-user involved, if known.
    pub subject: Option<String>,
    /// OAuth error code of a failure.
    pub error: Option<String>,
    /// Free-form context in insertion order, e.g. `family_id` or `kid`.
    pub details: Vec<(String, String)>,
}

impl Event {
    /// Shorthand for [`EventBuilder::new`].
    #[must_use]
    pub const fn builder(event_type: EventType) -> EventBuilder {
        EventBuilder::new(event_type)
    }

    /// Returns the value of the first detail named `key`.
    #[must_use]
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Assembles an [`Event`]; outcome defaults to success.
pub struct EventBuilder {
    event_type: EventType,
    outcome: EventOutcome,
    client_id: Option<String>,
    subject: Option<String>,
    error: Option<String>,
    details: Vec<(String, String)>,
}

impl EventBuilder {
    /// Starts a successful event of `event_type`.
    #[must_use]
    pub const fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            outcome: EventOutcome::Success,
            client_id: None,
            subject: None,
            error: None,
            details: Vec::new(),
        }
    }

    /// Marks the event failed with OAuth error code `error`.
    #[must_use]
    pub fn failure(mut self, error: impl Into<String>) -> Self {
        self.outcome = EventOutcome::Failure;
        self.error = Some(error.into());
        self
    }

    /// Records the client.
    #[must_use]
    pub fn client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Records the end-user.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Appends a detail.
    #[must_use]
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.push((key.into(), value.into()));
        self
    }

    /// Stamps id and time.
    #[must_use]
    pub fn build(self) -> Event {
        Event {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            event_type: self.event_type,
            outcome: self.outcome,
            client_id: self.client_id,
            subject: self.subject,
            error: self.error,
            details: self.details,
        }
    }
}

/// Receiver of security events.
///
/// Implementations must not block for long: listeners run inline with the
/// operation that raised the event.
pub trait EventListener: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &Event);
}

/// Default listener: one INFO `security_event` record per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventListener;

impl TracingEventListener {
    /// Returns the listener.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl EventListener for TracingEventListener {
    fn on_event(&self, event: &Event) {
        tracing::info!(
            event_id = %event.id,
            event_type = ?event.event_type,
            outcome = ?event.outcome,
            client_id = ?event.client_id,
            subject = ?event.subject,
            error = ?event.error,
            details = ?event.details,
            "security_event"
        );
    }
}

/// Keeps every event in memory; used by tests to assert on emissions.
#[derive(Debug, Default)]
pub struct InMemoryEventListener {
    events: RwLock<Vec<Event>>,
}

impl InMemoryEventListener {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Recorded events of `event_type`, oldest first.
    #[must_use]
    pub fn events_of(&self, event_type: EventType) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Forgets everything recorded.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventListener for InMemoryEventListener {
    fn on_event(&self, event: &Event) {
        self.events.write().push(event.clone());
    }
}
