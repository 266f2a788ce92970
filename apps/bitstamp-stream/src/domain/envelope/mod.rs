//! Stream Envelope Types
//!
//! Every message exchanged with the Bitstamp WebSocket feed, in either
//! direction, is a JSON object with the same three fields:
//!
//! ```json
//! {"event": "trade", "channel": "live_trades_btcusd", "data": {"id": 1}}
//! ```
//!
//! The `data` payload is carried as an opaque [`serde_json::Value`]; this
//! layer never interprets it.
//!
//! # Control Verbs
//!
//! - `bts:subscribe` / `bts:unsubscribe`: client requests
//! - `bts:subscription_succeeded` / `bts:unsubscription_succeeded`: acks
//! - `bts:request_reconnect`: server asks the client to migrate
//! - `bts:error`: server-side error report

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Wire Verbs
// =============================================================================

/// Outbound subscribe verb.
pub const SUBSCRIBE_EVENT: &str = "bts:subscribe";

/// Outbound unsubscribe verb.
pub const UNSUBSCRIBE_EVENT: &str = "bts:unsubscribe";

/// Server acknowledgement of a subscribe request.
pub const SUBSCRIPTION_SUCCEEDED_EVENT: &str = "bts:subscription_succeeded";

/// Server acknowledgement of an unsubscribe request.
pub const UNSUBSCRIPTION_SUCCEEDED_EVENT: &str = "bts:unsubscription_succeeded";

/// Server-initiated reconnect hint.
pub const RECONNECT_REQUEST_EVENT: &str = "bts:request_reconnect";

/// Server error report.
pub const ERROR_EVENT: &str = "bts:error";

// =============================================================================
// Envelope
// =============================================================================

/// One decoded wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Semantic type of the message.
    pub event: String,

    /// Logical topic; empty for most control messages.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,

    /// Opaque payload. Absent on the wire decodes as `null`.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Create an envelope with an explicit event, channel and payload.
    #[must_use]
    pub fn new(event: impl Into<String>, channel: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            channel: channel.into(),
            data,
        }
    }

    /// Build a `bts:subscribe` request for one channel.
    #[must_use]
    pub fn subscribe(channel: &str) -> Self {
        Self::control(ControlVerb::Subscribe, channel)
    }

    /// Build a `bts:unsubscribe` request for one channel.
    #[must_use]
    pub fn unsubscribe(channel: &str) -> Self {
        Self::control(ControlVerb::Unsubscribe, channel)
    }

    /// Build a control request carrying the channel inside `data`.
    #[must_use]
    pub fn control(verb: ControlVerb, channel: &str) -> Self {
        Self {
            event: verb.as_str().to_string(),
            channel: String::new(),
            data: serde_json::json!({ "channel": channel }),
        }
    }

    /// Whether the server is asking the client to reconnect.
    ///
    /// Advisory only: the caller decides when and where to reconnect.
    #[must_use]
    pub fn is_reconnect_request(&self) -> bool {
        is_reconnect_request(self)
    }

    /// Classify the event tag.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        EventKind::from_event(&self.event)
    }
}

/// True if and only if `envelope.event` is `bts:request_reconnect`.
///
/// Bitstamp guarantees that a client connecting after receiving this
/// message is routed to a healthy server.
#[must_use]
pub fn is_reconnect_request(envelope: &Envelope) -> bool {
    envelope.event == RECONNECT_REQUEST_EVENT
}

// =============================================================================
// Control Verbs
// =============================================================================

/// Outbound control verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlVerb {
    /// Start receiving a channel.
    Subscribe,
    /// Stop receiving a channel.
    Unsubscribe,
}

impl ControlVerb {
    /// Wire name of the verb.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => SUBSCRIBE_EVENT,
            Self::Unsubscribe => UNSUBSCRIBE_EVENT,
        }
    }
}

impl std::fmt::Display for ControlVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Event Classification
// =============================================================================

/// Coarse classification of inbound event tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// `bts:subscription_succeeded`
    SubscriptionSucceeded,
    /// `bts:unsubscription_succeeded`
    UnsubscriptionSucceeded,
    /// `bts:request_reconnect`
    ReconnectRequest,
    /// `bts:error`
    ServerError,
    /// Any other event, passed through untouched.
    Data(String),
}

impl EventKind {
    /// Classify an event tag.
    #[must_use]
    pub fn from_event(event: &str) -> Self {
        match event {
            SUBSCRIPTION_SUCCEEDED_EVENT => Self::SubscriptionSucceeded,
            UNSUBSCRIPTION_SUCCEEDED_EVENT => Self::UnsubscriptionSucceeded,
            RECONNECT_REQUEST_EVENT => Self::ReconnectRequest,
            ERROR_EVENT => Self::ServerError,
            other => Self::Data(other.to_string()),
        }
    }

    /// Metric label for this kind.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SubscriptionSucceeded => "subscription_succeeded",
            Self::UnsubscriptionSucceeded => "unsubscription_succeeded",
            Self::ReconnectRequest => "reconnect_request",
            Self::ServerError => "server_error",
            Self::Data(_) => "data",
        }
    }
}
