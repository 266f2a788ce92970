#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Bitstamp Stream - Market Data Feed Client
//!
//! Keeps a WebSocket connection to Bitstamp's public streaming API and
//! exposes it as two bounded queues: decoded envelopes and feed errors.
//! Subscribe and unsubscribe requests can be issued from any task while
//! the reader runs.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Wire envelope and subscription tracking
//!   - `envelope`: `Envelope`, event classification, control verbs
//!   - `subscription`: Ordered channel set replayed on reconnect
//!
//! - **Application**: Port definitions
//!   - `ports`: Connector and frame source/sink traits
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `bitstamp`: Stream client, session supervisor, codec, transport
//!   - `config`: Environment-driven settings
//!   - `metrics`: Prometheus exporter
//!   - `telemetry`: Tracing and OpenTelemetry
//!
//! # Data Flow
//!
//! ```text
//!                 ┌───────────────┐  events  ┌────────────┐
//! Bitstamp WS ──► │  reader task  │ ───────► │            │
//!                 │ (StreamClient)│  errors  │ Supervisor │ ──► SessionEvent
//!             ◄── │  send guard   │ ───────► │            │
//!  subscribe      └───────────────┘          └────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Wire types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::envelope::{ControlVerb, Envelope, EventKind, is_reconnect_request};
pub use domain::subscription::{Channel, SubscriptionSet};

// Ports
pub use application::ports::{Connector, FrameSink, FrameSource, TransportError};

// Stream client and supervisor
pub use infrastructure::bitstamp::{
    DisconnectReason, FeedError, SessionEvent, StreamClient, StreamClientConfig,
    StreamClientError, StreamHandle, Supervisor, SupervisorConfig, SupervisorError, WsConnector,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, StreamSettings};

// Metrics
pub use infrastructure::metrics::{MetricsError, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
};
