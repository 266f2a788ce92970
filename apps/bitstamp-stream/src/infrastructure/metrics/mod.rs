//! Prometheus Metrics Module
//!
//! Exposes stream client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Frames read and envelopes delivered by event kind
//! - **Errors**: Feed errors (timeout, read, decode) and send failures
//! - **Control**: Subscribe/unsubscribe frames written
//! - **Sessions**: Active clients, reconnect requests, supervisor reconnects
//!
//! # Integration
//!
//! When a port is configured, metrics are served at `/metrics` by the
//! exporter's own HTTP listener. Without an installed recorder every
//! recording function is a no-op.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::envelope::{ControlVerb, EventKind};

// =============================================================================
// Recorder Installation
// =============================================================================

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Errors installing the Prometheus exporter.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The exporter could not be built or bound.
    #[error("failed to install Prometheus exporter: {0}")]
    Build(#[from] BuildError),
}

/// Install the Prometheus exporter listening on `0.0.0.0:port`.
///
/// A port of `0` disables the exporter. Calling this again after a
/// successful install is a no-op. Must be called from within a Tokio
/// runtime.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed or the listener
/// cannot be bound.
pub fn init_metrics(port: u16) -> Result<Option<SocketAddr>, MetricsError> {
    if port == 0 {
        return Ok(None);
    }
    if let Some(addr) = INSTALLED.get() {
        return Ok(Some(*addr));
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();

    Ok(Some(*INSTALLED.get_or_init(|| addr)))
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "bitstamp_stream_frames_received_total",
        "Total frames read from the Bitstamp WebSocket"
    );
    describe_counter!(
        "bitstamp_stream_events_total",
        "Total envelopes delivered to the event queue by kind"
    );
    describe_counter!(
        "bitstamp_stream_feed_errors_total",
        "Total reader errors by type (timeout, read, decode)"
    );
    describe_counter!(
        "bitstamp_stream_control_sent_total",
        "Total control frames written by verb"
    );
    describe_counter!(
        "bitstamp_stream_send_failures_total",
        "Total control frame writes that failed"
    );
    describe_counter!(
        "bitstamp_stream_reconnect_requests_total",
        "Total bts:request_reconnect messages received"
    );
    describe_counter!(
        "bitstamp_stream_reconnects_total",
        "Total client re-creations performed by the supervisor"
    );
    describe_gauge!(
        "bitstamp_stream_active_clients",
        "Number of stream clients with a running reader task"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame read from the transport.
pub fn record_frame_received() {
    counter!("bitstamp_stream_frames_received_total").increment(1);
}

/// Record an envelope delivered to the event queue.
pub fn record_event(kind: &EventKind) {
    counter!("bitstamp_stream_events_total", "kind" => kind.label()).increment(1);
    if matches!(kind, EventKind::ReconnectRequest) {
        counter!("bitstamp_stream_reconnect_requests_total").increment(1);
    }
}

/// Record a reader error.
pub fn record_feed_error(error_type: &'static str) {
    counter!("bitstamp_stream_feed_errors_total", "error_type" => error_type).increment(1);
}

/// Record a control frame written.
pub fn record_control_sent(verb: ControlVerb) {
    counter!("bitstamp_stream_control_sent_total", "verb" => verb.as_str()).increment(1);
}

/// Record a failed control frame write.
pub fn record_send_failure(verb: ControlVerb) {
    counter!("bitstamp_stream_send_failures_total", "verb" => verb.as_str()).increment(1);
}

/// Record a reader task starting.
pub fn record_client_started() {
    gauge!("bitstamp_stream_active_clients").increment(1.0);
}

/// Record a reader task exiting.
pub fn record_client_stopped() {
    gauge!("bitstamp_stream_active_clients").decrement(1.0);
}

/// Record a client re-creation by the supervisor.
pub fn record_reconnect(reason: &'static str) {
    counter!("bitstamp_stream_reconnects_total", "reason" => reason).increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_port_installs_nothing() {
        assert!(init_metrics(0).unwrap().is_none());
        assert!(INSTALLED.get().is_none());
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received();
        record_event(&EventKind::ReconnectRequest);
        record_event(&EventKind::Data("trade".to_string()));
        record_feed_error("timeout");
        record_control_sent(ControlVerb::Subscribe);
        record_send_failure(ControlVerb::Unsubscribe);
        record_client_started();
        record_client_stopped();
        record_reconnect("reconnect_request");
    }
}
