//! Stream Session Supervisor
//!
//! Owns a [`StreamClient`] on behalf of the application and replaces it
//! when the feed asks for it. The client never reconnects by itself; this
//! is where that policy lives.
//!
//! # Recreation Triggers
//!
//! - A `bts:request_reconnect` envelope (reconnect immediately)
//! - A read error reporting the connection as gone
//! - `max_consecutive_errors` feed errors without an envelope in between
//! - The reader task exiting for any other reason
//!
//! Handshake and resubscribe failures are retried with [`Backoff`]. After a
//! successful connection the backoff starts over.
//!
//! # Output
//!
//! Everything is reported on one bounded [`SessionEvent`] queue, so the
//! application reads a single stream that survives reconnects.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::client::{FeedError, StreamClient, StreamClientConfig, StreamClientError, StreamHandle};
use super::reconnect::{Backoff, BackoffConfig};
use crate::application::ports::Connector;
use crate::domain::envelope::Envelope;
use crate::domain::subscription::SubscriptionSet;
use crate::infrastructure::config::{DEFAULT_MAX_CONSECUTIVE_ERRORS, StreamSettings};
use crate::infrastructure::metrics;

// =============================================================================
// Events
// =============================================================================

/// Why a client was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server sent `bts:request_reconnect`.
    ReconnectRequested,
    /// A read reported the connection closed.
    ConnectionClosed,
    /// Too many feed errors in a row.
    TooManyErrors,
    /// The reader task exited on its own.
    ReaderStopped,
}

impl DisconnectReason {
    /// Metric label for this reason.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ReconnectRequested => "reconnect_request",
            Self::ConnectionClosed => "connection_closed",
            Self::TooManyErrors => "too_many_errors",
            Self::ReaderStopped => "reader_stopped",
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Events emitted by the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A client connected and its channels were subscribed.
    Connected {
        /// Identifier of the new client.
        client_id: Uuid,
    },
    /// A client was closed and will be replaced.
    Disconnected {
        /// Identifier of the closed client.
        client_id: Uuid,
        /// Why it was closed.
        reason: DisconnectReason,
    },
    /// Waiting before the next connection attempt.
    Reconnecting {
        /// Failed attempts so far (1-based).
        attempt: u32,
        /// Wait before the next attempt.
        delay: Duration,
    },
    /// The server asked for a reconnect.
    ReconnectRequested {
        /// Identifier of the client that received the request.
        client_id: Uuid,
    },
    /// A data or acknowledgement envelope.
    Envelope(Envelope),
    /// A feed or connection error, rendered for display.
    Error(String),
}

/// Supervisor failures.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Every allowed connection attempt failed.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

// =============================================================================
// Configuration
// =============================================================================

/// Supervisor options.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Options for each client created.
    pub client: StreamClientConfig,
    /// Channels subscribed on every client.
    pub channels: SubscriptionSet,
    /// Feed errors in a row before the client is replaced (0 = never).
    pub max_consecutive_errors: u32,
    /// Backoff between failed connection attempts.
    pub backoff: BackoffConfig,
}

impl SupervisorConfig {
    /// Create options for `client` and `channels` with default thresholds.
    #[must_use]
    pub fn new(client: StreamClientConfig, channels: SubscriptionSet) -> Self {
        Self {
            client,
            channels,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            backoff: BackoffConfig::default(),
        }
    }

    /// Options from loaded settings.
    #[must_use]
    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self {
            client: settings.client_config(),
            channels: settings.channels.clone(),
            max_consecutive_errors: settings.max_consecutive_errors,
            backoff: BackoffConfig::from_settings(settings),
        }
    }
}

// =============================================================================
// Supervisor
// =============================================================================

enum SessionEnd {
    Stopped,
    Replace(DisconnectReason),
}

/// Keeps one stream session alive across reconnects.
pub struct Supervisor<C: ?Sized> {
    connector: Arc<C>,
    config: SupervisorConfig,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl<C: ?Sized> std::fmt::Debug for Supervisor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<C> Supervisor<C>
where
    C: Connector + ?Sized,
{
    /// Create a supervisor and the receiver for its events.
    #[must_use]
    pub fn new(
        connector: Arc<C>,
        config: SupervisorConfig,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                connector,
                config,
                events,
                cancel,
            },
            rx,
        )
    }

    /// Run until cancelled, the event receiver is dropped, or connection
    /// attempts are exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::MaxReconnectAttemptsExceeded`] when the
    /// backoff budget runs out.
    pub async fn run(self) -> Result<(), SupervisorError> {
        let mut backoff = Backoff::new(self.config.backoff.clone());

        loop {
            let opened = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(()),
                opened = self.open() => opened,
            };

            let client = match opened {
                Ok(client) => {
                    backoff.reset();
                    client
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to establish stream session");
                    if !self.emit(SessionEvent::Error(e.to_string())).await {
                        return Ok(());
                    }

                    let Some(delay) = backoff.next_delay() else {
                        tracing::error!(
                            attempts = backoff.attempts(),
                            "Giving up on stream reconnection"
                        );
                        return Err(SupervisorError::MaxReconnectAttemptsExceeded(
                            backoff.max_attempts(),
                        ));
                    };

                    let attempt = backoff.attempts();
                    tracing::info!(attempt, ?delay, "Reconnecting");
                    if !self.emit(SessionEvent::Reconnecting { attempt, delay }).await {
                        return Ok(());
                    }

                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };

            let client_id = client.client_id();
            if !self.emit(SessionEvent::Connected { client_id }).await {
                client.shutdown().await;
                return Ok(());
            }

            match self.pump(client).await {
                SessionEnd::Stopped => return Ok(()),
                SessionEnd::Replace(reason) => {
                    tracing::info!(%client_id, %reason, "Replacing stream client");
                    metrics::record_reconnect(reason.label());
                    if !self
                        .emit(SessionEvent::Disconnected { client_id, reason })
                        .await
                    {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Connect a client and subscribe every tracked channel.
    async fn open(&self) -> Result<StreamClient, StreamClientError> {
        let client = StreamClient::connect_with(&*self.connector, self.config.client.clone()).await?;

        if let Err(e) = client.subscribe(self.config.channels.iter()).await {
            client.shutdown().await;
            return Err(e);
        }

        tracing::info!(
            client_id = %client.client_id(),
            channels = self.config.channels.len(),
            "Stream session subscribed"
        );
        Ok(client)
    }

    /// Forward one client's output until it has to be replaced.
    async fn pump(&self, client: StreamClient) -> SessionEnd {
        let (handle, mut events, mut errors) = client.split();
        let mut errors_open = true;
        let mut consecutive_errors: u32 = 0;

        let end = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break SessionEnd::Stopped,
                envelope = events.recv() => {
                    let Some(envelope) = envelope else {
                        break SessionEnd::Replace(DisconnectReason::ReaderStopped);
                    };
                    if envelope.is_reconnect_request() {
                        tracing::info!(client_id = %handle.client_id(), "Server requested reconnect");
                        let client_id = handle.client_id();
                        if !self.emit(SessionEvent::ReconnectRequested { client_id }).await {
                            break SessionEnd::Stopped;
                        }
                        handle.shutdown().await;
                        if !self.drain(&handle, &mut events).await {
                            break SessionEnd::Stopped;
                        }
                        break SessionEnd::Replace(DisconnectReason::ReconnectRequested);
                    }
                    consecutive_errors = 0;
                    if !self.emit(SessionEvent::Envelope(envelope)).await {
                        break SessionEnd::Stopped;
                    }
                }
                error = errors.recv(), if errors_open => {
                    let Some(error) = error else {
                        errors_open = false;
                        continue;
                    };
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    if let Some(end) = self.on_error(&handle, &error, consecutive_errors).await {
                        break end;
                    }
                }
            }
        };

        handle.shutdown().await;
        end
    }

    /// Forward envelopes the stopped reader had already queued.
    ///
    /// Returns `false` when the supervisor should stop.
    async fn drain(&self, handle: &StreamHandle, events: &mut mpsc::Receiver<Envelope>) -> bool {
        let mut forwarded: usize = 0;
        while let Some(envelope) = events.recv().await {
            if envelope.is_reconnect_request() {
                continue;
            }
            if !self.emit(SessionEvent::Envelope(envelope)).await {
                return false;
            }
            forwarded += 1;
        }
        if forwarded > 0 {
            tracing::debug!(
                client_id = %handle.client_id(),
                forwarded,
                "Forwarded envelopes queued behind reconnect request"
            );
        }
        true
    }

    async fn on_error(
        &self,
        handle: &StreamHandle,
        error: &FeedError,
        consecutive: u32,
    ) -> Option<SessionEnd> {
        if !self.emit(SessionEvent::Error(error.to_string())).await {
            return Some(SessionEnd::Stopped);
        }

        if error.is_connection_closed() {
            tracing::warn!(client_id = %handle.client_id(), error = %error, "Stream connection lost");
            return Some(SessionEnd::Replace(DisconnectReason::ConnectionClosed));
        }

        let limit = self.config.max_consecutive_errors;
        if limit > 0 && consecutive >= limit {
            tracing::warn!(
                client_id = %handle.client_id(),
                consecutive,
                "Too many consecutive feed errors"
            );
            return Some(SessionEnd::Replace(DisconnectReason::TooManyErrors));
        }

        None
    }

    /// Deliver an event. Returns `false` when the supervisor should stop.
    async fn emit(&self, event: SessionEvent) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }
}
