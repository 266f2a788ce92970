//! Bitstamp Stream Client
//!
//! Holds one WebSocket connection to Bitstamp's public feed and turns it
//! into two queues: decoded [`Envelope`]s and [`FeedError`]s.
//!
//! # Lifecycle
//!
//! 1. [`StreamClient::connect`] performs the handshake and spawns the
//!    reader task. A failed handshake returns an error and spawns nothing.
//! 2. The reader task reads one frame per iteration, each read bounded by
//!    the configured read timeout. Read, timeout and decode failures are
//!    pushed onto the error queue and the loop keeps going.
//! 3. [`StreamHandle::close`] cancels the reader. The reader closes the
//!    connection exactly once, then both queues end.
//!
//! There is no reconnection here. A `bts:request_reconnect` envelope is
//! delivered like any other event; the owner decides what to do with it
//! (see [`super::supervisor`]).
//!
//! # Backpressure
//!
//! Both queues are bounded. When the event queue is full the reader waits,
//! so a consumer that stops draining stalls frame ingestion.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use super::codec::{CodecError, JsonCodec};
use super::transport::WsConnector;
use crate::application::ports::{BoxFrameSink, BoxFrameSource, Connector, TransportError};
use crate::domain::envelope::{ControlVerb, Envelope};
use crate::infrastructure::metrics;

/// Production WebSocket endpoint.
pub const DEFAULT_STREAM_URL: &str = "wss://ws.bitstamp.net";

/// Default bound on a single frame read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Default event queue capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Default error queue capacity.
pub const DEFAULT_ERROR_CAPACITY: usize = 256;

// =============================================================================
// Error Types
// =============================================================================

/// Errors delivered on the error queue by the reader task.
///
/// None of these stop the reader; the consumer decides whether to
/// recreate the client.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// No frame arrived before the read deadline.
    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    /// The transport failed while reading.
    #[error("read failed: {0}")]
    Read(#[source] TransportError),

    /// A frame arrived but could not be decoded. The frame is discarded.
    #[error("decode failed: {0}")]
    Decode(#[from] CodecError),
}

impl FeedError {
    /// Whether this error is a read deadline expiry.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Whether the underlying connection is gone.
    ///
    /// Every later read will fail the same way; the owner should recreate
    /// the client.
    #[must_use]
    pub const fn is_connection_closed(&self) -> bool {
        match self {
            Self::Read(e) => e.is_closed(),
            _ => false,
        }
    }

    /// Metric label for this error.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Read(_) => "read",
            Self::Decode(_) => "decode",
        }
    }
}

/// Errors returned synchronously by the client.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// The initial handshake failed. No client was created.
    #[error("error dialing websocket {url}: {source}")]
    Connection {
        /// Address that was dialed.
        url: String,
        /// Transport failure.
        source: TransportError,
    },

    /// Writing a control frame failed. Later channels in the same call
    /// were not sent.
    #[error("failed to send {verb} for channel {channel}: {source}")]
    Send {
        /// Verb being sent.
        verb: ControlVerb,
        /// Channel whose frame failed.
        channel: String,
        /// Transport failure.
        source: TransportError,
    },

    /// A control frame could not be encoded.
    #[error("failed to encode control message: {0}")]
    Encode(#[from] CodecError),

    /// The client has been closed.
    #[error("stream client is closed")]
    Closed,
}

// =============================================================================
// Configuration
// =============================================================================

/// Construction-time options for a [`StreamClient`].
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// WebSocket URL.
    pub url: String,
    /// Bound on each frame read.
    pub read_timeout: Duration,
    /// Event queue capacity (minimum 1).
    pub event_capacity: usize,
    /// Error queue capacity (minimum 1).
    pub error_capacity: usize,
}

impl Default for StreamClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_URL)
    }
}

impl StreamClientConfig {
    /// Create a configuration for `url` with default timeout and capacities.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            error_capacity: DEFAULT_ERROR_CAPACITY,
        }
    }

    /// Set the read timeout.
    #[must_use]
    pub const fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Set the event queue capacity.
    #[must_use]
    pub const fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the error queue capacity.
    #[must_use]
    pub const fn with_error_capacity(mut self, capacity: usize) -> Self {
        self.error_capacity = capacity;
        self
    }
}

// =============================================================================
// Send Guard
// =============================================================================

/// Write half plus a closed flag, both behind the send guard.
struct SinkState {
    sink: BoxFrameSink,
    closed: bool,
}

type SharedSink = Arc<Mutex<SinkState>>;

// =============================================================================
// Stream Handle
// =============================================================================

/// Cloneable control surface of a client: subscribe, unsubscribe, close.
#[derive(Clone)]
pub struct StreamHandle {
    id: Uuid,
    url: Arc<str>,
    codec: JsonCodec,
    sink: SharedSink,
    cancel: CancellationToken,
    done: CancellationToken,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("closing", &self.cancel.is_cancelled())
            .field("closed", &self.done.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl StreamHandle {
    /// Identifier of the client, used in logs.
    #[must_use]
    pub const fn client_id(&self) -> Uuid {
        self.id
    }

    /// Address the client is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Subscribe to each channel, one frame per channel, in order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing channel and returns
    /// [`StreamClientError::Send`] for it. Channels sent before the failure
    /// stay subscribed.
    pub async fn subscribe<I, S>(&self, channels: I) -> Result<(), StreamClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.send_control(ControlVerb::Subscribe, channels).await
    }

    /// Unsubscribe from each channel, one frame per channel, in order.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::subscribe`].
    pub async fn unsubscribe<I, S>(&self, channels: I) -> Result<(), StreamClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.send_control(ControlVerb::Unsubscribe, channels).await
    }

    /// Ask the reader task to stop. Safe to call any number of times.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!(client_id = %self.id, "Closing stream client");
            self.cancel.cancel();
        }
    }

    /// Whether the reader task has exited and the connection is released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Wait until the reader task has exited.
    ///
    /// Resolves for any reason the reader stops, including a caller
    /// dropping the event queue.
    pub async fn closed(&self) {
        self.done.cancelled().await;
    }

    /// Close and wait for the reader task to exit.
    pub async fn shutdown(&self) {
        self.close();
        self.closed().await;
    }

    async fn send_control<I, S>(&self, verb: ControlVerb, channels: I) -> Result<(), StreamClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for channel in channels {
            let channel = channel.as_ref();
            let frame = self.codec.encode(&Envelope::control(verb, channel))?;
            self.write_frame(verb, channel, frame).await?;
        }
        Ok(())
    }

    async fn write_frame(
        &self,
        verb: ControlVerb,
        channel: &str,
        frame: String,
    ) -> Result<(), StreamClientError> {
        if self.cancel.is_cancelled() {
            return Err(StreamClientError::Closed);
        }
        let mut state = self.sink.lock().await;
        if state.closed || self.cancel.is_cancelled() {
            return Err(StreamClientError::Closed);
        }

        tracing::debug!(client_id = %self.id, %verb, channel, "Sending control message");

        if let Err(source) = state.sink.write_frame(frame).await {
            metrics::record_send_failure(verb);
            return Err(StreamClientError::Send {
                verb,
                channel: channel.to_string(),
                source,
            });
        }

        metrics::record_control_sent(verb);
        Ok(())
    }
}

// =============================================================================
// Stream Client
// =============================================================================

/// A live stream session: control handle plus the two output queues.
///
/// Dropping the client closes it.
pub struct StreamClient {
    handle: StreamHandle,
    events: mpsc::Receiver<Envelope>,
    errors: mpsc::Receiver<FeedError>,
    guard: DropGuard,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Connect to `config.url` over WebSocket.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClientError::Connection`] if the handshake fails.
    pub async fn connect(config: StreamClientConfig) -> Result<Self, StreamClientError> {
        Self::connect_with(&WsConnector::new(), config).await
    }

    /// Connect through the given connector.
    ///
    /// The reader task is spawned before this returns, so both queues can
    /// be consumed immediately.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClientError::Connection`] if the handshake fails.
    pub async fn connect_with<C>(
        connector: &C,
        config: StreamClientConfig,
    ) -> Result<Self, StreamClientError>
    where
        C: Connector + ?Sized,
    {
        tracing::info!(url = %config.url, "Connecting to Bitstamp stream");

        let (source, sink) =
            connector
                .connect(&config.url)
                .await
                .map_err(|source| StreamClientError::Connection {
                    url: config.url.clone(),
                    source,
                })?;

        let id = Uuid::new_v4();
        let (event_tx, events) = mpsc::channel(config.event_capacity.max(1));
        let (error_tx, errors) = mpsc::channel(config.error_capacity.max(1));
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        let sink = Arc::new(Mutex::new(SinkState {
            sink,
            closed: false,
        }));

        let reader = Reader {
            id,
            read_timeout: config.read_timeout,
            codec: JsonCodec::new(),
            source,
            sink: Arc::clone(&sink),
            event_tx,
            error_tx,
            cancel: cancel.clone(),
        };
        let reader_done = done.clone();
        tokio::spawn(async move {
            reader.run().await;
            reader_done.cancel();
        });

        tracing::info!(client_id = %id, url = %config.url, "Bitstamp stream connected");

        Ok(Self {
            handle: StreamHandle {
                id,
                url: Arc::from(config.url),
                codec: JsonCodec::new(),
                sink,
                cancel: cancel.clone(),
                done,
            },
            events,
            errors,
            guard: cancel.drop_guard(),
        })
    }

    /// A cloneable control handle for this client.
    #[must_use]
    pub fn handle(&self) -> StreamHandle {
        self.handle.clone()
    }

    /// Identifier of the client, used in logs.
    #[must_use]
    pub const fn client_id(&self) -> Uuid {
        self.handle.id
    }

    /// Receive the next decoded envelope.
    ///
    /// Returns `None` once the reader has exited and the queue is drained.
    pub async fn recv_event(&mut self) -> Option<Envelope> {
        self.events.recv().await
    }

    /// Receive the next feed error.
    ///
    /// Returns `None` once the reader has exited and the queue is drained.
    pub async fn recv_error(&mut self) -> Option<FeedError> {
        self.errors.recv().await
    }

    /// Subscribe to channels. See [`StreamHandle::subscribe`].
    ///
    /// # Errors
    ///
    /// Returns the first send failure.
    pub async fn subscribe<I, S>(&self, channels: I) -> Result<(), StreamClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.handle.subscribe(channels).await
    }

    /// Unsubscribe from channels. See [`StreamHandle::unsubscribe`].
    ///
    /// # Errors
    ///
    /// Returns the first send failure.
    pub async fn unsubscribe<I, S>(&self, channels: I) -> Result<(), StreamClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.handle.unsubscribe(channels).await
    }

    /// Ask the reader task to stop. Idempotent.
    pub fn close(&self) {
        self.handle.close();
    }

    /// Whether the reader task has exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Close and wait for the reader task to exit.
    pub async fn shutdown(self) {
        self.handle.shutdown().await;
    }

    /// Split into the control handle and the two queues.
    ///
    /// After splitting, dropping the handle no longer closes the client;
    /// call [`StreamHandle::close`] or drop the event receiver.
    #[must_use]
    pub fn split(
        self,
    ) -> (
        StreamHandle,
        mpsc::Receiver<Envelope>,
        mpsc::Receiver<FeedError>,
    ) {
        let Self {
            handle,
            events,
            errors,
            guard,
        } = self;
        let _ = guard.disarm();
        (handle, events, errors)
    }
}

// =============================================================================
// Reader Task
// =============================================================================

enum Flow {
    Continue,
    Stop,
}

struct Reader {
    id: Uuid,
    read_timeout: Duration,
    codec: JsonCodec,
    source: BoxFrameSource,
    sink: SharedSink,
    event_tx: mpsc::Sender<Envelope>,
    error_tx: mpsc::Sender<FeedError>,
    cancel: CancellationToken,
}

impl Reader {
    async fn run(mut self) {
        metrics::record_client_started();
        let read_timeout = self.read_timeout;

        loop {
            let read = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                read = tokio::time::timeout(read_timeout, self.source.read_frame()) => read,
            };

            let flow = match read {
                Ok(Ok(frame)) => self.handle_frame(&frame).await,
                Ok(Err(e)) => self.report(FeedError::Read(e)).await,
                Err(_elapsed) => self.report(FeedError::Timeout(read_timeout)).await,
            };

            if matches!(flow, Flow::Stop) {
                break;
            }
        }

        self.release().await;
        metrics::record_client_stopped();
    }

    async fn handle_frame(&mut self, frame: &str) -> Flow {
        metrics::record_frame_received();

        match self.codec.decode(frame) {
            Ok(envelope) => self.deliver(envelope).await,
            Err(e) => self.report(FeedError::Decode(e)).await,
        }
    }

    async fn deliver(&mut self, envelope: Envelope) -> Flow {
        let kind = envelope.kind();
        metrics::record_event(&kind);
        tracing::trace!(
            client_id = %self.id,
            event = %envelope.event,
            channel = %envelope.channel,
            "Envelope received"
        );

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Flow::Stop,
            sent = self.event_tx.send(envelope) => {
                if sent.is_err() {
                    tracing::debug!(client_id = %self.id, "Event queue dropped, stopping reader");
                    Flow::Stop
                } else {
                    Flow::Continue
                }
            }
        }
    }

    async fn report(&mut self, error: FeedError) -> Flow {
        metrics::record_feed_error(error.label());
        if error.is_timeout() {
            tracing::debug!(client_id = %self.id, error = %error, "Stream read timed out");
        } else {
            tracing::warn!(client_id = %self.id, error = %error, "Stream feed error");
        }

        let closed = error.is_connection_closed();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Flow::Stop,
            sent = self.error_tx.send(error) => {
                if sent.is_ok() {
                    Flow::Continue
                } else if closed {
                    tracing::debug!(
                        client_id = %self.id,
                        "Error queue dropped and connection closed, stopping reader"
                    );
                    Flow::Stop
                } else {
                    tracing::trace!(client_id = %self.id, "Error queue dropped, discarding error");
                    Flow::Continue
                }
            }
        }
    }

    /// Close the connection exactly once and mark the sink unusable.
    ///
    /// Waiting for the send guard and for the transport close are each
    /// bounded by the read deadline.
    async fn release(self) {
        let bound = self.read_timeout;
        match tokio::time::timeout(bound, self.sink.lock()).await {
            Ok(mut state) => {
                state.closed = true;
                match tokio::time::timeout(bound, state.sink.close()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(client_id = %self.id, error = %e, "Error closing connection");
                    }
                    Err(_elapsed) => {
                        tracing::warn!(client_id = %self.id, ?bound, "Timed out closing connection");
                    }
                }
            }
            Err(_elapsed) => {
                tracing::warn!(
                    client_id = %self.id,
                    ?bound,
                    "Send guard still held at shutdown, leaving connection to drop"
                );
            }
        }
        tracing::info!(client_id = %self.id, "Stream client stopped");
    }
}
