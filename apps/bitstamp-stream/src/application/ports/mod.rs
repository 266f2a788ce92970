//! Port Interfaces
//!
//! Defines the transport contracts the stream client is written against,
//! following the Hexagonal Architecture pattern. Infrastructure adapters
//! (the tungstenite connector) and test doubles implement these.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Connector`: dials an address and yields a split connection
//! - `FrameSource`: read half, owned exclusively by the reader task
//! - `FrameSink`: write half, shared behind the send guard

use async_trait::async_trait;

/// Errors raised by a transport adapter.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// WebSocket protocol or I/O error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The peer closed the connection or the stream ended.
    #[error("connection closed")]
    Closed,

    /// A frame could not be represented as text.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether the connection is gone for good.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::Closed
                | Self::WebSocket(
                    tokio_tungstenite::tungstenite::Error::ConnectionClosed
                        | tokio_tungstenite::tungstenite::Error::AlreadyClosed
                )
        )
    }
}

/// Read half of a message-framed connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next complete text frame.
    ///
    /// Control frames (ping, pong) are handled by the adapter and never
    /// returned. Implementations must be cancel-safe: the reader task
    /// drops the future when the read deadline expires.
    async fn read_frame(&mut self) -> Result<String, TransportError>;
}

/// Write half of a message-framed connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one complete text frame.
    async fn write_frame(&mut self, frame: String) -> Result<(), TransportError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Boxed read half.
pub type BoxFrameSource = Box<dyn FrameSource>;

/// Boxed write half.
pub type BoxFrameSink = Box<dyn FrameSink>;

/// Dials a stream endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform the handshake and return the split connection.
    async fn connect(&self, url: &str) -> Result<(BoxFrameSource, BoxFrameSink), TransportError>;
}
