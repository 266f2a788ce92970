//! WebSocket Transport Adapter
//!
//! Implements the transport ports on top of `tokio-tungstenite`. TLS is
//! handled by the library (`rustls` with webpki roots).
//!
//! # Stream URL
//!
//! - Production: `wss://ws.bitstamp.net`

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{
    BoxFrameSink, BoxFrameSource, Connector, FrameSink, FrameSource, TransportError,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials WebSocket endpoints with `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    /// Create a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<(BoxFrameSource, BoxFrameSink), TransportError> {
        let (ws_stream, response) = tokio_tungstenite::connect_async(url).await?;
        tracing::debug!(url, status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws_stream.split();
        Ok((
            Box::new(WsFrameSource { read }),
            Box::new(WsFrameSink { write }),
        ))
    }
}

/// Read half of a tungstenite connection.
pub struct WsFrameSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn read_frame(&mut self) -> Result<String, TransportError> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_owned()),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data.to_vec()).map_err(|e| {
                        TransportError::Protocol(format!("binary frame is not UTF-8: {e}"))
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "Server sent close frame");
                    return Err(TransportError::Closed);
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::Closed),
            }
        }
    }
}

/// Write half of a tungstenite connection.
pub struct WsFrameSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn write_frame(&mut self, frame: String) -> Result<(), TransportError> {
        self.write.send(Message::Text(frame.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.write.close().await?;
        Ok(())
    }
}
