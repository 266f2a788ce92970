//! Bitstamp WebSocket Adapters
//!
//! Connection, framing and session management for Bitstamp's public
//! streaming API.
//!
//! # Components
//!
//! - `client`: one connection, reader task, subscribe/unsubscribe
//! - `supervisor`: replaces the client on reconnect requests and failures
//! - `reconnect`: backoff between failed connection attempts
//! - `codec`: JSON envelope encoding/decoding
//! - `transport`: tokio-tungstenite implementation of the transport ports

pub mod client;
pub mod codec;
pub mod reconnect;
pub mod supervisor;
pub mod transport;

pub use client::{
    FeedError, StreamClient, StreamClientConfig, StreamClientError, StreamHandle,
};
pub use codec::{CodecError, JsonCodec};
pub use reconnect::{Backoff, BackoffConfig};
pub use supervisor::{
    DisconnectReason, SessionEvent, Supervisor, SupervisorConfig, SupervisorError,
};
pub use transport::WsConnector;
