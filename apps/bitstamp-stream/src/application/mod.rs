//! Application Layer - Port definitions.
//!
//! This layer contains the port interfaces that define how the stream
//! client talks to the transport it is given.

/// Port interfaces for the framed transport.
pub mod ports;
