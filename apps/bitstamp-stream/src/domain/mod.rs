//! Domain Layer - Wire envelope and subscription types.
//!
//! This layer contains the core types for the Bitstamp stream protocol
//! with no transport dependencies. Payloads stay opaque JSON values.

/// Wire envelope, event classification and control verbs.
pub mod envelope;

/// Ordered channel set used to restore subscriptions.
pub mod subscription;
