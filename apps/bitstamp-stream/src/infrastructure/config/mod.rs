//! Configuration Module
//!
//! Settings for the stream binary, loaded from the environment.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_METRICS_PORT, ReconnectSettings,
    StreamSettings, parse_channels,
};
