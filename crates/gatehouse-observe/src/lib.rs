//! # Gatehouse Observe
//!
//! Structured logging for gatehouse services. Libraries only emit `tracing`
//! events; binaries call [`init_logging`] once at startup.

#![deny(unsafe_code)]

pub mod logging;

pub use logging::{LogConfig, LogFormat, init_logging};
