//! Structured logging vocabulary.
//!
//! Library code emits `tracing` events and never installs a global subscriber.
//! Binaries and tests initialize `tracing_subscriber` once at process boundaries.

pub mod events;
pub mod fields;
