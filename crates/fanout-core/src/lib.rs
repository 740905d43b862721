//! # fanout-core
//!
//! Types shared by the relay server and the load-test harness.
//!
//! - [`envelope`]: the JSON message envelope exchanged over the socket
//! - [`logging`]: `tracing` subscriber setup used by both binaries

#![deny(unsafe_code)]

pub mod envelope;
pub mod logging;

pub use envelope::{Envelope, EnvelopeError, EnvelopeKind, IssuedAt, SERVER_SENDER};
