//! voicemodem-test-harness: scripted transports for testing the AT engine.
//!
//! This crate provides [`MockTransport`] for deterministic tests of the
//! command correlator and notification parser without a modem attached, and
//! [`MockHandle`] for feeding unsolicited lines into a running engine.

pub mod mock_serial;

pub use mock_serial::{MockHandle, MockTransport};
