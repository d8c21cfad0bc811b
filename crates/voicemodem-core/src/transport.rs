//! Transport trait for modem communication.
//!
//! The [`Transport`] trait abstracts over the physical link to the modem.
//! The AT engine in `voicemodem-at` operates on a `Transport` rather than
//! directly on a serial port, so the same engine drives real hardware
//! (`SerialTransport` from `voicemodem-transport`) and the scripted
//! `MockTransport` from `voicemodem-test-harness`.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a modem.
///
/// Implementations deal only in bytes. Line framing, command correlation
/// and notification parsing belong to the AT engine that consumes this
/// trait, which is also the only task that ever calls [`receive`](Transport::receive).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the modem.
    ///
    /// Implementations should not return until all bytes have been handed to
    /// the underlying device.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the modem into the provided buffer.
    ///
    /// Returns the number of bytes read. Waits up to `timeout` for data;
    /// returns [`Error::Timeout`](crate::error::Error::Timeout) if nothing
    /// arrived before the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport.
    ///
    /// After `close()`, `send()` and `receive()` should return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently open.
    fn is_connected(&self) -> bool;
}
