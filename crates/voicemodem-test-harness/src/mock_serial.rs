//! Mock transport for deterministic testing of the AT engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs, like a scripted modem. A [`MockHandle`] obtained
//! before the transport is boxed and moved into the engine's IO task lets a
//! test push unsolicited bytes (`RING`, `+CLIP: ...`) at any time, inspect
//! what was written, and pull the plug.
//!
//! # Example
//!
//! ```
//! use voicemodem_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! mock.expect(b"AT\r\n", b"AT\r\r\nOK\r\n");
//! let handle = mock.handle();
//! handle.inject(b"\r\nRING\r\n");
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use voicemodem_core::error::{Error, Result};
use voicemodem_core::transport::Transport;

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes to return once the matching request has been sent.
    response: Vec<u8>,
}

/// State shared between a [`MockTransport`] and its [`MockHandle`]s.
#[derive(Debug, Default)]
struct Shared {
    /// Bytes waiting to be read: scripted responses and injected data, in
    /// the order they were queued.
    inbound: VecDeque<u8>,
    /// Log of all bytes sent through the transport.
    sent_log: Vec<Vec<u8>>,
    /// Set by [`MockHandle::unplug`]; reads and writes fail with
    /// [`Error::ConnectionLost`] afterwards.
    unplugged: bool,
    closed: bool,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    // A test that panicked while holding the lock has already failed.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A mock [`Transport`] for testing without a modem.
///
/// Expectations are consumed in order. When `send()` is called, the data is
/// recorded and matched against the next expectation; its response is queued
/// for subsequent `receive()` calls. A mismatch, or a send with no
/// expectation left, returns [`Error::Protocol`].
///
/// `receive()` never blocks: with nothing queued it returns
/// [`Error::Timeout`] immediately.
#[derive(Debug)]
pub struct MockTransport {
    expectations: VecDeque<Expectation>,
    shared: Arc<Mutex<Shared>>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Add an expected request/response pair.
    ///
    /// An empty `response` scripts a modem that stays silent, which is how
    /// tests provoke command timeouts.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Return a handle for injecting data and inspecting traffic after the
    /// transport has been moved into the engine.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Return a copy of all data sent through this transport.
    ///
    /// Each element is the byte slice from one `send()` call.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        lock(&self.shared).sent_log.clone()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable side channel into a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockHandle {
    shared: Arc<Mutex<Shared>>,
}

impl MockHandle {
    /// Queue bytes as if the modem had emitted them unprompted.
    pub fn inject(&self, data: &[u8]) {
        lock(&self.shared).inbound.extend(data.iter().copied());
    }

    /// All payloads written so far, one entry per `send()` call.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        lock(&self.shared).sent_log.clone()
    }

    /// The written payloads decoded as text, for readable assertions.
    pub fn sent_text(&self) -> Vec<String> {
        lock(&self.shared)
            .sent_log
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    /// Simulate the cable being pulled: subsequent reads and writes fail
    /// with [`Error::ConnectionLost`].
    pub fn unplug(&self) {
        lock(&self.shared).unplugged = true;
    }

    /// Whether `close()` has been called on the transport.
    pub fn is_closed(&self) -> bool {
        lock(&self.shared).closed
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut shared = lock(&self.shared);
        if shared.closed {
            return Err(Error::NotConnected);
        }
        if shared.unplugged {
            return Err(Error::ConnectionLost);
        }

        shared.sent_log.push(data.to_vec());

        match self.expectations.pop_front() {
            Some(expectation) if data == expectation.request.as_slice() => {
                shared.inbound.extend(expectation.response);
                Ok(())
            }
            Some(expectation) => Err(Error::Protocol(format!(
                "unexpected send data: expected {:?}, got {:?}",
                String::from_utf8_lossy(&expectation.request),
                String::from_utf8_lossy(data)
            ))),
            None => Err(Error::Protocol(
                "no more expectations in mock transport".into(),
            )),
        }
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let mut shared = lock(&self.shared);
        if shared.closed {
            return Err(Error::NotConnected);
        }
        if shared.unplugged {
            return Err(Error::ConnectionLost);
        }
        if shared.inbound.is_empty() {
            return Err(Error::Timeout);
        }

        let n = shared.inbound.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(shared.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        let mut shared = lock(&self.shared);
        shared.closed = true;
        shared.inbound.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let shared = lock(&self.shared);
        !shared.closed && !shared.unplugged
    }
}
