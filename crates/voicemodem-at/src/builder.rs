//! ModemBuilder -- fluent builder for [`Modem`] instances.
//!
//! Separates configuration from connection so that callers can tune
//! timeouts before the port is opened.
//!
//! # Example
//!
//! ```no_run
//! use voicemodem_at::ModemBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> voicemodem_core::Result<()> {
//! let modem = ModemBuilder::new()
//!     .command_timeout(Duration::from_secs(2))
//!     .connect("/dev/ttyUSB0", 115_200)
//!     .await?;
//! modem.dial("+1 555 123 4567").await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use voicemodem_core::error::Result;
use voicemodem_core::transport::Transport;

use crate::modem::{Modem, ModemConfig};

/// Fluent builder for [`Modem`].
///
/// Defaults: 1 s command and handshake timeouts, 100 ms settle delay, 2 s
/// shutdown wait, unresponsive warning after 3 timeouts in a row.
#[derive(Debug, Clone, Default)]
pub struct ModemBuilder {
    config: ModemConfig,
}

impl ModemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default timeout for a single command (default: 1s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Timeout for the `AT` handshake on connect (default: 1s).
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Pause after opening the port, before the handshake (default: 100ms).
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.config.settle_delay = delay;
        self
    }

    /// How long disconnect waits for the IO task to stop (default: 2s).
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Number of consecutive command timeouts before the modem is logged as
    /// unresponsive (default: 3).
    pub fn unresponsive_after(mut self, count: u32) -> Self {
        self.config.io.unresponsive_after = count;
        self
    }

    /// Read timeout the IO task uses while waiting for bytes (default: 100ms).
    pub fn idle_poll(mut self, poll: Duration) -> Self {
        self.config.io.idle_poll = poll;
        self
    }

    /// Build a disconnected [`Modem`].
    pub fn build(self) -> Modem {
        Modem::new(self.config)
    }

    /// Build a [`Modem`] and connect it over a caller-provided transport.
    ///
    /// This is the entry point for testing (pass a `MockTransport` from
    /// `voicemodem-test-harness`).
    pub async fn build_with_transport(
        self,
        transport: Box<dyn Transport>,
        port: &str,
        baud_rate: u32,
    ) -> Result<Modem> {
        let modem = self.build();
        modem
            .connect_with_transport(transport, port, baud_rate)
            .await?;
        Ok(modem)
    }

    /// Build a [`Modem`] and connect it to a serial port.
    pub async fn connect(self, port: &str, baud_rate: u32) -> Result<Modem> {
        let modem = self.build();
        modem.connect(port, baud_rate).await?;
        Ok(modem)
    }
}
