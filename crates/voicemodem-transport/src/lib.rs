//! Transport implementations for voicemodem.
//!
//! This crate provides [`SerialTransport`], the concrete
//! [`Transport`](voicemodem_core::Transport) for USB-serial adapters and
//! UARTs wired to a cellular module, plus [`available_ports`] for port
//! discovery.
//!
//! # Example
//!
//! ```no_run
//! use voicemodem_transport::SerialTransport;
//! use voicemodem_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> voicemodem_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 115_200).await?;
//! transport.send(b"AT+CLCC\r\n").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{
    DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits, available_ports,
};
