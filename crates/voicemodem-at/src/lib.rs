//! AT command engine for SIM800/SIM808-class cellular voice modems.
//!
//! One tokio task owns the serial transport. It correlates each command with
//! its final result code, parses unsolicited call notifications on every
//! line, keeps the call state current and dispatches events to registered
//! observers. [`Modem`] is the public face: connect, dial, answer, hang up,
//! DTMF, call list queries and raw commands.
//!
//! # Architecture
//!
//! - [`protocol`] -- line framing and final result codes
//! - [`urc`] -- unsolicited notification parsing (`RING`, `+CLIP`, `+CLCC`, ...)
//! - [`state`] -- the call state model
//! - [`observers`] -- observer registry with per-observer fault isolation
//! - [`commands`] -- command builders and input validation
//! - [`io`] -- the IO task and its handles
//! - [`modem`] / [`builder`] -- the API
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use voicemodem_at::{ModemBuilder, ObserverError};
//! use voicemodem_core::ModemEvent;
//!
//! # async fn example() -> voicemodem_core::Result<()> {
//! let modem = ModemBuilder::new().connect("/dev/ttyUSB0", 115_200).await?;
//! modem.register_observer(Arc::new(|event: &ModemEvent| -> Result<(), ObserverError> {
//!     println!("{event:?}");
//!     Ok(())
//! }));
//! modem.dial("+15551234567").await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod commands;
pub mod io;
pub mod modem;
pub mod observers;
pub mod protocol;
pub mod state;
pub mod urc;

pub use builder::ModemBuilder;
pub use modem::{Modem, ModemConfig};
pub use observers::{ObserverError, ObserverRegistry, StatusObserver};
pub use state::{CallState, CommandOutcome};
