//! voicemodem-core: core types, the transport trait and error definitions.
//!
//! This crate holds the pieces shared by every other voicemodem crate so
//! that front ends can depend on the event and call types without pulling
//! in the serial stack.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel
//! - [`ModemEvent`] -- call-control notifications delivered to observers
//! - [`Call`], [`CallStatus`], [`CallDirection`] -- the call model
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use events::ModemEvent;
pub use transport::Transport;
pub use types::*;
