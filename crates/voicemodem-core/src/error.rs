//! Error types for voicemodem.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport failures, AT protocol failures
//! and caller validation failures are all captured here.

/// The error type for all voicemodem operations.
///
/// The variants fall into three groups:
///
/// - link failures ([`Transport`](Error::Transport), [`Io`](Error::Io),
///   [`ConnectionLost`](Error::ConnectionLost), [`NotConnected`](Error::NotConnected))
///   end the current connection;
/// - command failures ([`Timeout`](Error::Timeout), [`Protocol`](Error::Protocol))
///   leave the connection usable;
/// - [`InvalidParameter`](Error::InvalidParameter) is raised before anything
///   is written to the modem.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open or configuration failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// The modem answered, but not with what the command expected: an
    /// `ERROR` final result, or an `OK` without the expected substring.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for a final result code from the modem.
    ///
    /// Usually means the modem is powered off, the baud rate is wrong, or
    /// the command is simply slow (dialing on a congested network).
    #[error("timeout waiting for response")]
    Timeout,

    /// An invalid parameter was passed to a modem command.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection to the modem has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the modem was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if this error means the link to the modem is gone.
    ///
    /// Timeouts, protocol mismatches and validation errors are local to one
    /// command and return `false`.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::NotConnected | Error::ConnectionLost | Error::Io(_)
        )
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
