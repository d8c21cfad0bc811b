//! Modem status events.
//!
//! Events are produced by the AT engine's IO task when a call-control
//! notification arrives and are delivered synchronously to registered
//! observers. They are never stored.

use serde::Serialize;

use crate::types::Call;

/// An event emitted when the modem reports a call-control change.
///
/// Serializes to the `{"event": ..., "data": ...}` shape a web front end
/// forwards to browsers:
///
/// ```
/// use voicemodem_core::ModemEvent;
///
/// let json = serde_json::to_string(&ModemEvent::CallEnded {}).unwrap();
/// assert_eq!(json, r#"{"event":"call_ended","data":{}}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ModemEvent {
    /// `RING` or `+CLIP` was received.
    IncomingCall {
        /// Caller number, if caller ID has been presented.
        number: Option<String>,
    },

    /// The remote party hung up or the call dropped (`NO CARRIER`).
    CallEnded {},

    /// The remote party was busy (`BUSY`).
    CallBusy {},

    /// A `+CLCC` call report was received.
    CallStatus(Call),
}

impl ModemEvent {
    /// The wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ModemEvent::IncomingCall { .. } => "incoming_call",
            ModemEvent::CallEnded {} => "call_ended",
            ModemEvent::CallBusy {} => "call_busy",
            ModemEvent::CallStatus(_) => "call_status",
        }
    }
}
