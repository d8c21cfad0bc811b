//! Call model types shared by the AT engine and its consumers.
//!
//! The numeric codes here are the ones the modem reports in `+CLCC` lines
//! (3GPP TS 27.007 §7.18). Every decoder is total: an unrecognized code maps
//! to an `Unknown` variant instead of failing.

use std::fmt;

use serde::Serialize;

/// Who originated the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    /// Mobile originated (we dialed).
    Outgoing,
    /// Mobile terminated (the remote party called us).
    Incoming,
    Unknown,
}

impl CallDirection {
    /// Decode the `<dir>` field of a `+CLCC` line.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => CallDirection::Outgoing,
            1 => CallDirection::Incoming,
            _ => CallDirection::Unknown,
        }
    }
}

/// Progress of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Dialing,
    /// Outgoing call, remote party is being alerted.
    Ringing,
    Incoming,
    Active,
    Held,
    /// A second incoming call while another is in progress.
    Waiting,
    Unknown,
}

impl CallStatus {
    /// Decode the `<stat>` field of a `+CLCC` line.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => CallStatus::Active,
            1 => CallStatus::Held,
            2 => CallStatus::Dialing,
            3 => CallStatus::Ringing,
            4 => CallStatus::Incoming,
            5 => CallStatus::Waiting,
            _ => CallStatus::Unknown,
        }
    }

    /// The lowercase name used in serialized events.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Dialing => "dialing",
            CallStatus::Ringing => "ringing",
            CallStatus::Incoming => "incoming",
            CallStatus::Active => "active",
            CallStatus::Held => "held",
            CallStatus::Waiting => "waiting",
            CallStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bearer of the call, from the `<mode>` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMode {
    Voice,
    Data,
    Fax,
    Unknown,
}

impl CallMode {
    /// Decode the `<mode>` field of a `+CLCC` line.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => CallMode::Voice,
            1 => CallMode::Data,
            2 => CallMode::Fax,
            _ => CallMode::Unknown,
        }
    }
}

/// One entry of the modem's current-call list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Call {
    /// Call index assigned by the modem (1-based).
    pub id: u32,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub mode: CallMode,
    /// Remote party number with quotes stripped, if the modem reported one.
    pub number: Option<String>,
    /// Type of address octet (129 national/unknown, 145 international).
    pub number_type: Option<u16>,
    /// `true` if the call is part of a multiparty conference.
    pub mpty: bool,
}

/// Snapshot of a modem connection, suitable for a status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    pub call_status: Option<CallStatus>,
    pub remote_number: Option<String>,
    /// Commands that timed out in a row since the last answered one.
    pub consecutive_timeouts: u32,
}
