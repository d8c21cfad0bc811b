//! Call state model.
//!
//! [`CallState`] is the engine's view of the current call. It is written
//! only by the IO task (notifications and command outcomes) and read by the
//! `Modem` API, so it lives behind a mutex shared between the two.
//! Every transition that has an event attached returns that event; the IO
//! task dispatches it after the state lock has been released.

use std::sync::{Mutex, MutexGuard};

use voicemodem_core::events::ModemEvent;
use voicemodem_core::types::{Call, CallStatus};

use crate::urc::Urc;

/// The call-state effect of a command that completed with `OK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// `ATD...;` accepted: status becomes dialing.
    Dialed,
    /// `ATA` accepted: status becomes active.
    Answered,
    /// `ATH` accepted: status and remote number are cleared.
    HungUp,
}

/// Authoritative view of the current call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallState {
    status: Option<CallStatus>,
    remote_number: Option<String>,
    /// Most recent `+CLCC` report.
    call: Option<Call>,
}

impl CallState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current call status, `None` when idle.
    pub fn current_status(&self) -> Option<CallStatus> {
        self.status
    }

    /// Remote party number from caller ID or a call report.
    pub fn remote_number(&self) -> Option<&str> {
        self.remote_number.as_deref()
    }

    /// The last call report, with status and number brought up to date by
    /// any later notification or command outcome.
    pub fn current_call(&self) -> Option<Call> {
        let status = self.status?;
        self.call.clone().map(|mut call| {
            call.status = status;
            if call.number.is_none() {
                call.number = self.remote_number.clone();
            }
            call
        })
    }

    /// Optimistically apply the outcome of a successful command.
    pub fn set_from_command(&mut self, outcome: CommandOutcome) {
        match outcome {
            CommandOutcome::Dialed => {
                self.status = Some(CallStatus::Dialing);
                self.remote_number = None;
                self.call = None;
            }
            CommandOutcome::Answered => {
                self.status = Some(CallStatus::Active);
            }
            CommandOutcome::HungUp => self.clear(),
        }
    }

    /// Replace the call with a parsed `+CLCC` report.
    ///
    /// A report without a number keeps the number already known from
    /// caller ID.
    pub fn apply_notification(&mut self, call: &Call) {
        self.status = Some(call.status);
        if call.number.is_some() {
            self.remote_number = call.number.clone();
        }
        self.call = Some(call.clone());
    }

    /// Apply a notification and return the event describing it.
    pub fn apply_urc(&mut self, urc: &Urc) -> ModemEvent {
        match urc {
            Urc::Ring => {
                self.status = Some(CallStatus::Incoming);
                ModemEvent::IncomingCall {
                    number: self.remote_number.clone(),
                }
            }
            Urc::CallerId { number, .. } => {
                self.status = Some(CallStatus::Incoming);
                self.remote_number = number.clone();
                ModemEvent::IncomingCall {
                    number: number.clone(),
                }
            }
            Urc::NoCarrier => {
                self.clear();
                ModemEvent::CallEnded {}
            }
            Urc::Busy => {
                self.status = None;
                self.call = None;
                ModemEvent::CallBusy {}
            }
            Urc::CallReport(call) => {
                self.apply_notification(call);
                ModemEvent::CallStatus(call.clone())
            }
        }
    }

    /// Forget the current call entirely.
    pub fn clear(&mut self) {
        self.status = None;
        self.remote_number = None;
        self.call = None;
    }
}

/// Lock a shared [`CallState`], recovering from a poisoned mutex.
///
/// Observers run outside this lock, so poisoning would need a panic inside
/// one of the short transitions above; the state is still consistent then.
pub(crate) fn lock(state: &Mutex<CallState>) -> MutexGuard<'_, CallState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::urc::parse_clcc;
    use voicemodem_core::types::CallDirection;

    fn caller_id(number: &str) -> Urc {
        Urc::CallerId {
            number: Some(number.into()),
            number_type: 145,
        }
    }

    #[test]
    fn new_state_is_idle() {
        let state = CallState::new();
        assert_eq!(state.current_status(), None);
        assert_eq!(state.remote_number(), None);
        assert_eq!(state.current_call(), None);
    }

    #[test]
    fn ring_then_clip_sets_incoming_with_number() {
        let mut state = CallState::new();

        let first = state.apply_urc(&Urc::Ring);
        assert_eq!(first, ModemEvent::IncomingCall { number: None });

        let second = state.apply_urc(&caller_id("+15551234567"));
        assert_eq!(
            second,
            ModemEvent::IncomingCall {
                number: Some("+15551234567".into())
            }
        );
        assert_eq!(state.current_status(), Some(CallStatus::Incoming));
        assert_eq!(state.remote_number(), Some("+15551234567"));
    }

    #[test]
    fn ring_keeps_known_number() {
        let mut state = CallState::new();
        state.apply_urc(&caller_id("+15551234567"));
        let event = state.apply_urc(&Urc::Ring);
        assert_eq!(
            event,
            ModemEvent::IncomingCall {
                number: Some("+15551234567".into())
            }
        );
    }

    #[test]
    fn no_carrier_clears_status_and_number() {
        let mut state = CallState::new();
        state.apply_urc(&caller_id("+15551234567"));
        assert_eq!(state.apply_urc(&Urc::NoCarrier), ModemEvent::CallEnded {});
        assert_eq!(state, CallState::new());
    }

    #[test]
    fn busy_clears_status_only() {
        let mut state = CallState::new();
        state.apply_urc(&caller_id("+15551234567"));
        assert_eq!(state.apply_urc(&Urc::Busy), ModemEvent::CallBusy {});
        assert_eq!(state.current_status(), None);
        assert_eq!(state.remote_number(), Some("+15551234567"));
    }

    #[test]
    fn call_report_replaces_call() {
        let mut state = CallState::new();
        let call = parse_clcc(r#"+CLCC: 1,0,0,0,0,"+15551234567",129"#).unwrap();
        let event = state.apply_urc(&Urc::CallReport(call.clone()));

        assert_eq!(event, ModemEvent::CallStatus(call.clone()));
        assert_eq!(state.current_status(), Some(CallStatus::Active));
        assert_eq!(state.current_call(), Some(call));
    }

    #[test]
    fn report_without_number_keeps_caller_id() {
        let mut state = CallState::new();
        state.apply_urc(&caller_id("+15551234567"));
        let call = parse_clcc("+CLCC: 1,1,4,0,0").unwrap();
        state.apply_notification(&call);

        assert_eq!(state.remote_number(), Some("+15551234567"));
        let current = state.current_call().unwrap();
        assert_eq!(current.direction, CallDirection::Incoming);
        assert_eq!(current.number.as_deref(), Some("+15551234567"));
    }

    #[test]
    fn command_outcomes() {
        let mut state = CallState::new();

        state.set_from_command(CommandOutcome::Dialed);
        assert_eq!(state.current_status(), Some(CallStatus::Dialing));

        state.set_from_command(CommandOutcome::Answered);
        assert_eq!(state.current_status(), Some(CallStatus::Active));

        state.apply_urc(&caller_id("+15551234567"));
        state.set_from_command(CommandOutcome::HungUp);
        assert_eq!(state.current_status(), None);
        assert_eq!(state.remote_number(), None);
    }

    #[test]
    fn answer_updates_reported_call_status() {
        let mut state = CallState::new();
        state.apply_notification(&parse_clcc("+CLCC: 1,1,4,0,0").unwrap());
        state.set_from_command(CommandOutcome::Answered);
        assert_eq!(state.current_call().unwrap().status, CallStatus::Active);
    }
}
