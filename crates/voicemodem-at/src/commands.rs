//! Call-control command builders and response parsers.
//!
//! All functions are pure: they validate caller input and produce command
//! lines (without the CRLF terminator, which the IO task appends) or decode
//! reply text. Validation failures are reported here, before anything
//! reaches the modem.

use voicemodem_core::types::Call;
use voicemodem_core::{Error, Result};

use crate::urc;

/// Attention command used as the connection handshake.
pub const HANDSHAKE: &str = "AT";

/// Enable calling line identification presentation (`+CLIP` after `RING`).
pub const ENABLE_CALLER_ID: &str = "AT+CLIP=1";

/// Answer an incoming call.
pub const ANSWER: &str = "ATA";

/// Hang up the current call.
pub const HANGUP: &str = "ATH";

/// List current calls.
pub const LIST_CALLS: &str = "AT+CLCC";

/// Characters accepted by `AT+VTS`.
const DTMF_DIGITS: &str = "0123456789*#ABCD";

/// Reduce a human-formatted phone number to dialable form.
///
/// Keeps ASCII digits and a `+` only when it is the first character kept.
///
/// ```
/// use voicemodem_at::commands::sanitize_number;
///
/// assert_eq!(sanitize_number("+1 (555) 123-4567"), "+15551234567");
/// assert_eq!(sanitize_number("555+123"), "555123");
/// ```
pub fn sanitize_number(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_digit() || (c == '+' && out.is_empty()) {
            out.push(c);
        }
    }
    out
}

/// Build a voice dial command (`ATD<number>;`).
///
/// The trailing `;` makes it a voice call rather than a data call.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] if no digits survive sanitizing.
pub fn cmd_dial(number: &str) -> Result<String> {
    let number = sanitize_number(number);
    if !number.bytes().any(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidParameter(
            "phone number contains no digits".into(),
        ));
    }
    Ok(format!("ATD{number};"))
}

/// Validate a DTMF digit and return it in canonical (upper-case) form.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] unless `digit` is exactly one of
/// `0-9 * # A-D` (letters in either case).
pub fn normalize_dtmf(digit: &str) -> Result<char> {
    let mut chars = digit.chars();
    let c = match (chars.next(), chars.next()) {
        (Some(c), None) => c.to_ascii_uppercase(),
        _ => {
            return Err(Error::InvalidParameter(format!(
                "DTMF expects exactly one character, got {digit:?}"
            )));
        }
    };
    if !DTMF_DIGITS.contains(c) {
        return Err(Error::InvalidParameter(format!(
            "unsupported DTMF digit {c:?}"
        )));
    }
    Ok(c)
}

/// Build a DTMF tone command (`AT+VTS=<digit>`).
pub fn cmd_dtmf(digit: &str) -> Result<String> {
    let digit = normalize_dtmf(digit)?;
    Ok(format!("AT+VTS={digit}"))
}

/// Extract the first call from an `AT+CLCC` reply.
///
/// Returns `None` when the modem lists no calls (a bare `OK`).
pub fn parse_call_list(response: &str) -> Option<Call> {
    response.lines().find_map(urc::parse_clcc)
}
