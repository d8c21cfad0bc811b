//! Unsolicited result code (URC) parsing.
//!
//! Recognizes the call-control notifications a SIM800/SIM808-class modem
//! emits on its own:
//!
//! | Line                                   | Meaning                      |
//! |----------------------------------------|------------------------------|
//! | `RING`                                 | incoming call alert          |
//! | `+CLIP: "<number>",<type>,...`         | caller ID (after `AT+CLIP=1`)|
//! | `... NO CARRIER ...`                   | call ended / dropped         |
//! | `... BUSY ...`                         | remote party busy            |
//! | `+CLCC: <id>,<dir>,<stat>,<mode>,<mpty>[,<number>,<type>]` | call report |
//!
//! The rules are independent: [`parse_line`] evaluates all of them and
//! returns every match, in the order of the table.

use voicemodem_core::types::{Call, CallDirection, CallMode, CallStatus};

/// A decoded unsolicited notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Urc {
    Ring,
    CallerId {
        /// `None` when the caller withheld their number (`+CLIP: "",128`).
        number: Option<String>,
        number_type: u16,
    },
    NoCarrier,
    Busy,
    CallReport(Call),
}

/// Run every notification rule against one framed line.
pub fn parse_line(line: &str) -> Vec<Urc> {
    let mut found = Vec::new();

    if line == "RING" {
        found.push(Urc::Ring);
    }
    if let Some((number, number_type)) = parse_clip(line) {
        found.push(Urc::CallerId {
            number,
            number_type,
        });
    }
    if line.contains("NO CARRIER") {
        found.push(Urc::NoCarrier);
    }
    if line.contains("BUSY") {
        found.push(Urc::Busy);
    }
    if let Some(call) = parse_clcc(line) {
        found.push(Urc::CallReport(call));
    }

    found
}

/// Text following `tag` in `line`, if the tag occurs.
fn after_tag<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    line.find(tag).map(|pos| &line[pos + tag.len()..])
}

/// Strip surrounding whitespace and quotes; empty becomes `None`.
fn unquote(field: &str) -> Option<String> {
    let value = field.trim().trim_matches('"');
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parse a non-empty all-digit field.
fn numeric(field: &str) -> Option<u32> {
    let field = field.trim();
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Overlong digit strings still count as a numeric field; the value is
    // clamped so the code decoders map it to `Unknown`.
    Some(field.parse().unwrap_or(u32::MAX))
}

/// Parse a `+CLIP:` caller ID line into `(number, type)`.
///
/// The type field must start with digits; anything after it (subaddress,
/// alpha name, CLI validity) is ignored.
pub fn parse_clip(line: &str) -> Option<(Option<String>, u16)> {
    let rest = after_tag(line, "+CLIP:")?;
    let (number, tail) = rest.split_once(',')?;
    let digits: String = tail
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let number_type = digits.parse::<u16>().ok()?;
    Some((unquote(number), number_type))
}

/// Parse a `+CLCC:` call report.
///
/// The first five fields must be numeric or the line is not a report. Codes
/// outside the known tables decode to the `Unknown` variants. The number and
/// its type are optional.
///
/// # Example
///
/// ```
/// use voicemodem_at::urc::parse_clcc;
/// use voicemodem_core::{CallDirection, CallStatus};
///
/// let call = parse_clcc(r#"+CLCC: 1,0,0,0,0,"+15551234567",145"#).unwrap();
/// assert_eq!(call.status, CallStatus::Active);
/// assert_eq!(call.direction, CallDirection::Outgoing);
/// assert_eq!(call.number.as_deref(), Some("+15551234567"));
/// assert!(!call.mpty);
/// ```
pub fn parse_clcc(line: &str) -> Option<Call> {
    let rest = after_tag(line, "+CLCC:")?;
    let fields: Vec<&str> = rest.split(',').collect();
    if fields.len() < 5 {
        return None;
    }

    let id = numeric(fields[0])?;
    let dir = numeric(fields[1])?;
    let stat = numeric(fields[2])?;
    let mode = numeric(fields[3])?;
    numeric(fields[4])?;

    Some(Call {
        id,
        direction: CallDirection::from_code(dir),
        status: CallStatus::from_code(stat),
        mode: CallMode::from_code(mode),
        number: fields.get(5).and_then(|f| unquote(f)),
        number_type: fields
            .get(6)
            .and_then(|f| numeric(f))
            .and_then(|t| u16::try_from(t).ok()),
        mpty: fields[4].trim() == "1",
    })
}
