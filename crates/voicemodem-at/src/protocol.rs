//! AT line framing and final result classification.
//!
//! The modem speaks CRLF-terminated ASCII lines. Replies are wrapped in blank
//! lines (`\r\nOK\r\n`) and command echo ends in a bare `\r`, so the framer
//! splits on `\n`, trims trailing whitespace (which removes the `\r`) and
//! drops lines that end up empty.

use bytes::{BufMut, BytesMut};

/// Line terminator appended to every command.
pub const TERMINATOR: &[u8] = b"\r\n";

/// Maximum bytes buffered without seeing a line terminator.
///
/// AT lines are rarely longer than 100 bytes; anything past this is noise
/// (wrong baud rate, binary garbage) and the buffer is reset.
pub const MAX_BUF: usize = 8192;

/// Encode an AT command line into raw bytes ready for transmission.
///
/// # Example
///
/// ```
/// use voicemodem_at::protocol::encode_command;
///
/// assert_eq!(encode_command("ATA"), b"ATA\r\n");
/// ```
pub fn encode_command(line: &str) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(line.len() + TERMINATOR.len());
    buf.put_slice(line.as_bytes());
    buf.put_slice(TERMINATOR);
    buf.to_vec()
}

/// How a line terminates the command in flight, if it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalResult {
    /// `OK`
    Ok,
    /// `ERROR`, `+CME ERROR: <n>` or `+CMS ERROR: <n>`
    Error,
}

/// Classify a framed line as a final result code.
///
/// Returns `None` for intermediate lines (echo, `+CLCC:` reports) and for
/// unsolicited notifications.
pub fn final_result(line: &str) -> Option<FinalResult> {
    if line == "OK" {
        Some(FinalResult::Ok)
    } else if line == "ERROR"
        || line.starts_with("+CME ERROR")
        || line.starts_with("+CMS ERROR")
    {
        Some(FinalResult::Error)
    } else {
        None
    }
}

/// Accumulates raw bytes and yields complete text lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: BytesMut,
}

impl LineFramer {
    pub fn new() -> Self {
        LineFramer {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Append bytes read from the transport.
    ///
    /// Returns `false` if the buffer overflowed [`MAX_BUF`] and was reset.
    pub fn push(&mut self, data: &[u8]) -> bool {
        self.buf.extend_from_slice(data);
        if self.buf.len() > MAX_BUF && !self.buf.contains(&b'\n') {
            self.buf.clear();
            return false;
        }
        true
    }

    /// Pop the next non-empty line, or `None` if no complete line is buffered.
    ///
    /// Non-UTF-8 bytes are replaced rather than rejected; the patterns the
    /// engine looks for are pure ASCII.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let end = self.buf.iter().position(|&b| b == b'\n')?;
            let raw = self.buf.split_to(end + 1);
            let line = String::from_utf8_lossy(&raw).trim_end().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
    }

    /// Bytes held back waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(framer: &mut LineFramer) -> Vec<String> {
        std::iter::from_fn(|| framer.next_line()).collect()
    }

    #[test]
    fn encode_appends_crlf() {
        assert_eq!(encode_command("AT+CLCC"), b"AT+CLCC\r\n");
        assert_eq!(encode_command("ATD+15551234567;"), b"ATD+15551234567;\r\n");
    }

    #[test]
    fn final_result_codes() {
        assert_eq!(final_result("OK"), Some(FinalResult::Ok));
        assert_eq!(final_result("ERROR"), Some(FinalResult::Error));
        assert_eq!(final_result("+CME ERROR: 10"), Some(FinalResult::Error));
        assert_eq!(final_result("+CMS ERROR: 500"), Some(FinalResult::Error));
        assert_eq!(final_result("+CLCC: 1,0,0,0,0"), None);
        assert_eq!(final_result("RING"), None);
        assert_eq!(final_result("OKAY"), None);
    }

    #[test]
    fn framer_splits_reply_burst() {
        let mut framer = LineFramer::new();
        framer.push(b"AT+CLCC\r\r\n+CLCC: 1,0,0,0,0,\"+15551234567\",145\r\n\r\nOK\r\n");
        assert_eq!(
            drain(&mut framer),
            vec!["AT+CLCC", "+CLCC: 1,0,0,0,0,\"+15551234567\",145", "OK"]
        );
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn framer_holds_partial_line() {
        let mut framer = LineFramer::new();
        framer.push(b"\r\nRI");
        assert_eq!(framer.next_line(), None);
        framer.push(b"NG\r\n");
        assert_eq!(framer.next_line().as_deref(), Some("RING"));
        assert_eq!(framer.next_line(), None);
    }

    #[test]
    fn framer_drops_empty_lines_and_trailing_whitespace() {
        let mut framer = LineFramer::new();
        framer.push(b"\r\n\r\n  \r\nNO CARRIER  \r\n");
        assert_eq!(drain(&mut framer), vec!["NO CARRIER"]);
    }

    #[test]
    fn framer_accepts_bare_lf() {
        let mut framer = LineFramer::new();
        framer.push(b"BUSY\nOK\n");
        assert_eq!(drain(&mut framer), vec!["BUSY", "OK"]);
    }

    #[test]
    fn framer_resets_on_overflow() {
        let mut framer = LineFramer::new();
        assert!(!framer.push(&vec![b'A'; MAX_BUF + 1]));
        assert_eq!(framer.pending_len(), 0);

        framer.push(b"OK\r\n");
        assert_eq!(framer.next_line().as_deref(), Some("OK"));
    }

    #[test]
    fn framer_replaces_invalid_utf8() {
        let mut framer = LineFramer::new();
        framer.push(&[0xFF, b'O', b'K', b'\r', b'\n']);
        let line = framer.next_line().unwrap();
        assert!(line.ends_with("OK"));
    }
}
