//! Colon-data accumulator: reassembles `D` line payloads into
//! LF-delimited logical records.

use crate::error::{EngineError, ErrorKind, Result};

/// State of the `%HH` dequoting state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum DecodeState {
    Normal,
    SawPercent,
    SawPercentHex(u8),
}

/// Accumulates decoded bytes from successive `D` line payloads and
/// extracts complete LF-terminated records.
#[derive(Debug, Default)]
pub struct ColonAccumulator {
    buf: Vec<u8>,
    state: DecodeState,
}

impl Default for DecodeState {
    fn default() -> Self {
        DecodeState::Normal
    }
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

impl ColonAccumulator {
    /// A fresh accumulator with an empty buffer.
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            state: DecodeState::Normal,
        }
    }

    /// Feed the payload of one `D ` line (bytes after `D `, excluding the
    /// terminating LF). For each LF found after decoding, `on_record` is
    /// invoked with the completed record (trailing `\r` stripped once).
    ///
    /// Returns a framing error if the payload ends mid-escape with fewer
    /// than two trailing hex digits (the escape never completes since
    /// lines don't span `D` payloads).
    pub fn feed(&mut self, payload: &[u8], mut on_record: impl FnMut(&[u8])) -> Result<()> {
        for &b in payload {
            match self.state {
                DecodeState::Normal => {
                    if b == b'%' {
                        self.state = DecodeState::SawPercent;
                    } else {
                        self.push_decoded(b, &mut on_record);
                    }
                }
                DecodeState::SawPercent => {
                    if let Some(hi) = hex_val(b) {
                        self.state = DecodeState::SawPercentHex(hi);
                    } else {
                        return Err(EngineError::with_detail(
                            ErrorKind::GeneralError,
                            "malformed %HH escape in D line",
                        ));
                    }
                }
                DecodeState::SawPercentHex(hi) => {
                    if let Some(lo) = hex_val(b) {
                        self.state = DecodeState::Normal;
                        self.push_decoded(hi * 16 + lo, &mut on_record);
                    } else {
                        return Err(EngineError::with_detail(
                            ErrorKind::GeneralError,
                            "malformed %HH escape in D line",
                        ));
                    }
                }
            }
        }
        // A `%` or `%H` left dangling at payload end is a framing error: the
        // escape can never complete because each `D` line is independently
        // terminated by its own LF on the wire.
        if self.state != DecodeState::Normal {
            self.state = DecodeState::Normal;
            return Err(EngineError::with_detail(
                ErrorKind::GeneralError,
                "truncated %HH escape at end of D line",
            ));
        }
        Ok(())
    }

    fn push_decoded(&mut self, byte: u8, on_record: &mut impl FnMut(&[u8])) {
        self.buf.push(byte);
        if byte == b'\n' {
            let mut end = self.buf.len() - 1;
            if end > 0 && self.buf[end - 1] == b'\r' {
                end -= 1;
            }
            on_record(&self.buf[..end]);
            self.buf.clear();
        }
    }

    /// Discard any partial (LF-less) record buffered when the session ends
    /// with an incomplete `D` line still pending.
    pub fn discard_partial(&mut self) {
        self.buf.clear();
        self.state = DecodeState::Normal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_simple_record() {
        let mut acc = ColonAccumulator::new();
        let mut records = Vec::new();
        acc.feed(b"key:1:AB\n", |r| records.push(r.to_vec())).unwrap();
        assert_eq!(records, vec![b"key:1:AB".to_vec()]);
    }

    #[test]
    fn percent_decodes_escapes() {
        let mut acc = ColonAccumulator::new();
        let mut records = Vec::new();
        acc.feed(b"key:1:AB%0A", |r| records.push(r.to_vec())).unwrap();
        assert_eq!(records, vec![b"key:1:AB".to_vec()]);
    }

    #[test]
    fn reassembles_across_feeds() {
        let mut acc = ColonAccumulator::new();
        let mut records = Vec::new();
        acc.feed(b"key:1:AB%0A", |r| records.push(r.to_vec())).unwrap();
        acc.feed(b"more", |r| records.push(r.to_vec())).unwrap();
        assert_eq!(records, vec![b"key:1:AB".to_vec()]);
        acc.discard_partial();
        assert!(records.len() == 1);
    }

    #[test]
    fn strips_trailing_cr() {
        let mut acc = ColonAccumulator::new();
        let mut records = Vec::new();
        acc.feed(b"value\r\n", |r| records.push(r.to_vec())).unwrap();
        assert_eq!(records, vec![b"value".to_vec()]);
    }

    #[test]
    fn empty_payload_is_noop() {
        let mut acc = ColonAccumulator::new();
        let mut called = false;
        acc.feed(b"", |_| called = true).unwrap();
        assert!(!called);
    }

    #[test]
    fn truncated_escape_is_error() {
        let mut acc = ColonAccumulator::new();
        assert!(acc.feed(b"abc%4", |_| {}).is_err());
        let mut acc2 = ColonAccumulator::new();
        assert!(acc2.feed(b"abc%", |_| {}).is_err());
    }
}
