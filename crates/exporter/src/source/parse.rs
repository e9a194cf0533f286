//! Turn `varnishlog` text output into [`LogRecord`]s.
//!
//! Grouped output (`-g request`) looks like:
//!
//! ```text
//! *   << Request  >> 32770
//! -   Begin          req 32769 rxreq
//! -   ReqHeader      Host: example.com
//! -   End
//! **  << BeReq    >> 32771
//! --  Begin          bereq 32770 fetch
//! ```
//!
//! Raw output (`-g raw`) carries the id and type on every line:
//!
//! ```text
//!          0 Backend_health - boot.default Still healthy 4---X-RH 5 3 5 0.000476 0.000523 HTTP/1.1 200 OK
//! ```

use super::{LogRecord, RecordKind};

/// Stateful parser for grouped output. Header lines set the transaction id
/// and kind applied to the record lines that follow them.
#[derive(Debug, Default)]
pub struct GroupedLineParser {
    vxid: u64,
    kind: RecordKind,
}

impl GroupedLineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one line. Returns `None` for headers, separators and noise.
    pub fn parse(&mut self, line: &str) -> Option<LogRecord> {
        let line = line.trim_end();
        if line.is_empty() {
            return None;
        }
        if line.starts_with('*') {
            self.parse_header(line);
            return None;
        }

        let body = line.trim_start_matches('-');
        if body.len() == line.len() {
            return None;
        }

        let (tag, payload) = split_field(body)?;
        Some(LogRecord::new(self.vxid, tag, self.kind, payload))
    }

    fn parse_header(&mut self, line: &str) {
        let (Some(open), Some(close)) = (line.find("<<"), line.find(">>")) else {
            return;
        };
        if close < open {
            return;
        }
        self.kind = RecordKind::from_group_label(line[open + 2..close].trim());
        self.vxid = line[close + 2..].trim().parse().unwrap_or(0);
    }
}

/// Parse one line of raw output.
pub fn parse_raw_line(line: &str) -> Option<LogRecord> {
    let (vxid, rest) = split_field(line.trim_end())?;
    let vxid = vxid.parse().ok()?;
    let (tag, rest) = split_field(rest)?;
    let (marker, payload) = split_field(rest).unwrap_or(("-", ""));
    Some(LogRecord::new(vxid, tag, RecordKind::from_marker(marker), payload))
}

/// Split off the first whitespace-delimited token; the remainder has its
/// leading whitespace removed.
fn split_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(i) => Some((&s[..i], s[i..].trim_start())),
        None => Some((s, "")),
    }
}
