//! Session state accumulated between a transaction's Begin and End.

use std::fmt;

/// Label value used when an optional attribute was never observed.
pub const UNKNOWN_LABEL: &str = "UNKNOWN";

/// Cache-handling classification of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Outcome {
    #[default]
    Unknown,
    Hit,
    Miss,
    HitForPass,
    Pass,
    Pipe,
    Synth,
}

impl Outcome {
    /// Label value for the `hitmiss` label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Unknown => "UNKNOWN",
            Outcome::Hit => "HIT",
            Outcome::Miss => "MISS",
            Outcome::HitForPass => "HITFORPASS",
            Outcome::Pass => "PASS",
            Outcome::Pipe => "PIPE",
            Outcome::Synth => "SYNTH",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the transaction a header was seen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    /// Label value for the `type` label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Request => "req",
            Direction::Response => "resp",
        }
    }
}

/// A captured header: direction, lowercased name, raw value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderField {
    pub direction: Direction,
    pub name: String,
    pub value: String,
}

/// Per-transaction state owned by one classifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub outcome: Outcome,
    pub byte_size: u64,
    pub status_code: Option<String>,
    pub protocol_version: Option<String>,
    pub tags: Vec<String>,
    pub headers: Vec<HeaderField>,
    pub active: bool,
}

impl Session {
    /// A fresh session opened by a request Begin record.
    pub fn begin() -> Self {
        Self {
            active: true,
            ..Self::default()
        }
    }

    pub fn mark_hit(&mut self) {
        self.outcome = Outcome::Hit;
    }

    pub fn mark_hit_for_pass(&mut self) {
        self.outcome = Outcome::HitForPass;
    }

    /// Apply a `VCL_call` decision. PASS never overrides HITFORPASS;
    /// MISS, PIPE and SYNTH always win. Other calls are ignored.
    pub fn apply_cache_decision(&mut self, decision: &str) {
        match decision {
            "PASS" if self.outcome != Outcome::HitForPass => self.outcome = Outcome::Pass,
            "MISS" => self.outcome = Outcome::Miss,
            "PIPE" => self.outcome = Outcome::Pipe,
            "SYNTH" => self.outcome = Outcome::Synth,
            _ => {}
        }
    }

    /// Take the transmitted byte total from a `ReqAcct` payload (sixth field).
    /// A missing or non-numeric field keeps the current value.
    pub fn record_accounting(&mut self, payload: &str) {
        if let Some(size) = payload
            .split_whitespace()
            .nth(5)
            .and_then(|field| field.parse::<u64>().ok())
        {
            self.byte_size = size;
        }
    }
}
