use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::trace;

/// Number of whitespace separated tokens in one thread report line:
/// `id <tid> loop <n> lock_acquires <n> lock_hold(us) <n>`.
pub const REPORT_TOKENS: usize = 8;

const ID_LABEL: &str = "id";
const LOOP_LABEL: &str = "loop";
const ACQUIRES_LABEL: &str = "lock_acquires";
const HOLD_LABEL: &str = "lock_hold(us)";

/// Final counters one benchmark thread reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub thread_id: String,
    pub loop_count: u64,
    pub lock_acquires: u64,
    pub lock_hold_us: u64,
}

/// Why a line was not accepted as a thread report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineRejection {
    #[error("expected 8 tokens, found {0}")]
    TokenCount(usize),

    #[error("token {position} should be '{expected}', found '{found}'")]
    Label {
        position: usize,
        expected: &'static str,
        found: String,
    },

    #[error("field '{field}' is not an unsigned integer: '{value}'")]
    Number { field: &'static str, value: String },
}

impl FromStr for MetricRecord {
    type Err = LineRejection;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != REPORT_TOKENS {
            return Err(LineRejection::TokenCount(parts.len()));
        }
        let labels = [
            (0, ID_LABEL),
            (2, LOOP_LABEL),
            (4, ACQUIRES_LABEL),
            (6, HOLD_LABEL),
        ];
        for (position, expected) in labels {
            if parts[position] != expected {
                return Err(LineRejection::Label {
                    position,
                    expected,
                    found: parts[position].to_string(),
                });
            }
        }
        Ok(MetricRecord {
            thread_id: parts[1].to_string(),
            loop_count: number(LOOP_LABEL, parts[3])?,
            lock_acquires: number(ACQUIRES_LABEL, parts[5])?,
            lock_hold_us: number(HOLD_LABEL, parts[7])?,
        })
    }
}

fn number(field: &'static str, value: &str) -> Result<u64, LineRejection> {
    value.parse().map_err(|_| LineRejection::Number {
        field,
        value: value.to_string(),
    })
}

pub fn parse_line(line: &str) -> Result<MetricRecord, LineRejection> {
    line.parse()
}

/// Extracts every well-formed thread report from captured benchmark output,
/// in input order. Anything else, including a report cut short by a kill, is
/// dropped.
pub fn parse_output(raw: &str) -> Vec<MetricRecord> {
    let mut records = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok(record) => records.push(record),
            Err(reason) => trace!(line = lineno + 1, %reason, "skipping output line"),
        }
    }
    records
}
