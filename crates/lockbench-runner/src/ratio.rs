use crate::parse::MetricRecord;
use crate::sweep::{SweepConfiguration, SweepPoint};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A comparison/reference quotient, or no data when it cannot be computed.
///
/// No data is never the same thing as a ratio of zero; it serialises as
/// `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ratio(Option<f64>);

impl Ratio {
    pub const NO_DATA: Ratio = Ratio(None);

    /// `comparison / reference`, or no data when the reference is zero.
    pub fn compute(comparison: u64, reference: u64) -> Self {
        if reference == 0 {
            return Self::NO_DATA;
        }
        Ratio(Some(comparison as f64 / reference as f64))
    }

    pub fn value(self) -> Option<f64> {
        self.0
    }

    pub fn is_no_data(self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => match f.precision() {
                Some(p) => write!(f, "{v:.p$}"),
                None => write!(f, "{v}"),
            },
            None => f.pad("n/a"),
        }
    }
}

/// Which two benchmark threads to compare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadPair {
    pub reference: String,
    pub comparison: String,
}

impl ThreadPair {
    pub fn new(reference: impl Into<String>, comparison: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            comparison: comparison.into(),
        }
    }
}

impl Default for ThreadPair {
    /// Thread `00` measured against thread `01`.
    fn default() -> Self {
        Self::new("01", "00")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioResult {
    pub loop_count: Ratio,
    pub lock_acquires: Ratio,
    pub lock_hold_us: Ratio,
}

impl RatioResult {
    pub const NO_DATA: RatioResult = RatioResult {
        loop_count: Ratio::NO_DATA,
        lock_acquires: Ratio::NO_DATA,
        lock_hold_us: Ratio::NO_DATA,
    };

    /// Field-wise ratios; every field is no data unless both records exist.
    pub fn between(reference: Option<&MetricRecord>, comparison: Option<&MetricRecord>) -> Self {
        match (reference, comparison) {
            (Some(r), Some(c)) => RatioResult {
                loop_count: Ratio::compute(c.loop_count, r.loop_count),
                lock_acquires: Ratio::compute(c.lock_acquires, r.lock_acquires),
                lock_hold_us: Ratio::compute(c.lock_hold_us, r.lock_hold_us),
            },
            _ => Self::NO_DATA,
        }
    }

    pub fn is_no_data(&self) -> bool {
        self.loop_count.is_no_data()
            && self.lock_acquires.is_no_data()
            && self.lock_hold_us.is_no_data()
    }
}

/// Ratios of the pair's authoritative reports within one sweep point.
pub fn ratio(point: &SweepPoint, pair: &ThreadPair) -> RatioResult {
    RatioResult::between(point.record(&pair.reference), point.record(&pair.comparison))
}

/// What varies between the points of a sweep; it names the entry keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepParameter {
    /// Key is the run duration in seconds.
    Duration,
    /// Key is the comparison thread's critical-section multiple of the base weight.
    CriticalSectionRatio,
    /// Key is the zero-based position in the configuration list.
    Configuration,
}

impl SweepParameter {
    pub fn label(self) -> &'static str {
        match self {
            SweepParameter::Duration => "duration (s)",
            SweepParameter::CriticalSectionRatio => "critical-section ratio",
            SweepParameter::Configuration => "configuration",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepEntry {
    pub key: u64,
    pub configuration: SweepConfiguration,
    pub reference: Option<MetricRecord>,
    pub comparison: Option<MetricRecord>,
    pub ratio: RatioResult,
}

/// Sweep key to ratios, in the order the configurations were run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepResults {
    pub parameter: SweepParameter,
    pub pair: ThreadPair,
    pub entries: Vec<SweepEntry>,
}

impl SweepResults {
    pub fn collect<'a>(
        parameter: SweepParameter,
        pair: ThreadPair,
        keyed_points: impl IntoIterator<Item = (u64, &'a SweepPoint)>,
    ) -> Self {
        let entries = keyed_points
            .into_iter()
            .map(|(key, point)| {
                let reference = point.record(&pair.reference).cloned();
                let comparison = point.record(&pair.comparison).cloned();
                let ratio = RatioResult::between(reference.as_ref(), comparison.as_ref());
                SweepEntry {
                    key,
                    configuration: point.configuration.clone(),
                    reference,
                    comparison,
                    ratio,
                }
            })
            .collect();
        Self {
            parameter,
            pair,
            entries,
        }
    }

    pub fn get(&self, key: u64) -> Option<&RatioResult> {
        self.entries.iter().find(|e| e.key == key).map(|e| &e.ratio)
    }

    pub fn keys(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.key).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
