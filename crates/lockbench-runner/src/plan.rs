use crate::error::ConfigError;
use crate::process::ProcessRunner;
use crate::ratio::{SweepParameter, ThreadPair};
use crate::sweep::SweepConfiguration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Declarative description of one sweep: which binary, how long each run may
/// take, which threads to compare and which parameter to vary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepPlan {
    pub binary: PathBuf,
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "defaults::grace_millis")]
    pub grace_millis: u64,
    #[serde(default)]
    pub pair: ThreadPair,
    pub sweep: SweepSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SweepSpec {
    /// Fixed threads and weights, one run per duration.
    Duration {
        threads: u32,
        weights: Vec<u64>,
        durations: Vec<u64>,
    },
    /// Two threads; thread 1 gets `base_weight * ratio`, thread 0 `base_weight`.
    CriticalSectionRatio {
        duration_secs: u64,
        #[serde(default = "defaults::base_weight")]
        base_weight: u64,
        ratios: Vec<u64>,
    },
    Explicit { points: Vec<SweepConfiguration> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledPoint {
    pub key: u64,
    pub configuration: SweepConfiguration,
}

mod defaults {
    pub fn timeout_secs() -> u64 {
        crate::process::DEFAULT_TIMEOUT_SECS
    }

    pub fn grace_millis() -> u64 {
        crate::process::DEFAULT_GRACE_MILLIS
    }

    pub fn base_weight() -> u64 {
        1
    }
}

/// Timeout the stock sweeps use; the longest default duration is 20 s.
const PRESET_TIMEOUT_SECS: u64 = 30;

impl SweepPlan {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let plan: SweepPlan = serde_yaml::from_str(raw)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Two threads with weights 1 and 10, durations 1 to 20 seconds.
    pub fn duration_preset(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout_secs: PRESET_TIMEOUT_SECS,
            grace_millis: defaults::grace_millis(),
            pair: ThreadPair::default(),
            sweep: SweepSpec::Duration {
                threads: 2,
                weights: vec![1, 10],
                durations: vec![1, 2, 5, 10, 20],
            },
        }
    }

    /// Five-second runs with thread 01's critical section 1, 2, 3, 5 and 10
    /// times thread 00's.
    pub fn critical_section_ratio_preset(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout_secs: PRESET_TIMEOUT_SECS,
            grace_millis: defaults::grace_millis(),
            pair: ThreadPair::default(),
            sweep: SweepSpec::CriticalSectionRatio {
                duration_secs: 5,
                base_weight: defaults::base_weight(),
                ratios: vec![1, 2, 3, 5, 10],
            },
        }
    }

    pub fn parameter(&self) -> SweepParameter {
        match self.sweep {
            SweepSpec::Duration { .. } => SweepParameter::Duration,
            SweepSpec::CriticalSectionRatio { .. } => SweepParameter::CriticalSectionRatio,
            SweepSpec::Explicit { .. } => SweepParameter::Configuration,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.binary.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("binary must not be empty".into()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be at least 1".into()));
        }
        if self.pair.reference == self.pair.comparison {
            return Err(ConfigError::Invalid(format!(
                "pair compares thread '{}' with itself",
                self.pair.reference
            )));
        }
        match &self.sweep {
            SweepSpec::Duration { durations, .. } if durations.is_empty() => {
                return Err(ConfigError::Invalid("durations must not be empty".into()));
            }
            SweepSpec::CriticalSectionRatio { ratios, .. } if ratios.is_empty() => {
                return Err(ConfigError::Invalid("ratios must not be empty".into()));
            }
            SweepSpec::Explicit { points } if points.is_empty() => {
                return Err(ConfigError::Invalid("points must not be empty".into()));
            }
            _ => {}
        }
        let mut keys = BTreeSet::new();
        for point in self.schedule()? {
            check_configuration(&point.configuration)?;
            if !keys.insert(point.key) {
                return Err(ConfigError::Invalid(format!(
                    "{} {} is listed more than once",
                    self.parameter().label(),
                    point.key
                )));
            }
        }
        Ok(())
    }

    /// Keyed configurations in run order.
    pub fn schedule(&self) -> Result<Vec<ScheduledPoint>, ConfigError> {
        let points = match &self.sweep {
            SweepSpec::Duration {
                threads,
                weights,
                durations,
            } => durations
                .iter()
                .map(|&d| ScheduledPoint {
                    key: d,
                    configuration: SweepConfiguration::new(*threads, d, weights.clone()),
                })
                .collect(),
            SweepSpec::CriticalSectionRatio {
                duration_secs,
                base_weight,
                ratios,
            } => ratios
                .iter()
                .map(|&ratio| {
                    let scaled = base_weight.checked_mul(ratio).ok_or_else(|| {
                        ConfigError::Invalid(format!(
                            "base_weight {base_weight} * ratio {ratio} overflows"
                        ))
                    })?;
                    Ok(ScheduledPoint {
                        key: ratio,
                        configuration: SweepConfiguration::new(
                            2,
                            *duration_secs,
                            vec![*base_weight, scaled],
                        ),
                    })
                })
                .collect::<Result<Vec<_>, ConfigError>>()?,
            SweepSpec::Explicit { points } => points
                .iter()
                .enumerate()
                .map(|(i, c)| ScheduledPoint {
                    key: i as u64,
                    configuration: c.clone(),
                })
                .collect(),
        };
        Ok(points)
    }

    pub fn runner(&self) -> ProcessRunner {
        ProcessRunner::new(&self.binary)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_grace(Duration::from_millis(self.grace_millis))
    }
}

fn check_configuration(c: &SweepConfiguration) -> Result<(), ConfigError> {
    if c.threads == 0 {
        return Err(ConfigError::Invalid("threads must be at least 1".into()));
    }
    // The benchmark reads exactly one critical-section length per thread.
    if c.weights.len() != c.threads as usize {
        return Err(ConfigError::Invalid(format!(
            "{} threads need {} weights, got {}",
            c.threads,
            c.threads,
            c.weights.len()
        )));
    }
    Ok(())
}
