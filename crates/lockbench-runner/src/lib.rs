//! Parameter sweeps over an external lock-contention micro-benchmark.
//!
//! Each sweep point runs the benchmark under a hard timeout, salvages whatever
//! it printed, parses the per-thread reports and compares two threads'
//! counters. Points that fail or time out stay in the results with no data.

pub mod error;
pub mod parse;
pub mod plan;
pub mod process;
pub mod ratio;
pub mod report;
pub mod sweep;

pub use error::{ConfigError, SpawnError};
pub use parse::{parse_line, parse_output, LineRejection, MetricRecord};
pub use plan::{ScheduledPoint, SweepPlan, SweepSpec};
pub use process::{BenchmarkRunner, ExitKind, ProcessRunner, RunOutput};
pub use ratio::{ratio, Ratio, RatioResult, SweepEntry, SweepParameter, SweepResults, ThreadPair};
pub use report::{describe_plan, run_plan, run_plan_with, PlanSummary, PlannedRun, SweepReport};
pub use sweep::{ExperimentSweep, PointOutcome, SweepConfiguration, SweepPoint};
