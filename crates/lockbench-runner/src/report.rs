use crate::error::ConfigError;
use crate::plan::SweepPlan;
use crate::process::BenchmarkRunner;
use crate::ratio::{SweepParameter, SweepResults, ThreadPair};
use crate::sweep::{ExperimentSweep, SweepPoint};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// Everything one sweep produced, handed to whatever renders it.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub binary: PathBuf,
    pub timeout_secs: u64,
    pub points: Vec<SweepPoint>,
    pub results: SweepResults,
}

impl SweepReport {
    pub fn points_with_data(&self) -> usize {
        self.points.iter().filter(|p| p.has_data()).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub binary: PathBuf,
    pub timeout_secs: u64,
    pub parameter: SweepParameter,
    pub pair: ThreadPair,
    pub points: Vec<PlannedRun>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedRun {
    pub key: u64,
    pub args: Vec<String>,
}

pub fn describe_plan(plan: &SweepPlan) -> Result<PlanSummary, ConfigError> {
    let points = plan
        .schedule()?
        .into_iter()
        .map(|p| PlannedRun {
            key: p.key,
            args: p.configuration.args(),
        })
        .collect();
    Ok(PlanSummary {
        binary: plan.binary.clone(),
        timeout_secs: plan.timeout_secs,
        parameter: plan.parameter(),
        pair: plan.pair.clone(),
        points,
    })
}

/// Runs the plan against its binary. Only an invalid plan is an error; points
/// that fail to start or time out are reported without data.
pub fn run_plan(plan: &SweepPlan) -> Result<SweepReport, ConfigError> {
    run_plan_with(plan, plan.runner())
}

pub fn run_plan_with<R: BenchmarkRunner>(
    plan: &SweepPlan,
    runner: R,
) -> Result<SweepReport, ConfigError> {
    plan.validate()?;
    let schedule = plan.schedule()?;
    let started_at = Utc::now();
    let run_id = format!("sweep_{}", started_at.format("%Y%m%d_%H%M%S"));
    info!(
        %run_id,
        binary = %plan.binary.display(),
        parameter = plan.parameter().label(),
        points = schedule.len(),
        "starting sweep"
    );

    let configurations: Vec<_> = schedule.iter().map(|p| p.configuration.clone()).collect();
    let points = ExperimentSweep::new(runner).run(&configurations);
    let results = SweepResults::collect(
        plan.parameter(),
        plan.pair.clone(),
        schedule.iter().map(|p| p.key).zip(points.iter()),
    );

    let report = SweepReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        binary: plan.binary.clone(),
        timeout_secs: plan.timeout_secs,
        points,
        results,
    };
    info!(
        run_id = %report.run_id,
        with_data = report.points_with_data(),
        total = report.points.len(),
        "sweep finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpawnError;
    use crate::process::{ExitKind, RunOutput};
    use std::time::Duration;

    /// Fakes a contended benchmark: thread 00 always gets twice thread 01's
    /// counters, except that a 20 s run never finishes.
    struct FakeBench;

    impl BenchmarkRunner for FakeBench {
        fn run(&self, args: &[String]) -> Result<RunOutput, SpawnError> {
            let duration: u64 = args[1].parse().expect("numeric duration");
            let (stdout, exit) = if duration == 20 {
                (String::new(), ExitKind::TimedOut)
            } else {
                (
                    format!(
                        "id 00 loop {} lock_acquires {} lock_hold(us) {}\n\
                         id 01 loop {} lock_acquires {} lock_hold(us) {}\n",
                        200 * duration,
                        20 * duration,
                        100 * duration,
                        100 * duration,
                        10 * duration,
                        50 * duration
                    ),
                    ExitKind::Exited { code: 0 },
                )
            };
            Ok(RunOutput {
                stdout,
                stderr: String::new(),
                exit,
                elapsed: Duration::from_millis(1),
            })
        }
    }

    #[test]
    fn duration_preset_end_to_end() {
        let plan = SweepPlan::duration_preset("./bin/subversion_demo");
        let report = run_plan_with(&plan, FakeBench).expect("valid plan");

        assert!(report.run_id.starts_with("sweep_"));
        assert_eq!(report.points.len(), 5);
        assert_eq!(report.points_with_data(), 4);
        assert_eq!(report.results.keys(), vec![1, 2, 5, 10, 20]);
        for key in [1, 2, 5, 10] {
            let r = report.results.get(key).expect("entry");
            assert_eq!(r.loop_count.value(), Some(2.0));
            assert_eq!(r.lock_hold_us.value(), Some(2.0));
        }
        assert!(report.results.get(20).expect("entry").is_no_data());
    }

    #[test]
    fn report_json_carries_nulls_for_missing_points() {
        let plan = SweepPlan::duration_preset("./bin/subversion_demo");
        let report = run_plan_with(&plan, FakeBench).expect("valid plan");
        let json = serde_json::to_value(&report).expect("serialise");

        let entries = json["results"]["entries"].as_array().expect("entries");
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[4]["key"], 20);
        assert!(entries[4]["ratio"]["loop_count"].is_null());
        assert_eq!(entries[0]["ratio"]["lock_acquires"], serde_json::json!(2.0));
        assert_eq!(json["results"]["parameter"], "duration");
        assert_eq!(json["points"][4]["outcome"]["outcome"], "completed");
        assert_eq!(json["points"][4]["outcome"]["exit"]["status"], "timed_out");
    }

    #[test]
    fn missing_binary_still_yields_full_report() {
        let plan = SweepPlan::critical_section_ratio_preset("/nonexistent/lockbench/demo");
        let report = run_plan(&plan).expect("spawn failures are not fatal");
        assert_eq!(report.points.len(), 5);
        assert_eq!(report.points_with_data(), 0);
        assert_eq!(report.results.keys(), vec![1, 2, 3, 5, 10]);
        assert!(report.results.entries.iter().all(|e| e.ratio.is_no_data()));
    }

    #[cfg(unix)]
    #[test]
    fn unbounded_timeout_still_runs_every_point() {
        let plan = SweepPlan {
            timeout_secs: u64::MAX,
            ..SweepPlan::duration_preset("/bin/true")
        };
        let report = run_plan(&plan).expect("valid plan");
        assert_eq!(report.points.len(), 5);
        assert!(report.points.iter().all(|p| matches!(
            p.outcome,
            crate::sweep::PointOutcome::Completed {
                exit: ExitKind::Exited { code: 0 }
            }
        )));
        assert_eq!(report.results.len(), 5);
    }

    #[test]
    fn describe_lists_argument_vectors() {
        let plan = SweepPlan::critical_section_ratio_preset("./bin/subversion_demo");
        let summary = describe_plan(&plan).expect("valid plan");
        assert_eq!(summary.parameter, SweepParameter::CriticalSectionRatio);
        assert_eq!(summary.points[2].key, 3);
        assert_eq!(summary.points[2].args, vec!["2", "5", "1", "3"]);
    }
}
