use crate::parse::{parse_output, MetricRecord};
use crate::process::{BenchmarkRunner, ExitKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

/// Parameters of one benchmark invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfiguration {
    pub threads: u32,
    pub duration_secs: u64,
    /// Critical-section length per thread, in microseconds.
    pub weights: Vec<u64>,
}

impl SweepConfiguration {
    pub fn new(threads: u32, duration_secs: u64, weights: Vec<u64>) -> Self {
        Self {
            threads,
            duration_secs,
            weights,
        }
    }

    /// Positional arguments: `<threads> <duration> <weight>...`.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(2 + self.weights.len());
        args.push(self.threads.to_string());
        args.push(self.duration_secs.to_string());
        args.extend(self.weights.iter().map(|w| w.to_string()));
        args
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PointOutcome {
    Completed { exit: ExitKind },
    SpawnFailed { message: String },
}

/// One configuration together with the reports its run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepPoint {
    pub configuration: SweepConfiguration,
    pub records: Vec<MetricRecord>,
    pub outcome: PointOutcome,
    pub elapsed_ms: u64,
}

impl SweepPoint {
    /// Authoritative report for `thread_id`. When the benchmark reported the
    /// same thread more than once, the last report wins.
    pub fn record(&self, thread_id: &str) -> Option<&MetricRecord> {
        self.records.iter().rev().find(|r| r.thread_id == thread_id)
    }

    pub fn has_data(&self) -> bool {
        !self.records.is_empty()
    }
}

/// Runs configurations one after another through a [`BenchmarkRunner`].
pub struct ExperimentSweep<R> {
    runner: R,
}

impl<R: BenchmarkRunner> ExperimentSweep<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Always returns exactly one point per configuration, in input order.
    pub fn run(&self, configurations: &[SweepConfiguration]) -> Vec<SweepPoint> {
        let total = configurations.len();
        configurations
            .iter()
            .enumerate()
            .map(|(index, configuration)| {
                let _span = info_span!("sweep_point", index, total).entered();
                self.run_point(configuration)
            })
            .collect()
    }

    fn run_point(&self, configuration: &SweepConfiguration) -> SweepPoint {
        let args = configuration.args();
        match self.runner.run(&args) {
            Ok(output) => {
                let records = parse_output(&output.stdout);
                if !output.stderr.trim().is_empty() {
                    debug!(stderr = output.stderr.trim_end(), "benchmark stderr");
                }
                if output.timed_out() {
                    warn!(
                        recovered = records.len(),
                        "point timed out, keeping salvaged reports"
                    );
                }
                info!(
                    threads = configuration.threads,
                    duration_secs = configuration.duration_secs,
                    weights = ?configuration.weights,
                    records = records.len(),
                    exit = ?output.exit,
                    "sweep point done"
                );
                SweepPoint {
                    configuration: configuration.clone(),
                    records,
                    outcome: PointOutcome::Completed { exit: output.exit },
                    elapsed_ms: output.elapsed.as_millis() as u64,
                }
            }
            Err(err) => {
                warn!(error = %err, "benchmark could not be started, point has no data");
                SweepPoint {
                    configuration: configuration.clone(),
                    records: Vec::new(),
                    outcome: PointOutcome::SpawnFailed {
                        message: err.to_string(),
                    },
                    elapsed_ms: 0,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpawnError;
    use crate::process::RunOutput;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    enum Scripted {
        Output(&'static str, ExitKind),
        SpawnFails,
    }

    /// Answers by duration argument and remembers every call.
    struct ScriptedRunner {
        by_duration: HashMap<&'static str, Scripted>,
        calls: RefCell<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        fn new(entries: Vec<(&'static str, Scripted)>) -> Self {
            Self {
                by_duration: entries.into_iter().collect(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl BenchmarkRunner for ScriptedRunner {
        fn run(&self, args: &[String]) -> Result<RunOutput, SpawnError> {
            self.calls.borrow_mut().push(args.to_vec());
            match self.by_duration.get(args[1].as_str()) {
                Some(Scripted::Output(text, exit)) => Ok(RunOutput {
                    stdout: text.to_string(),
                    stderr: String::new(),
                    exit: *exit,
                    elapsed: Duration::from_millis(5),
                }),
                Some(Scripted::SpawnFails) | None => Err(SpawnError::NotFound {
                    binary: PathBuf::from("./bin/subversion_demo"),
                }),
            }
        }
    }

    fn config(duration: u64) -> SweepConfiguration {
        SweepConfiguration::new(2, duration, vec![1, 10])
    }

    #[test]
    fn args_follow_benchmark_usage() {
        let cfg = SweepConfiguration::new(3, 2, vec![100, 1, 10]);
        assert_eq!(cfg.args(), vec!["3", "2", "100", "1", "10"]);
    }

    #[test]
    fn order_is_preserved_across_failures_and_timeouts() {
        let runner = ScriptedRunner::new(vec![
            (
                "1",
                Scripted::Output(
                    "id 00 loop 10 lock_acquires 2 lock_hold(us) 4\n",
                    ExitKind::Exited { code: 0 },
                ),
            ),
            ("2", Scripted::SpawnFails),
            ("3", Scripted::Output("", ExitKind::TimedOut)),
        ]);
        let sweep = ExperimentSweep::new(runner);
        let configs = vec![config(1), config(2), config(3)];
        let points = sweep.run(&configs);

        assert_eq!(points.len(), 3);
        let got: Vec<&SweepConfiguration> = points.iter().map(|p| &p.configuration).collect();
        assert_eq!(got, configs.iter().collect::<Vec<_>>());

        assert_eq!(points[0].records.len(), 1);
        assert!(matches!(points[1].outcome, PointOutcome::SpawnFailed { .. }));
        assert!(!points[1].has_data());
        assert_eq!(
            points[2].outcome,
            PointOutcome::Completed {
                exit: ExitKind::TimedOut
            }
        );
        assert!(!points[2].has_data());

        let durations: Vec<String> = sweep
            .runner()
            .calls
            .borrow()
            .iter()
            .map(|a| a[1].clone())
            .collect();
        assert_eq!(durations, vec!["1", "2", "3"]);
    }

    #[test]
    fn timed_out_point_keeps_salvaged_reports() {
        let runner = ScriptedRunner::new(vec![(
            "5",
            Scripted::Output(
                "id 00 loop 10 lock_acquires 2 lock_hold(us) 4\nid 01 loop 3 lock_a",
                ExitKind::TimedOut,
            ),
        )]);
        let points = ExperimentSweep::new(runner).run(&[config(5)]);
        assert_eq!(points[0].records.len(), 1);
        assert_eq!(points[0].records[0].thread_id, "00");
    }

    #[test]
    fn empty_configuration_list_runs_nothing() {
        let sweep = ExperimentSweep::new(ScriptedRunner::new(vec![]));
        assert!(sweep.run(&[]).is_empty());
        assert!(sweep.runner().calls.borrow().is_empty());
    }

    #[test]
    fn last_duplicate_report_is_authoritative() {
        let point = SweepPoint {
            configuration: config(1),
            records: parse_output(
                "id 00 loop 1 lock_acquires 1 lock_hold(us) 1\n\
                 id 01 loop 9 lock_acquires 9 lock_hold(us) 9\n\
                 id 00 loop 2 lock_acquires 2 lock_hold(us) 2\n",
            ),
            outcome: PointOutcome::Completed {
                exit: ExitKind::Exited { code: 0 },
            },
            elapsed_ms: 0,
        };
        assert_eq!(point.record("00").map(|r| r.loop_count), Some(2));
        assert_eq!(point.record("01").map(|r| r.loop_count), Some(9));
        assert!(point.record("02").is_none());
    }

    /// Runs a shell script through the real process runner, with the script
    /// path prepended to the benchmark arguments.
    #[cfg(unix)]
    struct ShellScript {
        shell: crate::process::ProcessRunner,
        script: PathBuf,
    }

    #[cfg(unix)]
    impl BenchmarkRunner for ShellScript {
        fn run(&self, args: &[String]) -> Result<RunOutput, SpawnError> {
            let mut full = vec![self.script.display().to_string()];
            full.extend_from_slice(args);
            self.shell.run(&full)
        }
    }

    #[cfg(unix)]
    #[test]
    fn sweeps_a_real_subprocess() {
        use crate::process::ProcessRunner;

        let script_path = std::env::temp_dir().join(format!(
            "lockbench_sweep_{}_{}.sh",
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        // One report per thread; thread i gets loop = duration * weight.
        let script = r#"n=$1; d=$2; shift 2
i=0
for w in "$@"; do
  printf 'id %02d loop %10d lock_acquires %8d lock_hold(us) %10d\n' $i $((d * w)) $w $d
  i=$((i + 1))
done
"#;
        std::fs::write(&script_path, script).expect("write script");

        let runner = ShellScript {
            shell: ProcessRunner::new("/bin/sh").with_timeout(Duration::from_secs(10)),
            script: script_path.clone(),
        };
        let points = ExperimentSweep::new(runner).run(&[config(1), config(4)]);
        let _ = std::fs::remove_file(&script_path);

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].record("01").map(|r| r.loop_count), Some(10));
        assert_eq!(points[1].record("00").map(|r| r.loop_count), Some(4));
        assert_eq!(points[1].record("01").map(|r| r.loop_count), Some(40));
        assert_eq!(points[1].record("01").map(|r| r.lock_hold_us), Some(4));
    }
}
