use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lockbench_runner::{
    describe_plan, parse_output, run_plan, ExitKind, MetricRecord, PlanSummary, PointOutcome,
    SweepPlan, SweepReport,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lockbench", version, about = "Lock contention benchmark sweeps")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PresetArg {
    #[value(name = "duration")]
    Duration,
    #[value(name = "critical-section-ratio")]
    CriticalSectionRatio,
}

impl PresetArg {
    fn plan(self, binary: PathBuf) -> SweepPlan {
        match self {
            PresetArg::Duration => SweepPlan::duration_preset(binary),
            PresetArg::CriticalSectionRatio => SweepPlan::critical_section_ratio_preset(binary),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sweep and print the per-point ratios.
    Run {
        plan: Option<PathBuf>,
        #[arg(long, value_enum, conflicts_with = "plan")]
        preset: Option<PresetArg>,
        #[arg(long)]
        binary: Option<PathBuf>,
        #[arg(long)]
        timeout_seconds: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Show the argument lists a sweep would run, without running them.
    Describe {
        plan: Option<PathBuf>,
        #[arg(long, value_enum, conflicts_with = "plan")]
        preset: Option<PresetArg>,
        #[arg(long)]
        binary: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Parse a captured benchmark log.
    Parse {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{err:#}"), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            plan,
            preset,
            binary,
            timeout_seconds,
            json,
        } => {
            let mut plan = resolve_plan(plan, preset, binary)?;
            if let Some(secs) = timeout_seconds {
                plan.timeout_secs = secs;
            }
            let report = run_plan(&plan)?;
            if json {
                return Ok(Some(json!({ "ok": true, "report": serde_json::to_value(&report)? })));
            }
            print_report(&report);
        }
        Commands::Describe {
            plan,
            preset,
            binary,
            json,
        } => {
            let plan = resolve_plan(plan, preset, binary)?;
            plan.validate()?;
            let summary = describe_plan(&plan)?;
            if json {
                return Ok(Some(json!({ "ok": true, "plan": serde_json::to_value(&summary)? })));
            }
            print_summary(&summary);
        }
        Commands::Parse { file, json } => {
            let raw = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let records = parse_output(&String::from_utf8_lossy(&raw));
            if json {
                return Ok(Some(json!({ "ok": true, "records": records })));
            }
            print_records(&records);
        }
    }
    Ok(None)
}

fn resolve_plan(
    plan: Option<PathBuf>,
    preset: Option<PresetArg>,
    binary: Option<PathBuf>,
) -> Result<SweepPlan> {
    let mut resolved = match (plan, preset) {
        (Some(path), _) => {
            tracing::debug!(path = %path.display(), "loading sweep plan");
            SweepPlan::load(&path)
                .with_context(|| format!("loading sweep plan {}", path.display()))?
        }
        (None, Some(preset)) => {
            let binary = binary
                .clone()
                .ok_or_else(|| anyhow!("--binary is required with --preset"))?;
            preset.plan(binary)
        }
        (None, None) => return Err(anyhow!("either a plan file or --preset is required")),
    };
    if let Some(binary) = binary {
        resolved.binary = binary;
    }
    Ok(resolved)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Describe { json, .. }
        | Commands::Parse { json, .. } => *json,
    }
}

fn print_report(report: &SweepReport) {
    let results = &report.results;
    println!("run_id: {}", report.run_id);
    println!("binary: {}", report.binary.display());
    println!(
        "pair: {} / {}",
        results.pair.comparison, results.pair.reference
    );
    println!(
        "points with data: {}/{}",
        report.points_with_data(),
        results.len()
    );
    if results.is_empty() {
        return;
    }
    println!();
    println!(
        "{:>24} {:>12} {:>14} {:>14}  {}",
        results.parameter.label(),
        "loop",
        "lock_acquires",
        "lock_hold(us)",
        "outcome"
    );
    for (entry, point) in results.entries.iter().zip(&report.points) {
        println!(
            "{:>24} {:>12} {:>14} {:>14}  {}",
            entry.key,
            format!("{:.3}", entry.ratio.loop_count),
            format!("{:.3}", entry.ratio.lock_acquires),
            format!("{:.3}", entry.ratio.lock_hold_us),
            outcome_label(&point.outcome)
        );
    }
}

fn outcome_label(outcome: &PointOutcome) -> String {
    match outcome {
        PointOutcome::Completed { exit } => match exit {
            ExitKind::Exited { code } => format!("exit {code}"),
            ExitKind::Signaled => "signaled".to_string(),
            ExitKind::TimedOut => "timed out".to_string(),
            ExitKind::Killed => "killed".to_string(),
        },
        PointOutcome::SpawnFailed { message } => format!("spawn failed: {message}"),
    }
}

fn print_summary(summary: &PlanSummary) {
    println!("binary: {}", summary.binary.display());
    println!("timeout: {}s", summary.timeout_secs);
    println!("parameter: {}", summary.parameter.label());
    println!(
        "pair: {} / {}",
        summary.pair.comparison, summary.pair.reference
    );
    println!("points: {}", summary.points.len());
    for point in &summary.points {
        println!("  {:>8}: {}", point.key, point.args.join(" "));
    }
}

fn print_records(records: &[MetricRecord]) {
    println!(
        "{:>6} {:>14} {:>14} {:>14}",
        "id", "loop", "lock_acquires", "lock_hold(us)"
    );
    for r in records {
        println!(
            "{:>6} {:>14} {:>14} {:>14}",
            r.thread_id, r.loop_count, r.lock_acquires, r.lock_hold_us
        );
    }
}
