//! The cooperative-preemption demonstration.
//!
//! Two Fibonacci tasks with enormous inputs share a single worker thread. Neither
//! would ever finish, and neither ever yields on purpose; they only alternate because
//! each output line is a safe point where an expired time slice hands the worker
//! over. The main task sleeps for a fixed time and then ends the run, abandoning both.

use crate::error::RuntimeError;
use crate::exectrace::{self, TraceGuard};
use crate::runtime::{Runtime, RuntimeConfig, go, sleep};
use crate::workload::fibonacci;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Trace file written in the working directory.
pub const TRACE_PATH: &str = "trace.out";

/// How long the main task sleeps before the run ends.
pub const RUN_FOR: Duration = Duration::from_secs(3);

/// Inputs for the two workload tasks.
pub const WORKLOADS: [i64; 2] = [1_000_000_000, 2_000_000_000];

#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub trace_path: PathBuf,
    pub runtime: RuntimeConfig,
    pub workloads: Vec<i64>,
    pub run_for: Duration,
}

impl Default for DemoConfig {
    fn default() -> Self {
        DemoConfig {
            trace_path: PathBuf::from(TRACE_PATH),
            runtime: RuntimeConfig::default().with_max_procs(1),
            workloads: WORKLOADS.to_vec(),
            run_for: RUN_FOR,
        }
    }
}

/// Start the trace, run the workloads for `run_for`, then stop the trace.
///
/// `make_output` is called once per workload for the sink that task reports to.
/// If the trace file cannot be created the run goes ahead untraced.
pub fn run<W, F>(config: &DemoConfig, make_output: F) -> Result<(), RuntimeError>
where
    W: Write + Send + 'static,
    F: Fn() -> W + Send + 'static,
{
    let trace = start_trace(config);

    let runtime = Runtime::new(config.runtime.clone())?;
    let workloads = config.workloads.clone();
    let run_for = config.run_for;

    runtime.block_on(move || -> Result<(), RuntimeError> {
        for n in workloads {
            let mut out = make_output();
            let task = go(move || {
                fibonacci(n, &mut out);
            })?;
            info!(task = %task, n, "workload spawned");
        }
        sleep(run_for);
        Ok(())
    })??;

    if let Some(trace) = trace
        && let Err(err) = trace.stop()
    {
        warn!(error = %err, "execution trace incomplete");
    }
    Ok(())
}

fn start_trace(config: &DemoConfig) -> Option<TraceGuard> {
    match exectrace::start_file(&config.trace_path) {
        Ok(guard) => Some(guard),
        Err(err) => {
            warn!(
                path = %config.trace_path.display(),
                error = %err,
                "execution trace disabled"
            );
            None
        }
    }
}
