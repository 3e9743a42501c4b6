//! Process-wide execution trace.
//!
//! While a trace is active the runtime reports every scheduling decision (workers
//! starting, tasks being created, dispatched, switched out and woken) to a single
//! sink. The output is a Chrome Trace Event Format JSON array, so a run can be opened
//! in Perfetto or `chrome://tracing` and each worker shows up as a thread lane with
//! one slice per stretch of task execution.
//!
//! # Example
//!
//! ```no_run
//! use coopsched::exectrace;
//!
//! let trace = exectrace::start_file("trace.out")?;
//! // ... run tasks ...
//! trace.stop()?;
//! # Ok::<(), coopsched::error::TraceError>(())
//! ```

mod event;
mod writer;

pub(crate) use event::{Event, StopReason};
pub use writer::TraceSummary;

use crate::error::TraceError;
use parking_lot::Mutex;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, warn};
use writer::TraceWriter;

struct ActiveTrace {
    generation: u64,
    writer: TraceWriter<Box<dyn Write + Send>>,
}

/// Fast-path flag so `emit` costs one load when tracing is off.
static ENABLED: AtomicBool = AtomicBool::new(false);
static GENERATION: AtomicU64 = AtomicU64::new(0);
static ACTIVE: Mutex<Option<ActiveTrace>> = parking_lot::const_mutex(None);

/// Begin capturing into `sink`.
pub fn start<W: Write + Send + 'static>(sink: W) -> Result<TraceGuard, TraceError> {
    let mut active = ACTIVE.lock();
    if active.is_some() {
        return Err(TraceError::AlreadyStarted);
    }

    let writer = TraceWriter::new(Box::new(sink) as Box<dyn Write + Send>)?;
    let generation = GENERATION.fetch_add(1, Ordering::Relaxed) + 1;
    *active = Some(ActiveTrace { generation, writer });
    ENABLED.store(true, Ordering::Release);

    Ok(TraceGuard {
        generation,
        stopped: false,
    })
}

/// Create (or truncate) `path` and begin capturing into it.
pub fn start_file(path: impl AsRef<Path>) -> Result<TraceGuard, TraceError> {
    let path = path.as_ref();
    if is_enabled() {
        return Err(TraceError::AlreadyStarted);
    }

    let file = File::create(path).map_err(|source| TraceError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    let guard = start(file)?;
    info!(path = %path.display(), "execution trace started");
    Ok(guard)
}

/// Flush and finalize the active trace.
pub fn stop() -> Result<TraceSummary, TraceError> {
    stop_generation(None)
}

fn stop_generation(generation: Option<u64>) -> Result<TraceSummary, TraceError> {
    let trace = {
        let mut active = ACTIVE.lock();
        match active.as_ref() {
            None => return Err(TraceError::NotStarted),
            Some(trace) if generation.is_some_and(|g| g != trace.generation) => {
                return Err(TraceError::NotStarted);
            }
            Some(_) => {}
        }
        ENABLED.store(false, Ordering::Release);
        active.take().ok_or(TraceError::NotStarted)?
    };

    let (_, summary) = trace.writer.finish()?;
    info!(
        records = summary.records,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "execution trace stopped"
    );
    Ok(summary)
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

pub(crate) fn emit(event: Event) {
    if !is_enabled() {
        return;
    }
    if let Some(trace) = ACTIVE.lock().as_mut() {
        trace.writer.record(&event);
    }
}

/// Scoped handle to the trace it started. Dropping it stops that trace.
#[must_use = "dropping the guard stops the trace immediately"]
#[derive(Debug)]
pub struct TraceGuard {
    generation: u64,
    stopped: bool,
}

impl TraceGuard {
    pub fn stop(mut self) -> Result<TraceSummary, TraceError> {
        self.stopped = true;
        stop_generation(Some(self.generation))
    }
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        match stop_generation(Some(self.generation)) {
            // Already stopped through `exectrace::stop`.
            Ok(_) | Err(TraceError::NotStarted) => {}
            Err(err) => warn!(error = %err, "failed to finalize execution trace"),
        }
    }
}
