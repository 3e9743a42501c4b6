//! Error types for the runtime and the execution tracer.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Rejected [`RuntimeConfig`](crate::runtime::RuntimeConfig) values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_procs must be at least 1")]
    ZeroProcs,
    #[error("time_slice must be non-zero")]
    ZeroTimeSlice,
    #[error("stack size {size} is below the minimum of {min} bytes")]
    StackTooSmall { size: usize, min: usize },
    #[error("stack size {size} exceeds the maximum of {max} bytes")]
    StackTooLarge { size: usize, max: usize },
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid runtime configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("not running inside a runtime task")]
    NoRuntime,
    #[error("block_on called from inside a runtime task")]
    Nested,
    #[error("failed to allocate task stack")]
    Stack(#[source] io::Error),
    #[error("failed to spawn worker thread {worker}")]
    SpawnWorker {
        worker: usize,
        #[source]
        source: io::Error,
    },
    #[error("main task panicked")]
    MainTaskPanicked,
}

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("execution trace already started")]
    AlreadyStarted,
    #[error("execution trace not started")]
    NotStarted,
    #[error("failed to create trace file {}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write trace")]
    Io(#[from] io::Error),
    #[error("failed to encode trace event")]
    Encode(#[from] serde_json::Error),
}
