//! Runtime construction parameters.

use crate::error::ConfigError;
use std::thread;
use std::time::Duration;

/// Default time a task may run before its next safe point yields (Go's forced
/// preemption threshold).
pub const DEFAULT_TIME_SLICE: Duration = Duration::from_millis(10);

/// Default usable stack size per task (256KB)
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Smallest stack accepted by [`RuntimeConfig::validate`]. Formatting and logging
/// inside a task need a few KB on their own.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Largest stack accepted by [`RuntimeConfig::validate`] (1GB)
pub const MAX_STACK_SIZE: usize = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of OS threads executing tasks, the calling thread included.
    pub max_procs: usize,
    /// Run time after which a task yields at its next safe point.
    pub time_slice: Duration,
    /// Usable stack bytes per task, rounded up to whole pages.
    pub stack_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_procs: thread::available_parallelism().map_or(1, usize::from),
            time_slice: DEFAULT_TIME_SLICE,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl RuntimeConfig {
    pub fn with_max_procs(mut self, max_procs: usize) -> Self {
        self.max_procs = max_procs;
        self
    }

    pub fn with_time_slice(mut self, time_slice: Duration) -> Self {
        self.time_slice = time_slice;
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_procs == 0 {
            return Err(ConfigError::ZeroProcs);
        }
        if self.time_slice.is_zero() {
            return Err(ConfigError::ZeroTimeSlice);
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::StackTooSmall {
                size: self.stack_size,
                min: MIN_STACK_SIZE,
            });
        }
        if self.stack_size > MAX_STACK_SIZE {
            return Err(ConfigError::StackTooLarge {
                size: self.stack_size,
                max: MAX_STACK_SIZE,
            });
        }
        Ok(())
    }
}
