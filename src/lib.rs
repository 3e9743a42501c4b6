//! Cooperative preemption on a green-thread runtime, observed through an execution trace.
//!
//! - [`runtime`]: stackful tasks on `max_procs` worker threads, switched at safe points
//! - [`exectrace`]: process-wide scheduling timeline in Chrome Trace Event Format
//! - [`workload`]: the Fibonacci loop whose output lines are its only safe points
//! - [`demo`]: two workloads on one worker, traced, abandoned after a fixed sleep

mod arch;
mod common;
pub mod demo;
pub mod error;
pub mod exectrace;
pub mod runtime;
pub mod workload;
