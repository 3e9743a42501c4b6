//! Architecture-specific register contexts.
//!
//! Each backend exposes the same two items:
//! - `Context`: callee-saved register state of a suspended green thread
//! - `context_switch`: save the running state into one context and resume another

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use x86_64::*;

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use aarch64::*;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("coopsched supports x86_64 and aarch64 only");

/// Entry point of a fresh green thread. It must never return: there is no caller frame.
pub type TaskEntry = extern "C" fn() -> !;
