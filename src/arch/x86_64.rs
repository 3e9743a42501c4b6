//! x86_64 (System V) context switching

use std::arch::naked_asm;

use super::TaskEntry;

/// Callee-saved registers of a suspended green thread.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct Context {
    rsp: u64,
    rbp: u64,
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
}

impl Context {
    /// Build a context that starts executing `entry` on the stack ending at `stack_top`.
    ///
    /// `stack_top` must be 16-byte aligned and the 16 bytes below it writable.
    pub fn new(stack_top: usize, entry: TaskEntry) -> Self {
        // `context_switch` finishes with `ret`, which pops `entry` off the new stack.
        // That leaves RSP at stack_top - 8, i.e. 16n+8, exactly what a function sees
        // right after a `call`. The slot above it is a null return address so that
        // unwinders and debuggers stop walking at `entry`.
        let initial_rsp = stack_top - 16;

        unsafe {
            std::ptr::write((stack_top - 8) as *mut u64, 0);
            std::ptr::write(initial_rsp as *mut u64, entry as usize as u64);
        }

        Context {
            rsp: initial_rsp as u64,
            ..Default::default()
        }
    }
}

/// Save the current registers into `old` and resume `new`.
///
/// Returns only once some other context switches back into `old`.
///
/// # Safety
/// `old` must be valid for writes and `new` must hold either a context built with
/// [`Context::new`] or one saved by an earlier switch whose stack is still alive.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut Context, _new: *const Context) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        // Resumes after the matching `call context_switch`, or jumps to a task entry.
        "ret",
    );
}
