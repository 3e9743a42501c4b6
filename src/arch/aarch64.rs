//! aarch64 (AAPCS64) context switching

use std::arch::naked_asm;

use super::TaskEntry;

/// Callee-saved registers of a suspended green thread.
///
/// x19-x28, the frame pointer, the link register and the low halves of v8-v15.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct Context {
    sp: u64,
    lr: u64,
    fp: u64,
    x: [u64; 10],
    d: [u64; 8],
}

impl Context {
    /// Build a context that starts executing `entry` on the stack ending at `stack_top`.
    ///
    /// `stack_top` must be 16-byte aligned.
    pub fn new(stack_top: usize, entry: TaskEntry) -> Self {
        // `ret` branches to lr, which lands in `start_task` with `entry` in x19.
        // Zero fp and lr terminate backtraces at `entry`.
        let mut x = [0; 10];
        x[0] = entry as usize as u64;
        Context {
            sp: stack_top as u64,
            lr: start_task as usize as u64,
            x,
            ..Default::default()
        }
    }
}

/// First code run by a fresh task: clear lr so `entry` has no caller, then jump.
#[unsafe(naked)]
unsafe extern "C" fn start_task() {
    naked_asm!("mov x30, xzr", "br x19");
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
        "mov x9, sp",
        "stp x9, lr,  [x0, #0x00]",
        "stp fp, x19, [x0, #0x10]",
        "stp x20, x21, [x0, #0x20]",
        "stp x22, x23, [x0, #0x30]",
        "stp x24, x25, [x0, #0x40]",
        "stp x26, x27, [x0, #0x50]",
        "str x28,      [x0, #0x60]",
        "stp d8, d9,   [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        "ldp x9, lr,  [x1, #0x00]",
        "mov sp, x9",
        "ldp fp, x19, [x1, #0x10]",
        "ldp x20, x21, [x1, #0x20]",
        "ldp x22, x23, [x1, #0x30]",
        "ldp x24, x25, [x1, #0x40]",
        "ldp x26, x27, [x1, #0x50]",
        "ldr x28,      [x1, #0x60]",
        "ldp d8, d9,   [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        "ret",
    );
}
