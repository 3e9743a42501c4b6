//! Building blocks shared by the scheduler: stacks, task ids and task records.

use crate::arch::{Context, TaskEntry};
use std::fmt;
use std::io;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Memory for one green thread's stack.
///
/// The lowest page is mapped `PROT_NONE`, so running off the end faults instead of
/// silently overwriting a neighbouring allocation.
pub struct Stack {
    base: NonNull<u8>,
    /// Mapping length, guard page included
    len: usize,
}

// The mapping is exclusively owned; only the task running on it touches its contents.
unsafe impl Send for Stack {}

impl Stack {
    /// Map a stack with at least `size` usable bytes plus one guard page.
    pub fn new(size: usize) -> io::Result<Self> {
        let page = page_size();
        let len = size
            .div_ceil(page)
            .checked_add(1)
            .and_then(|pages| pages.checked_mul(page))
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("stack size {size} too large"))
            })?;

        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        if unsafe { libc::mprotect(addr, page, libc::PROT_NONE) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::munmap(addr, len) };
            return Err(err);
        }

        let base = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;

        Ok(Stack { base, len })
    }

    /// Highest usable address, aligned down to 16 bytes.
    pub fn top(&self) -> usize {
        (self.base.as_ptr() as usize + self.len) & !0xF
    }
}

#[cfg(test)]
impl Stack {
    fn usable_size(&self) -> usize {
        self.len - page_size()
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.len);
        }
    }
}

fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

/// Process-unique task identifier. The first task created gets id 1.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {}", self.0)
    }
}

/// Scheduling state of a task.
///
/// A running task sets one of the stopped states right before switching back to its
/// worker; the worker reads it to decide where the task goes next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Queued, waiting for a worker
    Runnable,
    /// Executing on a worker
    Running,
    /// Gave up the worker voluntarily (`gosched`)
    Yielded,
    /// Hit a safe point after exhausting its time slice
    Preempted,
    /// Parked until the deadline passes
    Sleeping(Instant),
    /// Returned or panicked
    Dead,
}

/// Deferred task body, taken by the task itself on first dispatch.
pub(crate) type Entry = Box<dyn FnOnce() + Send + 'static>;

/// A green thread: its saved registers, its stack and its bookkeeping.
pub(crate) struct Task {
    pub id: TaskId,
    pub context: Context,
    pub state: TaskState,
    /// Ending this task ends the runtime.
    pub main: bool,
    pub entry: Option<Entry>,
    _stack: Stack,
}

impl Task {
    pub fn new(entry: Entry, start: TaskEntry, stack_size: usize, main: bool) -> io::Result<Self> {
        let stack = Stack::new(stack_size)?;
        let context = Context::new(stack.top(), start);

        Ok(Task {
            id: TaskId::next(),
            context,
            state: TaskState::Runnable,
            main,
            entry: Some(entry),
            _stack: stack,
        })
    }
}
