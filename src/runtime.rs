//! Green-thread runtime with a global run queue and time-slice preemption.
//!
//! Tasks are stackful green threads multiplexed onto `max_procs` OS threads. The
//! thread calling [`Runtime::block_on`] becomes worker 0; the remaining workers are
//! detached threads. Scheduling is cooperative: a task only leaves its worker when it
//! calls [`gosched`], [`sleep`], finishes, or reaches a [`preempt_point`] after having
//! run for at least the configured time slice. A tight loop with no safe point keeps
//! its worker forever.
//!
//! The runtime ends when the main task returns. Tasks still queued, sleeping or
//! running at that moment are abandoned: never resumed, their stacks released
//! without unwinding.
//!
//! # Example
//!
//! ```no_run
//! use coopsched::runtime::{Runtime, RuntimeConfig, go, sleep};
//! use std::time::Duration;
//!
//! let runtime = Runtime::new(RuntimeConfig::default().with_max_procs(1))?;
//! runtime.block_on(|| {
//!     go(|| println!("Task 1")).ok();
//!     go(|| println!("Task 2")).ok();
//!     sleep(Duration::from_millis(10));
//! })?;
//! # Ok::<(), coopsched::error::RuntimeError>(())
//! ```

mod config;
pub mod io;
mod timer;

pub use crate::common::{TaskId, TaskState};
pub use config::{
    DEFAULT_STACK_SIZE, DEFAULT_TIME_SLICE, MAX_STACK_SIZE, MIN_STACK_SIZE, RuntimeConfig,
};

use crate::arch::{Context, context_switch};
use crate::common::{Entry, Task};
use crate::error::RuntimeError;
use crate::exectrace::{self, Event, StopReason};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::cell::{Cell, RefCell, UnsafeCell};
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use timer::TimerHeap;
use tracing::{debug, error, info};

/// Longest an idle worker waits before rechecking the queue and the shutdown flag.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Stand-in deadline for sleeps too long to add to an `Instant` (about a century).
const PARK_FOREVER: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// State shared by all workers of one runtime
struct Shared {
    config: RuntimeConfig,
    sched: Mutex<Sched>,
    /// Signalled when a task becomes runnable or the runtime shuts down
    wakeup: Condvar,
    shutdown: AtomicBool,
}

#[derive(Default)]
struct Sched {
    runnable: VecDeque<Task>,
    sleeping: HashMap<TaskId, Task>,
    timers: TimerHeap,
}

impl Shared {
    fn spawn(
        &self,
        entry: Entry,
        main: bool,
        parent: Option<TaskId>,
        worker: Option<usize>,
    ) -> Result<TaskId, RuntimeError> {
        let task = Task::new(entry, task_main, self.config.stack_size, main)
            .map_err(RuntimeError::Stack)?;
        let task_id = task.id;

        exectrace::emit(Event::TaskCreate {
            task: task_id,
            parent,
            worker,
        });

        self.sched.lock().runnable.push_back(task);
        self.wakeup.notify_one();
        Ok(task_id)
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        // Workers check the flag under the lock before waiting.
        let _sched = self.sched.lock();
        self.wakeup.notify_all();
    }
}

/// Per-thread scheduler state
struct Worker {
    id: usize,
    shared: Arc<Shared>,
    /// Context to return to when a task switches out
    context: UnsafeCell<Context>,
    /// Task currently switched in
    current: RefCell<Option<Task>>,
    /// When the current task was dispatched
    slice_start: Cell<Instant>,
}

thread_local! {
    static CURRENT_WORKER: Cell<*const Worker> = const { Cell::new(ptr::null()) };
}

/// Worker driving this thread, or null.
///
/// Tasks migrate between threads across a switch, so the thread-local lookup must not
/// be hoisted out of a caller's loop.
#[inline(never)]
fn current_worker() -> *const Worker {
    CURRENT_WORKER.get()
}

impl Worker {
    fn new(id: usize, shared: Arc<Shared>) -> Self {
        Worker {
            id,
            shared,
            context: UnsafeCell::new(Context::default()),
            current: RefCell::new(None),
            slice_start: Cell::new(Instant::now()),
        }
    }

    fn run(&self) {
        exectrace::emit(Event::ProcStart { worker: self.id });
        debug!(worker = self.id, "worker started");

        while let Some(task) = self.next_task() {
            self.execute(task);
        }

        exectrace::emit(Event::ProcStop { worker: self.id });
        debug!(worker = self.id, "worker stopped");
    }

    /// Block until a task is runnable. Returns `None` once the runtime shuts down.
    fn next_task(&self) -> Option<Task> {
        let mut sched = self.shared.sched.lock();

        loop {
            if self.shared.is_shutdown() {
                return None;
            }

            let now = Instant::now();
            for task_id in sched.timers.pop_expired(now) {
                if let Some(mut task) = sched.sleeping.remove(&task_id) {
                    task.state = TaskState::Runnable;
                    exectrace::emit(Event::TaskUnblock {
                        task: task_id,
                        worker: self.id,
                    });
                    sched.runnable.push_back(task);
                }
            }

            if let Some(mut task) = sched.runnable.pop_front() {
                task.state = TaskState::Running;
                return Some(task);
            }

            let timeout = sched.timers.next_deadline().map_or(IDLE_WAIT, |deadline| {
                deadline.saturating_duration_since(now).min(IDLE_WAIT)
            });
            self.shared.wakeup.wait_for(&mut sched, timeout);
        }
    }

    /// Switch into `task` and file it away once it switches back.
    fn execute(&self, task: Task) {
        let task_id = task.id;
        exectrace::emit(Event::TaskStart {
            task: task_id,
            worker: self.id,
        });

        *self.current.borrow_mut() = Some(task);
        self.slice_start.set(Instant::now());

        let worker_ctx: *mut Context = self.context.get();
        let task_ctx: *const Context = match self.current.borrow().as_ref() {
            Some(task) => &raw const task.context,
            None => return,
        };

        // Raw pointers: the switch needs both contexts at once, and the task's context
        // stays put inside `current` until we take it back out below.
        unsafe { context_switch(worker_ctx, task_ctx) };

        let Some(mut task) = self.current.borrow_mut().take() else {
            return;
        };

        let reason = match task.state {
            TaskState::Preempted => StopReason::Preempt,
            TaskState::Sleeping(_) => StopReason::Sleep,
            TaskState::Dead => StopReason::Exit,
            TaskState::Yielded | TaskState::Runnable | TaskState::Running => StopReason::Yield,
        };
        exectrace::emit(Event::TaskStop {
            task: task_id,
            worker: self.id,
            reason,
        });

        match task.state {
            TaskState::Dead => {
                debug!(task = %task_id, main = task.main, "task finished");
                if task.main {
                    self.shared.begin_shutdown();
                }
            }
            TaskState::Sleeping(deadline) => {
                let mut sched = self.shared.sched.lock();
                sched.timers.push(deadline, task_id);
                sched.sleeping.insert(task_id, task);
            }
            _ => {
                task.state = TaskState::Runnable;
                self.shared.sched.lock().runnable.push_back(task);
                self.shared.wakeup.notify_one();
            }
        }
    }
}

fn worker_loop(worker_id: usize, shared: Arc<Shared>) {
    let worker = Worker::new(worker_id, shared);

    CURRENT_WORKER.set(&raw const worker);
    worker.run();
    CURRENT_WORKER.set(ptr::null());
}

/// First frame of every task: run the body, then hand the worker back for good.
extern "C" fn task_main() -> ! {
    // SAFETY: only reachable through a worker switching into the task, so the
    // pointer is either valid or null.
    let started = unsafe { current_worker().as_ref() }.and_then(|worker| {
        let mut current = worker.current.borrow_mut();
        let task = current.as_mut()?;
        Some((task.id, task.main, task.entry.take()))
    });

    if let Some((task_id, main, Some(entry))) = started
        && let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry))
    {
        error!(
            task = %task_id,
            main,
            panic = panic_message(payload.as_ref()),
            "task panicked"
        );
    }

    switch_out(TaskState::Dead);

    // Dead tasks are dropped by their worker, never resumed.
    std::process::abort()
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

/// Hand the worker back, leaving the running task in `state`.
///
/// Returns `false` without switching when not called from a task. Otherwise returns
/// `true` once the task is dispatched again, possibly on another worker thread.
fn switch_out(state: TaskState) -> bool {
    let worker = current_worker();

    let (task_ctx, worker_ctx) = {
        // SAFETY: a non-null pointer refers to the worker running on this thread.
        let Some(worker) = (unsafe { worker.as_ref() }) else {
            return false;
        };
        let mut current = worker.current.borrow_mut();
        let Some(task) = current.as_mut() else {
            return false;
        };
        task.state = state;
        (&raw mut task.context, worker.context.get())
    };

    // Nothing borrowed from the worker survives the switch: by the time this returns
    // the task may be running on a different thread.
    unsafe { context_switch(task_ctx, worker_ctx) };
    true
}

/// A scheduler instance.
pub struct Runtime {
    shared: Arc<Shared>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        config.validate()?;

        Ok(Runtime {
            shared: Arc::new(Shared {
                config,
                sched: Mutex::new(Sched::default()),
                wakeup: Condvar::new(),
                shutdown: AtomicBool::new(false),
            }),
        })
    }

    /// Queue a task before the runtime starts. It runs ahead of the main task.
    pub fn spawn<F>(&self, f: F) -> Result<TaskId, RuntimeError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.spawn(Box::new(f), false, None, None)
    }

    /// Run `f` as the main task and return its result once it finishes.
    ///
    /// The calling thread becomes worker 0. Other tasks do not keep the runtime alive:
    /// whatever is unfinished when `f` returns is abandoned.
    pub fn block_on<F, R>(self, f: F) -> Result<R, RuntimeError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if !current_worker().is_null() {
            return Err(RuntimeError::Nested);
        }

        let result = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&result);
        let main_id = self.shared.spawn(
            Box::new(move || {
                let value = f();
                *slot.lock() = Some(value);
            }),
            true,
            None,
            None,
        )?;

        let config = &self.shared.config;
        info!(
            max_procs = config.max_procs,
            time_slice_us = config.time_slice.as_micros() as u64,
            main = %main_id,
            "runtime started"
        );
        let started = Instant::now();

        // Extra workers are detached; they leave their loop at the next scheduling
        // decision after shutdown, or die with the process.
        for worker_id in 1..config.max_procs {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("coopsched-worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, shared));

            if let Err(source) = spawned {
                self.shared.begin_shutdown();
                return Err(RuntimeError::SpawnWorker {
                    worker: worker_id,
                    source,
                });
            }
        }

        worker_loop(0, Arc::clone(&self.shared));

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "main task finished"
        );

        let value = result.lock().take();
        value.ok_or(RuntimeError::MainTaskPanicked)
    }
}

/// Spawn a task from inside a running task.
pub fn go<F>(f: F) -> Result<TaskId, RuntimeError>
where
    F: FnOnce() + Send + 'static,
{
    // SAFETY: a non-null pointer refers to the worker running on this thread.
    let worker = unsafe { current_worker().as_ref() }.ok_or(RuntimeError::NoRuntime)?;
    let parent = worker.current.borrow().as_ref().map(|task| task.id);
    worker
        .shared
        .spawn(Box::new(f), false, parent, Some(worker.id))
}

/// Yield execution to another task
pub fn gosched() {
    switch_out(TaskState::Yielded);
}

/// Park the current task for at least `duration`.
///
/// Outside a task this blocks the calling thread instead.
pub fn sleep(duration: Duration) {
    if current_task_id().is_none() {
        thread::sleep(duration);
        return;
    }
    switch_out(TaskState::Sleeping(sleep_deadline(Instant::now(), duration)));
}

/// Deadline `duration` after `now`, clamped to [`PARK_FOREVER`] when the sum is not
/// representable.
fn sleep_deadline(now: Instant, duration: Duration) -> Instant {
    now.checked_add(duration)
        .or_else(|| now.checked_add(PARK_FOREVER))
        .unwrap_or(now)
}

/// Safe point: yield if the current task has used up its time slice.
///
/// Returns whether the task was switched out.
pub fn preempt_point() -> bool {
    // SAFETY: a non-null pointer refers to the worker running on this thread.
    let Some(worker) = (unsafe { current_worker().as_ref() }) else {
        return false;
    };
    if worker.current.borrow().is_none()
        || worker.slice_start.get().elapsed() < worker.shared.config.time_slice
    {
        return false;
    }
    switch_out(TaskState::Preempted)
}

/// Id of the running task, if called from one
pub fn current_task_id() -> Option<TaskId> {
    // SAFETY: a non-null pointer refers to the worker running on this thread.
    let worker = unsafe { current_worker().as_ref() }?;
    worker.current.borrow().as_ref().map(|task| task.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use std::sync::atomic::AtomicU64;

    fn single_proc() -> Runtime {
        Runtime::new(RuntimeConfig::default().with_max_procs(1)).unwrap()
    }

    #[test]
    fn block_on_returns_main_result() {
        assert_eq!(single_proc().block_on(|| 6 * 7).unwrap(), 42);
    }

    #[test]
    fn rejects_invalid_config() {
        let result = Runtime::new(RuntimeConfig::default().with_max_procs(0));
        assert!(matches!(
            result,
            Err(RuntimeError::Config(ConfigError::ZeroProcs))
        ));
    }

    #[test]
    fn gosched_round_robins_on_one_proc() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_main = Arc::clone(&log);

        single_proc()
            .block_on(move || {
                for name in ["a", "b"] {
                    let log = Arc::clone(&log_main);
                    go(move || {
                        for i in 0..3 {
                            log.lock().push(format!("{name}{i}"));
                            gosched();
                        }
                    })
                    .unwrap();
                }
                sleep(Duration::from_millis(20));
            })
            .unwrap();

        assert_eq!(*log.lock(), ["a0", "b0", "a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn time_slice_preempts_busy_tasks() {
        let config = RuntimeConfig::default()
            .with_max_procs(1)
            .with_time_slice(Duration::from_millis(1));
        let counters = Arc::new([AtomicU64::new(0), AtomicU64::new(0)]);
        let counters_main = Arc::clone(&counters);
        let started = Instant::now();

        Runtime::new(config)
            .unwrap()
            .block_on(move || {
                for slot in 0..2 {
                    let counters = Arc::clone(&counters_main);
                    go(move || {
                        loop {
                            counters[slot].fetch_add(1, Ordering::Relaxed);
                            preempt_point();
                        }
                    })
                    .unwrap();
                }
                sleep(Duration::from_millis(30));
            })
            .unwrap();

        assert!(counters[0].load(Ordering::Relaxed) > 0);
        assert!(counters[1].load(Ordering::Relaxed) > 0);
        // The endless tasks were abandoned, not awaited.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn safe_point_before_slice_expires_keeps_running() {
        let config = RuntimeConfig::default()
            .with_max_procs(1)
            .with_time_slice(Duration::from_secs(60));
        let yielded = single_task_result(config, preempt_point);
        assert!(!yielded);
    }

    fn single_task_result<R: Send + 'static>(
        config: RuntimeConfig,
        f: impl FnOnce() -> R + Send + 'static,
    ) -> R {
        Runtime::new(config).unwrap().block_on(f).unwrap()
    }

    #[test]
    fn main_task_panic_is_reported() {
        let result = single_proc().block_on(|| -> u32 { panic!("boom") });
        assert!(matches!(result, Err(RuntimeError::MainTaskPanicked)));
    }

    #[test]
    fn panicking_task_does_not_take_down_the_runtime() {
        let value = single_proc()
            .block_on(|| {
                go(|| panic!("child failed")).unwrap();
                sleep(Duration::from_millis(5));
                7
            })
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn go_outside_a_task_fails() {
        assert!(matches!(go(|| {}), Err(RuntimeError::NoRuntime)));
    }

    #[test]
    fn nested_block_on_is_rejected() {
        let nested = single_proc()
            .block_on(|| matches!(single_proc().block_on(|| ()), Err(RuntimeError::Nested)))
            .unwrap();
        assert!(nested);
    }

    #[test]
    fn sleep_outside_a_task_blocks_the_thread() {
        let started = Instant::now();
        sleep(Duration::from_millis(5));
        assert!(started.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn unbounded_sleep_parks_instead_of_overflowing() {
        let now = Instant::now();
        assert_eq!(sleep_deadline(now, Duration::from_millis(5)), now + Duration::from_millis(5));
        assert!(sleep_deadline(now, Duration::MAX) > now + Duration::from_secs(3600));

        let woke = Arc::new(AtomicBool::new(false));
        let woke_task = Arc::clone(&woke);
        single_proc()
            .block_on(move || {
                go(move || {
                    sleep(Duration::MAX);
                    woke_task.store(true, Ordering::SeqCst);
                })
                .unwrap();
                sleep(Duration::from_millis(5));
            })
            .unwrap();
        assert!(!woke.load(Ordering::SeqCst));
    }

    #[test]
    fn sleeping_main_task_wakes_after_deadline() {
        let started = Instant::now();
        single_proc()
            .block_on(|| sleep(Duration::from_millis(50)))
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn current_task_id_is_known_inside_tasks() {
        assert_eq!(current_task_id(), None);

        let (main_id, child_id) = single_proc()
            .block_on(|| {
                let seen = Arc::new(Mutex::new(None));
                let seen_child = Arc::clone(&seen);
                let spawned = go(move || *seen_child.lock() = current_task_id()).unwrap();
                sleep(Duration::from_millis(5));
                let observed = seen.lock().take();
                (current_task_id(), (spawned, observed))
            })
            .unwrap();

        assert!(main_id.is_some());
        assert_eq!(Some(child_id.0), child_id.1);
        assert_ne!(main_id, child_id.1);
    }

    #[test]
    fn tasks_queued_before_start_run_first() {
        let runtime = single_proc();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_task = Arc::clone(&ran);
        runtime
            .spawn(move || ran_task.store(true, Ordering::SeqCst))
            .unwrap();

        let seen = runtime.block_on(move || ran.load(Ordering::SeqCst)).unwrap();
        assert!(seen);
    }

    #[test]
    fn multiple_procs_run_every_task() {
        let runtime = Runtime::new(RuntimeConfig::default().with_max_procs(3)).unwrap();
        let done = Arc::new(AtomicU64::new(0));
        let done_main = Arc::clone(&done);

        let finished = runtime
            .block_on(move || {
                for _ in 0..8 {
                    let done = Arc::clone(&done_main);
                    go(move || {
                        gosched();
                        done.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
                }
                let deadline = Instant::now() + Duration::from_secs(5);
                while done_main.load(Ordering::SeqCst) < 8 && Instant::now() < deadline {
                    sleep(Duration::from_millis(1));
                }
                done_main.load(Ordering::SeqCst)
            })
            .unwrap();

        assert_eq!(finished, 8);
        assert_eq!(done.load(Ordering::SeqCst), 8);
    }
}
