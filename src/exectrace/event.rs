//! Scheduling events and their Chrome Trace Event Format encoding.

use crate::common::TaskId;
use serde::Serialize;
use serde_json::{Value, json};

/// Trace thread id used for events raised outside any worker.
pub(crate) const HOST_TID: u64 = 0;

/// Trace thread id of a worker. Worker 0 maps to 1 so the host keeps tid 0.
pub(crate) fn worker_tid(worker: usize) -> u64 {
    worker as u64 + 1
}

/// Why a task gave up its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum StopReason {
    Yield,
    Preempt,
    Sleep,
    Exit,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    /// A worker thread started scheduling.
    ProcStart { worker: usize },
    /// A worker thread left its scheduling loop.
    ProcStop { worker: usize },
    TaskCreate {
        task: TaskId,
        parent: Option<TaskId>,
        worker: Option<usize>,
    },
    /// A worker switched into the task.
    TaskStart { task: TaskId, worker: usize },
    /// The task switched back to its worker.
    TaskStop {
        task: TaskId,
        worker: usize,
        reason: StopReason,
    },
    /// A sleeping task's deadline passed and it was queued again.
    TaskUnblock { task: TaskId, worker: usize },
}

/// One record of the JSON array.
#[derive(Debug, Serialize)]
pub(crate) struct Record {
    pub name: String,
    pub cat: &'static str,
    pub ph: &'static str,
    pub ts: f64,
    pub pid: u32,
    pub tid: u64,
    /// Scope of instant events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<&'static str>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub args: Value,
}

impl Record {
    fn new(name: impl Into<String>, cat: &'static str, ph: &'static str, tid: u64) -> Self {
        Record {
            name: name.into(),
            cat,
            ph,
            ts: 0.0,
            pid: 0,
            tid,
            s: None,
            args: Value::Null,
        }
    }

    fn instant(name: impl Into<String>, cat: &'static str, tid: u64) -> Self {
        Record {
            s: Some("t"),
            ..Record::new(name, cat, "i", tid)
        }
    }

    fn args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    /// Names a trace thread in the viewer.
    pub fn thread_name(tid: u64, name: &str) -> Self {
        Record::new("thread_name", "__metadata", "M", tid).args(json!({ "name": name }))
    }
}

impl Event {
    /// Encode as one or more records stamped with `ts` (microseconds) and `pid`.
    pub(crate) fn records(&self, ts: f64, pid: u32) -> Vec<Record> {
        let records = match *self {
            Event::ProcStart { worker } => {
                let tid = worker_tid(worker);
                let current = std::thread::current();
                let os_thread = current
                    .name()
                    .map_or_else(|| format!("{:?}", current.id()), str::to_owned);
                vec![
                    Record::thread_name(tid, &format!("worker {worker}")),
                    Record::instant("proc start", "proc", tid).args(json!({ "thread": os_thread })),
                ]
            }
            Event::ProcStop { worker } => {
                vec![Record::instant("proc stop", "proc", worker_tid(worker))]
            }
            Event::TaskCreate {
                task,
                parent,
                worker,
            } => {
                let tid = worker.map_or(HOST_TID, worker_tid);
                vec![Record::instant("task create", "task", tid).args(json!({
                    "task": task.as_u64(),
                    "parent": parent.map(TaskId::as_u64),
                }))]
            }
            Event::TaskStart { task, worker } => {
                vec![Record::new(task.to_string(), "task", "B", worker_tid(worker))]
            }
            Event::TaskStop {
                task,
                worker,
                reason,
            } => vec![
                Record::new(task.to_string(), "task", "E", worker_tid(worker))
                    .args(json!({ "reason": reason })),
            ],
            Event::TaskUnblock { task, worker } => {
                vec![
                    Record::instant("task unblock", "task", worker_tid(worker))
                        .args(json!({ "task": task.as_u64() })),
                ]
            }
        };

        records
            .into_iter()
            .map(|record| Record { ts, pid, ..record })
            .collect()
    }
}
