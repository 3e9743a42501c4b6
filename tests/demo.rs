use coopsched::demo::{self, DemoConfig};
use coopsched::runtime::RuntimeConfig;
use serde_json::Value;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counts the lines written through it.
struct LineCounter(Arc<AtomicU64>);

impl Write for LineCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let lines = buf.iter().filter(|&&b| b == b'\n').count() as u64;
        self.0.fetch_add(lines, Ordering::Relaxed);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn both_workloads_progress_on_one_proc() {
    let dir = tempfile::tempdir().unwrap();
    let trace_path = dir.path().join("trace.out");
    let config = DemoConfig {
        trace_path: trace_path.clone(),
        runtime: RuntimeConfig::default().with_max_procs(1),
        run_for: Duration::from_millis(200),
        ..DemoConfig::default()
    };

    let counters: Arc<[Arc<AtomicU64>; 2]> = Arc::new(Default::default());
    let next = Arc::new(AtomicUsize::new(0));
    let outputs = Arc::clone(&counters);

    let started = Instant::now();
    demo::run(&config, move || {
        let slot = next.fetch_add(1, Ordering::SeqCst);
        LineCounter(Arc::clone(&outputs[slot]))
    })
    .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(10), "{elapsed:?}");
    assert!(counters[0].load(Ordering::Relaxed) > 0);
    assert!(counters[1].load(Ordering::Relaxed) > 0);

    let records: Vec<Value> = serde_json::from_slice(&fs::read(&trace_path).unwrap()).unwrap();
    assert!(
        records
            .iter()
            .any(|r| r["ph"] == "E" && r["args"]["reason"] == "preempt")
    );
}

#[test]
fn run_continues_untraced_when_trace_file_cannot_be_created() {
    let dir = tempfile::tempdir().unwrap();
    let trace_path = dir.path().join("missing").join("trace.out");
    let config = DemoConfig {
        trace_path: trace_path.clone(),
        runtime: RuntimeConfig::default().with_max_procs(1),
        run_for: Duration::from_millis(100),
        ..DemoConfig::default()
    };

    let counters: Arc<[Arc<AtomicU64>; 2]> = Arc::new(Default::default());
    let next = Arc::new(AtomicUsize::new(0));
    let outputs = Arc::clone(&counters);

    demo::run(&config, move || {
        let slot = next.fetch_add(1, Ordering::SeqCst);
        LineCounter(Arc::clone(&outputs[slot]))
    })
    .unwrap();

    assert!(counters[0].load(Ordering::Relaxed) > 0);
    assert!(counters[1].load(Ordering::Relaxed) > 0);
    assert!(!trace_path.exists());
}

#[test]
fn binary_exits_after_fixed_sleep_with_trace() {
    let dir = tempfile::tempdir().unwrap();
    let started = Instant::now();
    let mut child = Command::new(env!("CARGO_BIN_EXE_coopsched"))
        .current_dir(dir.path())
        .env("RUST_LOG", "warn")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdout = BufReader::new(child.stdout.take().unwrap());
    let mut line = Vec::new();
    let (mut first, mut second) = (0u64, 0u64);
    while stdout.read_until(b'\n', &mut line).unwrap() > 0 {
        if line.starts_with(b"Calculating fibonacci for 1000000000,") {
            first += 1;
        } else if line.starts_with(b"Calculating fibonacci for 2000000000,") {
            second += 1;
        }
        line.clear();
    }

    let status = child.wait().unwrap();
    let elapsed = started.elapsed();

    assert!(status.success());
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(30), "{elapsed:?}");
    assert!(first > 0 && second > 0, "first={first} second={second}");

    let trace = fs::read(dir.path().join("trace.out")).unwrap();
    assert!(!trace.is_empty());
    let records: Vec<Value> = serde_json::from_slice(&trace).unwrap();
    assert!(records.iter().any(|r| r["ph"] == "B"));
}
