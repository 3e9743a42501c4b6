//! Streaming encoder for the trace's JSON array.

use super::event::{Event, HOST_TID, Record};
use crate::error::TraceError;
use std::io::{BufWriter, Write};
use std::time::{Duration, Instant};

/// Totals reported when a trace is finalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceSummary {
    pub records: u64,
    pub elapsed: Duration,
}

pub(crate) struct TraceWriter<W: Write> {
    out: BufWriter<W>,
    epoch: Instant,
    pid: u32,
    records: u64,
    /// First failure; once set nothing more is written.
    error: Option<TraceError>,
}

impl<W: Write> TraceWriter<W> {
    /// Open the array and name the host thread. The opening bracket is flushed
    /// immediately so a started trace is never an empty file.
    pub fn new(out: W) -> Result<Self, TraceError> {
        let mut out = BufWriter::new(out);
        out.write_all(b"[")?;

        let mut writer = TraceWriter {
            out,
            epoch: Instant::now(),
            pid: std::process::id(),
            records: 0,
            error: None,
        };
        let host = Record {
            pid: writer.pid,
            ..Record::thread_name(HOST_TID, "host")
        };
        writer.write_record(&host)?;
        writer.out.flush()?;
        Ok(writer)
    }

    pub fn record(&mut self, event: &Event) {
        if self.error.is_some() {
            return;
        }
        let ts = self.epoch.elapsed().as_secs_f64() * 1_000_000.0;
        for record in event.records(ts, self.pid) {
            if let Err(err) = self.write_record(&record) {
                self.error = Some(err);
                return;
            }
        }
    }

    fn write_record(&mut self, record: &Record) -> Result<(), TraceError> {
        let separator: &[u8] = if self.records == 0 { b"\n" } else { b",\n" };
        self.out.write_all(separator)?;
        serde_json::to_writer(&mut self.out, record)?;
        self.records += 1;
        Ok(())
    }

    /// Close the array and flush. Reports the first error seen while recording.
    pub fn finish(mut self) -> Result<(W, TraceSummary), TraceError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.out.write_all(b"\n]\n")?;
        let mut out = self
            .out
            .into_inner()
            .map_err(|err| TraceError::Io(err.into_error()))?;
        out.flush()?;

        let summary = TraceSummary {
            records: self.records,
            elapsed: self.epoch.elapsed(),
        };
        Ok((out, summary))
    }
}
