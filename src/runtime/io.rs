//! Output helpers that double as safe points.
//!
//! Each call writes one complete line and then gives the scheduler a chance to
//! switch the task out if its time slice is used up.

use super::preempt_point;
use std::fmt;
use std::io::{self, Write};

/// Write `args` plus a newline to `out`, then hit a safe point.
///
/// The safe point is reached whether or not the write succeeded.
pub fn write_line<W: Write + ?Sized>(out: &mut W, args: fmt::Arguments<'_>) -> io::Result<()> {
    // A single formatted write, so concurrent writers to a shared handle such as
    // stdout cannot split the line.
    let result = writeln!(out, "{args}");
    preempt_point();
    result
}
