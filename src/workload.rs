//! CPU-bound workload whose only suspension points are its output lines.

use crate::runtime::io::write_line;
use std::io::Write;
use tracing::{debug, warn};

/// Compute the `n`th Fibonacci number, reporting every iteration to `out`.
///
/// Each iteration writes `Calculating fibonacci for {n}, currently at {i}`; those
/// writes are the loop's only safe points. Arithmetic wraps on overflow. A failed
/// write never stops the loop: the first failure is logged, later ones are ignored.
pub fn fibonacci<W: Write + ?Sized>(n: i64, out: &mut W) -> i64 {
    if n <= 1 {
        return n;
    }

    debug!(n, "fibonacci started");
    let (mut previous, mut current) = (0i64, 1i64);
    let mut write_failed = false;

    for i in 2..=n {
        let written = write_line(
            out,
            format_args!("Calculating fibonacci for {n}, currently at {i}"),
        );
        if let Err(err) = written
            && !write_failed
        {
            warn!(n, iteration = i, error = %err, "progress output failed, continuing silently");
            write_failed = true;
        }
        (previous, current) = (current, previous.wrapping_add(current));
    }

    debug!(n, result = current, "fibonacci finished");
    current
}
