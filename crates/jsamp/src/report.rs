use std::collections::HashSet;
use std::io::{self, Write};

use crate::backtrace::Symbolizer;
use crate::sample::{Snapshot, Tid};

pub const SAMPLER_THREAD_NAME: &str = "JSamp";
pub const LISTENER_THREAD_NAME: &str = "JSamp Server";

/// Threads that never do interesting work and are left out of every report.
pub const IDLE_THREAD_NAMES: &[&str] = &[SAMPLER_THREAD_NAME, LISTENER_THREAD_NAME];

/// Decides which threads to leave out, based on one scan of the threads that
/// are alive right now.
///
/// A thread that has no stack at report time is treated as idle for the
/// whole report, even if it had frames in earlier snapshots.
pub fn excluded_threads(sampler: Tid, live: &Snapshot) -> HashSet<Tid> {
    let mut excluded = HashSet::new();
    excluded.insert(sampler);

    for (thread, stack) in live.iter() {
        if IDLE_THREAD_NAMES.contains(&thread.name.as_str()) || stack.is_empty() {
            excluded.insert(thread.tid);
        }
    }
    excluded
}

/// Writes every stack of every snapshot, skipping `excluded` threads.
///
/// One frame per line, and a blank line after each stack. A snapshot whose
/// threads are all excluded produces no output at all.
pub fn write_samples<W: Write>(
    out: &mut W,
    samples: &[Snapshot],
    excluded: &HashSet<Tid>,
    symbolizer: &mut Symbolizer,
) -> io::Result<()> {
    for snapshot in samples {
        for (thread, stack) in snapshot.iter() {
            if excluded.contains(&thread.tid) {
                continue;
            }

            // Idleness was judged from a later scan, so an earlier capture of
            // a busy thread can still be empty (it missed the sweep deadline).
            if stack.is_empty() {
                log::trace!("Skipping empty stack of thread {}", thread.tid);
                continue;
            }
            for frame in stack {
                writeln!(out, "{}", symbolizer.render(frame))?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}
