use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use crate::backtrace::Symbolizer;
use crate::configuration::Configuration;
use crate::error::{Error, Result};
use crate::profile::Profile;
use crate::report;
use crate::sample::Tid;
use crate::stack_source::StackSource;

/// Set once by whoever wants the sampler to stop; never cleared.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct InterruptState {
    requested: AtomicBool,
    sampler_thread: OnceLock<Thread>,
}

/// Breaks the sampler out of its sleep with [`Error::Interrupted`].
#[derive(Clone, Debug)]
pub struct Interrupter(Arc<InterruptState>);

impl Interrupter {
    pub fn interrupt(&self) {
        self.0.requested.store(true, Ordering::Release);
        if let Some(thread) = self.0.sampler_thread.get() {
            thread.unpark();
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub samples: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Average time between samples, as actually achieved.
    pub fn real_interval(&self) -> Option<Duration> {
        u32::try_from(self.samples)
            .ok()
            .filter(|n| *n > 0)
            .map(|n| self.elapsed / n)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Profiling was switched off from the environment.
    Disabled,
    Completed(RunSummary),
}

pub struct Sampler<S> {
    configuration: Configuration,
    source: S,
    profile: Profile,
    stop_requested: StopFlag,
    interrupt: Arc<InterruptState>,
}

impl<S: StackSource> Sampler<S> {
    pub fn new(configuration: Configuration, source: S) -> Self {
        Self {
            configuration,
            source,
            profile: Profile::new(),
            stop_requested: StopFlag::new(),
            interrupt: Arc::new(InterruptState::default()),
        }
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop_requested.clone()
    }

    pub fn interrupter(&self) -> Interrupter {
        Interrupter(Arc::clone(&self.interrupt))
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Captures one snapshot of all threads and appends it.
    pub fn sample(&mut self) -> std::io::Result<()> {
        let snapshot = self.source.all_stacks()?;
        log::trace!("Captured {} threads", snapshot.len());
        self.profile.push(snapshot);
        Ok(())
    }

    /// Samples until the stop flag is set, then writes the report.
    ///
    /// Blocks the calling thread, which is left out of the report.
    pub fn run(&mut self) -> Result<RunOutcome> {
        if self.configuration.disabled {
            log::info!("Profiling disabled from the environment");
            return Ok(RunOutcome::Disabled);
        }

        let _ = self.interrupt.sampler_thread.set(thread::current());
        println!("sampling every {} ms", self.configuration.interval.as_millis());

        self.profile.start_instant = Instant::now();
        while !self.stop_requested.is_stop_requested() {
            self.sample()?;
            self.pause()?;
        }
        self.profile.end_instant = Some(Instant::now());

        let summary = RunSummary {
            samples: self.profile.len(),
            elapsed: self.profile.elapsed(),
        };
        match summary.real_interval() {
            Some(real) => println!(
                "{} samples; real rate = {} ms",
                summary.samples,
                real.as_millis()
            ),
            None => println!("{} samples; real rate = n/a", summary.samples),
        }

        // A failed scan must not leave a truncated file behind.
        let excluded = self.excluded_threads(Tid::current())?;
        let file = File::create(&self.configuration.output_path)?;
        let mut out = BufWriter::new(file);
        self.write_samples(&mut out, &excluded)?;
        out.flush()?;
        log::debug!("Report written to {}", self.configuration.output_path.display());

        Ok(RunOutcome::Completed(summary))
    }

    /// Writes every stored snapshot, minus the sampler thread and threads
    /// that look idle right now.
    pub fn dump_samples<W: Write>(&mut self, out: &mut W, sampler: Tid) -> std::io::Result<()> {
        let excluded = self.excluded_threads(sampler)?;
        self.write_samples(out, &excluded)
    }

    fn excluded_threads(&mut self, sampler: Tid) -> std::io::Result<HashSet<Tid>> {
        let live = self.source.all_stacks()?;
        Ok(report::excluded_threads(sampler, &live))
    }

    fn write_samples<W: Write>(&self, out: &mut W, excluded: &HashSet<Tid>) -> std::io::Result<()> {
        report::write_samples(out, self.profile.samples(), excluded, &mut Symbolizer::new())
    }

    // Waits out one interval. Spurious unparks just go back to sleep.
    fn pause(&self) -> Result<()> {
        let deadline = Instant::now() + self.configuration.interval;
        loop {
            if self.interrupt.requested.swap(false, Ordering::AcqRel) {
                return Err(Error::Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::park_timeout(deadline - now);
        }
    }
}
