#![deny(unsafe_op_in_unsafe_fn)]

//! Captures the stacks of every thread in the process with one `SIGPROF`
//! sweep.
//!
//! All threads are signalled before any of them is waited for, so the
//! threads unwind themselves in parallel and the resulting snapshot is as
//! close to a single instant as we can get without stopping the process.
//! The handler only touches atomics in a pre-allocated slot table; symbols
//! are resolved much later, when the report is written.

use std::ffi::{c_int, c_void};
use std::fs;
use std::io;
use std::mem;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicI32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use crate::sample::{Snapshot, StackFrame, ThreadHandle, ThreadStack, Tid};
use crate::stack_source::StackSource;

const SIGNAL: c_int = libc::SIGPROF;

const MAX_THREADS: usize = 1024;
const MAX_STACK_DEPTH: usize = 128;

/// How long a sweep waits for signalled threads before giving up on them.
const SWEEP_TIMEOUT: Duration = Duration::from_millis(50);

// Slot states
const IDLE: u8 = 0;
const ARMED: u8 = 1;
const WRITING: u8 = 2;
const DONE: u8 = 3;

// `start` when the interrupted PC was not found among the frames
const PC_NOT_FOUND: usize = usize::MAX;

struct Slot {
    tid: AtomicI32,
    state: AtomicU8,
    depth: AtomicUsize,
    // index of the interrupted frame, the first one outside the signal handler
    start: AtomicUsize,
    ips: [AtomicUsize; MAX_STACK_DEPTH],
}

impl Slot {
    fn new() -> Self {
        Self {
            tid: AtomicI32::new(0),
            state: AtomicU8::new(IDLE),
            depth: AtomicUsize::new(0),
            start: AtomicUsize::new(0),
            ips: std::array::from_fn(|_| AtomicUsize::new(0)),
        }
    }

    /// Whether a sweep may arm this slot. A slot left `WRITING` by a handler
    /// that missed an earlier deadline stays out of use until it finishes.
    fn reclaim(&self) -> bool {
        match self.state.load(Ordering::Acquire) {
            IDLE => true,
            DONE => self
                .state
                .compare_exchange(DONE, IDLE, Ordering::Acquire, Ordering::Relaxed)
                .is_ok(),
            _ => false,
        }
    }

    /// Takes the slot back from the handler and returns whatever it captured.
    /// A handler still unwinding at `deadline` is given up on.
    fn collect(&self, deadline: Instant) -> ThreadStack {
        loop {
            match self
                .state
                .compare_exchange(DONE, IDLE, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => {
                    let depth = self.depth.load(Ordering::Relaxed);
                    let ips = self.ips[..depth].iter().map(|ip| ip.load(Ordering::Relaxed));
                    return match self.start.load(Ordering::Relaxed) {
                        PC_NOT_FOUND => ips.map(StackFrame::Address).collect(),
                        start => ips
                            .skip(start)
                            .enumerate()
                            .map(|(i, ip)| match i {
                                0 => StackFrame::InstructionPointer(ip),
                                _ => StackFrame::Address(ip),
                            })
                            .collect(),
                    };
                }
                Err(IDLE) => return vec![],
                Err(ARMED) => {
                    // Never answered. Retry if the handler just got to it.
                    if self
                        .state
                        .compare_exchange(ARMED, IDLE, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                    {
                        return vec![];
                    }
                }
                // The handler is mid-unwind; that normally takes microseconds.
                Err(_) => {
                    if Instant::now() >= deadline {
                        let tid = self.tid.load(Ordering::Relaxed);
                        log::debug!("Gave up on thread {} mid-unwind", tid);
                        return vec![];
                    }
                    std::hint::spin_loop();
                }
            }
        }
    }
}

static SLOTS: OnceLock<Box<[Slot]>> = OnceLock::new();
static ARMED_COUNT: AtomicUsize = AtomicUsize::new(0);
// errno of a failed sigaction(2), if any
static HANDLER_INSTALLED: OnceLock<Result<(), i32>> = OnceLock::new();
// There is one slot table per process, so sweeps take turns.
static SWEEP_LOCK: Mutex<()> = Mutex::new(());

fn slots() -> &'static [Slot] {
    SLOTS.get_or_init(|| (0..MAX_THREADS).map(|_| Slot::new()).collect())
}

/// [`StackSource`] backed by `SIGPROF` and `/proc/self/task`.
///
/// Installing it replaces any `SIGPROF` handler the process already had.
pub struct SignalStackSource {
    slots: &'static [Slot],
}

impl SignalStackSource {
    pub fn new() -> io::Result<Self> {
        // Slots must exist before the handler can fire.
        let slots = slots();
        Self::install_signal_handler()?;
        Ok(Self { slots })
    }

    // Install signal handler for sampling requests to the current process.
    fn install_signal_handler() -> io::Result<()> {
        let result = HANDLER_INSTALLED.get_or_init(|| {
            let mut sa: libc::sigaction = unsafe { mem::zeroed() };
            sa.sa_sigaction = Self::signal_handler as usize;
            sa.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
            unsafe { libc::sigemptyset(&mut sa.sa_mask) };
            let err = unsafe { libc::sigaction(SIGNAL, &sa, null_mut()) };
            if err != 0 {
                return Err(io::Error::last_os_error().raw_os_error().unwrap_or(0));
            }
            log::debug!("Signal handler installed");
            Ok(())
        });
        (*result).map_err(io::Error::from_raw_os_error)
    }

    // Runs on the signalled thread. Touches nothing but atomics in its slot,
    // although the unwinder itself is not strictly async-signal-safe.
    extern "C" fn signal_handler(
        _sig: c_int,
        _info: *mut libc::siginfo_t,
        ucontext: *mut c_void,
    ) {
        let Some(slots) = SLOTS.get() else {
            return;
        };
        let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::pid_t;
        let armed = ARMED_COUNT.load(Ordering::Acquire).min(slots.len());
        let Some(slot) = slots[..armed].iter().find(|slot| {
            slot.tid.load(Ordering::Relaxed) == tid && slot.state.load(Ordering::Relaxed) == ARMED
        }) else {
            return;
        };
        if slot
            .state
            .compare_exchange(ARMED, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        // The slot may have been handed to another thread in the meantime.
        if slot.tid.load(Ordering::Relaxed) != tid {
            slot.state.store(ARMED, Ordering::Release);
            return;
        }

        let pc = unsafe { interrupted_pc(ucontext) };
        let mut depth = 0;
        let mut start = None;
        unsafe {
            ::backtrace::trace_unsynchronized(|frame| {
                let ip = frame.ip() as usize;
                if start.is_none() && pc != 0 && ip == pc {
                    start = Some(depth);
                }
                slot.ips[depth].store(ip, Ordering::Relaxed);
                depth += 1;
                depth < MAX_STACK_DEPTH
            });
        }

        slot.depth.store(depth, Ordering::Relaxed);
        slot.start.store(start.unwrap_or(PC_NOT_FOUND), Ordering::Relaxed);
        slot.state.store(DONE, Ordering::Release);
    }

    fn sweep(&self) -> io::Result<Snapshot> {
        let _guard = SWEEP_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let me = Tid::current();
        let threads = live_threads()?;
        let mut snapshot = Snapshot::with_capacity(threads.len());

        let mut free = self.slots.iter().enumerate().filter(|(_, slot)| slot.reclaim());
        let mut targets: Vec<(&Slot, ThreadHandle)> = Vec::with_capacity(threads.len());
        let mut armed = 0;
        for thread in threads {
            if thread.tid == me {
                snapshot.insert(thread, capture_current_thread());
                continue;
            }
            match free.next() {
                Some((index, slot)) => {
                    slot.tid.store(thread.tid.0, Ordering::Relaxed);
                    slot.state.store(ARMED, Ordering::Relaxed);
                    armed = index + 1;
                    targets.push((slot, thread));
                }
                None => {
                    log::debug!("Too many threads. Skipping {} ({})", thread.tid, thread.name);
                }
            }
        }
        ARMED_COUNT.store(armed, Ordering::Release);

        // Signal everyone first, then wait
        let pid = unsafe { libc::getpid() };
        for (slot, thread) in &targets {
            let err = unsafe { libc::syscall(libc::SYS_tgkill, pid, thread.tid.0, SIGNAL) };
            if err != 0 {
                // Most likely exited after we listed it
                log::trace!("tgkill({}) failed: {}", thread.tid, io::Error::last_os_error());
                let _ = slot.state.compare_exchange(
                    ARMED,
                    IDLE,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                );
            }
        }

        let deadline = Instant::now() + SWEEP_TIMEOUT;
        while targets
            .iter()
            .any(|(slot, _)| matches!(slot.state.load(Ordering::Acquire), ARMED | WRITING))
        {
            if Instant::now() >= deadline {
                log::debug!("Some threads did not respond within {:?}", SWEEP_TIMEOUT);
                break;
            }
            thread::sleep(Duration::from_micros(20));
        }
        ARMED_COUNT.store(0, Ordering::Release);

        for (slot, thread) in targets {
            snapshot.insert(thread, slot.collect(deadline));
        }
        Ok(snapshot)
    }
}

impl StackSource for SignalStackSource {
    fn all_stacks(&mut self) -> io::Result<Snapshot> {
        self.sweep()
    }
}

/// Lists the threads of this process with their `comm` names.
fn live_threads() -> io::Result<Vec<ThreadHandle>> {
    let mut threads = vec![];
    for entry in fs::read_dir("/proc/self/task")? {
        let entry = entry?;
        let Some(tid) = entry.file_name().to_str().and_then(|s| s.parse().ok()) else {
            continue;
        };
        // Gone already if comm is unreadable
        let Ok(name) = fs::read_to_string(entry.path().join("comm")) else {
            continue;
        };
        threads.push(ThreadHandle::new(Tid(tid), name.trim_end_matches('\n')));
    }
    Ok(threads)
}

fn capture_current_thread() -> ThreadStack {
    let mut frames = Vec::with_capacity(MAX_STACK_DEPTH);
    ::backtrace::trace(|frame| {
        frames.push(StackFrame::Address(frame.ip() as usize));
        frames.len() < MAX_STACK_DEPTH
    });
    frames
}

/// The program counter the signal interrupted, or 0 if unknown.
#[cfg(target_arch = "x86_64")]
unsafe fn interrupted_pc(ucontext: *mut c_void) -> usize {
    if ucontext.is_null() {
        return 0;
    }
    let ucontext = ucontext as *const libc::ucontext_t;
    unsafe { (*ucontext).uc_mcontext.gregs[libc::REG_RIP as usize] as usize }
}

#[cfg(target_arch = "aarch64")]
unsafe fn interrupted_pc(ucontext: *mut c_void) -> usize {
    if ucontext.is_null() {
        return 0;
    }
    let ucontext = ucontext as *const libc::ucontext_t;
    unsafe { (*ucontext).uc_mcontext.pc as usize }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
unsafe fn interrupted_pc(_ucontext: *mut c_void) -> usize {
    0
}
