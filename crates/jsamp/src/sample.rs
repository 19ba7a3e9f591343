use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Kernel thread ID (what `gettid(2)` returns).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(pub libc::pid_t);

impl Tid {
    #[cfg(target_os = "linux")]
    pub fn current() -> Self {
        // gettid(2) cannot fail
        Tid(unsafe { libc::syscall(libc::SYS_gettid) } as libc::pid_t)
    }

    #[cfg(not(target_os = "linux"))]
    pub fn current() -> Self {
        Tid(unsafe { libc::pthread_self() } as libc::pid_t)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A thread as seen at capture time.
///
/// Two handles are the same thread if their [`Tid`]s match; the name is only
/// carried along so the report writer can recognize known idle threads.
#[derive(Clone, Debug)]
pub struct ThreadHandle {
    pub tid: Tid,
    pub name: String,
}

impl ThreadHandle {
    pub fn new(tid: Tid, name: impl Into<String>) -> Self {
        Self {
            tid,
            name: name.into(),
        }
    }
}

impl PartialEq for ThreadHandle {
    fn eq(&self, other: &Self) -> bool {
        self.tid == other.tid
    }
}

impl Eq for ThreadHandle {}

impl Hash for ThreadHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tid.hash(state);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StackFrame {
    /// A return address captured from a native stack. Symbolized only when
    /// the report is written.
    Address(usize),
    /// The exact instruction a signal interrupted. Unlike a return address,
    /// it does not point one past a call.
    InstructionPointer(usize),
    /// A frame that was already rendered by whoever captured it.
    Label(String),
}

/// Frames of one thread, innermost first. May be empty.
pub type ThreadStack = Vec<StackFrame>;

/// Stacks of every live thread at (roughly) one instant.
pub type Snapshot = HashMap<ThreadHandle, ThreadStack>;
