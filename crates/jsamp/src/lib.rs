//! A minimal in-process sampling profiler.
//!
//! Every few milliseconds a dedicated thread captures the stack of every
//! thread in the process and keeps it in memory. When a client connects to
//! the stop port, sampling ends, all non-idle stacks are written to a plain
//! text file (one frame per line, a blank line after each stack), and the
//! client's connection is closed.

mod backtrace;
pub mod configuration;
mod error;
pub mod listener;
mod profile;
pub mod report;
mod sample;
pub mod sampler;
mod session;
#[cfg(target_os = "linux")]
mod signal_sampler;
#[cfg(not(target_os = "linux"))]
#[path = "signal_sampler_unsupported_platform.rs"]
mod signal_sampler;
mod stack_source;

pub use crate::backtrace::Symbolizer;
pub use crate::configuration::Configuration;
pub use crate::error::{Error, Result};
pub use crate::listener::{trigger_stop, ListenerState, StopListener};
pub use crate::profile::Profile;
pub use crate::sample::{Snapshot, StackFrame, ThreadHandle, ThreadStack, Tid};
pub use crate::sampler::{Interrupter, RunOutcome, RunSummary, Sampler, StopFlag};
pub use crate::session::Session;
pub use crate::signal_sampler::SignalStackSource;
pub use crate::stack_source::StackSource;

/// Starts profiling this process.
///
/// `args` is `<interval ms>;<port>;<output path>`. Returns `None` if
/// profiling has been disabled from the environment.
pub fn start(args: &str) -> Result<Option<Session>> {
    #[cfg(feature = "debug")]
    {
        let _ = env_logger::builder()
            .format_timestamp(None)
            .format_module_path(false)
            .try_init();
    }

    let configuration = Configuration::from_activation(args)?;
    if configuration.disabled {
        log::info!("Profiling disabled from the environment");
        return Ok(None);
    }
    let source = SignalStackSource::new()?;
    Session::start(configuration, source)
}
