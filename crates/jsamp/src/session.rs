use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::configuration::Configuration;
use crate::error::{Error, Result};
use crate::listener::StopListener;
use crate::report::{LISTENER_THREAD_NAME, SAMPLER_THREAD_NAME};
use crate::sampler::{RunOutcome, Sampler};
use crate::stack_source::StackSource;

/// A running profiler: one sampler thread and one listener thread.
///
/// A crashed sampler is reported through [`Session::wait`], but it cannot
/// wake a listener that is still waiting for its stop request.
#[derive(Debug)]
pub struct Session {
    local_addr: SocketAddr,
    listener_thread: JoinHandle<Result<RunOutcome>>,
}

impl Session {
    /// Starts sampling and listening. Returns `None` when profiling is
    /// disabled, in which case no thread is started.
    pub fn start<S>(configuration: Configuration, source: S) -> Result<Option<Self>>
    where
        S: StackSource + 'static,
    {
        Self::start_with_deadline(configuration, source, None)
    }

    /// Like [`Session::start`], with a deadline on each of the listener's
    /// blocking waits.
    pub fn start_with_deadline<S>(
        configuration: Configuration,
        source: S,
        deadline: Option<Duration>,
    ) -> Result<Option<Self>>
    where
        S: StackSource + 'static,
    {
        if configuration.disabled {
            log::info!("Profiling disabled from the environment");
            return Ok(None);
        }

        // Bind here so that a taken port is reported to the caller.
        let mut listener = StopListener::bind(configuration.port)?;
        if let Some(deadline) = deadline {
            listener = listener.with_deadline(deadline);
        }
        let local_addr = listener.local_addr()?;

        let mut sampler = Sampler::new(configuration, source);
        let stop = sampler.stop_flag();
        let sampler_thread = thread::Builder::new()
            .name(SAMPLER_THREAD_NAME.to_owned())
            .spawn(move || sampler.run())?;

        let listener_thread = thread::Builder::new()
            .name(LISTENER_THREAD_NAME.to_owned())
            .spawn(move || listener.serve(&stop, sampler_thread))?;

        Ok(Some(Self {
            local_addr,
            listener_thread,
        }))
    }

    /// Where to connect to stop this session.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Blocks until the session has been stopped and its report written.
    pub fn wait(self) -> Result<RunOutcome> {
        self.listener_thread
            .join()
            .map_err(|_| Error::ThreadPanicked("listener"))?
    }
}
