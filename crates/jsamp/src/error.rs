use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The activation string could not be parsed.
    #[error("invalid activation string {input:?}: {reason}")]
    Configuration { input: String, reason: String },

    /// The sampler was interrupted while waiting for its next sample.
    #[error("sampler interrupted while sleeping")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] io::Error),

    /// Only returned when a deadline was set on the listener.
    #[error("timed out while {0}")]
    TimedOut(&'static str),

    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
