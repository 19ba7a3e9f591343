use std::io;

use crate::sample::Snapshot;
use crate::stack_source::StackSource;

pub struct SignalStackSource {}

impl SignalStackSource {
    pub fn new() -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "sampling all threads is only supported on Linux",
        ))
    }
}

impl StackSource for SignalStackSource {
    fn all_stacks(&mut self) -> io::Result<Snapshot> {
        unimplemented!()
    }
}
