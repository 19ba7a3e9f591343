use std::io;

use crate::sample::Snapshot;

/// Something that can report the stacks of all live threads at once.
pub trait StackSource: Send {
    fn all_stacks(&mut self) -> io::Result<Snapshot>;
}

impl<S: StackSource + ?Sized> StackSource for Box<S> {
    fn all_stacks(&mut self) -> io::Result<Snapshot> {
        (**self).all_stacks()
    }
}
