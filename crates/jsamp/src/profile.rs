use std::time::{Duration, Instant};

use crate::sample::Snapshot;

/// Every snapshot taken during one run, in capture order.
#[derive(Debug)]
pub struct Profile {
    pub start_instant: Instant,
    pub end_instant: Option<Instant>,
    samples: Vec<Snapshot>,
}

impl Profile {
    pub fn new() -> Self {
        Self {
            start_instant: Instant::now(),
            end_instant: None,
            samples: vec![],
        }
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        self.samples.push(snapshot);
    }

    pub fn samples(&self) -> &[Snapshot] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Wall-clock time between the start of the run and its end (or now, if
    /// the run has not ended yet).
    pub fn elapsed(&self) -> Duration {
        self.end_instant
            .unwrap_or_else(Instant::now)
            .duration_since(self.start_instant)
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{StackFrame, ThreadHandle, Tid};

    fn snapshot_of(tid: i32) -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            ThreadHandle::new(Tid(tid), "worker"),
            vec![StackFrame::Label(format!("frame{}", tid))],
        );
        snapshot
    }

    #[test]
    fn test_profile_keeps_capture_order() {
        let mut profile = Profile::new();
        assert!(profile.is_empty());

        profile.push(snapshot_of(1));
        profile.push(snapshot_of(2));
        profile.push(snapshot_of(3));

        let tids: Vec<i32> = profile
            .samples()
            .iter()
            .map(|s| s.keys().next().unwrap().tid.0)
            .collect();
        assert_eq!(tids, vec![1, 2, 3]);
        assert_eq!(profile.len(), 3);
    }

    #[test]
    fn test_profile_elapsed_is_frozen_after_end() {
        let mut profile = Profile::new();
        profile.end_instant = Some(profile.start_instant + Duration::from_millis(250));
        assert_eq!(profile.elapsed(), Duration::from_millis(250));
    }
}
