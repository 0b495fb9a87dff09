use std::sync::Mutex;

use hashbrown::HashSet;

/// Identifies a single dirtied frame of guest memory as a (region slot, offset within the
/// region) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameKey {
    pub slot: u32,
    pub offset: u64,
}

impl FrameKey {
    pub fn new(slot: u32, offset: u64) -> Self {
        Self { slot, offset }
    }
}

impl std::fmt::Display for FrameKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08x} 0x{:016x}", self.slot, self.offset)
    }
}

/// The set of frames dirtied since tracking started.
///
/// The backend's notification path may run on any guest thread while tracking is active, so
/// the set is internally synchronised. The backend contract guarantees that no further
/// notifications arrive once `stop_dirty_tracking` has returned, which leaves the lock
/// uncontended by the time the set is drained.
#[derive(Default)]
pub struct DirtySet {
    entries: Mutex<HashSet<FrameKey>>,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `key` as dirtied. Re-recording a known frame is a no-op.
    pub fn record(&self, key: FrameKey) {
        self.entries.lock().unwrap().insert(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Writes one line per distinct frame to `sink`, in no particular order. The entries are
    /// left in place; pair with [DirtySet::clear] to consume the set.
    pub fn drain_to(&self, sink: &mut impl std::io::Write) -> std::io::Result<()> {
        let entries = self.entries.lock().unwrap();
        for key in entries.iter() {
            writeln!(sink, "{key}")?;
        }
        Ok(())
    }

    /// Removes all recorded frames.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}
