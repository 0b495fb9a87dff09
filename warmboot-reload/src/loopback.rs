use std::sync::Arc;

use hashbrown::HashMap;
use warmboot_track::{BackendError, DirtySet, FrameKey, MemoryBackend, Topology, TrackMode};

use crate::{LoadError, RunState, SnapshotStore, VmControl};

/// In-memory stand-in for the external platform: a run-state latch, a named snapshot table, a
/// software dirty-tracking facility and a hotpluggable topology stamp.
///
/// Exists for tests and the `warmboot-ctl` console; nothing here touches a real guest.
pub struct LoopbackPlatform {
    run_state: RunState,
    generation: u32,
    facility_enabled: bool,
    fail_next_start: bool,
    tracking: TrackMode,
    sink: Option<Arc<DirtySet>>,
    /// Registered snapshots, with the number of times each was loaded.
    snapshots: HashMap<String, u64>,
    syncs: u64,
}

impl LoopbackPlatform {
    pub fn new() -> Self {
        Self {
            run_state: RunState::Running,
            generation: 1,
            facility_enabled: true,
            fail_next_start: false,
            tracking: TrackMode::empty(),
            sink: None,
            snapshots: HashMap::new(),
            syncs: 0,
        }
    }

    /// Registers a loadable snapshot under `name`.
    pub fn add_snapshot(&mut self, name: &str) {
        self.snapshots.insert(name.to_owned(), 0);
    }

    pub fn remove_snapshot(&mut self, name: &str) {
        self.snapshots.remove(name);
    }

    /// The number of times `name` has been loaded.
    pub fn load_count(&self, name: &str) -> u64 {
        self.snapshots.get(name).copied().unwrap_or(0)
    }

    /// Simulates a guest write to (`slot`, `offset`). Dropped unless tracking is active.
    pub fn touch(&self, slot: u32, offset: u64) {
        if let Some(sink) = &self.sink {
            sink.record(FrameKey::new(slot, offset));
        }
    }

    /// Simulates processor hotplug by bumping the topology generation.
    pub fn hotplug(&mut self) {
        self.generation += 1;
    }

    pub fn set_facility_enabled(&mut self, enabled: bool) {
        self.facility_enabled = enabled;
    }

    /// Makes the next `start_dirty_tracking` call fail.
    pub fn fail_next_start(&mut self) {
        self.fail_next_start = true;
    }

    pub fn is_tracking(&self) -> bool {
        !self.tracking.is_empty()
    }

    pub fn sync_count(&self) -> u64 {
        self.syncs
    }
}

impl Default for LoopbackPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend for LoopbackPlatform {
    fn dirty_tracking_supported(&self) -> bool {
        self.facility_enabled
    }

    fn start_dirty_tracking(
        &mut self,
        mode: TrackMode,
        sink: Arc<DirtySet>,
    ) -> Result<(), BackendError> {
        if self.fail_next_start {
            self.fail_next_start = false;
            return Err(BackendError::Busy);
        }
        self.tracking |= mode;
        self.sink = Some(sink);
        Ok(())
    }

    fn sync_dirty_log(&mut self, _flush: bool) {
        // Writes are delivered eagerly in `touch`, so a sync only needs counting.
        self.syncs += 1;
    }

    fn stop_dirty_tracking(&mut self, mode: TrackMode) {
        self.tracking &= !mode;
        if self.tracking.is_empty() {
            self.sink = None;
        }
    }
}

impl Topology for LoopbackPlatform {
    fn generation_id(&self) -> u32 {
        self.generation
    }
}

impl VmControl for LoopbackPlatform {
    fn run_state(&self) -> RunState {
        self.run_state
    }

    fn pause(&mut self, reason: RunState) {
        tracing::trace!("vm paused ({reason:?})");
        self.run_state = reason;
    }

    fn resume(&mut self, state: RunState) {
        tracing::trace!("vm resumed ({state:?})");
        self.run_state = state;
    }
}

impl SnapshotStore for LoopbackPlatform {
    fn load_snapshot(&mut self, name: &str) -> Result<(), LoadError> {
        match self.snapshots.get_mut(name) {
            Some(count) => {
                *count += 1;
                Ok(())
            }
            None => Err(LoadError::NotFound(name.to_owned())),
        }
    }
}
