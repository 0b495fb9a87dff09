pub mod coordinator;
pub mod loopback;
pub mod monitor;


pub use crate::coordinator::{HotReloadCoordinator, ReloadError, ReloadState};

use warmboot_track::{MemoryBackend, Topology};

/// Externally visible run state of the VM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    /// Stopped while a snapshot is being loaded into the machine.
    RestoreVm,
}

/// Boundary to the VM's run/stop lifecycle.
///
/// Pause and resume are blocking calls, atomic from the caller's perspective.
pub trait VmControl {
    fn run_state(&self) -> RunState;

    /// Stops guest execution, with `reason` as the externally visible state.
    fn pause(&mut self, reason: RunState);

    /// Returns guest execution to `state`, as captured before the matching pause.
    fn resume(&mut self, state: RunState);
}

/// Boundary to the snapshot store.
pub trait SnapshotStore {
    fn load_snapshot(&mut self, name: &str) -> Result<(), LoadError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadError {
    /// No snapshot is saved under the requested name.
    NotFound(String),
    /// The snapshot exists but could not be loaded into the machine.
    Failed(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(name) => write!(f, "snapshot {name:?} does not exist"),
            Self::Failed(msg) => write!(f, "snapshot load failed: {msg}"),
        }
    }
}

impl std::error::Error for LoadError {}

/// Everything the hot-reload coordinator needs from the embedding platform.
pub trait Platform: MemoryBackend + Topology + VmControl + SnapshotStore {}

impl<T: MemoryBackend + Topology + VmControl + SnapshotStore> Platform for T {}
