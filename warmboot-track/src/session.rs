use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    backend::{BackendError, MemoryBackend, TrackMode},
    dirty::DirtySet,
    export::export_dirty_log,
    topology::{Topology, TopologyGuard},
};

/// The dirty-tracking session of the process.
///
/// At most one session exists at a time. The invariant is enforced by ownership: the embedding
/// application creates a single instance and threads it through the command boundary, instead
/// of reaching for ambient global state.
#[derive(Default)]
pub struct TrackingSession {
    active: bool,
    guard: Option<TopologyGuard>,
    set: Option<Arc<DirtySet>>,
}

impl TrackingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The topology generation captured at start. Meaningful only while the session is active.
    pub fn generation_id(&self) -> Option<u32> {
        self.guard.map(|guard| guard.generation_id())
    }

    /// The set being populated (while active), or the set retained for export (after stop).
    pub fn dirty_set(&self) -> Option<&Arc<DirtySet>> {
        self.set.as_ref()
    }

    /// Starts collecting dirty frames.
    ///
    /// Restarting an already active session is an error, not a reset; the caller must stop the
    /// session first. A set retained from an earlier session that was never exported is
    /// superseded by the new one.
    pub fn start<P>(&mut self, platform: &mut P) -> Result<(), TrackError>
    where
        P: MemoryBackend + Topology,
    {
        if self.active {
            return Err(TrackError::AlreadyActive);
        }
        if !platform.dirty_tracking_supported() {
            return Err(TrackError::FacilityDisabled);
        }

        let set = Arc::new(DirtySet::new());
        platform.start_dirty_tracking(TrackMode::EXPORT, Arc::clone(&set))?;

        // Only stamp the topology once the backend has actually started.
        let guard = TopologyGuard::snapshot(&*platform);
        tracing::debug!("dirty tracking started, topology generation {}", guard.generation_id());
        self.guard = Some(guard);
        self.set = Some(set);
        self.active = true;
        Ok(())
    }

    /// Stops collecting dirty frames. The accumulated set is retained for
    /// [TrackingSession::export].
    ///
    /// Topology drift does not abort the stop: pending notifications are synced and the
    /// backend is stopped either way, and the drift is reported afterwards.
    pub fn stop<P>(&mut self, platform: &mut P) -> Result<(), TrackError>
    where
        P: MemoryBackend + Topology,
    {
        if !self.active {
            return Err(TrackError::NotActive);
        }

        let guard = self.guard.take().expect("active session without a topology guard");
        let drift = match guard.matches(&*platform) {
            true => None,
            false => Some((guard.generation_id(), platform.generation_id())),
        };

        platform.sync_dirty_log(false);
        platform.stop_dirty_tracking(TrackMode::EXPORT);
        self.active = false;
        tracing::debug!("dirty tracking stopped");

        match drift {
            None => Ok(()),
            Some((expected, found)) => {
                tracing::warn!(
                    "processor topology changed while tracking (generation {expected} -> {found})"
                );
                Err(TrackError::TopologyChanged { expected, found })
            }
        }
    }

    /// Serializes the retained set to a fresh file in `dir`, then drops it.
    ///
    /// Panics if there is no set to export: stop and export are sequenced by the caller, and
    /// asking to serialize without a preceding session is a logic error rather than an
    /// external failure.
    pub fn export(&mut self, dir: &Path) -> std::io::Result<PathBuf> {
        let set = self.set.as_ref().expect("no dirty set to export");
        let path = export_dirty_log(set, dir)?;
        tracing::debug!("exported {} dirty frames to {}", set.len(), path.display());
        self.set = None;
        Ok(path)
    }

    /// Drops the retained set without exporting it.
    pub fn discard(&mut self) {
        self.set = None;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackError {
    /// The hardware dirty-tracking facility is missing or was not enabled at launch.
    FacilityDisabled,
    /// A session is already active.
    AlreadyActive,
    /// No session is active.
    NotActive,
    /// The processor topology changed while tracking was active. Tracking was still stopped.
    TopologyChanged { expected: u32, found: u32 },
    /// The tracking backend refused to start.
    Backend(BackendError),
}

impl From<BackendError> for TrackError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err)
    }
}

impl std::fmt::Display for TrackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FacilityDisabled => f.write_str(
                "hardware dirty tracking is not available, \
                 launch the platform with the dirty-tracking facility enabled",
            ),
            Self::AlreadyActive => f.write_str("dirty tracking is already running"),
            Self::NotActive => f.write_str("dirty tracking is not running"),
            Self::TopologyChanged { expected, found } => write!(
                f,
                "the processor topology changed while tracking \
                 (generation {expected} -> {found}), this is not handled"
            ),
            Self::Backend(err) => write!(f, "dirty tracking backend failed: {err}"),
        }
    }
}

impl std::error::Error for TrackError {}
