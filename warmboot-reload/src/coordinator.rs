use std::path::{Path, PathBuf};

use warmboot_track::{TrackError, TrackingSession};

use crate::{LoadError, Platform, RunState};

/// Hot-reload phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadState {
    /// No reload target is armed.
    Off,
    /// A snapshot target is armed and a tracking session is live.
    Prepare,
    /// A reload is executing. The machine never rests here: the transition completes back to
    /// [ReloadState::Prepare] or falls back to [ReloadState::Off] before the call returns.
    LoadVm,
}

/// Sequences snapshot swaps on a running VM while keeping dirty tracking continuous across
/// the swap.
///
/// Owns the platform handle and the tracking session, so a second coordinator (and with it a
/// second session) cannot exist for the same platform.
pub struct HotReloadCoordinator<P: Platform> {
    platform: P,
    session: TrackingSession,
    state: ReloadState,
    pending: Option<String>,
}

impl<P: Platform> HotReloadCoordinator<P> {
    pub fn new(platform: P) -> Self {
        Self { platform, session: TrackingSession::new(), state: ReloadState::Off, pending: None }
    }

    pub fn state(&self) -> ReloadState {
        self.state
    }

    /// The armed snapshot target. Set exactly while the state is Prepare or LoadVm.
    pub fn pending_snapshot(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    pub fn session(&self) -> &TrackingSession {
        &self.session
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Starts a plain tracking session (no reload target involved).
    pub fn start_tracking(&mut self) -> Result<(), TrackError> {
        self.session.start(&mut self.platform)
    }

    /// Stops the tracking session, retaining the set for [HotReloadCoordinator::export].
    pub fn stop_tracking(&mut self) -> Result<(), TrackError> {
        self.session.stop(&mut self.platform)
    }

    /// Exports the set accumulated by the last stopped session.
    pub fn export(&mut self, dir: &Path) -> std::io::Result<PathBuf> {
        self.session.export(dir)
    }

    /// Loads `name` and starts a tracking session, arming the coordinator for hot reloads of
    /// that snapshot.
    ///
    /// Callable from Off, or from Prepare to replace the armed target (the superseded session
    /// is stopped and its set discarded without export). The VM is returned to its pre-call
    /// run state on every path out of this function. Any failure leaves the state at Off with
    /// no pending target.
    pub fn prepare(&mut self, name: &str) -> Result<(), ReloadError> {
        let prev = self.platform.run_state();
        self.platform.pause(RunState::RestoreVm);
        let result = self.prepare_paused(name);
        self.platform.resume(prev);

        match &result {
            Ok(()) => tracing::debug!("armed for hot reload of {name:?}"),
            Err(err) => tracing::error!("preparing hot reload of {name:?} failed: {err}"),
        }
        result
    }

    fn prepare_paused(&mut self, name: &str) -> Result<(), ReloadError> {
        if self.state == ReloadState::Prepare {
            // Re-arming: the previous target's session ends here, without an export.
            self.state = ReloadState::Off;
            self.pending = None;
            self.session.stop(&mut self.platform)?;
            self.session.discard();
        }

        self.platform.load_snapshot(name)?;
        self.session.start(&mut self.platform)?;

        self.pending = Some(name.to_owned());
        self.state = ReloadState::Prepare;
        Ok(())
    }

    /// Swaps the running VM for the armed snapshot while keeping dirty-tracking continuity.
    ///
    /// On success the VM is back in its pre-call run state and the coordinator remains armed
    /// for another reload of the same target. On failure the coordinator falls back to Off and
    /// surfaces the underlying error; the VM is left paused unless the loaded image is known
    /// to be coherent (see the per-step handling below).
    pub fn reload(&mut self) -> Result<(), ReloadError> {
        if self.state != ReloadState::Prepare || self.pending.is_none() {
            return Err(ReloadError::NotPrepared);
        }
        self.state = ReloadState::LoadVm;

        let prev = self.platform.run_state();
        self.platform.pause(RunState::RestoreVm);

        if let Err(err) = self.session.stop(&mut self.platform) {
            // Hot reload is no longer possible. The VM stays paused: the caller falls back to
            // a plain reload from the quiesced machine.
            self.state = ReloadState::Off;
            self.pending = None;
            tracing::error!("hot reload abandoned, tracking stop failed: {err}");
            return Err(ReloadError::Track(err));
        }
        // The hot path never exports; the outgoing window's set is dropped.
        self.session.discard();

        let name = self.pending.clone().expect("armed coordinator without a pending target");
        if let Err(err) = self.platform.load_snapshot(&name) {
            // Tracking is gone and the guest image may be partially replaced, so the VM stays
            // paused here as well.
            self.state = ReloadState::Off;
            self.pending = None;
            tracing::error!("hot reload of {name:?} abandoned, load failed: {err}");
            return Err(ReloadError::Load(err));
        }

        match self.session.start(&mut self.platform) {
            Ok(()) => {
                self.platform.resume(prev);
                self.state = ReloadState::Prepare;
                tracing::debug!("hot reload of {name:?} complete, re-armed");
                Ok(())
            }
            Err(err) => {
                // The snapshot loaded, so the machine is coherent and can keep running; only
                // the tracking continuity is lost.
                self.platform.resume(prev);
                self.state = ReloadState::Off;
                self.pending = None;
                tracing::error!("hot reload of {name:?} loaded, but tracking restart failed: {err}");
                Err(ReloadError::Track(err))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReloadError {
    /// Reload was requested without a successful prepare.
    NotPrepared,
    Track(TrackError),
    Load(LoadError),
}

impl From<TrackError> for ReloadError {
    fn from(err: TrackError) -> Self {
        Self::Track(err)
    }
}

impl From<LoadError> for ReloadError {
    fn from(err: LoadError) -> Self {
        Self::Load(err)
    }
}

impl std::fmt::Display for ReloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotPrepared => f.write_str("no hot reload target is armed, prepare one first"),
            Self::Track(err) => write!(f, "{err}"),
            Self::Load(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ReloadError {}
