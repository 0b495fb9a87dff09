use std::sync::Arc;

use crate::dirty::DirtySet;

bitflags::bitflags! {
    /// Consumers of the platform's global dirty-tracking facility. Start/stop calls carry the
    /// mask of the consumer they act for; the facility stays armed while any consumer holds it.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TrackMode: u32 {
        /// Dirty-log export (this crate).
        const EXPORT = 1 << 0;
        /// Live migration's dirty bitmap.
        const MIGRATION = 1 << 1;
        /// Dirty-rate measurement.
        const DIRTY_RATE = 1 << 2;
    }
}

/// Boundary to the memory subsystem that detects guest writes.
pub trait MemoryBackend {
    /// Whether the platform was launched with the hardware dirty-tracking facility enabled.
    fn dirty_tracking_supported(&self) -> bool;

    /// Begins global dirty tracking on behalf of `mode`. While tracking is active the backend
    /// records every dirtied frame into `sink`, potentially from any guest thread.
    fn start_dirty_tracking(
        &mut self,
        mode: TrackMode,
        sink: Arc<DirtySet>,
    ) -> Result<(), BackendError>;

    /// Delivers dirty notifications the backend has detected but not yet reported. `flush`
    /// additionally resets the backend's own dirty state; the stop path passes `false`.
    fn sync_dirty_log(&mut self, flush: bool);

    /// Ends global dirty tracking on behalf of `mode`. Once this returns, no further
    /// notifications are delivered to the sink.
    fn stop_dirty_tracking(&mut self, mode: TrackMode);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendError {
    /// Another consumer holds the facility in an incompatible mode.
    Busy,
    /// The backend rejected the request.
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Busy => f.write_str("dirty tracking facility is busy"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for BackendError {}
