pub mod backend;
pub mod dirty;
pub mod export;
pub mod session;
pub mod topology;

#[cfg(test)]
mod tests;

pub use crate::{
    backend::{BackendError, MemoryBackend, TrackMode},
    dirty::{DirtySet, FrameKey},
    export::export_dirty_log,
    session::{TrackError, TrackingSession},
    topology::{Topology, TopologyGuard},
};
