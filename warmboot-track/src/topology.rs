/// Access to the generation stamp of the guest processor topology.
///
/// The stamp increments whenever processors are added or removed. Implementations must read it
/// under the same lock the host takes to mutate the processor list, so the value is never torn.
pub trait Topology {
    fn generation_id(&self) -> u32;
}

/// Remembers the topology generation observed when a tracking session started, to detect
/// mid-session processor hotplug.
///
/// Detection is advisory: an in-flight dirty set cannot be reconciled with a changed processor
/// set, so drift degrades the stop to a reported error rather than a rollback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TopologyGuard {
    generation_id: u32,
}

impl TopologyGuard {
    pub fn snapshot(topology: &impl Topology) -> Self {
        Self { generation_id: topology.generation_id() }
    }

    pub fn generation_id(&self) -> u32 {
        self.generation_id
    }

    pub fn matches(&self, topology: &impl Topology) -> bool {
        self.generation_id == topology.generation_id()
    }
}
