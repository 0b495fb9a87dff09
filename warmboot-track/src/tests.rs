use std::{path::PathBuf, sync::Arc};

use crate::{
    backend::{BackendError, MemoryBackend, TrackMode},
    dirty::{DirtySet, FrameKey},
    session::{TrackError, TrackingSession},
    topology::Topology,
};

/// Minimal stand-in for the external memory subsystem and topology lock.
struct FakePlatform {
    facility_enabled: bool,
    fail_start: bool,
    tracking: bool,
    sink: Option<Arc<DirtySet>>,
    generation: u32,
    syncs: u32,
}

impl FakePlatform {
    fn new() -> Self {
        Self {
            facility_enabled: true,
            fail_start: false,
            tracking: false,
            sink: None,
            generation: 1,
            syncs: 0,
        }
    }

    fn touch(&self, slot: u32, offset: u64) {
        if let Some(sink) = &self.sink {
            sink.record(FrameKey::new(slot, offset));
        }
    }
}

impl MemoryBackend for FakePlatform {
    fn dirty_tracking_supported(&self) -> bool {
        self.facility_enabled
    }

    fn start_dirty_tracking(
        &mut self,
        _mode: TrackMode,
        sink: Arc<DirtySet>,
    ) -> Result<(), BackendError> {
        if self.fail_start {
            return Err(BackendError::Busy);
        }
        self.tracking = true;
        self.sink = Some(sink);
        Ok(())
    }

    fn sync_dirty_log(&mut self, _flush: bool) {
        self.syncs += 1;
    }

    fn stop_dirty_tracking(&mut self, _mode: TrackMode) {
        self.tracking = false;
        self.sink = None;
    }
}

impl Topology for FakePlatform {
    fn generation_id(&self) -> u32 {
        self.generation
    }
}

fn drained_lines(set: &DirtySet) -> Vec<String> {
    let mut out = Vec::new();
    set.drain_to(&mut out).unwrap();
    let mut lines: Vec<String> =
        String::from_utf8(out).unwrap().lines().map(|line| line.to_owned()).collect();
    lines.sort();
    lines
}

fn test_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("warmboot-track-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn duplicate_records_collapse() {
    let set = DirtySet::new();
    for _ in 0..4 {
        set.record(FrameKey::new(1, 0x1000));
    }
    set.record(FrameKey::new(1, 0x2000));
    assert_eq!(set.len(), 2);
}

#[test]
fn drain_emits_each_distinct_key_once() {
    fn check(keys: Vec<(u32, u64)>) -> bool {
        let set = DirtySet::new();
        for &(slot, offset) in &keys {
            set.record(FrameKey::new(slot, offset));
        }
        let distinct: std::collections::HashSet<(u32, u64)> = keys.into_iter().collect();
        drained_lines(&set).len() == distinct.len()
    }
    quickcheck::quickcheck(check as fn(Vec<(u32, u64)>) -> bool);
}

#[test]
fn export_line_format() {
    let set = DirtySet::new();
    set.record(FrameKey::new(1, 0x1000));
    set.record(FrameKey::new(2, 0x2000));
    assert_eq!(drained_lines(&set), vec![
        "0x00000001 0x0000000000001000".to_owned(),
        "0x00000002 0x0000000000002000".to_owned(),
    ]);

    set.clear();
    assert!(set.is_empty());
    assert!(drained_lines(&set).is_empty());
}

#[test]
fn concurrent_records_are_deduplicated() {
    let set = Arc::new(DirtySet::new());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let set = Arc::clone(&set);
            std::thread::spawn(move || {
                for offset in 0..100 {
                    set.record(FrameKey::new(0, offset * 0x1000));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(set.len(), 100);
}

#[test]
fn start_requires_the_facility() {
    let mut platform = FakePlatform::new();
    platform.facility_enabled = false;

    let mut session = TrackingSession::new();
    assert_eq!(session.start(&mut platform).unwrap_err(), TrackError::FacilityDisabled);
    assert!(!session.is_active());
    assert!(session.dirty_set().is_none());
}

#[test]
fn start_twice_is_an_error() {
    let mut platform = FakePlatform::new();
    let mut session = TrackingSession::new();

    session.start(&mut platform).unwrap();
    assert_eq!(session.start(&mut platform).unwrap_err(), TrackError::AlreadyActive);
    assert!(session.is_active());
}

#[test]
fn backend_start_failure_rolls_back() {
    let mut platform = FakePlatform::new();
    platform.fail_start = true;

    let mut session = TrackingSession::new();
    assert_eq!(
        session.start(&mut platform).unwrap_err(),
        TrackError::Backend(BackendError::Busy)
    );
    assert!(!session.is_active());
    assert!(session.dirty_set().is_none());
    assert!(!platform.tracking);
}

#[test]
fn stop_without_start_has_no_side_effects() {
    let mut platform = FakePlatform::new();
    let mut session = TrackingSession::new();

    assert_eq!(session.stop(&mut platform).unwrap_err(), TrackError::NotActive);
    assert_eq!(platform.syncs, 0);
    assert!(session.dirty_set().is_none());
}

#[test]
fn stop_syncs_then_stops_the_backend() {
    let mut platform = FakePlatform::new();
    let mut session = TrackingSession::new();

    session.start(&mut platform).unwrap();
    assert_eq!(session.generation_id(), Some(1));
    platform.touch(1, 0x1000);

    session.stop(&mut platform).unwrap();
    assert!(!session.is_active());
    assert!(!platform.tracking);
    assert_eq!(platform.syncs, 1);

    // The set is retained for export after the session ends.
    assert_eq!(session.dirty_set().unwrap().len(), 1);
}

#[test]
fn topology_drift_is_reported_but_stop_completes() {
    let mut platform = FakePlatform::new();
    let mut session = TrackingSession::new();

    session.start(&mut platform).unwrap();
    platform.generation += 1;

    assert_eq!(
        session.stop(&mut platform).unwrap_err(),
        TrackError::TopologyChanged { expected: 1, found: 2 }
    );
    assert!(!session.is_active());
    assert!(!platform.tracking);
    assert_eq!(platform.syncs, 1);
}

#[test]
fn export_writes_a_fresh_file_and_consumes_the_set() {
    let dir = test_dir("export");
    let mut platform = FakePlatform::new();
    let mut session = TrackingSession::new();

    session.start(&mut platform).unwrap();
    platform.touch(1, 0x1000);
    platform.touch(2, 0x2000);
    session.stop(&mut platform).unwrap();

    let path = session.export(&dir).unwrap();
    assert!(path.file_name().unwrap().to_str().unwrap().starts_with("dirty_log_"));

    let mut lines: Vec<String> =
        std::fs::read_to_string(&path).unwrap().lines().map(|line| line.to_owned()).collect();
    lines.sort();
    assert_eq!(lines, vec![
        "0x00000001 0x0000000000001000".to_owned(),
        "0x00000002 0x0000000000002000".to_owned(),
    ]);
    assert!(session.dirty_set().is_none());
}

#[test]
fn export_never_overwrites_an_existing_file() {
    let dir = test_dir("export-collision");
    let set = DirtySet::new();
    set.record(FrameKey::new(1, 0x1000));

    let path = crate::export::export_dirty_log(&set, &dir).unwrap();
    // A second export within the same second lands on the same name and must fail rather
    // than truncate the first file.
    match crate::export::export_dirty_log(&set, &dir) {
        Err(err) => assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists),
        Ok(other) => assert_ne!(other, path),
    }
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "0x00000001 0x0000000000001000\n");
}

#[test]
#[should_panic(expected = "no dirty set to export")]
fn export_without_a_session_is_a_logic_error() {
    let mut session = TrackingSession::new();
    let _ = session.export(&std::env::temp_dir());
}

#[test]
fn restart_supersedes_an_unexported_set() {
    let mut platform = FakePlatform::new();
    let mut session = TrackingSession::new();

    session.start(&mut platform).unwrap();
    platform.touch(1, 0x1000);
    session.stop(&mut platform).unwrap();
    assert_eq!(session.dirty_set().unwrap().len(), 1);

    // Starting again without exporting drops the stale set.
    session.start(&mut platform).unwrap();
    assert!(session.dirty_set().unwrap().is_empty());
}
