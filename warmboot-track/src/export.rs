use std::{
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::dirty::DirtySet;

/// Serializes `set` to a freshly created file in `dir`, named `dirty_log_<unix-seconds>`.
///
/// Every export goes to a new file: if a file with the same name already exists (two exports
/// within the same second), the create fails rather than overwriting earlier output.
pub fn export_dirty_log(set: &DirtySet, dir: &Path) -> std::io::Result<PathBuf> {
    let path = dir.join(format!("dirty_log_{}", unix_seconds()));
    let mut file = BufWriter::new(std::fs::File::create_new(&path)?);
    set.drain_to(&mut file)?;
    file.flush()?;
    Ok(path)
}

fn unix_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}
