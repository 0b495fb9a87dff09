use std::{io::Write, path::Path};

use warmboot_track::TrackError;

use crate::{coordinator::HotReloadCoordinator, Platform};

/// Commands accepted at the trigger boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    TrackStart,
    TrackStop,
    Prepare(String),
    Reload,
}

impl Command {
    /// Parses a single console line. Returns [None] for anything unrecognised.
    pub fn parse(line: &str) -> Option<Command> {
        let mut parts = line.split_whitespace();
        let cmd = match (parts.next()?, parts.next()) {
            ("track-start", None) => Command::TrackStart,
            ("track-stop", None) => Command::TrackStop,
            ("prepare", Some(name)) => Command::Prepare(name.to_owned()),
            ("reload", None) => Command::Reload,
            _ => return None,
        };
        match parts.next() {
            Some(_) => None,
            None => Some(cmd),
        }
    }
}

/// Executes `cmd` against the coordinator and writes exactly one acknowledgement or error
/// line to `out`. `export_dir` receives the dirty log written by a successful `track-stop`.
pub fn dispatch<P: Platform>(
    co: &mut HotReloadCoordinator<P>,
    cmd: &Command,
    export_dir: &Path,
    out: &mut impl Write,
) -> std::io::Result<()> {
    match cmd {
        Command::TrackStart => match co.start_tracking() {
            Ok(()) => writeln!(out, "Starting dirty log export"),
            Err(err) => writeln!(out, "Error: {err}"),
        },
        Command::TrackStop => match co.stop_tracking() {
            Ok(()) => match co.export(export_dir) {
                Ok(path) => {
                    writeln!(out, "Stopping dirty log export, log written to {}", path.display())
                }
                Err(err) => writeln!(out, "Error: failed to write the dirty log: {err}"),
            },
            // Topology drift does not abort the stop, so the log still gets exported.
            Err(err @ TrackError::TopologyChanged { .. }) => match co.export(export_dir) {
                Ok(path) => writeln!(out, "Error: {err} (log written to {})", path.display()),
                Err(io) => writeln!(out, "Error: {err} (writing the dirty log failed: {io})"),
            },
            Err(err) => writeln!(out, "Error: {err}"),
        },
        Command::Prepare(name) => match co.prepare(name) {
            Ok(()) => writeln!(out, "Prepared hot reload of {name}"),
            Err(err) => writeln!(out, "Error: {err}"),
        },
        Command::Reload => match co.reload() {
            Ok(()) => writeln!(out, "Hot reload complete"),
            Err(err) => writeln!(out, "Error: {err}"),
        },
    }
}
