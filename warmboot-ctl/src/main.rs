use std::{
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use warmboot_reload::{
    loopback::LoopbackPlatform,
    monitor::{self, Command},
    HotReloadCoordinator, VmControl,
};

struct Config {
    /// Directory receiving `dirty_log_*` exports.
    export_dir: PathBuf,

    /// Snapshot names pre-registered with the loopback platform.
    snapshots: Vec<String>,
}

impl Config {
    fn load() -> anyhow::Result<Self> {
        let export_dir = match std::env::var_os("WARMBOOT_EXPORT_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir().context("failed to resolve working directory")?,
        };
        anyhow::ensure!(
            export_dir.is_dir(),
            "export directory {} does not exist",
            export_dir.display()
        );

        let snapshots: Vec<String> = match std::env::var("WARMBOOT_SNAPSHOTS") {
            Ok(list) => list
                .split(',')
                .map(|name| name.trim().to_owned())
                .filter(|name| !name.is_empty())
                .collect(),
            Err(_) => vec!["boot".to_owned()],
        };

        Ok(Self { export_dir, snapshots })
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("WARMBOOT_LOG"))
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;
    tracing::debug!("registered snapshots: {:?}", config.snapshots);

    let mut platform = LoopbackPlatform::new();
    for name in &config.snapshots {
        platform.add_snapshot(name);
    }
    let mut coordinator = HotReloadCoordinator::new(platform);

    eprintln!(
        "[warmboot] console ready, {} snapshot(s) registered, exporting to {}",
        config.snapshots.len(),
        config.export_dir.display()
    );

    let stdin = std::io::stdin();
    let mut out = std::io::stdout();
    let mut line = String::new();
    loop {
        write!(out, "(warmboot) ")?;
        out.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        match input {
            "" => continue,
            "q" | "quit" => break,
            "help" => print_help(&mut out)?,
            _ => handle_line(&mut coordinator, input, &config.export_dir, &mut out)?,
        }
    }

    Ok(())
}

fn handle_line(
    co: &mut HotReloadCoordinator<LoopbackPlatform>,
    input: &str,
    export_dir: &Path,
    out: &mut impl Write,
) -> std::io::Result<()> {
    if let Some(cmd) = Command::parse(input) {
        return monitor::dispatch(co, &cmd, export_dir, out);
    }

    // Anything else drives the loopback platform itself.
    let mut parts = input.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("touch"), Some(slot), Some(offset)) => {
            match (parse_u64_with_prefix(slot), parse_u64_with_prefix(offset)) {
                (Some(slot), Some(offset)) if slot <= u32::MAX as u64 => {
                    co.platform().touch(slot as u32, offset);
                    writeln!(out, "Dirtied frame 0x{slot:08x} 0x{offset:016x}")
                }
                _ => writeln!(out, "Error: usage: touch <slot> <offset>"),
            }
        }
        (Some("hotplug"), None, None) => {
            co.platform_mut().hotplug();
            writeln!(out, "Topology generation bumped")
        }
        (Some("snap"), Some(name), None) => {
            co.platform_mut().add_snapshot(name);
            writeln!(out, "Snapshot {name} registered")
        }
        (Some("state"), None, None) => writeln!(
            out,
            "state={:?} pending={:?} tracking={} run_state={:?}",
            co.state(),
            co.pending_snapshot(),
            co.session().is_active(),
            co.platform().run_state(),
        ),
        _ => writeln!(out, "Error: unknown command, try `help`"),
    }
}

fn print_help(out: &mut impl Write) -> std::io::Result<()> {
    writeln!(
        out,
        "commands:\n  \
         track-start            start dirty-frame tracking\n  \
         track-stop             stop tracking and export the dirty log\n  \
         prepare <snapshot>     load a snapshot and arm hot reload\n  \
         reload                 hot reload the armed snapshot\n  \
         touch <slot> <offset>  simulate a guest write\n  \
         hotplug                simulate a processor topology change\n  \
         snap <name>            register a loadable snapshot\n  \
         state                  show coordinator state\n  \
         quit"
    )
}

/// Parse a u64 with either no prefix (decimal), '0x' prefix (hex), or '0b' (binary).
fn parse_u64_with_prefix(value: &str) -> Option<u64> {
    if value.len() < 2 {
        return value.parse().ok();
    }

    let (value, radix) = match &value[0..2] {
        "0x" => (&value[2..], 16),
        "0b" => (&value[2..], 2),
        _ => (value, 10),
    };

    u64::from_str_radix(value, radix).ok()
}
