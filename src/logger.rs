//! Session logger: routes `tracing` output to a single file in the OS data directory.
//!
//! The file is **truncated (overwritten) at each launch**, so it only ever
//! contains output from the most-recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\DepthPaint\depthpaint.log`
//!   Linux:    `~/.local/share/DepthPaint/depthpaint.log`
//!   macOS:    `~/Library/Application Support/DepthPaint/depthpaint.log`
//!
//! Library code logs with the `tracing` macros; nothing is recorded until a
//! subscriber is installed by [`init`] or [`init_stderr`].

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::{Level, error, info};

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Install the file subscriber and a panic hook that mirrors panics into it.
/// Falls back to stderr when the log file cannot be opened. Calling this
/// after a subscriber is already installed does nothing.
pub fn init() {
    let path = log_file_path();

    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path);

    match file {
        Ok(f) => {
            let installed = tracing_subscriber::fmt()
                .with_writer(Mutex::new(f))
                .with_ansi(false)
                .with_max_level(Level::DEBUG)
                .try_init()
                .is_ok();
            if !installed {
                return;
            }
            let _ = LOG_PATH.set(path.clone());
        }
        Err(e) => {
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            init_stderr(false);
            return;
        }
    }

    info!("=== DepthPaint {} session started ===", env!("CARGO_PKG_VERSION"));
    info!("log file: {}", path.display());

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        error!("PANIC: {}", panic);
        prev(panic);
    }));
}

/// Log to stderr (headless/CLI use). `verbose` enables debug output.
pub fn init_stderr(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(verbose)
        .try_init();
}

fn log_file_path() -> PathBuf {
    data_dir().join("DepthPaint").join("depthpaint.log")
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}
