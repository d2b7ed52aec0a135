//! Per-session action log files.
//!
//! Each session can append a timestamped line for every dispatched action and
//! its outcome, so operators can reconstruct what a remote desktop was told
//! to do. Separate from the `log` facade, which carries process-level
//! diagnostics.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::Utc;

/// Thread-safe handle to an append-only log file. `None` when file logging
/// is disabled.
pub type LogHandle = Arc<Mutex<Option<File>>>;

/// Write a timestamped line to the session log (if present).
///
/// `direction` tags the line: `ACTION`, `RESULT`, or `ERROR`.
pub fn log_line(handle: &LogHandle, direction: &str, data: &str) {
    if let Ok(mut guard) = handle.lock() {
        if let Some(ref mut file) = *guard {
            let ts = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
            let _ = writeln!(file, "[{}] {}: {}", ts, direction, data);
            let _ = file.flush();
        }
    }
}

/// Open (or create) `{log_dir}/{session_id}.log` and return a shared handle.
///
/// Returns an empty handle when `log_dir` is `None` or the file cannot be
/// opened; logging failures never fail the session.
pub fn open_session_log(log_dir: Option<&str>, session_id: &str) -> LogHandle {
    let file = log_dir.and_then(|dir| {
        std::fs::create_dir_all(dir).ok()?;
        let path = Path::new(dir).join(format!("{}.log", session_id));
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    Arc::new(Mutex::new(file))
}
