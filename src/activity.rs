//! Append-only, human-readable operation log.
//!
//! One line per event:
//!
//! ```text
//! 2025-01-05 14:03:22 [COMPLETED] MOVE: /home/u/Downloads/a.pdf -> /home/u/_Organized/Documents/a.pdf (Documents)
//! ```
//!
//! The crate never reads this file back; the ledger is what undo uses.

use chrono::Local;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityStatus {
    Excluded,
    DryRun,
    Completed,
    Failed,
    Skipped,
    Reversed,
    ReversalFailed,
    Backup,
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ActivityStatus::Excluded => "EXCLUDED",
            ActivityStatus::DryRun => "DRY_RUN",
            ActivityStatus::Completed => "COMPLETED",
            ActivityStatus::Failed => "FAILED",
            ActivityStatus::Skipped => "SKIPPED",
            ActivityStatus::Reversed => "REVERSED",
            ActivityStatus::ReversalFailed => "REVERSAL_FAILED",
            ActivityStatus::Backup => "BACKUP",
        };
        f.write_str(tag)
    }
}

/// Shared handle to the activity log file. Cloning shares the file.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    sink: Option<Arc<Mutex<File>>>,
    path: Option<PathBuf>,
}

impl ActivityLog {
    /// Open (creating parents as needed) `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            sink: Some(Arc::new(Mutex::new(file))),
            path: Some(path.to_path_buf()),
        })
    }

    /// A log that drops every entry.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one entry. Write failures are reported through `tracing` only.
    pub fn record(
        &self,
        status: ActivityStatus,
        operation: &str,
        source: &Path,
        destination: Option<&Path>,
        detail: Option<&str>,
    ) {
        let Some(sink) = &self.sink else {
            return;
        };

        let mut line = format!(
            "{} [{status}] {operation}: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            source.display()
        );
        if let Some(destination) = destination {
            line.push_str(&format!(" -> {}", destination.display()));
        }
        if let Some(detail) = detail {
            line.push_str(&format!(" ({detail})"));
        }

        let result = match sink.lock() {
            Ok(mut file) => writeln!(file, "{line}"),
            Err(poisoned) => writeln!(poisoned.into_inner(), "{line}"),
        };
        if let Err(err) = result {
            warn!(error = %err, "failed to write activity log entry");
        }
    }
}
