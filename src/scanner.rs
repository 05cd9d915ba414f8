//! Directory scanning.
//!
//! The scanner walks each configured root, asks the [`PathGuard`] about every
//! entry, and yields a [`FileDescriptor`] for each eligible file. Excluded
//! directories are pruned and reported once. A hard cap bounds the number of
//! files yielded per scan; hitting it is a status, not an error.

use crate::cancel::CancelFlag;
use crate::config::ValidatedConfig;
use crate::guard::{ExclusionReason, PathGuard, Verdict};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// How long a volume may take to list its root before it is skipped.
const VOLUME_LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of one file taken at scan time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub size: u64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// Lower-cased extension from the file name, without the dot.
    pub extension: Option<String>,
    /// MIME type detected from the content, when sniffed.
    pub content_type: Option<String>,
}

impl FileDescriptor {
    pub fn from_metadata(path: &Path, metadata: &Metadata) -> Self {
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        // Not every filesystem records a birth time.
        let created = metadata.created().unwrap_or(modified);

        Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            created: created.into(),
            modified: modified.into(),
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase()),
            content_type: None,
        }
    }

    /// Stat `path` and build a descriptor for it.
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self::from_metadata(path, &metadata))
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Fill `content_type` from the file's leading bytes.
    pub fn sniff(mut self) -> Self {
        if let Ok(Some(kind)) = infer::get_from_path(&self.path) {
            self.content_type = Some(kind.mime_type().to_string());
        }
        self
    }
}

/// An entry the scanner did not yield, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub path: PathBuf,
    pub reason: ExclusionReason,
    pub detail: Option<String>,
}

/// One step of a root walk.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Eligible(FileDescriptor),
    Excluded(Exclusion),
}

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ScanStatus {
    Complete,
    /// More eligible files existed than the cap allowed.
    CapReached { cap: usize },
    Cancelled,
}

/// Everything one scan produced.
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// Eligible files in discovery order.
    pub files: Vec<FileDescriptor>,
    pub excluded: Vec<Exclusion>,
    pub status: ScanStatus,
    /// Entries looked at, eligible or not (pruned directories count once).
    pub examined: usize,
}

impl ScanReport {
    pub fn excluded_by(&self, reason: ExclusionReason) -> usize {
        self.excluded.iter().filter(|e| e.reason == reason).count()
    }
}

/// Lazy walk of a single root. Recreate it with [`Scanner::walk_root`] to restart.
pub struct RootScan<'a> {
    guard: &'a PathGuard,
    walker: walkdir::IntoIter,
}

impl Iterator for RootScan<'_> {
    type Item = ScanEvent;

    fn next(&mut self) -> Option<ScanEvent> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    warn!(path = %path.display(), error = %err, "skipping unreadable entry");
                    return Some(ScanEvent::Excluded(Exclusion {
                        path,
                        reason: ExclusionReason::AccessDenied,
                        detail: Some(err.to_string()),
                    }));
                }
            };

            let path = entry.path();
            let file_type = entry.file_type();

            if file_type.is_dir() {
                if entry.depth() == 0 {
                    continue;
                }
                if let Some(reason) = self.guard.directory_exclusion(path) {
                    debug!(path = %path.display(), %reason, "pruning directory");
                    self.walker.skip_current_dir();
                    return Some(ScanEvent::Excluded(Exclusion {
                        path: path.to_path_buf(),
                        reason,
                        detail: None,
                    }));
                }
                continue;
            }

            if !file_type.is_file() {
                return Some(ScanEvent::Excluded(Exclusion {
                    path: path.to_path_buf(),
                    reason: ExclusionReason::ProtectedPath,
                    detail: Some("not a regular file".to_string()),
                }));
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    return Some(ScanEvent::Excluded(Exclusion {
                        path: path.to_path_buf(),
                        reason: ExclusionReason::AccessDenied,
                        detail: Some(err.to_string()),
                    }));
                }
            };

            return Some(match self.guard.is_eligible(path, &metadata) {
                Verdict::Eligible => {
                    ScanEvent::Eligible(FileDescriptor::from_metadata(path, &metadata))
                }
                Verdict::Excluded(reason) => {
                    debug!(path = %path.display(), %reason, "excluded");
                    ScanEvent::Excluded(Exclusion {
                        path: path.to_path_buf(),
                        reason,
                        detail: None,
                    })
                }
            });
        }
    }
}

/// Walks roots under a guard, enforcing the file cap.
#[derive(Debug, Clone)]
pub struct Scanner<'a> {
    guard: &'a PathGuard,
    roots: Vec<PathBuf>,
    max_files: usize,
    follow_links: bool,
    same_file_system: bool,
    sniff_content: bool,
}

#[derive(Default)]
struct RootOutcome {
    files: Vec<FileDescriptor>,
    excluded: Vec<Exclusion>,
    examined: usize,
    cap_hit: bool,
    cancelled: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(guard: &'a PathGuard, roots: Vec<PathBuf>) -> Self {
        Self {
            guard,
            roots,
            max_files: usize::MAX,
            follow_links: false,
            same_file_system: false,
            sniff_content: false,
        }
    }

    pub fn from_config(config: &'a ValidatedConfig) -> Self {
        let scan = &config.settings.scan;
        Self::new(&config.guard, config.roots.clone())
            .with_cap(scan.max_files)
            .follow_links(scan.follow_links)
            .sniff_content(scan.sniff_content)
            // Whole-disk scans list every mount as its own root.
            .same_file_system(scan.mode == crate::config::ScanMode::FullPc)
    }

    pub fn with_cap(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    pub fn follow_links(mut self, yes: bool) -> Self {
        self.follow_links = yes;
        self
    }

    pub fn same_file_system(mut self, yes: bool) -> Self {
        self.same_file_system = yes;
        self
    }

    pub fn sniff_content(mut self, yes: bool) -> Self {
        self.sniff_content = yes;
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Start (or restart) a lazy walk of one root.
    pub fn walk_root(&self, root: &Path) -> RootScan<'a> {
        let walker = WalkDir::new(root)
            .follow_links(self.follow_links)
            .same_file_system(self.same_file_system)
            .sort_by_file_name()
            .into_iter();
        RootScan {
            guard: self.guard,
            walker,
        }
    }

    /// Walk every root (in parallel) and collect the results in root order.
    pub fn scan(&self, cancel: &CancelFlag) -> ScanReport {
        let accepted = AtomicUsize::new(0);
        let cap_reached = AtomicBool::new(false);

        let outcomes: Vec<RootOutcome> = self
            .roots
            .par_iter()
            .map(|root| self.scan_root(root, &accepted, &cap_reached, cancel))
            .collect();

        let mut report = ScanReport {
            files: Vec::new(),
            excluded: Vec::new(),
            status: ScanStatus::Complete,
            examined: 0,
        };
        let mut cancelled = false;
        let mut cap_hit = false;
        for outcome in outcomes {
            report.files.extend(outcome.files);
            report.excluded.extend(outcome.excluded);
            report.examined += outcome.examined;
            cancelled |= outcome.cancelled;
            cap_hit |= outcome.cap_hit;
        }

        report.status = if cancelled {
            ScanStatus::Cancelled
        } else if cap_hit {
            warn!(cap = self.max_files, "scan cap reached, remaining files not scanned");
            ScanStatus::CapReached {
                cap: self.max_files,
            }
        } else {
            ScanStatus::Complete
        };

        info!(
            eligible = report.files.len(),
            excluded = report.excluded.len(),
            status = ?report.status,
            "scan finished"
        );
        report
    }

    fn scan_root(
        &self,
        root: &Path,
        accepted: &AtomicUsize,
        cap_reached: &AtomicBool,
        cancel: &CancelFlag,
    ) -> RootOutcome {
        let mut outcome = RootOutcome::default();
        info!(root = %root.display(), "scanning");

        for event in self.walk_root(root) {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            if cap_reached.load(Ordering::SeqCst) {
                break;
            }

            outcome.examined += 1;
            match event {
                ScanEvent::Excluded(exclusion) => outcome.excluded.push(exclusion),
                ScanEvent::Eligible(descriptor) => {
                    let reserved = accepted
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                            (n < self.max_files).then_some(n + 1)
                        })
                        .is_ok();
                    if !reserved {
                        cap_reached.store(true, Ordering::SeqCst);
                        outcome.cap_hit = true;
                        break;
                    }
                    outcome.files.push(if self.sniff_content {
                        descriptor.sniff()
                    } else {
                        descriptor
                    });
                }
            }
        }

        outcome
    }
}

/// Roots resolved for a run, plus volumes that had to be skipped.
#[derive(Debug, Clone, Default)]
pub struct RootSet {
    pub roots: Vec<PathBuf>,
    pub unavailable: Vec<(PathBuf, String)>,
}

/// Resolve `full_pc` roots: the given drives, or every mounted fixed drive.
///
/// A drive that cannot be listed within the listing timeout is skipped with a
/// warning; the remaining drives are still scanned.
pub fn resolve_drives(drives: &[PathBuf]) -> RootSet {
    let candidates = if drives.is_empty() {
        fixed_drives()
    } else {
        drives.to_vec()
    };

    let mut set = RootSet::default();
    for drive in candidates {
        match check_volume(&drive, VOLUME_LIST_TIMEOUT) {
            Ok(()) => set.roots.push(drive),
            Err(reason) => {
                warn!(drive = %drive.display(), %reason, "skipping volume");
                set.unavailable.push((drive, reason));
            }
        }
    }
    set
}

/// List the volume root on a helper thread so a hung mount cannot block the run.
fn check_volume(path: &Path, timeout: Duration) -> Result<(), String> {
    let (tx, rx) = mpsc::channel();
    let target = path.to_path_buf();
    thread::spawn(move || {
        let result = fs::read_dir(&target).map(|_| ()).map_err(|e| e.to_string());
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            Err(format!("timed out after {}s", timeout.as_secs()))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err("volume check thread failed".to_string()),
    }
}

#[cfg(windows)]
fn fixed_drives() -> Vec<PathBuf> {
    ('A'..='Z')
        .map(|letter| PathBuf::from(format!("{letter}:\\")))
        .filter(|drive| drive.exists())
        .collect()
}

#[cfg(not(windows))]
fn fixed_drives() -> Vec<PathBuf> {
    const VIRTUAL_FS: &[&str] = &["squashfs", "tmpfs", "devtmpfs", "overlay", "ramfs"];

    let mounts = fs::read_to_string("/proc/mounts").unwrap_or_default();
    let mut drives: Vec<PathBuf> = mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            (device.starts_with("/dev/") && !VIRTUAL_FS.contains(&fs_type))
                .then(|| PathBuf::from(mount_point.replace("\\040", " ")))
        })
        .collect();
    drives.sort();
    drives.dedup();

    if drives.is_empty() {
        drives.push(PathBuf::from("/"));
    }
    drives
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{ExclusionRule, SizeBounds};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn guard() -> PathGuard {
        PathGuard::new(
            vec![
                ExclusionRule::segment("node_modules"),
                ExclusionRule::extension("exe"),
            ],
            SizeBounds::default(),
            false,
        )
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent");
        }
        fs::write(path, content).expect("Failed to write file");
    }

    #[test]
    fn test_scan_yields_each_eligible_file_once() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        write(root, "a.txt", "a");
        write(root, "nested/b.txt", "b");
        write(root, "nested/deeper/c.txt", "c");

        let guard = guard();
        let report = Scanner::new(&guard, vec![root.to_path_buf()]).scan(&CancelFlag::new());

        assert_eq!(report.status, ScanStatus::Complete);
        let unique: HashSet<_> = report.files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(report.files.len(), 3);
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_excluded_entries_never_yielded() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        write(root, "keep.txt", "k");
        write(root, "setup.exe", "binary");
        write(root, "node_modules/pkg/index.js", "js");
        write(root, ".hidden/secret.txt", "s");

        let guard = guard();
        let report = Scanner::new(&guard, vec![root.to_path_buf()]).scan(&CancelFlag::new());

        assert_eq!(report.files.len(), 1);
        assert!(report.files[0].path.ends_with("keep.txt"));
        assert_eq!(report.excluded_by(ExclusionReason::ProtectedExtension), 1);
        // node_modules and .hidden are pruned and reported as directories.
        assert_eq!(report.excluded_by(ExclusionReason::ProtectedPath), 2);
        assert!(
            report
                .excluded
                .iter()
                .all(|e| !e.path.ends_with("index.js") && !e.path.ends_with("secret.txt"))
        );
    }

    #[test]
    fn test_cap_reports_status_instead_of_truncating_silently() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        for i in 0..5 {
            write(root, &format!("file{i}.txt"), "x");
        }

        let guard = guard();
        let report = Scanner::new(&guard, vec![root.to_path_buf()])
            .with_cap(2)
            .scan(&CancelFlag::new());

        assert_eq!(report.files.len(), 2);
        assert_eq!(report.status, ScanStatus::CapReached { cap: 2 });
    }

    #[test]
    fn test_cap_equal_to_file_count_is_complete() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        write(root, "one.txt", "1");
        write(root, "two.txt", "2");

        let guard = guard();
        let report = Scanner::new(&guard, vec![root.to_path_buf()])
            .with_cap(2)
            .scan(&CancelFlag::new());

        assert_eq!(report.files.len(), 2);
        assert_eq!(report.status, ScanStatus::Complete);
    }

    #[test]
    fn test_cancelled_scan_stops() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        write(temp_dir.path(), "a.txt", "a");

        let cancel = CancelFlag::new();
        cancel.cancel();
        let guard = guard();
        let report = Scanner::new(&guard, vec![temp_dir.path().to_path_buf()]).scan(&cancel);

        assert_eq!(report.status, ScanStatus::Cancelled);
        assert!(report.files.is_empty());
    }

    #[test]
    fn test_multiple_roots_merge_in_root_order() {
        let first = TempDir::new().expect("Failed to create temp directory");
        let second = TempDir::new().expect("Failed to create temp directory");
        write(first.path(), "from_first.txt", "1");
        write(second.path(), "from_second.txt", "2");

        let guard = guard();
        let report = Scanner::new(
            &guard,
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
        )
        .scan(&CancelFlag::new());

        assert_eq!(report.files.len(), 2);
        assert!(report.files[0].path.ends_with("from_first.txt"));
        assert!(report.files[1].path.ends_with("from_second.txt"));
    }

    #[test]
    fn test_walk_root_is_restartable() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        write(temp_dir.path(), "a.txt", "a");
        write(temp_dir.path(), "b.txt", "b");

        let guard = guard();
        let scanner = Scanner::new(&guard, vec![temp_dir.path().to_path_buf()]);
        let first: Vec<_> = scanner.walk_root(temp_dir.path()).collect();
        let second: Vec<_> = scanner.walk_root(temp_dir.path()).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_descriptor_captures_extension_and_size() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        write(temp_dir.path(), "Report.PDF", "%PDF-1.4\n");

        let descriptor = FileDescriptor::read(&temp_dir.path().join("Report.PDF"))
            .expect("descriptor")
            .sniff();
        assert_eq!(descriptor.extension.as_deref(), Some("pdf"));
        assert_eq!(descriptor.size, 9);
        assert_eq!(descriptor.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(descriptor.file_name(), "Report.PDF");
    }

    #[test]
    fn test_unreachable_drive_is_skipped() {
        let set = resolve_drives(&[PathBuf::from("/no/such/volume")]);
        assert!(set.roots.is_empty());
        assert_eq!(set.unavailable.len(), 1);
    }
}
