/// Integration tests for tidymove
///
/// These tests drive the library end to end against real temporary trees:
/// scan, plan, move, record, and revert.
///
/// Test categories:
/// 1. Dry runs leave the tree untouched
/// 2. Live runs and undo
/// 3. Collisions, caps and exclusions
/// 4. Duplicate detection
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tidymove::config::{OrganizerConfig, ScanMode};
use tidymove::duplicates::KeepStrategy;
use tidymove::guard::ExclusionReason;
use tidymove::organizer::Organizer;
use tidymove::scanner::ScanStatus;
use walkdir::WalkDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// A temporary workspace with an `inbox` to organize, a `sorted` destination
/// and a `state` directory holding the ledger and activity log.
struct TestFixture {
    temp_dir: TempDir,
}

impl TestFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir_all(temp_dir.path().join("inbox")).expect("Failed to create inbox");
        TestFixture { temp_dir }
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    fn inbox(&self) -> PathBuf {
        self.path().join("inbox")
    }

    fn sorted(&self) -> PathBuf {
        self.path().join("sorted")
    }

    /// Create a file (and its parent directories) relative to the workspace.
    fn create_file(&self, rel_path: &str, content: &[u8]) {
        let file_path = self.path().join(rel_path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        let mut file = File::create(&file_path).expect("Failed to create file");
        file.write_all(content).expect("Failed to write file content");
    }

    /// Base configuration: one root, no size floor, state outside the root.
    fn config(&self) -> OrganizerConfig {
        let mut config = OrganizerConfig::default();
        config.scan.roots = vec![self.inbox()];
        config.scan.min_bytes = 0;
        config.destination.root = Some(self.sorted());
        config.state.ledger = Some(self.path().join("state/ledger.jsonl"));
        config.state.activity_log = Some(self.path().join("state/activity.log"));
        config
    }

    fn organizer(&self, tweak: impl FnOnce(&mut OrganizerConfig)) -> Organizer {
        let mut config = self.config();
        tweak(&mut config);
        Organizer::new(config.validate().expect("Configuration should validate"))
            .expect("Failed to build organizer")
    }

    /// Every regular file under `dir` with its bytes, keyed by relative path.
    fn snapshot(&self, dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(dir).expect("under dir").to_path_buf();
                (rel, fs::read(e.path()).expect("readable"))
            })
            .collect()
    }

    fn assert_file_exists(&self, rel_path: &str) {
        let path = self.path().join(rel_path);
        assert!(path.is_file(), "File should exist: {}", path.display());
    }

    fn assert_file_not_exists(&self, rel_path: &str) {
        let path = self.path().join(rel_path);
        assert!(!path.exists(), "File should not exist: {}", path.display());
    }
}

// ============================================================================
// Dry runs
// ============================================================================

#[test]
fn test_dry_run_plans_without_touching_anything() {
    let fixture = TestFixture::new();
    fixture.create_file("inbox/notes.txt", b"meeting notes");
    fixture.create_file("inbox/photo.jpg", b"not a real jpeg");
    fixture.create_file("inbox/node_modules/dep/index.js", b"module.exports = 1;");

    let before = fixture.snapshot(&fixture.inbox());
    let organizer = fixture.organizer(|c| c.run.dry_run = true);
    let report = organizer.run().expect("Dry run should succeed");

    assert!(report.dry_run);
    assert!(report.session.is_none(), "Dry runs open no session");
    assert_eq!(report.would_move().count(), 2);
    assert_eq!(report.committed().count(), 0);
    assert!(
        report
            .excluded
            .iter()
            .any(|e| e.reason == ExclusionReason::ProtectedPath
                && e.path.ends_with("node_modules")),
        "node_modules should be reported as protected"
    );

    assert_eq!(fixture.snapshot(&fixture.inbox()), before);
    assert!(!fixture.sorted().exists(), "Dry run must not create folders");
}

#[test]
fn test_dry_run_previews_distinct_destinations_for_same_name() {
    let fixture = TestFixture::new();
    fixture.create_file("inbox/a/report.pdf", b"first report");
    fixture.create_file("inbox/b/report.pdf", b"second report!");

    let organizer = fixture.organizer(|c| c.run.dry_run = true);
    let report = organizer.run().expect("Dry run should succeed");

    let mut destinations: Vec<PathBuf> =
        report.would_move().map(|r| r.destination.clone()).collect();
    destinations.sort();
    destinations.dedup();
    assert_eq!(destinations.len(), 2, "Each planned move needs its own target");
}

// ============================================================================
// Live runs and undo
// ============================================================================

#[test]
fn test_live_run_then_undo_restores_everything() {
    let fixture = TestFixture::new();
    fixture.create_file("inbox/notes.txt", b"meeting notes");
    fixture.create_file("inbox/photo.jpg", b"not a real jpeg");
    fixture.create_file("inbox/music/song.mp3", b"la la la");
    let before = fixture.snapshot(&fixture.inbox());

    let organizer = fixture.organizer(|c| c.run.dry_run = false);
    let report = organizer.run().expect("Live run should succeed");
    let session = report.session.expect("Live runs record a session");
    assert_eq!(report.committed().count(), 3);
    fixture.assert_file_exists("sorted/Documents/notes.txt");
    fixture.assert_file_exists("sorted/Images/photo.jpg");
    fixture.assert_file_exists("sorted/Audio/song.mp3");
    fixture.assert_file_not_exists("inbox/notes.txt");

    let mut ledger = organizer.open_ledger().expect("Ledger should open");
    let undo = ledger.undo(session).expect("Undo should run");
    assert_eq!(undo.succeeded, 3);
    assert!(undo.is_complete_success());
    assert_eq!(fixture.snapshot(&fixture.inbox()), before);

    let again = ledger.undo(session).expect("Second undo should run");
    assert_eq!(again.succeeded, 0);
    assert_eq!(again.failed, 0);
}

#[test]
fn test_undo_survives_reopening_the_ledger() {
    let fixture = TestFixture::new();
    fixture.create_file("inbox/notes.txt", b"meeting notes");

    let session = {
        let organizer = fixture.organizer(|c| c.run.dry_run = false);
        organizer.run().expect("Live run").session.expect("session")
    };

    let organizer = fixture.organizer(|c| c.run.dry_run = false);
    let mut ledger = organizer.open_ledger().expect("Ledger should reopen");
    assert_eq!(ledger.latest_undoable(), Some(session));
    let undo = ledger.undo(session).expect("Undo should run");
    assert_eq!(undo.succeeded, 1);
    fixture.assert_file_exists("inbox/notes.txt");
    assert_eq!(ledger.latest_undoable(), None);
}

#[test]
fn test_activity_log_records_moves() {
    let fixture = TestFixture::new();
    fixture.create_file("inbox/notes.txt", b"meeting notes");

    let organizer = fixture.organizer(|c| c.run.dry_run = false);
    organizer.run().expect("Live run");

    let log = fs::read_to_string(fixture.path().join("state/activity.log")).expect("log");
    assert!(log.contains("[COMPLETED]"), "log was: {log}");
    assert!(log.contains("notes.txt"));
}

// ============================================================================
// Collisions, caps and exclusions
// ============================================================================

#[test]
fn test_collision_gets_numbered_suffix() {
    let fixture = TestFixture::new();
    fixture.create_file("first/report.pdf", b"first report");
    fixture.create_file("second/report.pdf", b"second report!");

    let organizer = fixture.organizer(|c| {
        c.scan.mode = ScanMode::MultiFolder;
        c.scan.roots = vec![fixture.path().join("first"), fixture.path().join("second")];
        c.run.dry_run = false;
    });
    let report = organizer.run().expect("Live run should succeed");

    assert_eq!(report.committed().count(), 2);
    assert_eq!(
        fs::read(fixture.sorted().join("Documents/report.pdf")).expect("direct"),
        b"first report"
    );
    assert_eq!(
        fs::read(fixture.sorted().join("Documents/report (2).pdf")).expect("suffixed"),
        b"second report!"
    );
}

#[test]
fn test_scan_cap_stops_after_limit() {
    let fixture = TestFixture::new();
    for i in 0..5 {
        fixture.create_file(&format!("inbox/file{i}.txt"), format!("content {i}").as_bytes());
    }

    let organizer = fixture.organizer(|c| c.scan.max_files = 2);
    let report = organizer.run().expect("Dry run should succeed");

    assert_eq!(report.scan_status, ScanStatus::CapReached { cap: 2 });
    assert_eq!(report.records.len(), 2);
}

#[test]
fn test_excluded_files_are_never_moved() {
    let fixture = TestFixture::new();
    fixture.create_file("inbox/setup.exe", b"MZ binary");
    fixture.create_file("inbox/.hidden.txt", b"secret");
    fixture.create_file("inbox/notes.txt", b"meeting notes");

    let organizer = fixture.organizer(|c| c.run.dry_run = false);
    let report = organizer.run().expect("Live run should succeed");

    assert_eq!(report.committed().count(), 1);
    fixture.assert_file_exists("inbox/setup.exe");
    fixture.assert_file_exists("inbox/.hidden.txt");
    assert!(
        report
            .excluded
            .iter()
            .any(|e| e.reason == ExclusionReason::ProtectedExtension)
    );
}

#[test]
fn test_size_floor_excludes_small_files() {
    let fixture = TestFixture::new();
    fixture.create_file("inbox/tiny.txt", b"x");
    fixture.create_file("inbox/big.txt", &[b'a'; 2048]);

    let organizer = fixture.organizer(|c| c.scan.min_bytes = 1024);
    let report = organizer.run().expect("Dry run should succeed");

    assert_eq!(report.would_move().count(), 1);
    assert!(
        report
            .excluded
            .iter()
            .any(|e| e.reason == ExclusionReason::SizeOutOfRange && e.path.ends_with("tiny.txt"))
    );
}

#[test]
fn test_folder_rules_override_type_categories() {
    let fixture = TestFixture::new();
    fixture.create_file("inbox/taxes/2024.pdf", b"return");

    let organizer = fixture.organizer(|c| {
        c.run.dry_run = false;
        c.categories
            .folders
            .insert("taxes".to_string(), "Finance".to_string());
    });
    organizer.run().expect("Live run should succeed");

    fixture.assert_file_exists("sorted/Finance/2024.pdf");
}

// ============================================================================
// Duplicates
// ============================================================================

#[test]
fn test_duplicates_grouped_by_content() {
    let fixture = TestFixture::new();
    fixture.create_file("inbox/a.txt", b"same bytes");
    fixture.create_file("inbox/b.txt", b"same bytes");
    fixture.create_file("inbox/c.txt", b"diff bytes");

    let organizer = fixture.organizer(|_| {});
    let scan = organizer.scan();
    let report = organizer
        .duplicates(&scan, KeepStrategy::ShortestName, false)
        .expect("Duplicate search should succeed");

    assert_eq!(report.resolution.sets.len(), 1);
    let set = &report.resolution.sets[0];
    let names: Vec<String> = set.members.iter().map(|m| m.file_name()).collect();
    assert!(names.contains(&"a.txt".to_string()));
    assert!(names.contains(&"b.txt".to_string()));
    assert_eq!(report.decisions[0].remove.len(), 1);

    // Nothing moves without relocation.
    fixture.assert_file_exists("inbox/a.txt");
    fixture.assert_file_exists("inbox/b.txt");
    assert!(report.records.is_empty());
}
