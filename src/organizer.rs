//! Run pipeline: scan, optional duplicate review, move, close the session.

use crate::activity::{ActivityLog, ActivityStatus};
use crate::cancel::CancelFlag;
use crate::config::{ConfigError, ValidatedConfig};
use crate::duplicates::{DuplicateResolver, DuplicateStats, KeepStrategy, Resolution};
use crate::engine::{EngineError, MoveEngine};
use crate::file_category::{Categorizer, FileMapper};
use crate::scanner::{Exclusion, FileDescriptor, ScanReport, ScanStatus, Scanner};
use crate::undo::{LedgerError, MoveOutcome, MoveRecord, SessionId, SkipReason, UndoLedger};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum OrganizerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Cannot open activity log {}: {source}", .path.display())]
    ActivityLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Everything a run did or would do.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub session: Option<SessionId>,
    pub dry_run: bool,
    pub scan_status: ScanStatus,
    pub excluded: Vec<Exclusion>,
    pub unavailable_roots: Vec<(PathBuf, String)>,
    /// Duplicate relocations first, then organize moves, in execution order.
    pub records: Vec<MoveRecord>,
    pub duplicates: Option<DuplicateStats>,
    /// Files scanned but not reached because the run was cancelled.
    pub not_processed: usize,
}

impl RunReport {
    pub fn committed(&self) -> impl Iterator<Item = &MoveRecord> {
        self.records.iter().filter(|r| r.outcome.is_committed())
    }

    pub fn would_move(&self) -> impl Iterator<Item = &MoveRecord> {
        self.records.iter().filter(|r| {
            r.outcome
                == MoveOutcome::Skipped {
                    reason: SkipReason::DryRun,
                }
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = &MoveRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, MoveOutcome::Failed { .. }))
    }

    /// Moved (or would-move) files per category.
    pub fn category_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for record in self.committed().chain(self.would_move()) {
            let category = record.category.clone().unwrap_or_default();
            *counts.entry(category).or_insert(0) += 1;
        }
        counts
    }

    pub fn was_cancelled(&self) -> bool {
        self.scan_status == ScanStatus::Cancelled || self.not_processed > 0
    }
}

/// Keep/remove decision for one duplicate set.
#[derive(Debug, Clone)]
pub struct DuplicateDecision {
    pub keep: FileDescriptor,
    pub remove: Vec<FileDescriptor>,
}

#[derive(Debug)]
pub struct DuplicateReport {
    pub resolution: Resolution,
    pub decisions: Vec<DuplicateDecision>,
    pub session: Option<SessionId>,
    /// Relocation records, empty unless relocation was requested.
    pub records: Vec<MoveRecord>,
}

pub struct Organizer {
    config: ValidatedConfig,
    activity: ActivityLog,
    cancel: CancelFlag,
}

impl Organizer {
    /// Build an organizer and open its activity log.
    pub fn new(config: ValidatedConfig) -> Result<Self, OrganizerError> {
        let activity = ActivityLog::open(&config.activity_log_path).map_err(|source| {
            OrganizerError::ActivityLog {
                path: config.activity_log_path.clone(),
                source,
            }
        })?;
        Ok(Self {
            config,
            activity,
            cancel: CancelFlag::new(),
        })
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub fn open_ledger(&self) -> Result<UndoLedger, LedgerError> {
        Ok(UndoLedger::open(&self.config.ledger_path)?.with_activity_log(self.activity.clone()))
    }

    /// Scan every root and write exclusions to the activity log.
    pub fn scan(&self) -> ScanReport {
        let report = Scanner::from_config(&self.config).scan(&self.cancel);
        for exclusion in &report.excluded {
            self.activity.record(
                ActivityStatus::Excluded,
                "SCAN",
                &exclusion.path,
                None,
                Some(exclusion.reason.as_str()),
            );
        }
        report
    }

    /// Scan and organize with the default categorizer.
    pub fn run(&self) -> Result<RunReport, OrganizerError> {
        let scan = self.scan();
        let mapper = FileMapper::with_folder_rules(&self.config.settings.categories.folders);
        self.organize(&scan, Box::new(mapper), |_| {})
    }

    /// Move every scanned file. `on_record` sees each record as it is produced.
    ///
    /// A live run opens a session before the first move and always closes it,
    /// including after cancellation or a fatal ledger error.
    pub fn organize<'c>(
        &'c self,
        scan: &ScanReport,
        categorizer: Box<dyn Categorizer + 'c>,
        mut on_record: impl FnMut(&MoveRecord),
    ) -> Result<RunReport, OrganizerError> {
        let dry_run = self.config.dry_run();
        let engine = MoveEngine::new(
            &self.config,
            categorizer,
            self.open_ledger()?,
            self.activity.clone(),
        );
        let session = if dry_run {
            None
        } else {
            Some(engine.begin_session()?)
        };

        let mut report = RunReport {
            session,
            dry_run,
            scan_status: scan.status,
            excluded: scan.excluded.clone(),
            unavailable_roots: self.config.unavailable_roots.clone(),
            records: Vec::new(),
            duplicates: None,
            not_processed: 0,
        };

        let result = self.organize_files(&engine, scan, dry_run, &mut report, &mut on_record);
        let closed = engine.close_session();
        result?;
        closed?;

        info!(
            session = ?report.session,
            dry_run,
            moved = report.committed().count(),
            planned = report.would_move().count(),
            failed = report.failed().count(),
            "run finished"
        );
        Ok(report)
    }

    fn organize_files(
        &self,
        engine: &MoveEngine<'_>,
        scan: &ScanReport,
        dry_run: bool,
        report: &mut RunReport,
        on_record: &mut impl FnMut(&MoveRecord),
    ) -> Result<(), OrganizerError> {
        let mut relocated: HashSet<PathBuf> = HashSet::new();

        if self.config.settings.run.review_duplicates {
            let resolver = DuplicateResolver::new();
            let resolution = resolver.resolve(&scan.files);
            report.duplicates = Some(resolution.stats());

            let strategy = self.config.settings.run.keep_strategy;
            let to_review: Vec<&FileDescriptor> = resolution
                .sets
                .iter()
                .filter_map(|set| {
                    let keep = resolver.recommend_keep(set, strategy)?;
                    Some(resolver.to_remove(set, keep))
                })
                .flatten()
                .collect();

            for (index, descriptor) in to_review.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    report.not_processed = scan.files.len() - index;
                    warn!(
                        remaining = report.not_processed,
                        "run cancelled during duplicate review"
                    );
                    return Ok(());
                }
                let records =
                    engine.relocate_for_review(&[*descriptor], &self.config.review_root, dry_run)?;
                for record in records {
                    // A copy that could not be relocated is still organized below.
                    if left_source(&record) {
                        relocated.insert(record.source.clone());
                    }
                    on_record(&record);
                    report.records.push(record);
                }
            }
        }

        let pending: Vec<&FileDescriptor> = scan
            .files
            .iter()
            .filter(|f| !relocated.contains(&f.path))
            .collect();

        for (index, descriptor) in pending.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.not_processed = pending.len() - index;
                warn!(remaining = report.not_processed, "run cancelled");
                break;
            }
            let record = engine.process(descriptor, dry_run)?;
            on_record(&record);
            report.records.push(record);
        }
        Ok(())
    }

    /// Find duplicate sets among scanned files and decide what to keep.
    ///
    /// With `relocate`, non-kept copies are moved to the review root (a live
    /// relocation opens its own session). Nothing is deleted either way.
    pub fn duplicates(
        &self,
        scan: &ScanReport,
        strategy: KeepStrategy,
        relocate: bool,
    ) -> Result<DuplicateReport, OrganizerError> {
        let resolver = DuplicateResolver::new();
        let resolution = resolver.resolve(&scan.files);

        let decisions: Vec<DuplicateDecision> = resolution
            .sets
            .iter()
            .filter_map(|set| {
                let keep = resolver.recommend_keep(set, strategy)?;
                Some(DuplicateDecision {
                    keep: keep.clone(),
                    remove: resolver.to_remove(set, keep).into_iter().cloned().collect(),
                })
            })
            .collect();

        let mut report = DuplicateReport {
            resolution,
            decisions,
            session: None,
            records: Vec::new(),
        };
        if !relocate {
            return Ok(report);
        }

        let dry_run = self.config.dry_run();
        let engine = MoveEngine::new(
            &self.config,
            Box::new(FileMapper::default()),
            self.open_ledger()?,
            self.activity.clone(),
        );
        if !dry_run {
            report.session = Some(engine.begin_session()?);
        }

        let to_review: Vec<&FileDescriptor> =
            report.decisions.iter().flat_map(|d| d.remove.iter()).collect();
        let result = self.relocate_each(&engine, &to_review, dry_run, &mut report.records);
        let closed = engine.close_session();
        result?;
        closed?;
        Ok(report)
    }

    fn relocate_each(
        &self,
        engine: &MoveEngine<'_>,
        files: &[&FileDescriptor],
        dry_run: bool,
        records: &mut Vec<MoveRecord>,
    ) -> Result<(), OrganizerError> {
        for (index, descriptor) in files.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(remaining = files.len() - index, "relocation cancelled");
                break;
            }
            records.extend(engine.relocate_for_review(
                &[*descriptor],
                &self.config.review_root,
                dry_run,
            )?);
        }
        Ok(())
    }
}

/// Whether the file left (or in a dry run, would leave) its source.
fn left_source(record: &MoveRecord) -> bool {
    matches!(
        record.outcome,
        MoveOutcome::Committed
            | MoveOutcome::Skipped {
                reason: SkipReason::DryRun
            }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrganizerConfig;
    use std::fs;
    use tempfile::TempDir;

    fn setup(tweak: impl FnOnce(&mut OrganizerConfig)) -> (TempDir, Organizer) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let inbox = temp_dir.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();

        let mut config = OrganizerConfig::default();
        config.scan.roots = vec![inbox];
        config.scan.min_bytes = 0;
        config.destination.root = Some(temp_dir.path().join("sorted"));
        config.state.ledger = Some(temp_dir.path().join("state/ledger.jsonl"));
        config.state.activity_log = Some(temp_dir.path().join("state/activity.log"));
        tweak(&mut config);

        let organizer = Organizer::new(config.validate().expect("valid")).expect("organizer");
        (temp_dir, organizer)
    }

    #[test]
    fn test_live_run_records_session() {
        let (temp_dir, organizer) = setup(|c| c.run.dry_run = false);
        let inbox = temp_dir.path().join("inbox");
        fs::write(inbox.join("a.txt"), "a").unwrap();
        fs::write(inbox.join("b.png"), "not really a png").unwrap();

        let report = organizer.run().expect("run");
        let session = report.session.expect("live run has a session");
        assert_eq!(report.committed().count(), 2);
        assert!(temp_dir.path().join("sorted/Documents/a.txt").exists());
        assert!(temp_dir.path().join("sorted/Images/b.png").exists());

        let ledger = organizer.open_ledger().unwrap();
        assert_eq!(ledger.history()[0].id, session);
        assert_eq!(ledger.history()[0].file_count, 2);
    }

    #[test]
    fn test_review_duplicates_before_organizing() {
        let (temp_dir, organizer) = setup(|c| {
            c.run.dry_run = false;
            c.run.review_duplicates = true;
        });
        let inbox = temp_dir.path().join("inbox");
        fs::write(inbox.join("photo.jpg"), "same").unwrap();
        fs::write(inbox.join("photo-copy.jpg"), "same").unwrap();

        let report = organizer.run().expect("run");
        let stats = report.duplicates.expect("stats");
        assert_eq!(stats.sets, 1);
        assert_eq!(report.committed().count(), 2);

        let review = &organizer.config().review_root;
        assert_eq!(fs::read_dir(review).unwrap().count(), 1);
        assert_eq!(
            fs::read_dir(temp_dir.path().join("sorted/Images")).unwrap().count(),
            1
        );
    }

    #[test]
    fn test_cancelled_run_closes_session() {
        let (temp_dir, organizer) = setup(|c| c.run.dry_run = false);
        fs::write(temp_dir.path().join("inbox/a.txt"), "a").unwrap();
        let scan = organizer.scan();

        let cancel = CancelFlag::new();
        let organizer = organizer.with_cancel_flag(cancel.clone());
        cancel.cancel();
        let report = organizer
            .organize(&scan, Box::new(FileMapper::default()), |_| {})
            .expect("run");

        assert!(report.was_cancelled());
        assert_eq!(report.not_processed, 1);
        let ledger = organizer.open_ledger().unwrap();
        let session = ledger.session(report.session.unwrap()).unwrap();
        assert!(!session.is_open());
        assert!(temp_dir.path().join("inbox/a.txt").exists());
    }

    #[test]
    fn test_cancel_stops_duplicate_review() {
        let (temp_dir, organizer) = setup(|c| {
            c.run.dry_run = false;
            c.run.review_duplicates = true;
        });
        let inbox = temp_dir.path().join("inbox");
        for name in ["p1.jpg", "p2.jpg", "p3.jpg", "p4.jpg"] {
            fs::write(inbox.join(name), "same").unwrap();
        }
        let scan = organizer.scan();

        let cancel = CancelFlag::new();
        let organizer = organizer.with_cancel_flag(cancel.clone());
        cancel.cancel();
        let report = organizer
            .organize(&scan, Box::new(FileMapper::default()), |_| {})
            .expect("run");

        assert_eq!(report.committed().count(), 0);
        assert_eq!(report.not_processed, 4);
        assert!(!organizer.config().review_root.exists());
        for name in ["p1.jpg", "p2.jpg", "p3.jpg", "p4.jpg"] {
            assert!(inbox.join(name).exists());
        }
    }

    #[test]
    fn test_failed_review_relocation_is_still_organized() {
        let (temp_dir, organizer) = setup(|c| {
            c.run.dry_run = false;
            c.run.review_duplicates = true;
        });
        let inbox = temp_dir.path().join("inbox");
        fs::write(inbox.join("a.jpg"), "same").unwrap();
        fs::write(inbox.join("b.jpg"), "same").unwrap();
        let scan = organizer.scan();

        // A plain file where the review folder should be makes relocation fail.
        let review = organizer.config().review_root.clone();
        fs::create_dir_all(review.parent().unwrap()).unwrap();
        fs::write(&review, "blocker").unwrap();

        let report = organizer
            .organize(&scan, Box::new(FileMapper::default()), |_| {})
            .expect("run");

        assert_eq!(report.failed().count(), 1);
        let organized: Vec<_> = report
            .committed()
            .filter(|r| r.kind == crate::undo::MoveKind::Organize)
            .collect();
        assert_eq!(organized.len(), 2, "both copies are organized");
    }

    #[test]
    fn test_duplicates_report_without_relocation() {
        let (temp_dir, organizer) = setup(|_| {});
        let inbox = temp_dir.path().join("inbox");
        fs::write(inbox.join("x1.bin"), "dup").unwrap();
        fs::write(inbox.join("x2.bin"), "dup").unwrap();
        fs::write(inbox.join("y.bin"), "uniq").unwrap();

        let scan = organizer.scan();
        let report = organizer
            .duplicates(&scan, KeepStrategy::ShortestName, false)
            .expect("duplicates");
        assert_eq!(report.decisions.len(), 1);
        assert_eq!(report.decisions[0].remove.len(), 1);
        assert!(report.records.is_empty());
        assert!(inbox.join("x1.bin").exists() && inbox.join("x2.bin").exists());
    }
}
