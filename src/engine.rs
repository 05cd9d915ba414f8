//! Move planning and execution.
//!
//! The engine computes `destination_root / category / name` for each file,
//! resolves conflicts without ever overwriting, and performs the move. Planning,
//! execution and the ledger append run under one lock so two callers can never
//! pick the same free name.

use crate::activity::{ActivityLog, ActivityStatus};
use crate::config::ValidatedConfig;
use crate::file_category::{Categorizer, FALLBACK_CATEGORY};
use crate::fingerprint::{self, Fingerprint};
use crate::guard::Verdict;
use crate::scanner::FileDescriptor;
use crate::undo::{
    LedgerError, MoveKind, MoveOutcome, MoveRecord, SessionId, SkipReason, UndoLedger,
};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Permission denied: {}", .0.display())]
    AccessDenied(PathBuf),

    #[error("Source file no longer exists: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Copy of {} at {} does not match the original", .source_path.display(), .destination.display())]
    VerificationFailed {
        source_path: PathBuf,
        destination: PathBuf,
    },

    #[error("Destination already exists: {}", .0.display())]
    DestinationOccupied(PathBuf),

    #[error("No session is open for a live move")]
    NoActiveSession,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl EngineError {
    fn io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => EngineError::SourceMissing(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => EngineError::AccessDenied(path.to_path_buf()),
            _ => EngineError::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    /// Errors that abort the run rather than fail a single file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Ledger(_) | EngineError::NoActiveSession)
    }
}

/// How a planned destination was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanDisposition {
    /// The natural destination was free.
    Direct,
    /// The natural destination was taken by different content; a counter was added.
    Disambiguated,
    /// Byte-identical to `existing`; routed to the review folder instead.
    DuplicateOfExisting { existing: PathBuf },
    /// Source already sits at its destination.
    AlreadyInPlace,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovePlan {
    pub descriptor: FileDescriptor,
    pub kind: MoveKind,
    pub category: String,
    pub destination: PathBuf,
    pub disposition: PlanDisposition,
    pub fingerprint: Option<Fingerprint>,
}

#[derive(Debug)]
struct EngineState {
    ledger: UndoLedger,
    session: Option<SessionId>,
    /// Destinations taken during this run, mapped to the file that took them.
    claimed: HashMap<PathBuf, PathBuf>,
}

/// Plans and performs moves for one run.
pub struct MoveEngine<'a> {
    config: &'a ValidatedConfig,
    categorizer: Box<dyn Categorizer + 'a>,
    activity: ActivityLog,
    state: Mutex<EngineState>,
}

impl<'a> MoveEngine<'a> {
    pub fn new(
        config: &'a ValidatedConfig,
        categorizer: Box<dyn Categorizer + 'a>,
        ledger: UndoLedger,
        activity: ActivityLog,
    ) -> Self {
        Self {
            config,
            categorizer,
            activity,
            state: Mutex::new(EngineState {
                ledger,
                session: None,
                claimed: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        // A panic mid-move leaves nothing half-written in the state itself.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn begin_session(&self) -> Result<SessionId, EngineError> {
        let mut state = self.lock();
        let id = state.ledger.begin_session()?;
        state.session = Some(id);
        Ok(id)
    }

    /// Close the open session, if any, and return its id.
    pub fn close_session(&self) -> Result<Option<SessionId>, EngineError> {
        let mut state = self.lock();
        let Some(id) = state.session.take() else {
            return Ok(None);
        };
        state.ledger.close_session(id)?;
        Ok(Some(id))
    }

    pub fn session(&self) -> Option<SessionId> {
        self.lock().session
    }

    /// Give the ledger back, e.g. to print history after the run.
    pub fn into_ledger(self) -> UndoLedger {
        self.state
            .into_inner()
            .unwrap_or_else(|p| p.into_inner())
            .ledger
    }

    /// Work out where `descriptor` would go.
    ///
    /// # Errors
    ///
    /// `SourceMissing` / `AccessDenied` if the source cannot be stat'ed.
    pub fn plan_move(&self, descriptor: &FileDescriptor) -> Result<MovePlan, EngineError> {
        let state = self.lock();
        self.plan_locked(&state, descriptor)
    }

    fn plan_locked(
        &self,
        state: &EngineState,
        descriptor: &FileDescriptor,
    ) -> Result<MovePlan, EngineError> {
        let source = &descriptor.path;
        fs::metadata(source).map_err(|e| EngineError::io(source, e))?;

        let category = match self.categorizer.classify(descriptor) {
            Ok(label) => label,
            Err(err) => {
                warn!(path = %source.display(), error = %err, "categorizer failed, using fallback");
                FALLBACK_CATEGORY.to_string()
            }
        };

        let name = sanitize_file_name(&descriptor.file_name());
        let natural = self
            .config
            .destination_root
            .join(sanitize_file_name(&category))
            .join(&name);

        let mut plan = MovePlan {
            descriptor: descriptor.clone(),
            kind: MoveKind::Organize,
            category,
            destination: natural.clone(),
            disposition: PlanDisposition::Direct,
            fingerprint: None,
        };

        if &natural == source {
            plan.disposition = PlanDisposition::AlreadyInPlace;
            return Ok(plan);
        }

        let is_taken = |p: &Path| taken(state, p);
        if !is_taken(natural.as_path()) {
            return Ok(plan);
        }

        // Compare with whatever occupies (or will occupy) the natural destination.
        let occupant = if natural.exists() {
            natural.clone()
        } else {
            state.claimed[&natural].clone()
        };
        let source_fp = fingerprint::fingerprint(source);
        let identical = match (&source_fp, fingerprint::fingerprint(&occupant)) {
            (Ok(a), Ok(b)) => *a == b,
            (Err(err), _) => {
                warn!(error = %err, "cannot fingerprint source");
                false
            }
            (_, Err(err)) => {
                warn!(error = %err, "cannot fingerprint existing destination");
                false
            }
        };
        plan.fingerprint = source_fp.ok();

        if identical {
            debug!(path = %source.display(), existing = %natural.display(), "identical to existing destination");
            plan.kind = MoveKind::DuplicateReview;
            plan.destination = disambiguate(&self.config.review_root.join(&name), is_taken);
            plan.disposition = PlanDisposition::DuplicateOfExisting { existing: natural };
        } else {
            plan.destination = disambiguate(&natural, is_taken);
            plan.disposition = PlanDisposition::Disambiguated;
        }
        Ok(plan)
    }

    /// Carry out `plan`. Dry runs check everything and touch nothing.
    ///
    /// A plan whose destination was taken after planning is planned again, so
    /// identical content still goes to review. Per-file problems come back as a
    /// record with a `Failed` outcome; only ledger failures and a missing
    /// session are returned as `Err`.
    pub fn execute(&self, plan: &MovePlan, dry_run: bool) -> Result<MoveRecord, EngineError> {
        let mut state = self.lock();
        if plan.kind == MoveKind::Organize && taken(&state, &plan.destination) {
            debug!(destination = %plan.destination.display(), "destination taken since planning");
            return match self.plan_locked(&state, &plan.descriptor) {
                Ok(fresh) => self.execute_locked(&mut state, &fresh, dry_run),
                Err(err) => self.unplanned(&mut state, &plan.descriptor, dry_run, err),
            };
        }
        self.execute_locked(&mut state, plan, dry_run)
    }

    /// Plan and execute `descriptor` as one step.
    pub fn process(
        &self,
        descriptor: &FileDescriptor,
        dry_run: bool,
    ) -> Result<MoveRecord, EngineError> {
        let mut state = self.lock();
        match self.plan_locked(&state, descriptor) {
            Ok(plan) => self.execute_locked(&mut state, &plan, dry_run),
            Err(err) => self.unplanned(&mut state, descriptor, dry_run, err),
        }
    }

    /// Record a file that could not even be planned.
    fn unplanned(
        &self,
        state: &mut EngineState,
        descriptor: &FileDescriptor,
        dry_run: bool,
        err: EngineError,
    ) -> Result<MoveRecord, EngineError> {
        let record = self.record(descriptor, MoveKind::Organize, None, descriptor.path.clone());
        let outcome = MoveOutcome::Failed {
            error: err.to_string(),
        };
        self.finish(state, dry_run, record, outcome)
    }

    /// Move non-kept duplicates under `review_root`. Nothing is deleted.
    pub fn relocate_for_review(
        &self,
        files: &[&FileDescriptor],
        review_root: &Path,
        dry_run: bool,
    ) -> Result<Vec<MoveRecord>, EngineError> {
        let mut state = self.lock();
        let mut records = Vec::with_capacity(files.len());

        for descriptor in files {
            let name = sanitize_file_name(&descriptor.file_name());
            let destination = disambiguate(&review_root.join(name), |p| taken(&state, p));
            let plan = MovePlan {
                descriptor: (*descriptor).clone(),
                kind: MoveKind::DuplicateReview,
                category: "Duplicates".to_string(),
                destination,
                disposition: PlanDisposition::Direct,
                fingerprint: None,
            };
            records.push(self.execute_locked(&mut state, &plan, dry_run)?);
        }
        Ok(records)
    }

    fn record(
        &self,
        descriptor: &FileDescriptor,
        kind: MoveKind,
        category: Option<String>,
        destination: PathBuf,
    ) -> MoveRecord {
        MoveRecord {
            session: None,
            kind,
            source: descriptor.path.clone(),
            destination,
            size: descriptor.size,
            category,
            fingerprint: None,
            backup: None,
            intent: None,
            outcome: MoveOutcome::Committed,
            at: Utc::now(),
        }
    }

    fn execute_locked(
        &self,
        state: &mut EngineState,
        plan: &MovePlan,
        dry_run: bool,
    ) -> Result<MoveRecord, EngineError> {
        let source = &plan.descriptor.path;
        let mut record = self.record(
            &plan.descriptor,
            plan.kind,
            Some(plan.category.clone()),
            plan.destination.clone(),
        );
        record.fingerprint = plan.fingerprint.map(|fp| fp.to_hex());

        if plan.disposition == PlanDisposition::AlreadyInPlace {
            return self.finish(
                state,
                dry_run,
                record,
                MoveOutcome::Skipped {
                    reason: SkipReason::AlreadyInPlace,
                },
            );
        }

        match self.config.guard.check(source) {
            Verdict::Eligible => {}
            Verdict::Excluded(reason) => {
                debug!(path = %source.display(), %reason, "guard rejected source at move time");
                return self.finish(
                    state,
                    dry_run,
                    record,
                    MoveOutcome::Skipped {
                        reason: SkipReason::Excluded,
                    },
                );
            }
        }

        // Another caller may have taken the planned name since planning.
        if taken(state, &plan.destination) {
            record.destination = disambiguate(&plan.destination, |p| taken(state, p));
        }

        if dry_run {
            state
                .claimed
                .insert(record.destination.clone(), source.clone());
            return self.finish(
                state,
                true,
                record,
                MoveOutcome::Skipped {
                    reason: SkipReason::DryRun,
                },
            );
        }

        let session = state.session.ok_or(EngineError::NoActiveSession)?;
        record.session = Some(session);

        if self.config.settings.run.create_backup && plan.kind == MoveKind::Organize {
            match self.backup(session, source) {
                Ok(copy) => record.backup = Some(copy),
                Err(err) => {
                    let outcome = MoveOutcome::Failed {
                        error: format!("backup failed: {err}"),
                    };
                    return self.finish(state, false, record, outcome);
                }
            }
        }

        // The intent is durable before the filesystem changes; the record
        // returned below resolves it.
        let mut intent = record.clone();
        intent.outcome = MoveOutcome::Pending;
        record.intent = Some(state.ledger.append(intent)?);

        let destination = record.destination.clone();
        let moved = destination
            .parent()
            .map_or(Ok(()), |parent| {
                fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))
            })
            .and_then(|()| transfer(source, &destination));

        let outcome = match &moved {
            Ok(()) => {
                state.claimed.insert(destination.clone(), source.clone());
                MoveOutcome::Committed
            }
            Err(err) => MoveOutcome::Failed {
                error: err.to_string(),
            },
        };

        let finished = self.finish(state, false, record, outcome);
        if finished.is_err() && moved.is_ok() {
            // Unconfirmed: put the file back so the ledger's pending entry
            // still describes the filesystem.
            state.claimed.remove(&destination);
            if let Err(err) = transfer(&destination, source) {
                warn!(
                    source = %source.display(),
                    destination = %destination.display(),
                    error = %err,
                    "could not roll back unconfirmed move"
                );
            }
        }
        finished
    }

    /// Stamp the outcome, persist live records, and report.
    fn finish(
        &self,
        state: &mut EngineState,
        dry_run: bool,
        mut record: MoveRecord,
        outcome: MoveOutcome,
    ) -> Result<MoveRecord, EngineError> {
        record.outcome = outcome;
        if !dry_run {
            if record.session.is_none() {
                record.session = Some(state.session.ok_or(EngineError::NoActiveSession)?);
            }
            state.ledger.append(record.clone())?;
        }

        let operation = match record.kind {
            MoveKind::DuplicateReview => "REVIEW",
            _ => "MOVE",
        };
        let category = record.category.as_deref();
        match &record.outcome {
            MoveOutcome::Pending => {}
            MoveOutcome::Committed => {
                info!(
                    source = %record.source.display(),
                    destination = %record.destination.display(),
                    "moved"
                );
                if let Some(backup) = &record.backup {
                    self.activity.record(
                        ActivityStatus::Backup,
                        "COPY",
                        &record.source,
                        Some(backup),
                        None,
                    );
                }
                self.activity.record(
                    ActivityStatus::Completed,
                    operation,
                    &record.source,
                    Some(&record.destination),
                    category,
                );
            }
            MoveOutcome::Skipped { reason } => {
                let status = if *reason == SkipReason::DryRun {
                    ActivityStatus::DryRun
                } else {
                    ActivityStatus::Skipped
                };
                self.activity.record(
                    status,
                    operation,
                    &record.source,
                    Some(&record.destination),
                    Some(&reason.to_string()),
                );
            }
            MoveOutcome::Failed { error } => {
                warn!(source = %record.source.display(), %error, "move failed");
                self.activity.record(
                    ActivityStatus::Failed,
                    operation,
                    &record.source,
                    Some(&record.destination),
                    Some(error),
                );
            }
        }
        Ok(record)
    }

    /// Copy `source` to `backup_root/<session>/<source relative to its root>`.
    fn backup(&self, session: SessionId, source: &Path) -> Result<PathBuf, EngineError> {
        let relative = self
            .config
            .roots
            .iter()
            .find_map(|root| source.strip_prefix(root).ok())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| {
                source
                    .components()
                    .filter(|c| matches!(c, Component::Normal(_)))
                    .collect()
            });

        let target = self
            .config
            .backup_root
            .join(session.to_string())
            .join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }
        let target = disambiguate(&target, Path::exists);
        fs::copy(source, &target).map_err(|e| EngineError::io(source, e))?;
        debug!(source = %source.display(), backup = %target.display(), "backed up");
        Ok(target)
    }
}

fn taken(state: &EngineState, path: &Path) -> bool {
    path.exists() || state.claimed.contains_key(path)
}

/// Move `from` to `to`, refusing to replace an existing `to`.
///
/// Uses a rename; across volumes it copies, verifies the copy's fingerprint and
/// only then removes the source. A copy that fails verification is removed and
/// the source is left untouched.
pub fn transfer(from: &Path, to: &Path) -> Result<(), EngineError> {
    if to.exists() {
        return Err(EngineError::DestinationOccupied(to.to_path_buf()));
    }

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(from = %from.display(), to = %to.display(), "cross-device move, copying");
            copy_verify_remove(from, to)
        }
        Err(e) => Err(EngineError::io(from, e)),
    }
}

fn copy_verify_remove(from: &Path, to: &Path) -> Result<(), EngineError> {
    fs::copy(from, to).map_err(|e| EngineError::io(from, e))?;

    let verified = match (fingerprint::fingerprint(from), fingerprint::fingerprint(to)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if !verified {
        // Only our own copy is removed; the source stays.
        if let Err(err) = fs::remove_file(to) {
            warn!(path = %to.display(), error = %err, "could not remove unverified copy");
        }
        return Err(EngineError::VerificationFailed {
            source_path: from.to_path_buf(),
            destination: to.to_path_buf(),
        });
    }

    fs::remove_file(from).map_err(|e| EngineError::io(from, e))
}

/// `name.ext` -> `name (2).ext`, `name (3).ext`, ... until `taken` says no.
pub fn disambiguate(path: &Path, taken: impl Fn(&Path) -> bool) -> PathBuf {
    if !taken(path) {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().to_string());

    (2u64..)
        .map(|n| {
            let name = match &extension {
                Some(ext) => format!("{stem} ({n}).{ext}"),
                None => format!("{stem} ({n})"),
            };
            parent.join(name)
        })
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| path.to_path_buf())
}

/// Replace characters that are invalid in file names on common filesystems.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_end_matches('.');

    match trimmed {
        "" | "." | ".." => "_".to_string(),
        name => name.to_string(),
    }
}
