//! Session ledger and undo.
//!
//! Every live run opens a [`Session`] in the ledger and appends one [`MoveRecord`]
//! per attempted move. The ledger file is JSON lines, one event per line, so an
//! append never rewrites earlier history:
//!
//! ```text
//! {"event":"session_opened","session":1736085802000000,"at":"..."}
//! {"event":"record","seq":1,"record":{...}}
//! {"event":"session_closed","session":1736085802000000,"at":"..."}
//! ```
//!
//! Undo never edits a record. It appends a reversing record (`kind = reversal`)
//! to the same session, and a forward move counts as undone once a committed
//! reversal points at it.

use crate::activity::{ActivityLog, ActivityStatus};
use crate::engine::{self, EngineError};
use crate::fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Ledger is corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("Unknown session {0}")]
    UnknownSession(SessionId),

    #[error("Session {session} has no reversible record #{seq}")]
    UnknownRecord { session: SessionId, seq: u64 },

    #[error("Record is not attached to a session")]
    Unattached,

    #[error("Failed to encode ledger entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Monotonic session id: microseconds since the Unix epoch at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(SessionId)
    }
}

/// Why a move produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum MoveKind {
    /// Source moved into the categorized tree.
    Organize,
    /// Non-kept duplicate moved to the review folder.
    DuplicateReview,
    /// Reversal of the record with sequence number `of`.
    Reversal { of: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DryRun,
    AlreadyInPlace,
    /// The guard rejected the source when the move was about to run.
    Excluded,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::DryRun => "dry_run",
            SkipReason::AlreadyInPlace => "already_in_place",
            SkipReason::Excluded => "excluded",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum MoveOutcome {
    /// Logged before a live move touches the filesystem. A later record naming
    /// it in `intent` resolves it.
    Pending,
    Committed,
    Skipped { reason: SkipReason },
    Failed { error: String },
}

impl MoveOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, MoveOutcome::Committed)
    }
}

/// One attempted move. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// `None` for dry-run previews, which are never persisted.
    pub session: Option<SessionId>,
    pub kind: MoveKind,
    pub source: PathBuf,
    /// Where the file went (or would go, for a dry run).
    pub destination: PathBuf,
    pub size: u64,
    pub category: Option<String>,
    /// Hex content hash, when one was computed for this move.
    pub fingerprint: Option<String>,
    /// Copy taken before the move, when backups are enabled.
    pub backup: Option<PathBuf>,
    /// Sequence number of the pending record this one resolves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<u64>,
    pub outcome: MoveOutcome,
    pub at: DateTime<Utc>,
}

impl MoveRecord {
    pub fn is_forward(&self) -> bool {
        !matches!(self.kind, MoveKind::Reversal { .. })
    }
}

/// A record as stored in a session, with its sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedRecord {
    pub seq: u64,
    pub record: MoveRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    PartiallyUndone,
    FullyUndone,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStatus::InProgress => "in progress",
            SessionStatus::Completed => "completed",
            SessionStatus::PartiallyUndone => "partially undone",
            SessionStatus::FullyUndone => "fully undone",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub records: Vec<LoggedRecord>,
}

impl Session {
    fn new(id: SessionId, opened_at: DateTime<Utc>) -> Self {
        Self {
            id,
            opened_at,
            closed_at: None,
            records: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    /// Sequence numbers of forward records already dealt with by a reversal:
    /// restored, or found never to have left their source.
    pub fn reversed(&self) -> HashSet<u64> {
        self.records
            .iter()
            .filter(|r| {
                matches!(
                    r.record.outcome,
                    MoveOutcome::Committed | MoveOutcome::Skipped { .. }
                )
            })
            .filter_map(|r| match r.record.kind {
                MoveKind::Reversal { of } => Some(of),
                _ => None,
            })
            .collect()
    }

    /// Committed forward moves, oldest first.
    pub fn committed_moves(&self) -> impl Iterator<Item = &LoggedRecord> {
        self.records
            .iter()
            .filter(|r| r.record.is_forward() && r.record.outcome.is_committed())
    }

    /// Pending moves that no later record resolves, e.g. after the process
    /// died between a move and its confirmation.
    pub fn in_doubt(&self) -> impl Iterator<Item = &LoggedRecord> {
        let resolved: HashSet<u64> = self.records.iter().filter_map(|r| r.record.intent).collect();
        self.records.iter().filter(move |r| {
            r.record.is_forward()
                && r.record.outcome == MoveOutcome::Pending
                && !resolved.contains(&r.seq)
        })
    }

    /// Committed and in-doubt forward moves not yet reversed, oldest first.
    pub fn reversible(&self) -> Vec<&LoggedRecord> {
        let reversed = self.reversed();
        let mut moves: Vec<&LoggedRecord> = self
            .committed_moves()
            .chain(self.in_doubt())
            .filter(|r| !reversed.contains(&r.seq))
            .collect();
        moves.sort_by_key(|r| r.seq);
        moves
    }

    pub fn file_count(&self) -> usize {
        self.committed_moves().count()
    }

    pub fn status(&self) -> SessionStatus {
        if self.is_open() {
            return SessionStatus::InProgress;
        }
        let total = self.file_count() + self.in_doubt().count();
        let reversed = self.reversed().len();
        match (total, reversed) {
            (0, _) | (_, 0) => SessionStatus::Completed,
            (t, r) if r >= t => SessionStatus::FullyUndone,
            _ => SessionStatus::PartiallyUndone,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            opened_at: self.opened_at,
            closed_at: self.closed_at,
            file_count: self.file_count(),
            status: self.status(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Committed forward moves in the session.
    pub file_count: usize,
    pub status: SessionStatus,
}

/// Result of an undo call. A partial undo is a normal result, not an error.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UndoReport {
    pub succeeded: usize,
    pub failed: usize,
    pub messages: Vec<String>,
}

impl UndoReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
enum LedgerEvent {
    SessionOpened {
        session: SessionId,
        at: DateTime<Utc>,
    },
    Record {
        seq: u64,
        record: MoveRecord,
    },
    SessionClosed {
        session: SessionId,
        at: DateTime<Utc>,
    },
}

/// Owner of the persisted session history.
#[derive(Debug)]
pub struct UndoLedger {
    path: PathBuf,
    file: File,
    sessions: BTreeMap<SessionId, Session>,
    activity: ActivityLog,
}

impl UndoLedger {
    /// Open the ledger at `path`, creating it (and its parent) if needed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Corrupt`] if any line other than a truncated final
    /// line fails to parse, and [`LedgerError::Io`] if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let io_err = |source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(io_err(e)),
        };

        let (sessions, valid_len) = Self::replay(&content)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;
        if valid_len < content.len() {
            warn!(path = %path.display(), "dropping truncated final ledger line");
            file.set_len(valid_len as u64).map_err(io_err)?;
        }

        debug!(path = %path.display(), sessions = sessions.len(), "ledger loaded");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            sessions,
            activity: ActivityLog::disabled(),
        })
    }

    /// Report reversals to `activity` as well.
    pub fn with_activity_log(mut self, activity: ActivityLog) -> Self {
        self.activity = activity;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn replay(content: &str) -> Result<(BTreeMap<SessionId, Session>, usize), LedgerError> {
        let mut sessions: BTreeMap<SessionId, Session> = BTreeMap::new();
        let mut offset = 0;

        for (index, line) in content.split_inclusive('\n').enumerate() {
            let line_no = index + 1;
            let complete = line.ends_with('\n');
            let text = line.trim_end();
            if text.is_empty() {
                offset += line.len();
                continue;
            }

            let event: LedgerEvent = match serde_json::from_str(text) {
                Ok(event) => event,
                // A crash mid-append leaves an unterminated last line.
                Err(_) if !complete => return Ok((sessions, offset)),
                Err(e) => {
                    return Err(LedgerError::Corrupt {
                        line: line_no,
                        reason: e.to_string(),
                    });
                }
            };

            match event {
                LedgerEvent::SessionOpened { session, at } => {
                    sessions.insert(session, Session::new(session, at));
                }
                LedgerEvent::Record { seq, record } => {
                    let session = record
                        .session
                        .and_then(|id| sessions.get_mut(&id))
                        .ok_or_else(|| LedgerError::Corrupt {
                            line: line_no,
                            reason: "record for unknown session".to_string(),
                        })?;
                    session.records.push(LoggedRecord { seq, record });
                }
                LedgerEvent::SessionClosed { session, at } => {
                    let entry = sessions.get_mut(&session).ok_or_else(|| LedgerError::Corrupt {
                        line: line_no,
                        reason: format!("close of unknown session {session}"),
                    })?;
                    entry.closed_at = Some(at);
                }
            }
            offset += line.len();
        }

        Ok((sessions, offset))
    }

    fn write_event(&mut self, event: &LedgerEvent) -> Result<(), LedgerError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        self.file.write_all(line.as_bytes()).map_err(io_err)?;
        self.file.flush().map_err(io_err)?;
        self.file.sync_data().map_err(io_err)
    }

    pub fn begin_session(&mut self) -> Result<SessionId, LedgerError> {
        let now = Utc::now();
        let micros = u64::try_from(now.timestamp_micros()).unwrap_or(0);
        let id = match self.sessions.keys().next_back() {
            Some(last) if last.0 >= micros => SessionId(last.0 + 1),
            _ => SessionId(micros),
        };

        self.write_event(&LedgerEvent::SessionOpened {
            session: id,
            at: now,
        })?;
        self.sessions.insert(id, Session::new(id, now));
        info!(session = %id, "session opened");
        Ok(id)
    }

    /// Persist `record` in its session. Returns the assigned sequence number.
    pub fn append(&mut self, record: MoveRecord) -> Result<u64, LedgerError> {
        let id = record.session.ok_or(LedgerError::Unattached)?;
        let seq = self
            .sessions
            .get(&id)
            .ok_or(LedgerError::UnknownSession(id))?
            .records
            .last()
            .map_or(1, |r| r.seq + 1);

        let event = LedgerEvent::Record { seq, record };
        self.write_event(&event)?;
        if let LedgerEvent::Record { seq, record } = event
            && let Some(session) = self.sessions.get_mut(&id)
        {
            session.records.push(LoggedRecord { seq, record });
        }
        Ok(seq)
    }

    /// Close `id`. Closing an already closed session is a no-op.
    pub fn close_session(&mut self, id: SessionId) -> Result<(), LedgerError> {
        let session = self
            .sessions
            .get(&id)
            .ok_or(LedgerError::UnknownSession(id))?;
        if !session.is_open() {
            return Ok(());
        }

        let at = Utc::now();
        self.write_event(&LedgerEvent::SessionClosed { session: id, at })?;
        if let Some(session) = self.sessions.get_mut(&id) {
            session.closed_at = Some(at);
        }
        info!(session = %id, "session closed");
        Ok(())
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Session summaries, most recent first.
    pub fn history(&self) -> Vec<SessionSummary> {
        self.sessions.values().rev().map(Session::summary).collect()
    }

    /// Most recent session that still has moves to reverse.
    pub fn latest_undoable(&self) -> Option<SessionId> {
        self.sessions
            .values()
            .rev()
            .find(|s| !s.reversible().is_empty())
            .map(|s| s.id)
    }

    /// Reverse every outstanding move of `id`, newest first.
    ///
    /// A reversal that cannot be carried out is counted in `failed` and explained
    /// in `messages`; the remaining records are still processed. Undoing a session
    /// with nothing left to reverse reports zero succeeded and zero failed.
    ///
    /// # Errors
    ///
    /// Only ledger failures: an unknown session or a failed write.
    pub fn undo(&mut self, id: SessionId) -> Result<UndoReport, LedgerError> {
        let session = self
            .sessions
            .get(&id)
            .ok_or(LedgerError::UnknownSession(id))?;
        let mut pending: Vec<LoggedRecord> =
            session.reversible().into_iter().cloned().collect();
        pending.reverse();

        let mut report = UndoReport::default();
        for logged in &pending {
            self.reverse_one(id, logged, &mut report)?;
        }
        // An interrupted run is closed by undoing it.
        self.close_session(id)?;

        info!(
            session = %id,
            succeeded = report.succeeded,
            failed = report.failed,
            "undo finished"
        );
        Ok(report)
    }

    /// Reverse a single committed (or in-doubt) forward move.
    pub fn undo_record(&mut self, id: SessionId, seq: u64) -> Result<UndoReport, LedgerError> {
        let session = self
            .sessions
            .get(&id)
            .ok_or(LedgerError::UnknownSession(id))?;
        let logged = session
            .committed_moves()
            .chain(session.in_doubt())
            .find(|r| r.seq == seq)
            .cloned()
            .ok_or(LedgerError::UnknownRecord { session: id, seq })?;

        let mut report = UndoReport::default();
        if session.reversed().contains(&seq) {
            report
                .messages
                .push(format!("#{seq} {} already restored", logged.record.source.display()));
            return Ok(report);
        }
        self.reverse_one(id, &logged, &mut report)?;
        Ok(report)
    }

    fn reverse_one(
        &mut self,
        id: SessionId,
        logged: &LoggedRecord,
        report: &mut UndoReport,
    ) -> Result<(), LedgerError> {
        let forward = &logged.record;
        if forward.outcome == MoveOutcome::Pending
            && !forward.destination.exists()
            && forward.source.exists()
        {
            debug!(source = %forward.source.display(), "pending move never happened");
            report.messages.push(format!(
                "{} was never moved",
                forward.source.display()
            ));
            let skipped = MoveOutcome::Skipped {
                reason: SkipReason::AlreadyInPlace,
            };
            self.append(reversal_of(id, logged, skipped, forward.source.clone()))?;
            return Ok(());
        }

        let (outcome, restored_to) = match restore(forward) {
            Ok(target) => {
                report.succeeded += 1;
                let note = if target == forward.source {
                    format!("Restored {}", target.display())
                } else {
                    format!(
                        "Restored {} as {} (original location occupied by an identical file)",
                        forward.source.display(),
                        target.display()
                    )
                };
                info!(from = %forward.destination.display(), to = %target.display(), "restored");
                self.activity.record(
                    ActivityStatus::Reversed,
                    "UNDO",
                    &forward.destination,
                    Some(&target),
                    None,
                );
                report.messages.push(note);
                (MoveOutcome::Committed, target)
            }
            Err(reason) => {
                report.failed += 1;
                warn!(
                    source = %forward.source.display(),
                    destination = %forward.destination.display(),
                    %reason,
                    "reversal failed"
                );
                self.activity.record(
                    ActivityStatus::ReversalFailed,
                    "UNDO",
                    &forward.destination,
                    Some(&forward.source),
                    Some(&reason),
                );
                report.messages.push(format!(
                    "Could not restore {}: {reason}",
                    forward.source.display()
                ));
                (
                    MoveOutcome::Failed { error: reason },
                    forward.source.clone(),
                )
            }
        };

        self.append(reversal_of(id, logged, outcome, restored_to))?;
        Ok(())
    }
}

fn reversal_of(
    id: SessionId,
    logged: &LoggedRecord,
    outcome: MoveOutcome,
    restored_to: PathBuf,
) -> MoveRecord {
    let forward = &logged.record;
    MoveRecord {
        session: Some(id),
        kind: MoveKind::Reversal { of: logged.seq },
        source: forward.destination.clone(),
        destination: restored_to,
        size: forward.size,
        category: forward.category.clone(),
        fingerprint: forward.fingerprint.clone(),
        backup: None,
        intent: None,
        outcome,
        at: Utc::now(),
    }
}

/// Move a recorded destination back to its source. Returns where it landed.
fn restore(forward: &MoveRecord) -> Result<PathBuf, String> {
    let current = &forward.destination;
    if !current.is_file() {
        return Err(format!("{} no longer exists", current.display()));
    }

    let mut target = forward.source.clone();
    if target.exists() {
        let identical = fingerprint::same_content(current, &target).map_err(|e| e.to_string())?;
        if !identical {
            return Err(format!(
                "{} is occupied by a different file",
                target.display()
            ));
        }
        target = engine::disambiguate(&target, |p| p.exists());
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("cannot recreate {}: {e}", parent.display()))?;
    }
    engine::transfer(current, &target).map_err(|e: EngineError| e.to_string())?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        root: PathBuf,
        ledger_path: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().expect("Failed to create temp directory");
            let root = temp_dir.path().to_path_buf();
            Self {
                ledger_path: root.join("state").join("ledger.jsonl"),
                root,
                _temp_dir: temp_dir,
            }
        }

        /// Move `name` into `dest/` by hand and record it like the engine would.
        fn moved(&self, ledger: &mut UndoLedger, session: SessionId, name: &str) -> MoveRecord {
            let source = self.root.join("src").join(name);
            let destination = self.root.join("dest").join(name);
            fs::create_dir_all(source.parent().unwrap()).unwrap();
            fs::create_dir_all(destination.parent().unwrap()).unwrap();
            fs::write(&source, format!("content of {name}")).unwrap();
            fs::rename(&source, &destination).unwrap();

            let record = MoveRecord {
                session: Some(session),
                kind: MoveKind::Organize,
                source,
                destination,
                size: 0,
                category: Some("Documents".to_string()),
                fingerprint: None,
                backup: None,
                intent: None,
                outcome: MoveOutcome::Committed,
                at: Utc::now(),
            };
            ledger.append(record.clone()).expect("append");
            record
        }

        /// A pending record with no confirmation, as left by a crash mid-move.
        fn pending(
            &self,
            ledger: &mut UndoLedger,
            session: SessionId,
            name: &str,
            move_it: bool,
        ) -> MoveRecord {
            let source = self.root.join("src").join(name);
            let destination = self.root.join("dest").join(name);
            fs::create_dir_all(source.parent().unwrap()).unwrap();
            fs::create_dir_all(destination.parent().unwrap()).unwrap();
            fs::write(&source, format!("content of {name}")).unwrap();
            if move_it {
                fs::rename(&source, &destination).unwrap();
            }

            let record = MoveRecord {
                session: Some(session),
                kind: MoveKind::Organize,
                source,
                destination,
                size: 0,
                category: None,
                fingerprint: None,
                backup: None,
                intent: None,
                outcome: MoveOutcome::Pending,
                at: Utc::now(),
            };
            ledger.append(record.clone()).expect("append");
            record
        }
    }

    #[test]
    fn test_unconfirmed_move_is_still_undoable() {
        let fx = Fixture::new();
        let mut ledger = UndoLedger::open(&fx.ledger_path).expect("open");
        let id = ledger.begin_session().expect("begin");
        let moved = fx.pending(&mut ledger, id, "moved.txt", true);
        let stayed = fx.pending(&mut ledger, id, "stayed.txt", false);
        drop(ledger);

        // Reopen as after a crash: the session was never closed.
        let mut ledger = UndoLedger::open(&fx.ledger_path).expect("reopen");
        assert_eq!(ledger.session(id).unwrap().in_doubt().count(), 2);
        assert_eq!(ledger.latest_undoable(), Some(id));

        let report = ledger.undo(id).expect("undo");
        assert_eq!((report.succeeded, report.failed), (1, 0));
        assert!(moved.source.exists() && !moved.destination.exists());
        assert!(stayed.source.exists());
        assert!(report.messages.iter().any(|m| m.contains("never moved")));

        let again = ledger.undo(id).expect("second undo");
        assert_eq!((again.succeeded, again.failed), (0, 0));
        assert_eq!(ledger.latest_undoable(), None);
    }

    #[test]
    fn test_confirmed_pending_record_is_not_in_doubt() {
        let fx = Fixture::new();
        let mut ledger = UndoLedger::open(&fx.ledger_path).expect("open");
        let id = ledger.begin_session().expect("begin");
        let pending = fx.pending(&mut ledger, id, "done.txt", true);
        let seq = ledger.session(id).unwrap().records[0].seq;
        ledger
            .append(MoveRecord {
                intent: Some(seq),
                outcome: MoveOutcome::Committed,
                ..pending
            })
            .expect("confirm");

        let session = ledger.session(id).unwrap();
        assert_eq!(session.in_doubt().count(), 0);
        assert_eq!(session.file_count(), 1);
        assert_eq!(session.reversible().len(), 1);
    }

    #[test]
    fn test_undo_restores_in_reverse_and_is_idempotent() {
        let fx = Fixture::new();
        let mut ledger = UndoLedger::open(&fx.ledger_path).expect("open");
        let id = ledger.begin_session().expect("begin");
        let a = fx.moved(&mut ledger, id, "a.txt");
        let b = fx.moved(&mut ledger, id, "b.txt");
        ledger.close_session(id).expect("close");
        assert_eq!(ledger.session(id).unwrap().status(), SessionStatus::Completed);

        let report = ledger.undo(id).expect("undo");
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 0);
        assert!(report.messages[0].contains("b.txt"));
        assert!(a.source.exists() && b.source.exists());
        assert!(!a.destination.exists() && !b.destination.exists());
        assert_eq!(ledger.session(id).unwrap().status(), SessionStatus::FullyUndone);

        let again = ledger.undo(id).expect("second undo");
        assert_eq!((again.succeeded, again.failed), (0, 0));
    }

    #[test]
    fn test_partial_undo_reports_and_continues() {
        let fx = Fixture::new();
        let mut ledger = UndoLedger::open(&fx.ledger_path).expect("open");
        let id = ledger.begin_session().expect("begin");
        let gone = fx.moved(&mut ledger, id, "gone.txt");
        let kept = fx.moved(&mut ledger, id, "kept.txt");
        ledger.close_session(id).expect("close");

        fs::remove_file(&gone.destination).unwrap();

        let report = ledger.undo(id).expect("undo");
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert!(report.messages.iter().any(|m| m.contains("gone.txt")));
        assert!(kept.source.exists());
        assert_eq!(
            ledger.session(id).unwrap().status(),
            SessionStatus::PartiallyUndone
        );
    }

    #[test]
    fn test_occupied_source_is_never_overwritten() {
        let fx = Fixture::new();
        let mut ledger = UndoLedger::open(&fx.ledger_path).expect("open");
        let id = ledger.begin_session().expect("begin");
        let different = fx.moved(&mut ledger, id, "different.txt");
        let same = fx.moved(&mut ledger, id, "same.txt");
        ledger.close_session(id).expect("close");

        fs::write(&different.source, "someone else's file").unwrap();
        fs::write(&same.source, "content of same.txt").unwrap();

        let report = ledger.undo(id).expect("undo");
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);

        assert_eq!(
            fs::read_to_string(&different.source).unwrap(),
            "someone else's file"
        );
        assert!(different.destination.exists());

        let beside = fx.root.join("src").join("same (2).txt");
        assert_eq!(fs::read_to_string(beside).unwrap(), "content of same.txt");
    }

    #[test]
    fn test_history_survives_reopen_most_recent_first() {
        let fx = Fixture::new();
        let (first, second) = {
            let mut ledger = UndoLedger::open(&fx.ledger_path).expect("open");
            let first = ledger.begin_session().expect("begin");
            fx.moved(&mut ledger, first, "one.txt");
            ledger.close_session(first).expect("close");
            let second = ledger.begin_session().expect("begin");
            ledger.close_session(second).expect("close");
            (first, second)
        };
        assert!(second > first);

        let ledger = UndoLedger::open(&fx.ledger_path).expect("reopen");
        let history = ledger.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second);
        assert_eq!(history[1].id, first);
        assert_eq!(history[1].file_count, 1);
        assert_eq!(ledger.latest_undoable(), Some(first));
    }

    #[test]
    fn test_truncated_tail_ignored_but_corruption_rejected() {
        let fx = Fixture::new();
        {
            let mut ledger = UndoLedger::open(&fx.ledger_path).expect("open");
            let id = ledger.begin_session().expect("begin");
            ledger.close_session(id).expect("close");
        }
        let mut file = OpenOptions::new()
            .append(true)
            .open(&fx.ledger_path)
            .unwrap();
        file.write_all(b"{\"event\":\"sess").unwrap();
        drop(file);

        let mut ledger = UndoLedger::open(&fx.ledger_path).expect("truncated tail is tolerated");
        assert_eq!(ledger.history().len(), 1);
        ledger.begin_session().expect("append after repair");
        drop(ledger);
        assert_eq!(UndoLedger::open(&fx.ledger_path).unwrap().history().len(), 2);

        fs::write(&fx.ledger_path, "not json\n{}\n").unwrap();
        assert!(matches!(
            UndoLedger::open(&fx.ledger_path),
            Err(LedgerError::Corrupt { line: 1, .. })
        ));
    }

    #[test]
    fn test_undo_single_record() {
        let fx = Fixture::new();
        let mut ledger = UndoLedger::open(&fx.ledger_path).expect("open");
        let id = ledger.begin_session().expect("begin");
        let a = fx.moved(&mut ledger, id, "a.txt");
        let b = fx.moved(&mut ledger, id, "b.txt");
        ledger.close_session(id).expect("close");

        let report = ledger.undo_record(id, 1).expect("undo record");
        assert_eq!(report.succeeded, 1);
        assert!(a.source.exists());
        assert!(b.destination.exists());
        assert_eq!(
            ledger.session(id).unwrap().status(),
            SessionStatus::PartiallyUndone
        );

        assert!(matches!(
            ledger.undo_record(id, 99),
            Err(LedgerError::UnknownRecord { seq: 99, .. })
        ));
    }

    #[test]
    fn test_unknown_session() {
        let fx = Fixture::new();
        let mut ledger = UndoLedger::open(&fx.ledger_path).expect("open");
        assert!(matches!(
            ledger.undo(SessionId(42)),
            Err(LedgerError::UnknownSession(SessionId(42)))
        ));
    }
}
