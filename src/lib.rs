//! tidymove - move files into a categorized tree without losing any of them
//!
//! The library scans one or more roots while keeping protected locations out
//! of reach, sorts eligible files into category folders, finds duplicate
//! content, and records every move in an append-only ledger so whole sessions
//! (or single moves) can be reverted later.

pub mod activity;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod engine;
pub mod file_category;
pub mod fingerprint;
pub mod guard;
pub mod logging;
pub mod organizer;
pub mod output;
pub mod scanner;
pub mod undo;

pub use activity::{ActivityLog, ActivityStatus};
pub use cancel::CancelFlag;
pub use config::{ConfigError, OrganizerConfig, ScanMode, ValidatedConfig};
pub use duplicates::{DuplicateResolver, DuplicateSet, KeepStrategy, Resolution};
pub use engine::{EngineError, MoveEngine, MovePlan};
pub use file_category::{Categorizer, Category, FileMapper};
pub use fingerprint::{Fingerprint, fingerprint};
pub use guard::{ExclusionReason, PathGuard, Verdict};
pub use organizer::{Organizer, OrganizerError, RunReport};
pub use scanner::{FileDescriptor, ScanReport, ScanStatus, Scanner};
pub use undo::{LedgerError, MoveRecord, SessionId, UndoLedger, UndoReport};

pub use cli::{Cli, run_cli};
