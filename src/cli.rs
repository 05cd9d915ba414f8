//! Command-line interface for tidymove.
//!
//! Parsing is done with `clap`; each subcommand loads the configuration, applies
//! its flags on top, and hands off to the library. Terminal output goes through
//! [`OutputFormatter`].

use crate::activity::ActivityLog;
use crate::cancel::CancelFlag;
use crate::config::{OrganizerConfig, ScanMode};
use crate::duplicates::KeepStrategy;
use crate::file_category::FileMapper;
use crate::organizer::Organizer;
use crate::output::OutputFormatter;
use crate::undo::{SessionId, UndoLedger};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "tidymove", version)]
#[command(about = "Move files into a categorized tree, with dry runs and undo", long_about = None)]
pub struct Cli {
    /// Configuration file (default: ./.tidymoverc.toml, then ~/.config/tidymove/config.toml)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `tidymove=debug` (TIDYMOVE_LOG wins)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Also write diagnostics to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan the roots and move eligible files into category folders
    Organize(OrganizeArgs),
    /// Revert a recorded session (default: the most recent one with moves left)
    Undo {
        session: Option<SessionId>,
        /// Revert only this record of the session
        #[arg(long)]
        record: Option<u64>,
    },
    /// List recorded sessions, most recent first
    History,
    /// Find duplicate files and optionally move extra copies aside for review
    Duplicates(DuplicateArgs),
}

#[derive(Debug, Args)]
pub struct OrganizeArgs {
    /// Folder to organize; repeat for several
    #[arg(long = "root")]
    pub roots: Vec<PathBuf>,

    /// Destination root
    #[arg(long)]
    pub dest: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub mode: Option<ScanMode>,

    /// Only show what would happen
    #[arg(long, conflicts_with = "live")]
    pub dry_run: bool,

    /// Actually move files
    #[arg(long)]
    pub live: bool,

    #[arg(long)]
    pub max_files: Option<usize>,

    /// Copy each file to the backup folder before moving it
    #[arg(long)]
    pub backup: bool,

    /// Move extra copies of duplicate files to the review folder first
    #[arg(long)]
    pub review_duplicates: bool,

    /// List every excluded path instead of counts per reason
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Debug, Args)]
pub struct DuplicateArgs {
    #[arg(long = "root")]
    pub roots: Vec<PathBuf>,

    #[arg(long, value_enum)]
    pub strategy: Option<KeepStrategy>,

    /// Move extra copies to the review folder
    #[arg(long)]
    pub relocate: bool,

    /// With --relocate, only show what would move
    #[arg(long)]
    pub dry_run: bool,
}

/// Runs the parsed command.
///
/// # Errors
///
/// Configuration and ledger errors, with context. Per-file problems are part of
/// the printed report instead.
pub fn run_cli(cli: Cli, cancel: CancelFlag) -> Result<()> {
    let config = OrganizerConfig::load(cli.config.as_deref()).context("Error loading configuration")?;

    match cli.command {
        Commands::Organize(args) => organize(config, args, cancel),
        Commands::Undo { session, record } => undo(&config, session, record),
        Commands::History => history(&config),
        Commands::Duplicates(args) => duplicates(config, args, cancel),
    }
}

fn apply_roots(config: &mut OrganizerConfig, roots: Vec<PathBuf>) {
    if roots.is_empty() {
        return;
    }
    if roots.len() > 1 && config.scan.mode == ScanMode::SingleFolder {
        config.scan.mode = ScanMode::MultiFolder;
    }
    config.scan.roots = roots;
}

fn organize(mut config: OrganizerConfig, args: OrganizeArgs, cancel: CancelFlag) -> Result<()> {
    if let Some(mode) = args.mode {
        config.scan.mode = mode;
    }
    apply_roots(&mut config, args.roots);
    if let Some(dest) = args.dest {
        config.destination.root = Some(dest);
    }
    if let Some(max_files) = args.max_files {
        config.scan.max_files = max_files;
    }
    if args.dry_run {
        config.run.dry_run = true;
    }
    if args.live {
        config.run.dry_run = false;
    }
    config.run.create_backup |= args.backup;
    config.run.review_duplicates |= args.review_duplicates;

    let folders = config.categories.folders.clone();
    let validated = config.validate().context("Invalid configuration")?;
    let organizer = Organizer::new(validated)?.with_cancel_flag(cancel);

    let roots: Vec<String> = organizer
        .config()
        .roots
        .iter()
        .map(|r| r.display().to_string())
        .collect();
    OutputFormatter::info(&format!("Scanning {}", roots.join(", ")));
    if organizer.config().dry_run() {
        OutputFormatter::dry_run_notice("Planning only. Pass --live to move files.");
    }

    let scan = organizer.scan();
    let progress = OutputFormatter::create_progress_bar(scan.files.len() as u64);
    let report = organizer.organize(
        &scan,
        Box::new(FileMapper::with_folder_rules(&folders)),
        |record| {
            progress.inc(1);
            if let Some(name) = record.source.file_name() {
                progress.set_message(name.to_string_lossy().to_string());
            }
        },
    );
    progress.finish_and_clear();
    let report = report.context("Run aborted")?;

    OutputFormatter::run_report(&report, args.verbose);
    Ok(())
}

fn open_ledger(config: &OrganizerConfig) -> Result<UndoLedger> {
    let ledger_path = config.state.ledger_path();
    let activity_path = config.state.activity_log_path();
    let activity = ActivityLog::open(&activity_path)
        .with_context(|| format!("Cannot open activity log {}", activity_path.display()))?;
    let ledger = UndoLedger::open(&ledger_path)
        .with_context(|| format!("Cannot open ledger {}", ledger_path.display()))?;
    Ok(ledger.with_activity_log(activity))
}

fn undo(config: &OrganizerConfig, session: Option<SessionId>, record: Option<u64>) -> Result<()> {
    let mut ledger = open_ledger(config)?;
    let Some(id) = session.or_else(|| ledger.latest_undoable()) else {
        OutputFormatter::info("Nothing to undo.");
        return Ok(());
    };

    OutputFormatter::info(&format!("Undoing session {id}..."));
    let report = match record {
        Some(seq) => ledger.undo_record(id, seq),
        None => ledger.undo(id),
    }
    .with_context(|| format!("Undo of session {id} failed"))?;

    OutputFormatter::undo_report(&report);
    Ok(())
}

fn history(config: &OrganizerConfig) -> Result<()> {
    let ledger_path = config.state.ledger_path();
    let ledger = UndoLedger::open(&ledger_path)
        .with_context(|| format!("Cannot open ledger {}", ledger_path.display()))?;
    OutputFormatter::history_table(&ledger.history());
    Ok(())
}

fn duplicates(mut config: OrganizerConfig, args: DuplicateArgs, cancel: CancelFlag) -> Result<()> {
    apply_roots(&mut config, args.roots);
    if args.relocate {
        config.run.dry_run = args.dry_run;
    }
    let strategy = args.strategy.unwrap_or(config.run.keep_strategy);

    let organizer = Organizer::new(config.validate().context("Invalid configuration")?)?
        .with_cancel_flag(cancel);
    let scan = organizer.scan();
    let report = organizer.duplicates(&scan, strategy, args.relocate)?;
    OutputFormatter::duplicate_report(&report);
    Ok(())
}
