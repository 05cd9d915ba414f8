//! Output formatting and styling module.
//!
//! All terminal output of the binary goes through [`OutputFormatter`], so the
//! library itself never prints. Diagnostics go to `tracing` instead.

use crate::organizer::{DuplicateReport, RunReport};
use crate::scanner::{Exclusion, ScanStatus};
use crate::undo::{MoveKind, MoveOutcome, MoveRecord, SessionSummary, SkipReason, UndoReport};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;

/// Manages all CLI output with consistent styling and formatting.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tidymove::output::OutputFormatter;
    /// OutputFormatter::success("Session closed");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// Creates a progress bar for `total` moves.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tidymove::output::OutputFormatter;
    /// let pb = OutputFormatter::create_progress_bar(100);
    /// pb.inc(1);
    /// pb.finish_with_message("done");
    /// ```
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("█▓░"));
        }
        pb
    }

    /// One line per record: what moved (or would move), what failed.
    pub fn record_line(record: &MoveRecord) -> String {
        let arrow = format!(
            "{} -> {}",
            record.source.display(),
            record.destination.display()
        );
        let review = if record.kind == MoveKind::DuplicateReview {
            " (duplicate, for review)"
        } else {
            ""
        };
        match &record.outcome {
            MoveOutcome::Pending => format!("{} {arrow}{review}", "pending".dimmed()),
            MoveOutcome::Committed => format!("{} {arrow}{review}", "moved".green()),
            MoveOutcome::Skipped {
                reason: SkipReason::DryRun,
            } => format!("{} {arrow}{review}", "would move".yellow()),
            MoveOutcome::Skipped { reason } => {
                format!("{} {} ({reason})", "skipped".dimmed(), record.source.display())
            }
            MoveOutcome::Failed { error } => {
                format!("{} {arrow}: {error}", "failed".red())
            }
        }
    }

    pub fn exclusion_line(exclusion: &Exclusion) -> String {
        let mut line = format!(
            "{} {} ({})",
            "excluded".dimmed(),
            exclusion.path.display(),
            exclusion.reason
        );
        if let Some(detail) = &exclusion.detail {
            line.push_str(&format!(": {detail}"));
        }
        line
    }

    /// Full run report: every record, every exclusion, then the summary table.
    pub fn run_report(report: &RunReport, verbose: bool) {
        if report.dry_run {
            Self::dry_run_notice("No files were modified.");
        }

        for (root, reason) in &report.unavailable_roots {
            Self::warning(&format!("Skipped volume {}: {reason}", root.display()));
        }

        Self::header("MOVES");
        for record in &report.records {
            Self::plain(&format!("  {}", Self::record_line(record)));
        }

        if !report.excluded.is_empty() {
            Self::header(&format!("EXCLUDED ({})", report.excluded.len()));
            if verbose {
                for exclusion in &report.excluded {
                    Self::plain(&format!("  {}", Self::exclusion_line(exclusion)));
                }
            } else {
                let mut by_reason: HashMap<String, usize> = HashMap::new();
                for exclusion in &report.excluded {
                    *by_reason.entry(exclusion.reason.to_string()).or_insert(0) += 1;
                }
                let mut reasons: Vec<_> = by_reason.into_iter().collect();
                reasons.sort();
                for (reason, count) in reasons {
                    Self::plain(&format!("  {reason}: {count}"));
                }
            }
        }

        if let ScanStatus::CapReached { cap } = report.scan_status {
            Self::warning(&format!(
                "Scan stopped at the {cap} file limit; more eligible files exist."
            ));
        }
        if report.was_cancelled() {
            Self::warning(&format!(
                "Run cancelled; {} scanned files were not processed.",
                report.not_processed
            ));
        }
        if let Some(stats) = report.duplicates {
            Self::info(&format!(
                "{} duplicate sets, {} redundant files, {} reclaimable",
                stats.sets,
                stats.redundant_files,
                format_bytes(stats.reclaimable_bytes)
            ));
        }

        let counts = report.category_counts();
        let total: usize = counts.values().sum();
        if total > 0 {
            Self::summary_table(&counts, total);
        }

        let failed = report.failed().count();
        if failed > 0 {
            Self::error(&format!("{failed} files could not be moved."));
        }
        if let Some(session) = report.session {
            Self::success(&format!(
                "Session {session} recorded. Run 'tidymove undo {session}' to revert it."
            ));
        }
    }

    /// Prints a summary table with file statistics by category.
    pub fn summary_table(category_counts: &HashMap<String, usize>, total_files: usize) {
        Self::header("SUMMARY");

        let mut categories: Vec<_> = category_counts.iter().collect();
        categories.sort_by_key(|&(name, _)| name);

        let max_category_len = categories
            .iter()
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or(0)
            .max(8);

        println!(
            "{:<width$} | {}",
            "Category".bold(),
            "Files".bold(),
            width = max_category_len
        );
        println!("{}", "-".repeat(max_category_len + 10));

        for (category, count) in &categories {
            let file_word = if **count == 1 { "file" } else { "files" };
            println!(
                "{:<width$} | {} {}",
                category,
                count.to_string().green(),
                file_word,
                width = max_category_len
            );
        }

        println!("{}", "-".repeat(max_category_len + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total_files.to_string().green().bold(),
            if total_files == 1 { "file" } else { "files" },
            width = max_category_len
        );
    }

    pub fn history_table(sessions: &[SessionSummary]) {
        if sessions.is_empty() {
            Self::info("No sessions recorded yet.");
            return;
        }
        Self::header("HISTORY");
        println!(
            "{:<18} | {:<19} | {:>5} | {}",
            "Session".bold(),
            "Opened".bold(),
            "Files".bold(),
            "Status".bold()
        );
        println!("{}", "-".repeat(64));
        for s in sessions {
            println!(
                "{:<18} | {:<19} | {:>5} | {}",
                s.id.to_string(),
                s.opened_at
                    .with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
                s.file_count,
                s.status
            );
        }
    }

    pub fn undo_report(report: &UndoReport) {
        for message in &report.messages {
            Self::plain(&format!("  {message}"));
        }
        if report.succeeded == 0 && report.failed == 0 {
            Self::info("Nothing left to undo.");
        } else if report.is_complete_success() {
            Self::success(&format!("Restored {} files.", report.succeeded));
        } else {
            Self::warning(&format!(
                "Restored {} files; {} could not be restored.",
                report.succeeded, report.failed
            ));
        }
    }

    pub fn duplicate_report(report: &DuplicateReport) {
        let stats = report.resolution.stats();
        Self::header(&format!("DUPLICATES ({} sets)", stats.sets));
        for decision in &report.decisions {
            Self::plain(&format!(
                "  {} {}",
                "keep".green(),
                decision.keep.path.display()
            ));
            for other in &decision.remove {
                Self::plain(&format!("    {} {}", "extra".yellow(), other.path.display()));
            }
        }
        for err in &report.resolution.unreadable {
            Self::warning(&err.to_string());
        }
        Self::info(&format!(
            "{} redundant files, {} reclaimable",
            stats.redundant_files,
            format_bytes(stats.reclaimable_bytes)
        ));

        if !report.records.is_empty() {
            Self::header("RELOCATED FOR REVIEW");
            for record in &report.records {
                Self::plain(&format!("  {}", Self::record_line(record)));
            }
        }
        if let Some(session) = report.session {
            Self::success(&format!("Session {session} recorded."));
        }
    }
}

/// `1536` -> `1.5 KiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_record_line_mentions_both_paths() {
        colored::control::set_override(false);
        let record = MoveRecord {
            session: None,
            kind: MoveKind::Organize,
            source: PathBuf::from("/in/a.pdf"),
            destination: PathBuf::from("/out/Documents/a.pdf"),
            size: 3,
            category: Some("Documents".to_string()),
            fingerprint: None,
            backup: None,
            intent: None,
            outcome: MoveOutcome::Skipped {
                reason: SkipReason::DryRun,
            },
            at: Utc::now(),
        };
        assert_eq!(
            OutputFormatter::record_line(&record),
            "would move /in/a.pdf -> /out/Documents/a.pdf"
        );
    }
}
