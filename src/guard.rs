//! Eligibility gate for filesystem entries.
//!
//! `PathGuard` decides whether the organizer may touch an entry at all. Rules are
//! evaluated in a fixed precedence so that nothing configured later can re-admit a
//! path an earlier rule excluded:
//!
//! 1. protected path (directory segment, absolute path, file name, glob, regex, hidden)
//! 2. protected extension
//! 3. size outside `[min_bytes, max_bytes]`
//! 4. unreadable / permission denied
//!
//! The guard itself is immutable once built and does no I/O beyond the `stat`
//! the caller hands in and a read-open check of the file.

use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, Metadata};
use std::path::{Component, Path, PathBuf};

/// Why an entry was kept out of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Under, or named like, a protected directory or path rule.
    ProtectedPath,
    /// Extension is on the executable/system/config denylist.
    ProtectedExtension,
    /// Smaller than `min_bytes` or larger than `max_bytes`.
    SizeOutOfRange,
    /// Could not be stat'ed or opened for reading.
    AccessDenied,
}

impl ExclusionReason {
    /// Stable tag used in reports and the activity log.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::ProtectedPath => "protected_path",
            ExclusionReason::ProtectedExtension => "protected_extension",
            ExclusionReason::SizeOutOfRange => "size_out_of_range",
            ExclusionReason::AccessDenied => "access_denied",
        }
    }
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Eligible,
    Excluded(ExclusionReason),
}

impl Verdict {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Verdict::Eligible)
    }

    /// `"ok"` for eligible entries, otherwise the exclusion tag.
    pub fn reason(&self) -> &'static str {
        match self {
            Verdict::Eligible => "ok",
            Verdict::Excluded(reason) => reason.as_str(),
        }
    }
}

/// What an [`ExclusionRule`] matches against.
#[derive(Debug, Clone)]
pub enum RulePattern {
    /// Any path component equal to this name (case-insensitive).
    Segment(String),
    /// The path itself or anything beneath it.
    Path(PathBuf),
    /// File extension, without the leading dot (case-insensitive).
    Extension(String),
    /// Exact file name.
    FileName(String),
    /// Glob matched against the whole path.
    Glob(Pattern),
    /// Regex matched against the file name.
    Regex(Regex),
}

/// A single exclusion rule with the reason it reports.
#[derive(Debug, Clone)]
pub struct ExclusionRule {
    pub pattern: RulePattern,
    pub reason: ExclusionReason,
}

impl ExclusionRule {
    pub fn segment(name: impl Into<String>) -> Self {
        Self {
            pattern: RulePattern::Segment(name.into()),
            reason: ExclusionReason::ProtectedPath,
        }
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self {
            pattern: RulePattern::Path(path.into()),
            reason: ExclusionReason::ProtectedPath,
        }
    }

    /// Accepts `"dll"` as well as `".dll"`.
    pub fn extension(ext: &str) -> Self {
        Self {
            pattern: RulePattern::Extension(ext.trim_start_matches('.').to_string()),
            reason: ExclusionReason::ProtectedExtension,
        }
    }

    pub fn file_name(name: impl Into<String>) -> Self {
        Self {
            pattern: RulePattern::FileName(name.into()),
            reason: ExclusionReason::ProtectedPath,
        }
    }

    pub fn glob(pattern: Pattern) -> Self {
        Self {
            pattern: RulePattern::Glob(pattern),
            reason: ExclusionReason::ProtectedPath,
        }
    }

    pub fn regex(regex: Regex) -> Self {
        Self {
            pattern: RulePattern::Regex(regex),
            reason: ExclusionReason::ProtectedPath,
        }
    }
}

/// Inclusive byte-size window for eligible files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBounds {
    pub min_bytes: u64,
    pub max_bytes: u64,
}

impl SizeBounds {
    pub fn contains(&self, size: u64) -> bool {
        size >= self.min_bytes && size <= self.max_bytes
    }
}

impl Default for SizeBounds {
    fn default() -> Self {
        Self {
            min_bytes: 0,
            max_bytes: u64::MAX,
        }
    }
}

/// Compiled exclusion rule set plus size bounds.
///
/// Segment, extension and file-name rules are indexed in hash maps; path, glob and
/// regex rules are scanned linearly.
#[derive(Debug, Clone)]
pub struct PathGuard {
    segments: HashMap<String, ExclusionReason>,
    file_names: HashMap<String, ExclusionReason>,
    extensions: HashMap<String, ExclusionReason>,
    paths: Vec<(PathBuf, ExclusionReason)>,
    globs: Vec<(Pattern, ExclusionReason)>,
    regexes: Vec<(Regex, ExclusionReason)>,
    bounds: SizeBounds,
    include_hidden: bool,
    /// Scan roots; hidden names are judged below these.
    roots: Vec<PathBuf>,
}

impl PathGuard {
    pub fn new(rules: Vec<ExclusionRule>, bounds: SizeBounds, include_hidden: bool) -> Self {
        let mut guard = Self {
            segments: HashMap::new(),
            file_names: HashMap::new(),
            extensions: HashMap::new(),
            paths: Vec::new(),
            globs: Vec::new(),
            regexes: Vec::new(),
            bounds,
            include_hidden,
            roots: Vec::new(),
        };

        for rule in rules {
            match rule.pattern {
                RulePattern::Segment(name) => {
                    guard.segments.insert(name.to_lowercase(), rule.reason);
                }
                RulePattern::FileName(name) => {
                    guard.file_names.insert(name, rule.reason);
                }
                RulePattern::Extension(ext) => {
                    guard.extensions.insert(ext.to_lowercase(), rule.reason);
                }
                RulePattern::Path(path) => guard.paths.push((path, rule.reason)),
                RulePattern::Glob(pattern) => guard.globs.push((pattern, rule.reason)),
                RulePattern::Regex(regex) => guard.regexes.push((regex, rule.reason)),
            }
        }

        guard
    }

    /// Tell the guard where scanning starts. Any hidden directory between a root
    /// and an entry then excludes the entry, while hidden names in the root's own
    /// path do not.
    pub fn with_roots(mut self, roots: impl IntoIterator<Item = PathBuf>) -> Self {
        self.roots = roots.into_iter().collect();
        self
    }

    pub fn bounds(&self) -> SizeBounds {
        self.bounds
    }

    /// Full eligibility check for a regular file whose metadata was already read.
    pub fn is_eligible(&self, path: &Path, metadata: &Metadata) -> Verdict {
        if let Some(reason) = self.path_exclusion(path) {
            return Verdict::Excluded(reason);
        }
        if let Some(reason) = self.extension_exclusion(path) {
            return Verdict::Excluded(reason);
        }
        if !self.bounds.contains(metadata.len()) {
            return Verdict::Excluded(ExclusionReason::SizeOutOfRange);
        }
        if File::open(path).is_err() {
            return Verdict::Excluded(ExclusionReason::AccessDenied);
        }
        Verdict::Eligible
    }

    /// Stats `path` itself, then runs [`PathGuard::is_eligible`].
    pub fn check(&self, path: &Path) -> Verdict {
        // Path rules first so a protected path is never reported as merely unreadable.
        if let Some(reason) = self.path_exclusion(path) {
            return Verdict::Excluded(reason);
        }
        match fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => self.is_eligible(path, &metadata),
            Ok(_) => Verdict::Excluded(ExclusionReason::ProtectedPath),
            Err(_) => Verdict::Excluded(ExclusionReason::AccessDenied),
        }
    }

    /// Directory-level check used to prune traversal: only path rules apply.
    pub fn directory_exclusion(&self, dir: &Path) -> Option<ExclusionReason> {
        self.path_exclusion(dir)
    }

    /// Check for a configured scan root. A root is never rejected for being hidden
    /// itself; its hidden children still are.
    pub fn root_exclusion(&self, root: &Path) -> Option<ExclusionReason> {
        self.rule_exclusion(root)
    }

    fn path_exclusion(&self, path: &Path) -> Option<ExclusionReason> {
        if !self.include_hidden && self.is_hidden(path) {
            return Some(ExclusionReason::ProtectedPath);
        }
        self.rule_exclusion(path)
    }

    /// Hidden if any component below the deepest enclosing root starts with a
    /// dot. Without a known root only the entry's own name counts.
    fn is_hidden(&self, path: &Path) -> bool {
        let dotted = |name: &std::ffi::OsStr| name.to_string_lossy().starts_with('.');
        let below_root = self
            .roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .and_then(|root| path.strip_prefix(root).ok());

        match below_root {
            Some(relative) => relative
                .components()
                .any(|c| matches!(c, Component::Normal(name) if dotted(name))),
            None => path.file_name().is_some_and(dotted),
        }
    }

    fn rule_exclusion(&self, path: &Path) -> Option<ExclusionReason> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if let Some(reason) = self.file_names.get(file_name.as_ref()) {
            return Some(*reason);
        }

        for component in path.components() {
            if let Component::Normal(segment) = component
                && let Some(reason) = self
                    .segments
                    .get(&segment.to_string_lossy().to_lowercase())
            {
                return Some(*reason);
            }
        }

        if let Some((_, reason)) = self.paths.iter().find(|(p, _)| path.starts_with(p)) {
            return Some(*reason);
        }

        if let Some((_, reason)) = self.globs.iter().find(|(g, _)| g.matches_path(path)) {
            return Some(*reason);
        }

        self.regexes
            .iter()
            .find(|(r, _)| r.is_match(&file_name))
            .map(|(_, reason)| *reason)
    }

    fn extension_exclusion(&self, path: &Path) -> Option<ExclusionReason> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        self.extensions.get(&ext).copied()
    }
}
