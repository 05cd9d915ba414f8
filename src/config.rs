//! Run configuration.
//!
//! Configuration is read once, from TOML, before any filesystem work starts. It is
//! then validated into a [`ValidatedConfig`], an immutable value that the guard,
//! scanner and move engine borrow for the rest of the run.
//!
//! # Configuration File Format
//!
//! ```toml
//! [scan]
//! mode = "multi_folder"          # single_folder | multi_folder | full_pc
//! roots = ["/home/me/Downloads", "/home/me/Desktop"]
//! max_files = 10000
//! min_bytes = 1024
//! max_bytes = 5242880000
//!
//! [destination]
//! root = "/home/me/Organized"
//!
//! [run]
//! dry_run = true
//! create_backup = false
//! keep_strategy = "oldest"
//!
//! [exclusions]
//! protected_extensions = [".exe", ".dll"]
//! patterns = ["**/build/**"]
//!
//! [categories.folders]
//! Budgets = "Finance"
//!
//! [state]
//! ledger = "/home/me/.local/share/tidymove/ledger.jsonl"
//! ```

use crate::duplicates::KeepStrategy;
use crate::guard::{ExclusionReason, ExclusionRule, PathGuard, SizeBounds};
use crate::scanner::{self, RootSet};
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the folder created under the first root when no destination is given.
pub const DEFAULT_DESTINATION_DIR: &str = "_Organized";
pub const REVIEW_DIR: &str = "_Duplicates_Review";
pub const BACKUP_DIR: &str = "_Backup_Before_Organize";

const DEFAULT_MAX_FILES: usize = 10_000;
const DEFAULT_MIN_BYTES: u64 = 1024;
const DEFAULT_MAX_BYTES: u64 = 5000 * 1024 * 1024;

/// Errors raised while loading or validating configuration.
///
/// All of these surface before the first filesystem mutation of a run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("Invalid glob pattern '{0}'")]
    InvalidGlobPattern(String),
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern { pattern: String, reason: String },
    #[error("IO error reading configuration: {0}")]
    IoError(String),
    #[error("No source roots configured")]
    NoRoots,
    #[error("Source root does not exist: {}", .0.display())]
    MissingRoot(PathBuf),
    #[error("Source root is not a directory: {}", .0.display())]
    RootNotDirectory(PathBuf),
    #[error("Source root {} is excluded ({reason})", .path.display())]
    ProtectedRoot {
        path: PathBuf,
        reason: ExclusionReason,
    },
    #[error("Invalid destination root {}: {reason}", .path.display())]
    InvalidDestination { path: PathBuf, reason: String },
    #[error("Source root {} lies inside destination root {}", .root.display(), .destination.display())]
    RootInsideDestination { root: PathBuf, destination: PathBuf },
}

/// Which roots a scan covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum ScanMode {
    /// Exactly one root folder.
    #[default]
    SingleFolder,
    /// Every folder listed in `roots`.
    MultiFolder,
    /// Every mounted fixed drive (or the configured `drives`).
    FullPc,
}

/// Complete configuration as written in TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizerConfig {
    pub scan: ScanSettings,
    pub destination: DestinationSettings,
    pub run: RunSettings,
    pub exclusions: ExclusionSettings,
    pub categories: CategorySettings,
    pub state: StateSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub mode: ScanMode,
    pub roots: Vec<PathBuf>,
    /// Drives scanned in `full_pc` mode; discovered automatically when empty.
    pub drives: Vec<PathBuf>,
    /// Hard cap on eligible files yielded by one scan.
    pub max_files: usize,
    pub min_bytes: u64,
    pub max_bytes: u64,
    pub include_hidden: bool,
    pub follow_links: bool,
    /// Detect the true content type from leading bytes.
    pub sniff_content: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            mode: ScanMode::default(),
            roots: Vec::new(),
            drives: Vec::new(),
            max_files: DEFAULT_MAX_FILES,
            min_bytes: DEFAULT_MIN_BYTES,
            max_bytes: DEFAULT_MAX_BYTES,
            include_hidden: false,
            follow_links: false,
            sniff_content: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationSettings {
    pub root: Option<PathBuf>,
    pub review_root: Option<PathBuf>,
    pub backup_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub dry_run: bool,
    pub create_backup: bool,
    pub keep_strategy: KeepStrategy,
    /// Relocate non-kept duplicates to the review root before organizing.
    pub review_duplicates: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            dry_run: true,
            create_backup: false,
            keep_strategy: KeepStrategy::default(),
            review_duplicates: false,
        }
    }
}

/// Exclusion rules. Every list replaces its built-in default when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionSettings {
    /// Directory names excluded wherever they appear in a path.
    pub protected_dirs: Vec<String>,
    /// Absolute paths excluded with everything beneath them.
    pub protected_paths: Vec<PathBuf>,
    pub protected_extensions: Vec<String>,
    pub filenames: Vec<String>,
    /// Glob patterns matched against the full path.
    pub patterns: Vec<String>,
    /// Regex patterns matched against the file name.
    pub regex: Vec<String>,
}

impl Default for ExclusionSettings {
    fn default() -> Self {
        Self {
            protected_dirs: DEFAULT_PROTECTED_DIRS.iter().map(|d| d.to_string()).collect(),
            protected_paths: DEFAULT_PROTECTED_PATHS.iter().map(PathBuf::from).collect(),
            protected_extensions: DEFAULT_PROTECTED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            filenames: vec!["desktop.ini".to_string(), "Thumbs.db".to_string()],
            patterns: Vec::new(),
            regex: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorySettings {
    /// Folder name (path segment) → category label, checked before type rules.
    pub folders: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    pub ledger: Option<PathBuf>,
    pub activity_log: Option<PathBuf>,
}

impl StateSettings {
    pub fn ledger_path(&self) -> PathBuf {
        self.ledger
            .clone()
            .unwrap_or_else(|| data_dir().join("ledger.jsonl"))
    }

    pub fn activity_log_path(&self) -> PathBuf {
        self.activity_log
            .clone()
            .unwrap_or_else(|| data_dir().join("activity.log"))
    }
}

fn data_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("tidymove"),
        Err(_) => PathBuf::from(".tidymove"),
    }
}

const DEFAULT_PROTECTED_DIRS: &[&str] = &[
    // Windows system
    "Windows",
    "Program Files",
    "Program Files (x86)",
    "ProgramData",
    "System Volume Information",
    "$Recycle.Bin",
    "Recovery",
    "Boot",
    "Windows.old",
    "AppData",
    "Application Data",
    "Local Settings",
    "NetHood",
    "PrintHood",
    "Recent",
    "SendTo",
    "Start Menu",
    "Templates",
    "WindowsApps",
    // Development and package caches
    "node_modules",
    ".git",
    ".svn",
    ".hg",
    ".venv",
    "venv",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".cargo",
    ".rustup",
    ".npm",
    ".gradle",
    ".m2",
    // Game platforms and saves
    "SteamLibrary",
    "Steam",
    "Epic Games",
    "Origin Games",
    "Battle.net",
    "GOG Games",
    "Riot Games",
    "Xbox Games",
    "Saved Games",
    "My Games",
    // Cloud sync roots
    "OneDrive",
    "Google Drive",
    "Dropbox",
    "iCloud Drive",
    // Virtual machines
    "VirtualBox VMs",
    "VMware",
    "Hyper-V",
    // Our own output and installation
    "tidymove",
    DEFAULT_DESTINATION_DIR,
    BACKUP_DIR,
    REVIEW_DIR,
];

const DEFAULT_PROTECTED_PATHS: &[&str] = &[
    "/proc",
    "/sys",
    "/dev",
    "/run",
    "/boot",
    "/bin",
    "/sbin",
    "/lib",
    "/lib32",
    "/lib64",
    "/usr",
    "/etc",
    "/opt",
    "/snap",
    "/var/lib",
    "/var/cache",
    "/var/log",
    "/System",
    "/Library",
    "/Applications",
    "/private/etc",
    "/private/var/db",
];

const DEFAULT_PROTECTED_EXTENSIONS: &[&str] = &[
    ".sys", ".dll", ".exe", ".msi", ".bat", ".cmd", ".ps1", ".ini", ".cfg", ".conf", ".reg",
    ".dat",
];

impl OrganizerConfig {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.tidymoverc.toml` in the current directory
    /// 3. Look for `~/.config/tidymove/config.toml` in home directory
    /// 4. Fall back to default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is explicitly provided but cannot be read.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(".tidymoverc.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Ok(home) = std::env::var("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("tidymove")
                .join("config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        Ok(Self::default())
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Check the configuration against the filesystem and freeze it.
    ///
    /// Nothing is created or modified here; every failure is a [`ConfigError`].
    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        if self.scan.mode == ScanMode::SingleFolder && self.scan.roots.len() > 1 {
            return Err(ConfigError::ConfigInvalid(format!(
                "single_folder mode takes one root but {} are configured; use multi_folder",
                self.scan.roots.len()
            )));
        }
        let declared_roots: Vec<PathBuf> = match self.scan.mode {
            ScanMode::SingleFolder | ScanMode::MultiFolder => self.scan.roots.clone(),
            ScanMode::FullPc => Vec::new(),
        };

        let RootSet { roots, unavailable } = match self.scan.mode {
            ScanMode::FullPc => scanner::resolve_drives(&self.scan.drives),
            _ => {
                let mut roots = Vec::with_capacity(declared_roots.len());
                for root in &declared_roots {
                    if !root.exists() {
                        return Err(ConfigError::MissingRoot(root.clone()));
                    }
                    if !root.is_dir() {
                        return Err(ConfigError::RootNotDirectory(root.clone()));
                    }
                    roots.push(absolutize(root));
                }
                RootSet {
                    roots,
                    unavailable: Vec::new(),
                }
            }
        };

        if roots.is_empty() {
            return Err(ConfigError::NoRoots);
        }

        let destination_root = match &self.destination.root {
            Some(root) if root.as_os_str().is_empty() => {
                return Err(ConfigError::InvalidDestination {
                    path: root.clone(),
                    reason: "path is empty".to_string(),
                });
            }
            Some(root) => absolutize(root),
            None if self.scan.mode == ScanMode::FullPc => {
                return Err(ConfigError::InvalidDestination {
                    path: PathBuf::new(),
                    reason: "full_pc mode requires an explicit destination root".to_string(),
                });
            }
            None => roots[0].join(DEFAULT_DESTINATION_DIR),
        };

        if destination_root.exists() && !destination_root.is_dir() {
            return Err(ConfigError::InvalidDestination {
                path: destination_root,
                reason: "exists and is not a directory".to_string(),
            });
        }
        if let Some(protected) = self
            .exclusions
            .protected_paths
            .iter()
            .find(|p| destination_root.starts_with(p))
        {
            return Err(ConfigError::InvalidDestination {
                reason: format!("lies under protected path {}", protected.display()),
                path: destination_root,
            });
        }
        if let Some(root) = roots.iter().find(|r| r.starts_with(&destination_root)) {
            return Err(ConfigError::RootInsideDestination {
                root: root.clone(),
                destination: destination_root,
            });
        }

        let review_root = self
            .destination
            .review_root
            .as_deref()
            .map(absolutize)
            .unwrap_or_else(|| destination_root.join(REVIEW_DIR));
        let backup_root = self
            .destination
            .backup_root
            .as_deref()
            .map(absolutize)
            .unwrap_or_else(|| destination_root.join(BACKUP_DIR));
        let ledger_path = absolutize(&self.state.ledger_path());
        let activity_log_path = absolutize(&self.state.activity_log_path());

        // The organizer never scans its own output, state or installation.
        let mut owned_paths = vec![
            destination_root.clone(),
            review_root.clone(),
            backup_root.clone(),
        ];
        owned_paths.extend(ledger_path.parent().map(Path::to_path_buf));
        owned_paths.extend(activity_log_path.parent().map(Path::to_path_buf));
        if let Ok(exe) = std::env::current_exe()
            && let Some(dir) = exe.parent()
        {
            owned_paths.push(dir.to_path_buf());
        }

        let rules = self.exclusions.compile(&owned_paths)?;
        let guard = PathGuard::new(
            rules,
            SizeBounds {
                min_bytes: self.scan.min_bytes,
                max_bytes: self.scan.max_bytes,
            },
            self.scan.include_hidden,
        )
        .with_roots(roots.iter().cloned());

        for root in &roots {
            if let Some(reason) = guard.root_exclusion(root) {
                return Err(ConfigError::ProtectedRoot {
                    path: root.clone(),
                    reason,
                });
            }
        }

        Ok(ValidatedConfig {
            roots,
            unavailable_roots: unavailable,
            destination_root,
            review_root,
            backup_root,
            ledger_path,
            activity_log_path,
            guard,
            settings: self,
        })
    }
}

impl ExclusionSettings {
    /// Compile every configured rule, plus `owned_paths` as protected paths.
    ///
    /// # Errors
    ///
    /// Returns an error if any regex or glob patterns are invalid.
    pub fn compile(&self, owned_paths: &[PathBuf]) -> Result<Vec<ExclusionRule>, ConfigError> {
        let mut rules: Vec<ExclusionRule> = Vec::new();

        rules.extend(self.protected_dirs.iter().map(ExclusionRule::segment));
        rules.extend(self.protected_paths.iter().map(ExclusionRule::path));
        rules.extend(owned_paths.iter().map(ExclusionRule::path));
        rules.extend(self.filenames.iter().map(ExclusionRule::file_name));
        rules.extend(
            self.protected_extensions
                .iter()
                .map(|ext| ExclusionRule::extension(ext)),
        );

        for pattern in &self.patterns {
            let compiled = Pattern::new(pattern)
                .map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))?;
            rules.push(ExclusionRule::glob(compiled));
        }

        for pattern in &self.regex {
            let compiled = Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            rules.push(ExclusionRule::regex(compiled));
        }

        Ok(rules)
    }
}

/// Configuration after validation: resolved absolute paths plus the compiled guard.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub roots: Vec<PathBuf>,
    /// Volumes that could not be enumerated in `full_pc` mode, with the reason.
    pub unavailable_roots: Vec<(PathBuf, String)>,
    pub destination_root: PathBuf,
    pub review_root: PathBuf,
    pub backup_root: PathBuf,
    pub ledger_path: PathBuf,
    pub activity_log_path: PathBuf,
    pub guard: PathGuard,
    pub settings: OrganizerConfig,
}

impl ValidatedConfig {
    pub fn dry_run(&self) -> bool {
        self.settings.run.dry_run
    }

    pub fn max_files(&self) -> usize {
        self.settings.scan.max_files
    }
}

/// Best-effort absolute form of `path` that does not require it to exist.
fn absolutize(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name())
        && !parent.as_os_str().is_empty()
        && let Ok(parent) = fs::canonicalize(parent)
    {
        return parent.join(name);
    }
    if path.is_relative()
        && let Ok(cwd) = std::env::current_dir()
    {
        return cwd.join(path);
    }
    path.to_path_buf()
}
