//! File categorization: which destination folder a file belongs in.
//!
//! The move engine only sees the [`Categorizer`] trait. The stock implementation,
//! [`FileMapper`], checks folder rules first (a file under `.../Budgets/...` goes to
//! `Finance`), then the sniffed MIME type, then the extension.
//!
//! # Examples
//!
//! ```
//! use tidymove::file_category::{Category, FileMapper};
//!
//! let mapper = FileMapper::default();
//! assert_eq!(mapper.mime_to_category("image/png"), Some(Category::Image));
//! assert_eq!(mapper.extension_to_category("xlsx"), Some(Category::Spreadsheet));
//! assert_eq!(mapper.categorize(None, Some("unknown")), Category::Other);
//! ```

use crate::scanner::FileDescriptor;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, PathBuf};
use thiserror::Error;

/// Label used when a categorizer fails for a file.
pub const FALLBACK_CATEGORY: &str = "Uncategorized";

#[derive(Error, Debug)]
pub enum CategorizeError {
    #[error("Cannot categorize {}: path has no file name", .0.display())]
    NoFileName(PathBuf),

    #[error("Cannot categorize {}: {reason}", .path.display())]
    Rejected { path: PathBuf, reason: String },
}

/// Maps a file to a category label. The label becomes a folder under the
/// destination root.
pub trait Categorizer: Send + Sync {
    fn classify(&self, descriptor: &FileDescriptor) -> Result<String, CategorizeError>;
}

/// Built-in type categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Document,
    Spreadsheet,
    Presentation,
    Image,
    Video,
    Audio,
    Archive,
    Code,
    Font,
    /// Anything not recognised.
    Other,
}

impl Category {
    /// Returns the destination folder name for this category.
    ///
    /// # Examples
    ///
    /// ```
    /// use tidymove::file_category::Category;
    ///
    /// assert_eq!(Category::Image.dir_name(), "Images");
    /// assert_eq!(Category::Other.dir_name(), "Other");
    /// ```
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Document => "Documents",
            Category::Spreadsheet => "Spreadsheets",
            Category::Presentation => "Presentations",
            Category::Image => "Images",
            Category::Video => "Videos",
            Category::Audio => "Audio",
            Category::Archive => "Archives",
            Category::Code => "Code",
            Category::Font => "Fonts",
            Category::Other => "Other",
        }
    }
}

/// Maps folder names, MIME types and file extensions to categories.
#[derive(Debug, Clone)]
pub struct FileMapper {
    mime_map: HashMap<String, Category>,
    extension_map: HashMap<String, Category>,
    /// Lower-cased folder name -> label.
    folder_map: HashMap<String, String>,
}

impl FileMapper {
    /// Creates a new `FileMapper` with the standard type mappings and no folder rules.
    pub fn new() -> Self {
        let mut mapper = Self {
            mime_map: HashMap::new(),
            extension_map: HashMap::new(),
            folder_map: HashMap::new(),
        };
        mapper.populate_standard_mappings();
        mapper
    }

    /// Standard mappings plus the given folder rules.
    pub fn with_folder_rules(folders: &BTreeMap<String, String>) -> Self {
        let mut mapper = Self::new();
        for (folder, label) in folders {
            mapper.add_folder_mapping(folder, label);
        }
        mapper
    }

    fn populate_standard_mappings(&mut self) {
        const MIME: &[(&str, Category)] = &[
            ("image/png", Category::Image),
            ("image/jpeg", Category::Image),
            ("image/gif", Category::Image),
            ("image/webp", Category::Image),
            ("image/bmp", Category::Image),
            ("image/tiff", Category::Image),
            ("image/heif", Category::Image),
            ("image/svg+xml", Category::Image),
            ("audio/mpeg", Category::Audio),
            ("audio/x-wav", Category::Audio),
            ("audio/ogg", Category::Audio),
            ("audio/x-flac", Category::Audio),
            ("audio/aac", Category::Audio),
            ("audio/m4a", Category::Audio),
            ("video/mp4", Category::Video),
            ("video/quicktime", Category::Video),
            ("video/x-msvideo", Category::Video),
            ("video/x-matroska", Category::Video),
            ("video/webm", Category::Video),
            ("video/x-ms-wmv", Category::Video),
            ("application/pdf", Category::Document),
            ("application/rtf", Category::Document),
            ("application/msword", Category::Document),
            (
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                Category::Document,
            ),
            ("application/vnd.oasis.opendocument.text", Category::Document),
            ("application/vnd.ms-excel", Category::Spreadsheet),
            (
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                Category::Spreadsheet,
            ),
            ("application/vnd.oasis.opendocument.spreadsheet", Category::Spreadsheet),
            ("application/vnd.ms-powerpoint", Category::Presentation),
            (
                "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                Category::Presentation,
            ),
            ("application/vnd.oasis.opendocument.presentation", Category::Presentation),
            ("application/zip", Category::Archive),
            ("application/vnd.rar", Category::Archive),
            ("application/x-7z-compressed", Category::Archive),
            ("application/x-tar", Category::Archive),
            ("application/gzip", Category::Archive),
            ("application/x-bzip2", Category::Archive),
            ("application/x-xz", Category::Archive),
            ("font/ttf", Category::Font),
            ("font/otf", Category::Font),
            ("font/woff", Category::Font),
            ("font/woff2", Category::Font),
        ];

        const EXTENSIONS: &[(&[&str], Category)] = &[
            (&["pdf", "docx", "doc", "txt", "rtf", "odt", "md"], Category::Document),
            (&["xlsx", "xls", "csv", "ods"], Category::Spreadsheet),
            (&["pptx", "ppt", "key", "odp"], Category::Presentation),
            (
                &["jpg", "jpeg", "png", "gif", "bmp", "svg", "webp", "tiff", "heic"],
                Category::Image,
            ),
            (&["mp4", "avi", "mkv", "mov", "wmv", "webm"], Category::Video),
            (&["mp3", "wav", "flac", "aac", "ogg", "m4a"], Category::Audio),
            (&["zip", "rar", "7z", "tar", "gz", "bz2", "xz"], Category::Archive),
            (
                &["py", "java", "cpp", "c", "h", "js", "ts", "rs", "go", "html", "css", "sql"],
                Category::Code,
            ),
            (&["ttf", "otf", "woff", "woff2"], Category::Font),
        ];

        for (mime, category) in MIME {
            self.add_mime_mapping(mime, *category);
        }
        for (extensions, category) in EXTENSIONS {
            for ext in *extensions {
                self.add_extension_mapping(ext, *category);
            }
        }
    }

    pub fn add_mime_mapping(&mut self, mime: &str, category: Category) {
        self.mime_map.insert(mime.to_lowercase(), category);
    }

    pub fn add_extension_mapping(&mut self, ext: &str, category: Category) {
        self.extension_map.insert(ext.to_lowercase(), category);
    }

    /// Files anywhere under a folder named `folder` get `label`, whatever their type.
    pub fn add_folder_mapping(&mut self, folder: &str, label: &str) {
        self.folder_map.insert(folder.to_lowercase(), label.to_string());
    }

    pub fn mime_to_category(&self, mime_type: &str) -> Option<Category> {
        self.mime_map.get(&mime_type.to_lowercase()).copied()
    }

    pub fn extension_to_category(&self, ext: &str) -> Option<Category> {
        self.extension_map.get(&ext.to_lowercase()).copied()
    }

    /// Determines the category for a file given its MIME type and/or extension.
    ///
    /// MIME type wins when recognised, then the extension, then `Category::Other`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tidymove::file_category::{Category, FileMapper};
    ///
    /// let mapper = FileMapper::default();
    /// assert_eq!(mapper.categorize(Some("image/png"), Some("txt")), Category::Image);
    /// assert_eq!(mapper.categorize(None, Some("pdf")), Category::Document);
    /// assert_eq!(mapper.categorize(None, None), Category::Other);
    /// ```
    pub fn categorize(&self, mime_type: Option<&str>, ext: Option<&str>) -> Category {
        if let Some(mime) = mime_type
            && let Some(category) = self.mime_to_category(mime)
        {
            return category;
        }

        if let Some(extension) = ext
            && let Some(category) = self.extension_to_category(extension)
        {
            return category;
        }

        Category::Other
    }

    /// Label from the nearest enclosing folder rule, if any.
    fn folder_label(&self, descriptor: &FileDescriptor) -> Option<&str> {
        if self.folder_map.is_empty() {
            return None;
        }
        let parent = descriptor.path.parent()?;
        parent
            .components()
            .rev()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name.to_string_lossy().to_lowercase()),
                _ => None,
            })
            .find_map(|name| self.folder_map.get(&name))
            .map(String::as_str)
    }
}

impl Default for FileMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl Categorizer for FileMapper {
    fn classify(&self, descriptor: &FileDescriptor) -> Result<String, CategorizeError> {
        if descriptor.path.file_name().is_none() {
            return Err(CategorizeError::NoFileName(descriptor.path.clone()));
        }
        if let Some(label) = self.folder_label(descriptor) {
            return Ok(label.to_string());
        }
        let category = self.categorize(
            descriptor.content_type.as_deref(),
            descriptor.extension.as_deref(),
        );
        Ok(category.dir_name().to_string())
    }
}
