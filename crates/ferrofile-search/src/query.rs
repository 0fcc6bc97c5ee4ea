//! Search query types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// File extensions whose contents the content search reads.
pub const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "log", "ini", "java", "py", "js", "html", "css", "xml", "json", "md", "csv", "toml",
    "yaml", "yml", "rs",
];

/// Broad file type recognised by extension.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum FileCategory {
    Image,
    Audio,
    Video,
    Document,
    Archive,
}

impl FileCategory {
    /// Lower-case extensions belonging to this category.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Image => &["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg"],
            Self::Audio => &["mp3", "wav", "flac", "m4a"],
            Self::Video => &["mp4", "avi", "mov", "wmv", "mkv"],
            Self::Document => &["txt", "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx"],
            Self::Archive => &["zip", "rar", "7z", "tar", "gz"],
        }
    }

    /// Whether a file name carries one of this category's extensions.
    pub fn contains(&self, file_name: &str) -> bool {
        has_extension(file_name, self.extensions())
    }
}

/// Whether a file name has a content-searchable extension.
pub fn is_text_file(file_name: &str) -> bool {
    has_extension(file_name, TEXT_EXTENSIONS)
}

fn has_extension(file_name: &str, extensions: &[&str]) -> bool {
    let lower = file_name.to_lowercase();
    extensions.iter().any(|ext| {
        lower
            .strip_suffix(ext)
            .is_some_and(|stem| stem.ends_with('.'))
    })
}

/// How file names (or contents) are compared against the pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMode {
    /// Glob match on the whole file name.
    Wildcard,
    /// Case-insensitive containment in the file name.
    Substring,
    /// Glob found anywhere in a line of a text file.
    ContentWildcard,
    /// Extension belongs to a category.
    ByCategory(FileCategory),
    /// File is larger than the large-file threshold.
    LargeFile,
}

/// A search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Directories to walk.
    pub roots: Vec<PathBuf>,
    /// Pattern text, interpreted per mode.
    pub pattern: String,
    pub mode: SearchMode,
}

impl SearchQuery {
    pub fn new(roots: Vec<PathBuf>, pattern: impl Into<String>, mode: SearchMode) -> Self {
        Self {
            roots,
            pattern: pattern.into(),
            mode,
        }
    }

    /// Whether the pattern has any non-whitespace content.
    ///
    /// Queries without one return no results in every mode.
    pub fn has_pattern(&self) -> bool {
        !self.pattern.trim().is_empty()
    }
}
