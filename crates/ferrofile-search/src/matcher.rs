//! Match strategies, one per search mode.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use ferrofile_core::EngineConfig;

use crate::error::SearchError;
use crate::pattern::WildcardPattern;
use crate::query::{is_text_file, FileCategory, SearchMode, SearchQuery};

/// A regular file offered to a matcher.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub path: &'a Path,
    pub name: &'a str,
    pub size: u64,
}

/// Decides whether a file belongs in the results.
pub trait FileMatcher: Send + Sync {
    fn matches(&self, candidate: &Candidate<'_>) -> bool;
}

/// Whole-name glob match.
#[derive(Debug, Clone)]
pub struct WildcardMatcher {
    pattern: WildcardPattern,
}

impl WildcardMatcher {
    pub fn new(pattern: &str) -> Result<Self, SearchError> {
        Ok(Self {
            pattern: WildcardPattern::new(pattern)?,
        })
    }
}

impl FileMatcher for WildcardMatcher {
    fn matches(&self, candidate: &Candidate<'_>) -> bool {
        self.pattern.is_match(candidate.name)
    }
}

/// Case-insensitive name containment.
#[derive(Debug, Clone)]
pub struct SubstringMatcher {
    needle: String,
}

impl SubstringMatcher {
    pub fn new(needle: &str) -> Self {
        Self {
            needle: needle.to_lowercase(),
        }
    }
}

impl FileMatcher for SubstringMatcher {
    fn matches(&self, candidate: &Candidate<'_>) -> bool {
        candidate.name.to_lowercase().contains(&self.needle)
    }
}

/// Line-by-line glob search inside text files.
#[derive(Debug, Clone)]
pub struct ContentMatcher {
    pattern: WildcardPattern,
}

impl ContentMatcher {
    pub fn new(pattern: &str) -> Result<Self, SearchError> {
        Ok(Self {
            pattern: WildcardPattern::new(pattern)?,
        })
    }

    fn grep(&self, path: &Path) -> std::io::Result<bool> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut line = Vec::new();

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                return Ok(false);
            }
            let text = String::from_utf8_lossy(&line);
            if self.pattern.find_in(text.trim_end_matches(['\r', '\n'])) {
                return Ok(true);
            }
        }
    }
}

impl FileMatcher for ContentMatcher {
    fn matches(&self, candidate: &Candidate<'_>) -> bool {
        if !is_text_file(candidate.name) {
            return false;
        }
        match self.grep(candidate.path) {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!(path = %candidate.path.display(), error = %e, "cannot read file contents");
                false
            }
        }
    }
}

/// Extension belongs to a [`FileCategory`].
#[derive(Debug, Clone, Copy)]
pub struct CategoryMatcher {
    category: FileCategory,
}

impl CategoryMatcher {
    pub fn new(category: FileCategory) -> Self {
        Self { category }
    }
}

impl FileMatcher for CategoryMatcher {
    fn matches(&self, candidate: &Candidate<'_>) -> bool {
        self.category.contains(candidate.name)
    }
}

/// Size strictly above a threshold.
#[derive(Debug, Clone, Copy)]
pub struct LargeFileMatcher {
    threshold: u64,
}

impl LargeFileMatcher {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }
}

impl FileMatcher for LargeFileMatcher {
    fn matches(&self, candidate: &Candidate<'_>) -> bool {
        candidate.size > self.threshold
    }
}

/// Build the matcher for a query's mode.
pub fn build_matcher(query: &SearchQuery, config: &EngineConfig) -> Result<Arc<dyn FileMatcher>, SearchError> {
    let pattern = query.pattern.trim();
    let matcher: Arc<dyn FileMatcher> = match query.mode {
        SearchMode::Wildcard => Arc::new(WildcardMatcher::new(pattern)?),
        SearchMode::Substring => Arc::new(SubstringMatcher::new(pattern)),
        SearchMode::ContentWildcard => Arc::new(ContentMatcher::new(pattern)?),
        SearchMode::ByCategory(category) => Arc::new(CategoryMatcher::new(category)),
        SearchMode::LargeFile => Arc::new(LargeFileMatcher::new(config.large_file_threshold)),
    };
    Ok(matcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn candidate<'a>(path: &'a Path, name: &'a str, size: u64) -> Candidate<'a> {
        Candidate { path, name, size }
    }

    #[test]
    fn test_substring_is_case_insensitive() {
        let matcher = SubstringMatcher::new("Report");
        let path = Path::new("/x/ANNUAL_REPORT.pdf");
        assert!(matcher.matches(&candidate(path, "ANNUAL_REPORT.pdf", 0)));
        assert!(!matcher.matches(&candidate(path, "summary.pdf", 0)));
    }

    #[test]
    fn test_large_file_threshold_is_strict() {
        let matcher = LargeFileMatcher::new(100);
        let path = Path::new("/x/big.bin");
        assert!(!matcher.matches(&candidate(path, "big.bin", 100)));
        assert!(matcher.matches(&candidate(path, "big.bin", 101)));
    }

    #[test]
    fn test_content_matcher() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("server.log");
        let image = temp.path().join("server.png");
        fs::write(&log, "start\nfatal: disk full\nstop\n").unwrap();
        fs::write(&image, "fatal: disk full").unwrap();

        let matcher = ContentMatcher::new("disk*full").unwrap();
        assert!(matcher.matches(&candidate(&log, "server.log", 0)));
        assert!(!matcher.matches(&candidate(&image, "server.png", 0)));

        let matcher = ContentMatcher::new("network").unwrap();
        assert!(!matcher.matches(&candidate(&log, "server.log", 0)));
    }

    #[test]
    fn test_content_matcher_tolerates_invalid_utf8() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("mixed.txt");
        fs::write(&file, b"\xff\xfe broken\nneedle here\n").unwrap();

        let matcher = ContentMatcher::new("needle").unwrap();
        assert!(matcher.matches(&candidate(&file, "mixed.txt", 0)));
    }

    #[test]
    fn test_build_matcher_per_mode() {
        let config = EngineConfig::default();
        let path = Path::new("/m/song.MP3");
        let query = SearchQuery::new(vec![], "x", SearchMode::ByCategory(FileCategory::Audio));

        let matcher = build_matcher(&query, &config).unwrap();
        assert!(matcher.matches(&candidate(path, "song.MP3", 10)));
    }
}
