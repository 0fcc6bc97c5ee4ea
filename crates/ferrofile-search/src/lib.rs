//! Cancellable file search for ferrofile.
//!
//! Searches walk each root on the CPU pool and apply one match strategy per
//! regular file: glob on the name, substring, glob inside text content,
//! extension category, or size threshold. Results are capped and streamed
//! through a channel.

mod engine;
mod error;
mod matcher;
mod pattern;
mod query;

pub use engine::{FoundFile, SearchEngine, SearchEvent, SearchHandle, SearchReport};
pub use error::SearchError;
pub use matcher::{
    build_matcher, Candidate, CategoryMatcher, ContentMatcher, FileMatcher, LargeFileMatcher,
    SubstringMatcher, WildcardMatcher,
};
pub use pattern::WildcardPattern;
pub use query::{is_text_file, FileCategory, SearchMode, SearchQuery, TEXT_EXTENSIONS};
