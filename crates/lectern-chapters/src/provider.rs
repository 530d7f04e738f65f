//! The content provider boundary.

use async_trait::async_trait;
use thiserror::Error;

/// A page linked from a chapter (translator buffer pages and the like).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRef {
    pub label: String,
    pub href: String,
}

/// Clean plain text for one chapter, as produced by the host's content
/// extraction pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanChapter {
    pub chapter_index: usize,
    pub text: String,
    pub title: String,
    pub linked_pages: Vec<PageRef>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChapterError {
    #[error("no chapter at index {index}")]
    NoSuchChapter { index: usize },

    #[error("offline and chapter {index} is not stored locally")]
    Offline { index: usize },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("fetch failed: {0}")]
    Fetch(String),
}

/// Supplies chapter content. Implemented by the hosting application over
/// its storage and network layers; the engine only ever sees clean text.
#[async_trait]
pub trait ChapterProvider: Send + Sync {
    fn chapter_count(&self) -> usize;

    fn is_online(&self) -> bool;

    /// Reads a chapter from local storage; `Ok(None)` means it is not
    /// stored locally.
    async fn load_local(&self, index: usize) -> Result<Option<CleanChapter>, ChapterError>;

    /// Fetches a chapter from the network.
    async fn fetch_remote(&self, index: usize) -> Result<CleanChapter, ChapterError>;

    /// Resolves a linked page to its text (locally when stored, else
    /// over the network).
    async fn fetch_page(&self, index: usize, href: &str) -> Result<CleanChapter, ChapterError>;
}
