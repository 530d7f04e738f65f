//! Chapter loading and caching.
//!
//! Resolves a chapter index to clean text through a host-supplied
//! [`ChapterProvider`], merges multi-page chapters, retains a small
//! bounded cache of recent chapters, and runs network fetches as
//! cancellable background tasks whose results are delivered to the
//! engine as [`FetchOutcome`] messages.

pub mod cache;
pub mod loader;
pub mod provider;

pub use cache::ChapterCache;
pub use loader::{ChapterLoader, FetchOutcome, LoadStatus, MergeOptions, OutcomeSender};
pub use provider::{ChapterError, ChapterProvider, CleanChapter, PageRef};
