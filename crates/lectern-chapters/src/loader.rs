//! Chapter resolution: cache, local storage, network.

use crate::cache::ChapterCache;
use crate::provider::{ChapterError, ChapterProvider, CleanChapter};
use lectern_foundation::ReaderPrefs;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How linked pages are folded into the chapter text.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    pub merge_linked_pages: bool,
    pub discard_first_page: bool,
    pub use_longest_page: bool,
}

impl MergeOptions {
    pub fn from_prefs(prefs: &ReaderPrefs) -> Self {
        Self {
            merge_linked_pages: prefs.merge_linked_pages,
            discard_first_page: prefs.discard_first_page,
            use_longest_page: prefs.use_longest_page,
        }
    }
}

/// Result of a load request.
#[derive(Debug)]
pub enum LoadStatus {
    /// Served from the chapter cache.
    Cached(CleanChapter),
    /// Read from local storage (and now cached).
    Loaded(CleanChapter),
    /// A network fetch is in flight; a [`FetchOutcome`] will follow.
    Fetching,
    /// The index is out of range.
    NoChapter,
    /// Not stored locally and no connectivity.
    Offline,
}

/// Completion message of a background fetch task.
#[derive(Debug)]
pub struct FetchOutcome {
    pub index: usize,
    pub result: Result<CleanChapter, ChapterError>,
}

pub type OutcomeSender = mpsc::UnboundedSender<FetchOutcome>;

struct FetchJob {
    index: usize,
    for_caching: bool,
    handle: JoinHandle<()>,
}

/// Resolves chapter indices to text, keeping fetch-job bookkeeping so at
/// most one fetch is "primary" (the one playback is waiting on) while
/// prefetches run quietly alongside.
pub struct ChapterLoader {
    provider: Arc<dyn ChapterProvider>,
    cache: ChapterCache,
    merge: MergeOptions,
    outcome_tx: OutcomeSender,
    jobs: Vec<FetchJob>,
    primary: Option<usize>,
}

impl ChapterLoader {
    pub fn new(
        provider: Arc<dyn ChapterProvider>,
        merge: MergeOptions,
        cache_capacity: usize,
        outcome_tx: OutcomeSender,
    ) -> Self {
        Self {
            provider,
            cache: ChapterCache::new(cache_capacity),
            merge,
            outcome_tx,
            jobs: Vec::new(),
            primary: None,
        }
    }

    pub fn chapter_count(&self) -> usize {
        self.provider.chapter_count()
    }

    pub fn set_merge(&mut self, merge: MergeOptions) {
        self.merge = merge;
    }

    /// True while the fetch playback is waiting on is still in flight.
    pub fn has_primary_fetch(&self) -> bool {
        self.primary.is_some()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Resolves `index`. `for_caching` requests are pure prefetches:
    /// they never become the primary fetch and their results are only
    /// retained in the cache.
    pub async fn request(&mut self, index: i64, for_caching: bool) -> LoadStatus {
        if index < 0 || index as usize >= self.provider.chapter_count() {
            return LoadStatus::NoChapter;
        }
        let index = index as usize;

        if let Some(chapter) = self.cache.get(index) {
            return LoadStatus::Cached(chapter.clone());
        }

        match self.provider.load_local(index).await {
            Ok(Some(chapter)) => {
                let merged = merge_pages(self.provider.as_ref(), &self.merge, chapter).await;
                self.cache.insert(merged.clone());
                if for_caching {
                    LoadStatus::Cached(merged)
                } else {
                    LoadStatus::Loaded(merged)
                }
            }
            Ok(None) => self.spawn_fetch(index, for_caching),
            Err(err) => {
                tracing::warn!(index, "Local chapter read failed: {err}");
                self.spawn_fetch(index, for_caching)
            }
        }
    }

    fn spawn_fetch(&mut self, index: usize, for_caching: bool) -> LoadStatus {
        if !self.provider.is_online() {
            return LoadStatus::Offline;
        }
        self.jobs.retain(|job| !job.handle.is_finished());

        if !for_caching {
            // A new primary supersedes the old one; the superseded fetch
            // is cancelled rather than demoted, its result is stale.
            if let Some(previous) = self.primary {
                if previous != index {
                    if let Some(pos) = self.jobs.iter().position(|j| j.index == previous) {
                        tracing::debug!(index = previous, "Cancelling superseded chapter fetch");
                        self.jobs[pos].handle.abort();
                        self.jobs.remove(pos);
                    }
                    self.primary = None;
                }
            }
        }

        if let Some(job) = self.jobs.iter_mut().find(|j| j.index == index) {
            if !for_caching {
                // Promote an in-flight prefetch to primary so playback
                // switches to it when it lands.
                job.for_caching = false;
                self.primary = Some(index);
            }
            return LoadStatus::Fetching;
        }

        tracing::debug!(index, for_caching, "Fetching chapter");
        let provider = self.provider.clone();
        let merge = self.merge;
        let tx = self.outcome_tx.clone();
        let handle = tokio::spawn(async move {
            let result = match provider.fetch_remote(index).await {
                Ok(chapter) => Ok(merge_pages(provider.as_ref(), &merge, chapter).await),
                Err(err) => Err(err),
            };
            let _ = tx.send(FetchOutcome { index, result });
        });
        self.jobs.push(FetchJob {
            index,
            for_caching,
            handle,
        });
        if !for_caching {
            self.primary = Some(index);
        }
        LoadStatus::Fetching
    }

    /// Records a fetch completion. Returns true when the fetch was a
    /// pure prefetch (result goes to cache only).
    pub fn finish(&mut self, outcome: &FetchOutcome) -> bool {
        let for_caching = match self.jobs.iter().position(|j| j.index == outcome.index) {
            Some(pos) => self.jobs.remove(pos).for_caching,
            // Job was cancelled before the result landed; whatever
            // arrived is only worth caching.
            None => true,
        };
        if self.primary == Some(outcome.index) {
            self.primary = None;
        }
        if let Ok(chapter) = &outcome.result {
            self.cache.insert(chapter.clone());
        }
        for_caching
    }

    pub fn cancel_all(&mut self) {
        for job in self.jobs.drain(..) {
            job.handle.abort();
        }
        self.primary = None;
    }
}

/// Folds linked pages into the chapter text per the merge options.
/// Pages that fail to resolve are skipped.
async fn merge_pages(
    provider: &dyn ChapterProvider,
    merge: &MergeOptions,
    chapter: CleanChapter,
) -> CleanChapter {
    if !merge.merge_linked_pages || chapter.linked_pages.is_empty() {
        return chapter;
    }
    let mut text = if merge.discard_first_page {
        String::new()
    } else {
        chapter.text.clone()
    };
    let mut page_texts = Vec::new();
    for page in &chapter.linked_pages {
        match provider.fetch_page(chapter.chapter_index, &page.href).await {
            Ok(resolved) => page_texts.push(resolved.text),
            Err(err) => {
                tracing::warn!(href = %page.href, "Skipping linked page: {err}");
            }
        }
    }
    if merge.use_longest_page {
        if let Some(longest) = page_texts.into_iter().max_by_key(|t| t.len()) {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&longest);
        }
    } else {
        for page_text in page_texts {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&page_text);
        }
    }
    CleanChapter { text, ..chapter }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::PageRef;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct MapProvider {
        local: HashMap<usize, CleanChapter>,
        remote: HashMap<usize, CleanChapter>,
        pages: HashMap<String, String>,
        online: bool,
        count: usize,
    }

    impl MapProvider {
        fn new(count: usize) -> Self {
            Self {
                local: HashMap::new(),
                remote: HashMap::new(),
                pages: HashMap::new(),
                online: true,
                count,
            }
        }
    }

    fn chapter(index: usize, text: &str) -> CleanChapter {
        CleanChapter {
            chapter_index: index,
            text: text.to_string(),
            title: format!("Chapter {index}"),
            linked_pages: Vec::new(),
        }
    }

    #[async_trait]
    impl ChapterProvider for MapProvider {
        fn chapter_count(&self) -> usize {
            self.count
        }

        fn is_online(&self) -> bool {
            self.online
        }

        async fn load_local(&self, index: usize) -> Result<Option<CleanChapter>, ChapterError> {
            Ok(self.local.get(&index).cloned())
        }

        async fn fetch_remote(&self, index: usize) -> Result<CleanChapter, ChapterError> {
            self.remote
                .get(&index)
                .cloned()
                .ok_or(ChapterError::Fetch("connection refused".into()))
        }

        async fn fetch_page(&self, index: usize, href: &str) -> Result<CleanChapter, ChapterError> {
            self.pages
                .get(href)
                .map(|text| chapter(index, text))
                .ok_or(ChapterError::Fetch("missing page".into()))
        }
    }

    fn loader(provider: MapProvider, merge: MergeOptions) -> (ChapterLoader, mpsc::UnboundedReceiver<FetchOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChapterLoader::new(Arc::new(provider), merge, 5, tx), rx)
    }

    #[tokio::test]
    async fn out_of_range_is_no_chapter() {
        let (mut loader, _rx) = loader(MapProvider::new(3), MergeOptions::default());
        assert!(matches!(loader.request(-1, false).await, LoadStatus::NoChapter));
        assert!(matches!(loader.request(3, false).await, LoadStatus::NoChapter));
    }

    #[tokio::test]
    async fn local_read_is_loaded_then_cached() {
        let mut provider = MapProvider::new(2);
        provider.local.insert(0, chapter(0, "local text"));
        let (mut loader, _rx) = loader(provider, MergeOptions::default());

        assert!(matches!(loader.request(0, false).await, LoadStatus::Loaded(_)));
        assert!(matches!(loader.request(0, false).await, LoadStatus::Cached(_)));
    }

    #[tokio::test]
    async fn offline_without_local_copy() {
        let mut provider = MapProvider::new(2);
        provider.online = false;
        let (mut loader, _rx) = loader(provider, MergeOptions::default());
        assert!(matches!(loader.request(1, false).await, LoadStatus::Offline));
    }

    #[tokio::test]
    async fn fetch_delivers_outcome_and_caches() {
        let mut provider = MapProvider::new(2);
        provider.remote.insert(1, chapter(1, "fetched"));
        let (mut loader, mut rx) = loader(provider, MergeOptions::default());

        assert!(matches!(loader.request(1, false).await, LoadStatus::Fetching));
        assert!(loader.has_primary_fetch());

        let outcome = rx.recv().await.expect("fetch outcome");
        assert_eq!(outcome.index, 1);
        assert!(outcome.result.is_ok());
        let was_prefetch = loader.finish(&outcome);
        assert!(!was_prefetch);
        assert!(!loader.has_primary_fetch());
        assert!(matches!(loader.request(1, false).await, LoadStatus::Cached(_)));
    }

    #[tokio::test]
    async fn failed_fetch_reports_error() {
        let provider = MapProvider::new(2);
        let (mut loader, mut rx) = loader(provider, MergeOptions::default());

        assert!(matches!(loader.request(0, false).await, LoadStatus::Fetching));
        let outcome = rx.recv().await.expect("fetch outcome");
        assert!(outcome.result.is_err());
        loader.finish(&outcome);
        assert!(loader.is_empty_jobs());
    }

    #[tokio::test]
    async fn merge_concatenates_linked_pages() {
        let mut provider = MapProvider::new(1);
        let mut base = chapter(0, "landing");
        base.linked_pages = vec![
            PageRef {
                label: "a".into(),
                href: "page-a".into(),
            },
            PageRef {
                label: "b".into(),
                href: "page-b".into(),
            },
        ];
        provider.local.insert(0, base);
        provider.pages.insert("page-a".into(), "short".into());
        provider
            .pages
            .insert("page-b".into(), "much longer page text".into());

        let merge = MergeOptions {
            merge_linked_pages: true,
            discard_first_page: false,
            use_longest_page: false,
        };
        let (mut loader, _rx) = loader(provider, merge);
        let LoadStatus::Loaded(merged) = loader.request(0, false).await else {
            panic!("expected local load");
        };
        assert_eq!(merged.text, "landing\n\nshort\n\nmuch longer page text");
    }

    #[tokio::test]
    async fn merge_longest_discarding_landing_page() {
        let mut provider = MapProvider::new(1);
        let mut base = chapter(0, "landing");
        base.linked_pages = vec![
            PageRef {
                label: "a".into(),
                href: "page-a".into(),
            },
            PageRef {
                label: "b".into(),
                href: "page-b".into(),
            },
        ];
        provider.local.insert(0, base);
        provider.pages.insert("page-a".into(), "short".into());
        provider
            .pages
            .insert("page-b".into(), "much longer page text".into());

        let merge = MergeOptions {
            merge_linked_pages: true,
            discard_first_page: true,
            use_longest_page: true,
        };
        let (mut loader, _rx) = loader(provider, merge);
        let LoadStatus::Loaded(merged) = loader.request(0, false).await else {
            panic!("expected local load");
        };
        assert_eq!(merged.text, "much longer page text");
    }

    impl ChapterLoader {
        fn is_empty_jobs(&self) -> bool {
            self.jobs.is_empty()
        }
    }
}
