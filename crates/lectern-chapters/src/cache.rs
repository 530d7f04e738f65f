//! Bounded cache of recently rendered chapters.

use crate::provider::CleanChapter;
use std::collections::VecDeque;

/// FIFO over a small constant capacity; inserting an index already
/// present replaces it and moves it to freshest.
#[derive(Debug)]
pub struct ChapterCache {
    entries: VecDeque<CleanChapter>,
    capacity: usize,
}

impl ChapterCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, chapter_index: usize) -> Option<&CleanChapter> {
        self.entries
            .iter()
            .find(|c| c.chapter_index == chapter_index)
    }

    pub fn insert(&mut self, chapter: CleanChapter) {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|c| c.chapter_index == chapter.chapter_index)
        {
            self.entries.remove(pos);
        }
        while self.entries.len() >= self.capacity {
            let evicted = self.entries.pop_front();
            if let Some(evicted) = evicted {
                tracing::trace!(index = evicted.chapter_index, "Evicting cached chapter");
            }
        }
        self.entries.push_back(chapter);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(index: usize) -> CleanChapter {
        CleanChapter {
            chapter_index: index,
            text: format!("text {index}"),
            title: format!("Chapter {index}"),
            linked_pages: Vec::new(),
        }
    }

    #[test]
    fn evicts_oldest_first() {
        let mut cache = ChapterCache::new(5);
        for i in 1..=7 {
            cache.insert(chapter(i));
        }
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_none());
        for i in 3..=7 {
            assert!(cache.get(i).is_some(), "chapter {i} should be cached");
        }
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn reinsert_replaces_and_refreshes() {
        let mut cache = ChapterCache::new(3);
        cache.insert(chapter(1));
        cache.insert(chapter(2));
        cache.insert(chapter(3));
        // Refresh 1, then insert two more: 2 and 3 get evicted, 1 stays.
        cache.insert(chapter(1));
        cache.insert(chapter(4));
        cache.insert(chapter(5));
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        assert!(cache.get(3).is_none());
        assert_eq!(cache.len(), 3);
    }
}
