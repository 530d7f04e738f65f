//! Chapter provider over a directory of plain-text files.
//!
//! Files are ordered by name; each file is one chapter. This is the
//! offline analogue of the HTML-cleaning content pipeline a reading app
//! would plug in.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use lectern_chapters::{ChapterError, ChapterProvider, CleanChapter};
use std::path::{Path, PathBuf};

pub struct FsChapterProvider {
    chapters: Vec<PathBuf>,
}

impl FsChapterProvider {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut chapters = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("reading chapter directory {}", dir.display()))?
        {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "txt") {
                chapters.push(path);
            }
        }
        if chapters.is_empty() {
            bail!("no .txt chapters found in {}", dir.display());
        }
        chapters.sort();
        tracing::info!(count = chapters.len(), dir = %dir.display(), "Found chapters");
        Ok(Self { chapters })
    }

    fn title_of(path: &Path) -> String {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().replace(['_', '-'], " "))
            .unwrap_or_else(|| "Untitled".to_string())
    }
}

#[async_trait]
impl ChapterProvider for FsChapterProvider {
    fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    fn is_online(&self) -> bool {
        false
    }

    async fn load_local(&self, index: usize) -> Result<Option<CleanChapter>, ChapterError> {
        let Some(path) = self.chapters.get(index) else {
            return Ok(None);
        };
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| ChapterError::Storage(err.to_string()))?;
        Ok(Some(CleanChapter {
            chapter_index: index,
            text,
            title: Self::title_of(path),
            linked_pages: Vec::new(),
        }))
    }

    async fn fetch_remote(&self, index: usize) -> Result<CleanChapter, ChapterError> {
        Err(ChapterError::Offline { index })
    }

    async fn fetch_page(&self, _index: usize, href: &str) -> Result<CleanChapter, ChapterError> {
        Err(ChapterError::Fetch(format!(
            "linked pages are not supported by the filesystem provider: {href}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_chapters(dir: &Path, names: &[(&str, &str)]) {
        for (name, text) in names {
            std::fs::write(dir.join(name), text).unwrap();
        }
    }

    #[tokio::test]
    async fn chapters_are_ordered_by_name() {
        let dir = tempfile::tempdir().unwrap();
        write_chapters(
            dir.path(),
            &[
                ("02-second.txt", "second"),
                ("01-first.txt", "first"),
                ("notes.md", "ignored"),
            ],
        );
        let provider = FsChapterProvider::open(dir.path()).unwrap();
        assert_eq!(provider.chapter_count(), 2);

        let first = provider.load_local(0).await.unwrap().unwrap();
        assert_eq!(first.text, "first");
        assert_eq!(first.title, "01 first");
        assert!(provider.load_local(7).await.unwrap().is_none());
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FsChapterProvider::open(dir.path()).is_err());
    }
}
