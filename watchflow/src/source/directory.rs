//! Directory-backed item source.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::warn;

use super::ItemSource;
use crate::pipeline::ItemId;
use crate::{Error, Result};

/// Treats every regular file in a directory as an item.
///
/// The identity is the file name and the payload is the file contents.
/// Items are listed oldest-modified first; contents are only read on fetch.
pub struct DirectorySource {
    path: PathBuf,
    extensions: Vec<String>,
}

impl DirectorySource {
    pub fn new(path: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            path: path.into(),
            extensions: extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn accepts(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

#[async_trait]
impl ItemSource for DirectorySource {
    fn name(&self) -> &str {
        "directory"
    }

    async fn poll(&self) -> Result<Vec<ItemId>> {
        let mut entries = tokio::fs::read_dir(&self.path).await.map_err(|e| {
            Error::source_unavailable(format!("cannot read {}: {}", self.path.display(), e))
        })?;

        let mut found: Vec<(SystemTime, String)> = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(Error::source_unavailable(format!(
                        "error listing {}: {}",
                        self.path.display(),
                        e
                    )));
                }
            };

            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() || !self.accepts(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!("Skipping non UTF-8 file name: {}", path.display());
                continue;
            };
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, name.to_string()));
        }

        found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Ok(found.into_iter().map(|(_, name)| ItemId::from(name)).collect())
    }

    async fn fetch(&self, identity: &ItemId) -> Result<Vec<u8>> {
        let name = identity.as_str();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(Error::Other(format!("'{}' is not a file name", name)));
        }

        let path = self.path.join(name);
        tokio::fs::read(&path).await.map_err(|e| {
            Error::source_unavailable(format!("cannot read {}: {}", path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_poll_lists_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), b"first").unwrap();
        std::fs::write(dir.path().join("b.md"), b"second").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let source = DirectorySource::new(dir.path(), Vec::new());
        let mut ids = source.poll().await.unwrap();
        ids.sort();

        assert_eq!(ids, vec![ItemId::new("a.md"), ItemId::new("b.md")]);
        assert_eq!(source.fetch(&ids[0]).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_fetch_reads_only_requested_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), b"first").unwrap();
        let source = DirectorySource::new(dir.path(), Vec::new());

        let ids = source.poll().await.unwrap();
        // Removed between listing and fetch.
        std::fs::remove_file(dir.path().join("a.md")).unwrap();
        let err = source.fetch(&ids[0]).await.unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_fetch_rejects_paths() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("inbox")).unwrap();
        std::fs::write(dir.path().join("secret"), b"x").unwrap();
        let source = DirectorySource::new(dir.path().join("inbox"), Vec::new());

        for name in ["../secret", "..", ""] {
            assert!(source.fetch(&ItemId::new(name)).await.is_err(), "{name:?}");
        }
    }

    #[tokio::test]
    async fn test_extension_filter() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("keep.MD"), b"").unwrap();
        std::fs::write(dir.path().join("skip.tmp"), b"").unwrap();

        let source = DirectorySource::new(dir.path(), vec![".md".to_string()]);
        let ids = source.poll().await.unwrap();

        assert_eq!(ids, vec![ItemId::new("keep.MD")]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let source = DirectorySource::new(dir.path().join("missing"), Vec::new());

        let err = source.poll().await.unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable(_)));
    }
}
