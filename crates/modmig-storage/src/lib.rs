//! Persisted work queue + catalog file I/O for the migration workflow.

use std::path::{Path, PathBuf};

use anyhow::Context;
use indexmap::IndexMap;
use modmig_core::{CatalogRecord, ProductKey, WorkItem};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "modmig-storage";

pub const QUEUE_HEADER: &str = "Famiglia,Prodotto";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("reading work queue {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("persisting work queue {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Products still waiting for migration, keyed by [`ProductKey`] in file order.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    path: PathBuf,
    items: IndexMap<ProductKey, WorkItem>,
}

impl WorkQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            items: IndexMap::new(),
        }
    }

    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let path = path.into();
        let text = fs::read_to_string(&path)
            .await
            .map_err(|source| QueueError::Read {
                path: path.clone(),
                source,
            })?;
        Ok(Self::parse(path, &text))
    }

    /// Parse queue text. The header and blank lines are skipped; a repeated key
    /// keeps its first position and takes the last row's values.
    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Self {
        let mut queue = Self::new(path);
        for (idx, line) in text.lines().enumerate().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            let mut columns = line.split(',').map(str::trim);
            match (columns.next(), columns.next()) {
                (Some(family), Some(product)) => queue.push(WorkItem::new(family, product)),
                _ => warn!(line = idx + 1, path = %queue.path.display(), "skipping malformed work queue row"),
            }
        }
        queue
    }

    pub fn push(&mut self, item: WorkItem) {
        self.items.insert(item.key(), item);
    }

    /// Removing a key that is not queued is a no-op.
    pub fn remove(&mut self, key: &ProductKey) -> Option<WorkItem> {
        self.items.shift_remove(key)
    }

    pub fn contains(&self, key: &ProductKey) -> bool {
        self.items.contains_key(key)
    }

    pub fn items(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn render(&self) -> String {
        std::iter::once(QUEUE_HEADER.to_string())
            .chain(
                self.items
                    .values()
                    .map(|item| format!("{},{}", item.family_id, item.product_id)),
            )
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Replace the persisted queue with the remaining items via temp-file rename,
    /// so a crash leaves either the old file or the new one.
    pub async fn save(&self) -> Result<(), QueueError> {
        let persist_err = |source| QueueError::Persist {
            path: self.path.clone(),
            source,
        };
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).await.map_err(persist_err)?;

        let temp_path = parent.join(format!(".{}.queue.tmp", Uuid::new_v4()));
        let body = self.render();
        let write = async {
            let mut file = fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&temp_path)
                .await?;
            file.write_all(body.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &self.path).await
        };

        if let Err(err) = write.await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(persist_err(err));
        }
        debug!(path = %self.path.display(), remaining = self.items.len(), "work queue saved");
        Ok(())
    }
}

pub async fn read_catalog(path: impl AsRef<Path>) -> anyhow::Result<String> {
    let path = path.as_ref();
    fs::read_to_string(path)
        .await
        .with_context(|| format!("reading catalog {}", path.display()))
}

/// Write records newline-joined in catalog column order, no header.
pub async fn write_matched_catalog(path: impl AsRef<Path>, records: &[CatalogRecord]) -> anyhow::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let body = records
        .iter()
        .map(CatalogRecord::to_csv_row)
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(path, body)
        .await
        .with_context(|| format!("writing catalog {}", path.display()))
}
