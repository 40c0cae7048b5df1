//! Durable dedup store for already-delivered news items.
//!
//! The store owns a [`SeenSet`] and the JSON file backing it. The file is
//! rewritten wholesale on every mutation (temp file, fsync, rename); the set
//! stays small because operators trim it periodically with
//! [`DedupStore::trim`].
//!
//! # File Layout
//!
//! ```text
//! {
//!   "news": [ { "id": "h9ktl2", "title": ..., "link": ..., "publishTime": ..., "summary": ... } ],
//!   "lastUpdate": "2024-10-01T08:00:00.000Z"
//! }
//! ```
//!
//! A missing or unparsable file is not an error: the store starts empty and
//! writes a fresh file immediately.

use crate::error::NewsError;
use crate::models::{NewsItem, SeenSet, StoreStats};
use chrono::Utc;
use itertools::Itertools;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_DATA_FILE: &str = "data/news.json";
pub const DEFAULT_KEEP: usize = 1000;

#[derive(Debug)]
pub struct DedupStore {
    path: PathBuf,
    data: SeenSet,
    seen: HashSet<String>,
}

impl DedupStore {
    /// Load the store from `path`, creating an empty one when the file is
    /// missing or corrupt.
    ///
    /// # Errors
    ///
    /// [`NewsError::Storage`] when the file exists but cannot be read, or the
    /// fresh file cannot be written.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn initialize(path: impl AsRef<Path>) -> Result<Self, NewsError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| NewsError::storage(parent.display().to_string(), e))?;
        }

        let loaded = match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<SeenSet>(&bytes) {
                Ok(set) => Some(set),
                Err(e) => {
                    warn!(error = %e, "Store file is corrupt; starting empty");
                    None
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No store file yet; creating one");
                None
            }
            Err(e) => return Err(NewsError::storage(path.display().to_string(), e)),
        };

        let mut store = Self {
            path,
            data: SeenSet::default(),
            seen: HashSet::new(),
        };

        match loaded {
            Some(set) => {
                store.adopt(set);
                info!(count = store.data.news.len(), "Loaded seen news items");
            }
            None => store.save().await?,
        }
        Ok(store)
    }

    /// Stamp missing identities and drop duplicate records from a loaded set.
    fn adopt(&mut self, set: SeenSet) {
        let before = set.news.len();
        let news: Vec<NewsItem> = set
            .news
            .into_iter()
            .map(|mut item| {
                if item.id.is_empty() {
                    item.id = item.identity();
                }
                item
            })
            .unique_by(|item| item.id.clone())
            .collect();
        if news.len() != before {
            warn!(
                dropped = before - news.len(),
                "Store file held duplicate identities"
            );
        }
        self.seen = news.iter().map(|item| item.id.clone()).collect();
        self.data = SeenSet {
            news,
            last_update: set.last_update,
        };
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, item: &NewsItem) -> bool {
        self.seen.contains(&item.identity())
    }

    /// Candidates whose identity has not been committed yet, in input order.
    pub fn filter_new(&self, candidates: &[NewsItem]) -> Vec<NewsItem> {
        candidates
            .iter()
            .filter(|item| !self.contains(item))
            .cloned()
            .collect()
    }

    /// Append the items not already present and persist the whole set.
    ///
    /// Returns the number of items actually appended. On a write failure the
    /// in-memory set is rolled back so the items read as new again.
    #[instrument(level = "info", skip_all, fields(offered = items.len()))]
    pub async fn commit(&mut self, items: &[NewsItem]) -> Result<usize, NewsError> {
        if items.is_empty() {
            return Ok(0);
        }

        let fresh: Vec<NewsItem> = items
            .iter()
            .filter(|item| !self.contains(item))
            .unique_by(|item| item.identity())
            .map(|item| {
                let mut item = item.clone();
                item.id = item.identity();
                item
            })
            .collect();
        if fresh.is_empty() {
            debug!("All offered items were already committed");
            return Ok(0);
        }

        let previous_len = self.data.news.len();
        let previous_update = self.data.last_update;
        for item in &fresh {
            self.seen.insert(item.id.clone());
        }
        self.data.news.extend(fresh);
        self.data.last_update = Some(Utc::now());

        if let Err(e) = self.save().await {
            for item in self.data.news.drain(previous_len..) {
                self.seen.remove(&item.id);
            }
            self.data.last_update = previous_update;
            return Err(e);
        }

        let appended = self.data.news.len() - previous_len;
        info!(appended, total = self.data.news.len(), "Committed news items");
        Ok(appended)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            total_count: self.data.news.len(),
            last_update: self.data.last_update,
        }
    }

    /// Keep only the `keep` most recently appended items.
    ///
    /// Returns the number of items removed. Nothing is written when the set
    /// is already within bounds, and a failed write leaves the set as it was.
    #[instrument(level = "info", skip(self))]
    pub async fn trim(&mut self, keep: usize) -> Result<usize, NewsError> {
        let len = self.data.news.len();
        if len <= keep {
            return Ok(0);
        }
        let removed: Vec<NewsItem> = self.data.news.drain(..len - keep).collect();
        if let Err(e) = self.save().await {
            let mut restored = removed;
            restored.append(&mut self.data.news);
            self.data.news = restored;
            return Err(e);
        }
        for item in &removed {
            self.seen.remove(&item.id);
        }
        info!(removed = removed.len(), kept = keep, "Trimmed seen news items");
        Ok(removed.len())
    }

    async fn save(&self) -> Result<(), NewsError> {
        let storage_err = |e: std::io::Error| NewsError::storage(self.path.display().to_string(), e);

        let json = serde_json::to_string_pretty(&self.data)
            .map_err(|e| storage_err(std::io::Error::new(ErrorKind::InvalidData, e)))?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp_path).await.map_err(storage_err)?;
        file.write_all(json.as_bytes()).await.map_err(storage_err)?;
        file.sync_all().await.map_err(storage_err)?;
        drop(file);
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(storage_err)?;
        debug!(bytes = json.len(), "Wrote store file");
        Ok(())
    }
}
