//! Persisted record of what the mirror holds.
//!
//! Three JSON collections live under the state directory:
//! - `downloaded.json` - items confirmed present
//! - `orphaned.json` - items that disappeared from the catalog
//! - `not-downloaded.json` - catalog items not (yet) present
//!
//! The three are disjoint by construction (see [`StateSnapshot::compute`]).
//! Every write goes through a `.tmp` sibling that is synced and renamed, so a
//! crash leaves either the old or the new collection, never a torn one.

mod relocate;

pub use relocate::{Relocation, relocate_orphans};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::types::Item;

/// Items confirmed present
pub const FETCHED_FILE: &str = "downloaded.json";
/// Items no longer in the catalog
pub const ORPHANED_FILE: &str = "orphaned.json";
/// Catalog items not present
pub const UNFETCHED_FILE: &str = "not-downloaded.json";

/// The three collections written at the end of a run
#[derive(Debug, Default, Clone)]
pub struct StateSnapshot {
    /// Items present and verified
    pub fetched: HashSet<Item>,
    /// Items that vanished upstream
    pub orphaned: HashSet<Item>,
    /// Catalog items not present
    pub unfetched: HashSet<Item>,
}

impl StateSnapshot {
    /// Combine the prior record with this run's results.
    ///
    /// - `fetched = (prior - new_orphaned) + newly_fetched`, where a newly
    ///   fetched item replaces its prior record
    /// - `orphaned = (previous_orphaned + new_orphaned) - catalog - fetched`
    /// - `unfetched = catalog - fetched`
    pub fn compute(
        prior: &HashSet<Item>,
        previous_orphaned: &HashSet<Item>,
        new_orphaned: &HashSet<Item>,
        newly_fetched: &HashSet<Item>,
        catalog: &HashSet<Item>,
    ) -> Self {
        let mut fetched = newly_fetched.clone();
        for item in prior {
            if !new_orphaned.contains(item) && !fetched.contains(item) {
                fetched.insert(item.clone());
            }
        }

        let orphaned = previous_orphaned
            .iter()
            .chain(new_orphaned)
            .filter(|item| !catalog.contains(*item) && !fetched.contains(*item))
            .cloned()
            .collect();

        let unfetched = catalog
            .iter()
            .filter(|item| !fetched.contains(*item))
            .cloned()
            .collect();

        Self {
            fetched,
            orphaned,
            unfetched,
        }
    }
}

/// Reads and writes the record files
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Full path of one record file
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Load the fetched collection. Missing file means an empty record.
    ///
    /// # Errors
    ///
    /// [`Error::State`] if the file exists but cannot be read or parsed.
    pub async fn load(&self) -> Result<HashSet<Item>> {
        self.read_collection(FETCHED_FILE).await
    }

    /// Load the orphan collection written by the previous run
    pub async fn load_orphaned(&self) -> Result<HashSet<Item>> {
        self.read_collection(ORPHANED_FILE).await
    }

    /// Write all three collections
    pub async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.state_error(&self.dir, e))?;

        self.write_collection(FETCHED_FILE, &snapshot.fetched).await?;
        self.write_collection(ORPHANED_FILE, &snapshot.orphaned).await?;
        self.write_collection(UNFETCHED_FILE, &snapshot.unfetched)
            .await?;

        tracing::info!(
            fetched = snapshot.fetched.len(),
            orphaned = snapshot.orphaned.len(),
            unfetched = snapshot.unfetched.len(),
            dir = %self.dir.display(),
            "Saved state"
        );
        Ok(())
    }

    async fn read_collection(&self, name: &str) -> Result<HashSet<Item>> {
        let path = self.path(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No record yet");
                return Ok(HashSet::new());
            }
            Err(e) => return Err(self.state_error(&path, e)),
        };

        let items: Vec<Item> =
            serde_json::from_slice(&bytes).map_err(|e| self.state_error(&path, e))?;
        tracing::debug!(path = %path.display(), items = items.len(), "Loaded record");
        Ok(items.into_iter().collect())
    }

    async fn write_collection(&self, name: &str, items: &HashSet<Item>) -> Result<()> {
        let path = self.path(name);
        let mut sorted: Vec<&Item> = items.iter().collect();
        sorted.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.key().cmp(b.key()))
        });

        let json = serde_json::to_vec_pretty(&sorted)?;
        write_atomic(&path, &json)
            .await
            .map_err(|e| self.state_error(&path, e))
    }

    fn state_error(&self, path: &Path, reason: impl std::fmt::Display) -> Error {
        Error::State {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Write `contents` to `<path>.tmp`, fsync, then rename over `path`.
///
/// The `.tmp` file does not outlive a failed write.
async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let result = write_then_rename(&tmp_path, path, contents).await;
    if result.is_err()
        && let Err(e) = tokio::fs::remove_file(&tmp_path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %tmp_path.display(), error = %e, "Failed to remove temporary file");
    }
    result
}

async fn write_then_rename(tmp_path: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(tmp_path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(tmp_path, path).await
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewItem, Platform};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn item(md5: &str, name: &str, year: i32) -> Item {
        NewItem {
            md5: md5.to_string(),
            size: 10,
            name: name.to_string(),
            machine_name: name.to_lowercase(),
            platform: Platform::Audio,
            url: format!("https://dl.example.com/{md5}.flac"),
            bundle_name: "Music".to_string(),
            date: NaiveDate::from_ymd_opt(year, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        }
        .into()
    }

    fn set(items: &[&Item]) -> HashSet<Item> {
        items.iter().map(|i| (*i).clone()).collect()
    }

    #[tokio::test]
    async fn missing_record_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path());

        assert!(store.load().await.unwrap().is_empty());
        assert!(store.load_orphaned().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_record_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(FETCHED_FILE), "{ not json").unwrap();
        let store = StateStore::new(temp_dir.path());

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, Error::State { .. }), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn save_then_load_keeps_items_and_verification() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path().join("state"));

        let mut a = item("aaa", "Album", 2020);
        a.verified = true;
        let b = item("bbb", "Bonus", 2019);
        let snapshot = StateSnapshot {
            fetched: set(&[&a, &b]),
            orphaned: HashSet::new(),
            unfetched: HashSet::new(),
        };

        store.save(&snapshot).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded, snapshot.fetched);
        assert!(loaded.iter().find(|i| i.md5() == "aaa").unwrap().verified);
        assert!(!store.path("downloaded.json.tmp").exists());
        assert!(store.path(UNFETCHED_FILE).exists());
        assert!(store.path(ORPHANED_FILE).exists());
    }

    #[tokio::test]
    async fn failed_write_leaves_no_temporary_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path());
        // A non-empty directory where the record should go makes the rename fail
        std::fs::create_dir_all(store.path(FETCHED_FILE).join("occupied")).unwrap();

        let err = store.save(&StateSnapshot::default()).await.unwrap_err();

        assert!(matches!(err, Error::State { .. }), "unexpected error: {err:?}");
        assert!(!store.path("downloaded.json.tmp").exists());
    }

    #[tokio::test]
    async fn records_are_sorted_by_date_then_name() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path());
        let newer = item("n", "Alpha", 2022);
        let older_b = item("ob", "Beta", 2010);
        let older_a = item("oa", "Alpha", 2010);

        store
            .save(&StateSnapshot {
                fetched: set(&[&newer, &older_b, &older_a]),
                ..StateSnapshot::default()
            })
            .await
            .unwrap();

        let text = std::fs::read_to_string(store.path(FETCHED_FILE)).unwrap();
        let records: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
        let order: Vec<_> = records.iter().map(|r| r["md5"].as_str().unwrap()).collect();
        assert_eq!(order, vec!["oa", "ob", "n"]);
    }

    #[test]
    fn snapshot_partitions_are_disjoint() {
        let kept = item("kept", "Kept", 2018);
        let gone = item("gone", "Gone", 2017);
        let old_orphan = item("old", "Old", 2015);
        let returned = item("back", "Back", 2016);
        let new = item("new", "New", 2021);
        let pending = item("pending", "Pending", 2021);

        let prior = set(&[&kept, &gone]);
        let previous_orphaned = set(&[&old_orphan, &returned]);
        let new_orphaned = set(&[&gone]);
        let newly_fetched = set(&[&new]);
        let catalog = set(&[&kept, &returned, &new, &pending]);

        let snapshot = StateSnapshot::compute(
            &prior,
            &previous_orphaned,
            &new_orphaned,
            &newly_fetched,
            &catalog,
        );

        assert_eq!(snapshot.fetched, set(&[&kept, &new]));
        assert_eq!(snapshot.orphaned, set(&[&gone, &old_orphan]));
        assert_eq!(snapshot.unfetched, set(&[&returned, &pending]));

        assert!(snapshot.fetched.is_disjoint(&snapshot.orphaned));
        assert!(snapshot.fetched.is_disjoint(&snapshot.unfetched));
        assert!(snapshot.orphaned.is_disjoint(&snapshot.unfetched));
    }

    #[test]
    fn newly_fetched_replaces_prior_record() {
        let prior_copy = item("same", "Old Name", 2018);
        let mut fresh = item("same", "New Name", 2018);
        fresh.verified = true;

        let snapshot = StateSnapshot::compute(
            &set(&[&prior_copy]),
            &HashSet::new(),
            &HashSet::new(),
            &set(&[&fresh]),
            &set(&[&fresh]),
        );

        let stored = snapshot.fetched.iter().next().unwrap();
        assert_eq!(stored.name, "New Name");
        assert!(stored.verified);
    }
}
