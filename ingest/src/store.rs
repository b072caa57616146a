//! Key-value store the pipeline reads snapshots from and writes caches to.
//!
//! The store only offers `get`, `put` and a cursor paginated prefix `list`.
//! Listings are eventually consistent: a key written moments ago may be
//! missing from a listing.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

const DEFAULT_PAGE_SIZE: usize = 1000;
const TMP_SUFFIX: &str = ".tmp-write";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid value stored under {key}: {source}")]
    InvalidValue {
        key: String,
        source: serde_json::Error,
    },

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One page of a prefix listing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyPage {
    pub keys: Vec<String>,
    /// Opaque cursor to pass to the next `list` call.
    pub cursor: Option<String>,
    pub list_complete: bool,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: String) -> Result<(), StoreError>;
    async fn list(&self, prefix: &str, cursor: Option<&str>) -> Result<KeyPage, StoreError>;
}

/// Reads and deserializes the JSON value stored under `key`.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::InvalidValue {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    store.put(key, serde_json::to_string(value)?).await
}

/// Writes `value` only if nothing is stored under `key` yet. Returns whether
/// the value was written.
pub async fn put_once(store: &dyn KeyValueStore, key: &str, value: String) -> Result<bool, StoreError> {
    if store.get(key).await?.is_some() {
        return Ok(false);
    }
    store.put(key, value).await?;
    Ok(true)
}

/// Lazily walks the pages of a prefix listing until the store reports the
/// listing complete. `restart` begins a fresh walk.
pub struct KeyListing<'a> {
    store: &'a dyn KeyValueStore,
    prefix: String,
    cursor: Option<String>,
    done: bool,
}

impl<'a> KeyListing<'a> {
    pub fn new(store: &'a dyn KeyValueStore, prefix: &str) -> Self {
        KeyListing {
            store,
            prefix: prefix.to_string(),
            cursor: None,
            done: false,
        }
    }

    /// Returns the next batch of keys, or `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> Option<Result<Vec<String>, StoreError>> {
        if self.done {
            return None;
        }

        let page = match self.store.list(&self.prefix, self.cursor.as_deref()).await {
            Ok(page) => page,
            Err(err) => return Some(Err(err)),
        };

        self.cursor = page.cursor;
        if page.list_complete || self.cursor.is_none() {
            self.done = true;
        }
        Some(Ok(page.keys))
    }

    pub fn restart(&mut self) {
        self.cursor = None;
        self.done = false;
    }

    /// Drains the remaining pages.
    pub async fn collect_all(&mut self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut pages = 0;
        while let Some(page) = self.next_page().await {
            keys.extend(page?);
            pages += 1;
        }
        tracing::debug!(prefix = %self.prefix, pages, keys = keys.len(), "Listed store keys");
        Ok(keys)
    }
}

/// Paginates an ordered key set the same way for every adapter: the cursor is
/// the last key of the previous page.
fn page_of<'k, I>(keys: I, prefix: &str, cursor: Option<&str>, page_size: usize) -> KeyPage
where
    I: Iterator<Item = &'k String>,
{
    let mut matching = keys
        .filter(|k| k.starts_with(prefix))
        .filter(|k| cursor.is_none_or(|c| k.as_str() > c));

    let page: Vec<String> = matching.by_ref().take(page_size).cloned().collect();
    let list_complete = matching.next().is_none();
    let cursor = if list_complete {
        None
    } else {
        page.last().cloned()
    };

    KeyPage {
        keys: page,
        cursor,
        list_complete,
    }
}

/// In-memory store. Used by tests and for dry runs.
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, String>>,
    page_size: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        MemoryStore {
            data: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>) -> Result<KeyPage, StoreError> {
        let data = self.data.read().await;
        Ok(page_of(data.keys(), prefix, cursor, self.page_size))
    }
}

/// Stores one file per key under a base directory. Key names are escaped so
/// that `/` separated namespaces stay flat on disk.
pub struct FilesystemStore {
    base_dir: PathBuf,
    page_size: usize,
}

impl FilesystemStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        FilesystemStore {
            base_dir: base_dir.as_ref().to_path_buf(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(escape_key(key))
    }
}

fn escape_key(key: &str) -> String {
    key.replace('%', "%25").replace('/', "%2F")
}

fn unescape_key(name: &str) -> String {
    name.replace("%2F", "/").replace("%25", "%")
}

#[async_trait]
impl KeyValueStore for FilesystemStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.base_dir).await?;

        // Write to a temporary file first so readers never see a partial value.
        let path = self.path_for(key);
        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>) -> Result<KeyPage, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(KeyPage {
                    list_complete: true,
                    ..Default::default()
                });
            }
            Err(err) => return Err(err.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            keys.push(unescape_key(&name));
        }
        keys.sort();

        Ok(page_of(keys.iter(), prefix, cursor, self.page_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fill(store: &dyn KeyValueStore) {
        for key in [
            "case_counts/2020-03-30T10:00:00.000Z",
            "case_counts/2020-03-31T14:30:00.000Z",
            "case_counts/2020-03-31T04:00:00.000Z",
            "last_refreshed",
            "notifications",
        ] {
            store.put(key, format!("\"{key}\"")).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_memory_get_put() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
        store.put("key", "value".into()).await.unwrap();
        assert_eq!(store.get("key").await.unwrap(), Some("value".into()));
    }

    #[tokio::test]
    async fn test_memory_listing_pages() {
        let store = MemoryStore::with_page_size(2);
        fill(&store).await;

        let first = store.list("case_counts/", None).await.unwrap();
        assert_eq!(first.keys.len(), 2);
        assert!(!first.list_complete);

        let second = store
            .list("case_counts/", first.cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(second.keys, vec!["case_counts/2020-03-31T14:30:00.000Z"]);
        assert!(second.list_complete);
        assert_eq!(second.cursor, None);
    }

    #[tokio::test]
    async fn test_key_listing_restart() {
        let store = MemoryStore::with_page_size(1);
        fill(&store).await;

        let mut listing = KeyListing::new(&store, "case_counts/");
        let keys = listing.collect_all().await.unwrap();
        assert_eq!(
            keys,
            vec![
                "case_counts/2020-03-30T10:00:00.000Z",
                "case_counts/2020-03-31T04:00:00.000Z",
                "case_counts/2020-03-31T14:30:00.000Z",
            ]
        );
        assert!(listing.next_page().await.is_none());

        listing.restart();
        let first = listing.next_page().await.unwrap().unwrap();
        assert_eq!(first, vec!["case_counts/2020-03-30T10:00:00.000Z"]);
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = MemoryStore::new();
        put_json(&store, "numbers", &vec![1, 2, 3]).await.unwrap();
        let numbers: Option<Vec<i32>> = get_json(&store, "numbers").await.unwrap();
        assert_eq!(numbers, Some(vec![1, 2, 3]));

        store.put("broken", "{".into()).await.unwrap();
        let broken: Result<Option<Vec<i32>>, _> = get_json(&store, "broken").await;
        assert!(matches!(broken, Err(StoreError::InvalidValue { .. })));
    }

    #[tokio::test]
    async fn test_put_once() {
        let store = MemoryStore::new();
        assert!(put_once(&store, "snapshot", "a".into()).await.unwrap());
        assert!(!put_once(&store, "snapshot", "b".into()).await.unwrap());
        assert_eq!(store.get("snapshot").await.unwrap(), Some("a".into()));
    }

    #[tokio::test]
    async fn test_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path()).with_page_size(2);

        assert_eq!(store.get("case_counts/x").await.unwrap(), None);
        fill(&store).await;

        assert_eq!(
            store.get("case_counts/2020-03-30T10:00:00.000Z").await.unwrap(),
            Some("\"case_counts/2020-03-30T10:00:00.000Z\"".into())
        );

        let keys = KeyListing::new(&store, "case_counts/")
            .collect_all()
            .await
            .unwrap();
        assert_eq!(keys.len(), 3);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_filesystem_missing_dir_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path().join("absent"));
        let page = store.list("", None).await.unwrap();
        assert!(page.keys.is_empty());
        assert!(page.list_complete);
    }
}
