//! Key/value storage shared across sessions.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StashError {
    #[error("key {key:?} is already stashed under {path:?}")]
    Occupied { path: String, key: String },
}

/// Store addressed by `(path, key)`. A key can be put once; taking it frees
/// the slot again.
pub trait Stash: Send + Sync {
    fn put(&self, path: &str, key: &str, value: Vec<u8>) -> Result<(), StashError>;
    fn take(&self, path: &str, key: &str) -> Option<Vec<u8>>;
    fn get(&self, path: &str, key: &str) -> Option<Vec<u8>>;
}

#[derive(Debug, Default)]
pub struct MemoryStash {
    entries: DashMap<(String, String), Vec<u8>>,
}

impl MemoryStash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Stash for MemoryStash {
    fn put(&self, path: &str, key: &str, value: Vec<u8>) -> Result<(), StashError> {
        match self.entries.entry((path.to_owned(), key.to_owned())) {
            Entry::Occupied(_) => Err(StashError::Occupied {
                path: path.to_owned(),
                key: key.to_owned(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    fn take(&self, path: &str, key: &str) -> Option<Vec<u8>> {
        self.entries
            .remove(&(path.to_owned(), key.to_owned()))
            .map(|(_, v)| v)
    }

    fn get(&self, path: &str, key: &str) -> Option<Vec<u8>> {
        self.entries
            .get(&(path.to_owned(), key.to_owned()))
            .map(|v| v.value().clone())
    }
}

/// A stash bound to one path.
#[derive(Clone)]
pub struct StashHandle {
    store: Arc<dyn Stash>,
    path: String,
}

impl StashHandle {
    pub fn new(store: Arc<dyn Stash>, path: impl Into<String>) -> Self {
        Self {
            store,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn put(&self, key: &str, value: impl Into<Vec<u8>>) -> Result<(), StashError> {
        self.store.put(&self.path, key, value.into())
    }

    pub fn take(&self, key: &str) -> Option<Vec<u8>> {
        self.store.take(&self.path, key)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.store.get(&self.path, key)
    }
}

impl std::fmt::Debug for StashHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StashHandle")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_once_take_frees_slot() {
        let stash = MemoryStash::new();
        stash.put("/p", "k", b"v1".to_vec()).unwrap();
        assert_eq!(
            stash.put("/p", "k", b"v2".to_vec()),
            Err(StashError::Occupied {
                path: "/p".into(),
                key: "k".into()
            })
        );
        assert_eq!(stash.get("/p", "k"), Some(b"v1".to_vec()));
        assert_eq!(stash.take("/p", "k"), Some(b"v1".to_vec()));
        assert_eq!(stash.take("/p", "k"), None);
        stash.put("/p", "k", b"v2".to_vec()).unwrap();
    }

    #[test]
    fn paths_are_separate_namespaces() {
        let store: Arc<dyn Stash> = Arc::new(MemoryStash::new());
        let a = StashHandle::new(store.clone(), "/a");
        let b = StashHandle::new(store, "/b");
        a.put("k", "from a").unwrap();
        assert_eq!(b.get("k"), None);
        b.put("k", "from b").unwrap();
        assert_eq!(a.take("k"), Some(b"from a".to_vec()));
    }
}
