use std::ops::Deref;

use crate::{engine::Engine, error::Result};

pub const DEFAULT_SCAN_COUNT: usize = 1000;

/// Cloneable handle to one logical database of a target store.
#[derive(Clone)]
pub struct Store {
    pub(crate) engine: Box<dyn Engine>,
}

impl Store {
    pub fn new<E: Engine + 'static>(engine: E) -> Self {
        Self {
            engine: Box::new(engine),
        }
    }

    /// Handle to another logical database on the same server.
    pub async fn select(&self, db: u8) -> Result<Store> {
        if db == self.engine.db() {
            return Ok(self.clone());
        }

        Ok(Store {
            engine: self.engine.select(db).await?,
        })
    }

    pub async fn exists(&self, key: &'_ str) -> Result<bool> {
        Ok(self.engine.key_type(key).await? != crate::KeyType::None)
    }

    /// Walks the whole keyspace and returns every key matching `pattern`, sorted.
    pub async fn scan_all(&self, pattern: &'_ str) -> Result<Vec<String>> {
        self.scan_all_with(pattern, DEFAULT_SCAN_COUNT).await
    }

    pub async fn scan_all_with(&self, pattern: &'_ str, count: usize) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor = 0;

        loop {
            let (next, page) = self.engine.scan(cursor, pattern, count).await?;
            keys.extend(page);

            if next == 0 {
                break;
            }

            cursor = next;
        }

        keys.sort_unstable();
        keys.dedup();

        Ok(keys)
    }

    /// Deletes every key matching `pattern` and returns how many were removed.
    pub async fn scan_and_delete(&self, pattern: &'_ str) -> Result<u64> {
        let keys = self.scan_all(pattern).await?;
        let mut removed = 0;

        for chunk in keys.chunks(DEFAULT_SCAN_COUNT) {
            removed += self.engine.del(chunk).await?;
        }

        if removed > 0 {
            tracing::debug!(pattern, removed, "scan and delete");
        }

        Ok(removed)
    }
}

impl Deref for Store {
    type Target = dyn Engine;

    fn deref(&self) -> &Self::Target {
        self.engine.as_ref()
    }
}
