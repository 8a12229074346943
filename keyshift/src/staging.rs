use keyshift_store::{FieldMap, KeyType, Store, StoreError, Ttl};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Scratch keyspace used to decode and re-encode store-native payloads.
///
/// Every key lives under a per-run prefix so [`Staging::cleanup`] can sweep
/// leftovers even after a crash.
pub struct Staging {
    store: Store,
    prefix: String,
    seq: AtomicU64,
}

impl Staging {
    pub fn new(store: Store, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn next_key(&self) -> String {
        format!("{}{}", self.prefix, self.seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Fields of a dumped hash.
    pub async fn decode_hash(&self, payload: &[u8]) -> keyshift_store::Result<FieldMap> {
        let key = self.next_key();
        let res = self.decode_hash_at(&key, payload).await;
        self.store.del(&[key]).await?;

        res
    }

    async fn decode_hash_at(&self, key: &str, payload: &[u8]) -> keyshift_store::Result<FieldMap> {
        self.store.restore(key, Ttl::Persistent, payload, true).await?;

        let key_type = self.store.key_type(key).await?;
        if key_type != KeyType::Hash {
            return Err(StoreError::WrongType {
                key: key.to_owned(),
                expected: KeyType::Hash.to_string(),
            });
        }

        self.store.hgetall(key).await
    }

    /// Checks that a payload restores, without keeping it.
    pub async fn verify(&self, payload: &[u8]) -> keyshift_store::Result<()> {
        let key = self.next_key();
        let res = self.store.restore(&key, Ttl::Persistent, payload, true).await;
        self.store.del(&[key]).await?;

        res
    }

    /// Store-native payload of a hash holding `fields`.
    pub async fn encode_hash(&self, fields: &FieldMap) -> keyshift_store::Result<Vec<u8>> {
        let key = self.next_key();
        let res = self.encode_hash_at(&key, fields).await;
        self.store.del(&[key]).await?;

        res
    }

    async fn encode_hash_at(&self, key: &str, fields: &FieldMap) -> keyshift_store::Result<Vec<u8>> {
        self.store.hset(key, fields).await?;
        self.store
            .dump(key)
            .await?
            .ok_or_else(|| StoreError::Any(anyhow::anyhow!("staging key `{key}` vanished")))
    }

    /// Removes every staging key of this run.
    pub async fn cleanup(&self) -> keyshift_store::Result<u64> {
        let removed = self.store.scan_and_delete(&format!("{}*", self.prefix)).await?;
        debug!(prefix = self.prefix, removed, "staging keys cleaned");

        Ok(removed)
    }
}
