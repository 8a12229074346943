#![allow(dead_code)]

use async_trait::async_trait;
use keyshift::{
    dump_pattern,
    schema::{EntityRegistry, Origin},
    store::{Engine, FieldMap, KeyType, Store, StoreError, Ttl},
    ConfigBuilder, ExportLayout, MigrateConfig, RetryPolicy, Staging,
};
use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

pub const CUSTOMER_CREATED: f64 = 1_706_745_600.0;
pub const DOMAIN_CREATED: f64 = 1_706_746_000.0;
pub const SECRET_CREATED: f64 = 1_706_746_100.0;

/// Bcrypt-looking prefix followed by bytes that are not valid UTF-8.
pub const PASSPHRASE: &[u8] = &[0x24, 0x32, 0x61, 0x24, 0xff, 0x00, 0x9c];
pub const SECRET_VALUE: &[u8] = &[0x8a, 0x00, 0xfe, 0x41, 0x10, 0xc3];

pub fn fields(pairs: &[(&str, &[u8])]) -> FieldMap {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_vec()))
        .collect()
}

pub fn all_models() -> Vec<String> {
    EntityRegistry::default_v2()
        .models()
        .into_iter()
        .map(str::to_owned)
        .collect()
}

pub fn config(dir: &Path) -> MigrateConfig {
    ConfigBuilder::new()
        .export_dir(dir)
        .dry_run(false)
        .retry(RetryPolicy {
            max_retries: 3,
            base: Duration::from_millis(10),
        })
        .rate_limit_pause(Duration::ZERO)
        .build()
}

pub async fn staging(store: &Store, config: &MigrateConfig) -> anyhow::Result<Staging> {
    Ok(Staging::new(
        store.select(config.temp_db).await?,
        config.temp_prefix.clone(),
    ))
}

/// Two customers, one custom domain, one receipt and the secret it points
/// to, plus a legacy aggregate index.
pub async fn seed_v1(store: &Store) -> anyhow::Result<()> {
    store
        .hset(
            "customer:a@b.com:object",
            &fields(&[
                ("custid", b"a@b.com"),
                ("email", b"a@b.com"),
                ("role", b"customer"),
                ("verified", b"true"),
                ("planid", b"basic"),
                ("apitoken", b"tok_123"),
                ("passphrase", PASSPHRASE),
                ("created", b"1706745600"),
                ("updated", b"1706745900"),
                ("secrets_created", b"4"),
                ("stripe_customer_id", b"cus_1"),
            ]),
        )
        .await?;
    store
        .zadd("customer:a@b.com:metadata", SECRET_CREATED, "rcpt1")
        .await?;

    store
        .hset(
            "customer:c@d.com:object",
            &fields(&[
                ("custid", b"c@d.com"),
                ("email", b"c@d.com"),
                ("verified", b"0"),
                ("created", b"1706745700"),
            ]),
        )
        .await?;

    store
        .hset(
            "customdomain:dom1:object",
            &fields(&[
                ("domainid", b"dom1"),
                ("display_domain", b"secrets.example.com"),
                ("custid", b"a@b.com"),
                ("verified", b"1"),
                ("created", b"1706746000"),
            ]),
        )
        .await?;
    store
        .hset(
            "customdomain:dom1:brand",
            &fields(&[("primary_color", b"#dc4a22")]),
        )
        .await?;

    store
        .hset(
            "metadata:rcpt1:object",
            &fields(&[
                ("key", b"rcpt1"),
                ("custid", b"a@b.com"),
                ("secret_key", b"sec1"),
                ("state", b"new"),
                ("created", b"1706746100"),
            ]),
        )
        .await?;

    store
        .hset(
            "secret:sec1:object",
            &fields(&[
                ("key", b"sec1"),
                ("custid", b"a@b.com"),
                ("metadata_key", b"rcpt1"),
                ("value", SECRET_VALUE),
                ("value_encryption", b"2"),
                ("created", b"1706746100"),
            ]),
        )
        .await?;

    store
        .zadd("customer:values", 1_706_745_900.0, "a@b.com")
        .await?;

    Ok(())
}

/// Writes the dump file of every dumped model into `dir`.
pub async fn export(store: &Store, dir: &Path) -> anyhow::Result<()> {
    let layout = ExportLayout::new(dir);

    for spec in ["customer", "custom_domain", "receipt", "secret"] {
        let registry = EntityRegistry::default_v2();
        let spec = registry.get(spec)?;
        assert_eq!(spec.origin, Origin::Dump);

        dump_pattern(store, &spec.v1.glob(), 100, &layout.dump_path(spec.model)).await?;
    }

    Ok(())
}

/// Every key of the default database with its dump, for before/after
/// comparisons.
pub async fn snapshot(store: &Store) -> anyhow::Result<Vec<(String, Option<Vec<u8>>)>> {
    let mut out = Vec::new();

    for key in store.scan_all("*").await? {
        let dump = store.dump(&key).await?;
        out.push((key, dump));
    }

    Ok(out)
}

/// Engine wrapper that records every restore as `(db, key)` and can make
/// one logical database unreachable.
#[derive(Clone)]
pub struct Recording {
    inner: Store,
    restored: Arc<Mutex<Vec<(u8, String)>>>,
    unreachable_db: Option<u8>,
}

impl Recording {
    pub fn new(inner: Store) -> Self {
        Self {
            inner,
            restored: Arc::default(),
            unreachable_db: None,
        }
    }

    pub fn unreachable(mut self, db: u8) -> Self {
        self.unreachable_db = Some(db);
        self
    }

    /// Keys restored into `db`, in order.
    pub fn restored(&self, db: u8) -> Vec<String> {
        self.restored
            .lock()
            .unwrap()
            .iter()
            .filter(|(restored_db, _)| *restored_db == db)
            .map(|(_, key)| key.clone())
            .collect()
    }

    fn reach(&self) -> keyshift::store::Result<()> {
        match self.unreachable_db {
            Some(db) if db == self.inner.db() => {
                Err(StoreError::Connection(format!("db {db} unreachable")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Engine for Recording {
    fn db(&self) -> u8 {
        self.inner.db()
    }

    async fn select(&self, db: u8) -> keyshift::store::Result<Box<dyn Engine>> {
        Ok(Box::new(Self {
            inner: self.inner.select(db).await?,
            ..self.clone()
        }))
    }

    async fn ping(&self) -> keyshift::store::Result<()> {
        self.inner.ping().await
    }

    async fn key_type(&self, key: &'_ str) -> keyshift::store::Result<KeyType> {
        self.reach()?;
        self.inner.key_type(key).await
    }

    async fn pttl(&self, key: &'_ str) -> keyshift::store::Result<Option<Ttl>> {
        self.inner.pttl(key).await
    }

    async fn dump(&self, key: &'_ str) -> keyshift::store::Result<Option<Vec<u8>>> {
        self.inner.dump(key).await
    }

    async fn restore(
        &self,
        key: &'_ str,
        ttl: Ttl,
        payload: &'_ [u8],
        replace: bool,
    ) -> keyshift::store::Result<()> {
        self.inner.restore(key, ttl, payload, replace).await?;
        self.restored
            .lock()
            .unwrap()
            .push((self.inner.db(), key.to_owned()));

        Ok(())
    }

    async fn del(&self, keys: &'_ [String]) -> keyshift::store::Result<u64> {
        self.inner.del(keys).await
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &'_ str,
        count: usize,
    ) -> keyshift::store::Result<(u64, Vec<String>)> {
        self.inner.scan(cursor, pattern, count).await
    }

    async fn hgetall(&self, key: &'_ str) -> keyshift::store::Result<FieldMap> {
        self.inner.hgetall(key).await
    }

    async fn hget(&self, key: &'_ str, field: &'_ str) -> keyshift::store::Result<Option<Vec<u8>>> {
        self.inner.hget(key, field).await
    }

    async fn hset(&self, key: &'_ str, fields: &'_ FieldMap) -> keyshift::store::Result<u64> {
        self.inner.hset(key, fields).await
    }

    async fn zadd(&self, key: &'_ str, score: f64, member: &'_ str) -> keyshift::store::Result<bool> {
        self.inner.zadd(key, score, member).await
    }

    async fn zscore(&self, key: &'_ str, member: &'_ str) -> keyshift::store::Result<Option<f64>> {
        self.inner.zscore(key, member).await
    }

    async fn zrange_withscores(&self, key: &'_ str) -> keyshift::store::Result<Vec<(String, f64)>> {
        self.inner.zrange_withscores(key).await
    }

    async fn sadd(&self, key: &'_ str, member: &'_ str) -> keyshift::store::Result<bool> {
        self.inner.sadd(key, member).await
    }

    async fn smembers(&self, key: &'_ str) -> keyshift::store::Result<Vec<String>> {
        self.inner.smembers(key).await
    }

    async fn incrby(&self, key: &'_ str, by: i64) -> keyshift::store::Result<i64> {
        self.inner.incrby(key, by).await
    }
}
