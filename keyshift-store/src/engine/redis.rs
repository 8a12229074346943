use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, Client, ErrorKind, RedisError};

use crate::{
    engine::{Engine, FieldMap, KeyType, Ttl},
    error::{Result, StoreError},
    store::Store,
};

/// Engine talking to a Redis or Valkey server over one multiplexed connection.
#[derive(Clone)]
pub struct Redis {
    client: Client,
    conn: MultiplexedConnection,
    db: u8,
}

impl Redis {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let db = u8::try_from(client.get_connection_info().redis.db)
            .map_err(|_| StoreError::Connection(format!("invalid database in `{url}`")))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { client, conn, db })
    }
}

impl Store {
    pub async fn redis(url: &str) -> Result<Self> {
        Ok(Store::new(Redis::connect(url).await?))
    }
}

fn restore_error(key: &str, err: RedisError) -> StoreError {
    if err.code() == Some("BUSYKEY") {
        return StoreError::BusyKey(key.to_owned());
    }

    if err.kind() == ErrorKind::ResponseError && err.to_string().contains("checksum") {
        return StoreError::CorruptPayload(err.to_string());
    }

    StoreError::Redis(err)
}

#[async_trait]
impl Engine for Redis {
    fn db(&self) -> u8 {
        self.db
    }

    async fn select(&self, db: u8) -> Result<Box<dyn Engine>> {
        let mut info = self.client.get_connection_info().clone();
        info.redis.db = i64::from(db);

        let client = Client::open(info).map_err(|e| StoreError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Box::new(Self { client, conn, db }))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(())
    }

    async fn key_type(&self, key: &'_ str) -> Result<KeyType> {
        let mut conn = self.conn.clone();
        let kind: String = redis::cmd("TYPE").arg(key).query_async(&mut conn).await?;

        kind.parse::<KeyType>()
            .map_err(|_| StoreError::Any(anyhow::anyhow!("unsupported key type `{kind}`")))
    }

    async fn pttl(&self, key: &'_ str) -> Result<Option<Ttl>> {
        let mut conn = self.conn.clone();
        let ttl: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;

        Ok(Ttl::from_millis(ttl))
    }

    async fn dump(&self, key: &'_ str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let payload: Option<Vec<u8>> = redis::cmd("DUMP").arg(key).query_async(&mut conn).await?;

        Ok(payload)
    }

    async fn restore(
        &self,
        key: &'_ str,
        ttl: Ttl,
        payload: &'_ [u8],
        replace: bool,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("RESTORE");
        cmd.arg(key).arg(ttl.restore_arg()).arg(payload);
        if replace {
            cmd.arg("REPLACE");
        }

        let res: std::result::Result<(), RedisError> = cmd.query_async(&mut conn).await;

        res.map_err(|e| restore_error(key, e))
    }

    async fn del(&self, keys: &'_ [String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;

        Ok(removed)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &'_ str,
        count: usize,
    ) -> Result<(u64, Vec<String>)> {
        let mut conn = self.conn.clone();
        let page: (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        Ok(page)
    }

    async fn hgetall(&self, key: &'_ str) -> Result<FieldMap> {
        let mut conn = self.conn.clone();
        let fields: FieldMap = redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;

        Ok(fields)
    }

    async fn hget(&self, key: &'_ str, field: &'_ str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?;

        Ok(value)
    }

    async fn hset(&self, key: &'_ str, fields: &'_ FieldMap) -> Result<u64> {
        if fields.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value.as_slice());
        }

        let added: u64 = cmd.query_async(&mut conn).await?;

        Ok(added)
    }

    async fn zadd(&self, key: &'_ str, score: f64, member: &'_ str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let added: u64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await?;

        Ok(added > 0)
    }

    async fn zscore(&self, key: &'_ str, member: &'_ str) -> Result<Option<f64>> {
        let mut conn = self.conn.clone();
        let score: Option<f64> = redis::cmd("ZSCORE")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;

        Ok(score)
    }

    async fn zrange_withscores(&self, key: &'_ str) -> Result<Vec<(String, f64)>> {
        let mut conn = self.conn.clone();
        let members: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;

        Ok(members)
    }

    async fn sadd(&self, key: &'_ str, member: &'_ str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let added: u64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;

        Ok(added > 0)
    }

    async fn smembers(&self, key: &'_ str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await?;

        Ok(members)
    }

    async fn incrby(&self, key: &'_ str, by: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(by)
            .query_async(&mut conn)
            .await?;

        Ok(value)
    }
}
