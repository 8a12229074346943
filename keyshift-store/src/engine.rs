use async_trait::async_trait;
use dyn_clone::DynClone;
use parse_display::{Display, FromStr};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use crate::error::Result;

#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "memory")]
pub use memory::*;
#[cfg(feature = "redis")]
pub use self::redis::*;

/// Field/value pairs of a hash. Values are raw bytes so opaque fields
/// survive untouched.
pub type FieldMap = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromStr, Serialize, Deserialize)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    None,
    String,
    Hash,
    Set,
    Zset,
    List,
}

/// Remaining time to live of a key.
///
/// Dump files encode [`Ttl::Persistent`] as `-1`, the store's own "no expiry"
/// sentinel. Restoring a persistent key never sets an expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    #[default]
    Persistent,
    Millis(u64),
}

impl Ttl {
    pub const PERSISTENT_SENTINEL: i64 = -1;

    pub fn from_millis(value: i64) -> Option<Self> {
        match value {
            Self::PERSISTENT_SENTINEL => Some(Ttl::Persistent),
            v if v >= 0 => Some(Ttl::Millis(v as u64)),
            _ => None,
        }
    }

    pub fn as_millis(&self) -> i64 {
        match self {
            Ttl::Persistent => Self::PERSISTENT_SENTINEL,
            Ttl::Millis(v) => i64::try_from(*v).unwrap_or(i64::MAX),
        }
    }

    /// Value expected by a RESTORE-style command, where `0` means no expiry.
    pub fn restore_arg(&self) -> u64 {
        match self {
            Ttl::Persistent => 0,
            Ttl::Millis(v) => (*v).max(1),
        }
    }
}

impl Serialize for Ttl {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_millis())
    }
}

impl<'de> Deserialize<'de> for Ttl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;

        Ttl::from_millis(value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid ttl_ms `{value}`")))
    }
}

#[async_trait]
pub trait Engine: DynClone + Send + Sync {
    /// Logical database this engine is bound to.
    fn db(&self) -> u8;

    /// Returns an engine bound to another logical database of the same server.
    async fn select(&self, db: u8) -> Result<Box<dyn Engine>>;

    async fn ping(&self) -> Result<()>;

    async fn key_type(&self, key: &'_ str) -> Result<KeyType>;

    async fn pttl(&self, key: &'_ str) -> Result<Option<Ttl>>;

    async fn dump(&self, key: &'_ str) -> Result<Option<Vec<u8>>>;

    async fn restore(&self, key: &'_ str, ttl: Ttl, payload: &'_ [u8], replace: bool)
        -> Result<()>;

    async fn del(&self, keys: &'_ [String]) -> Result<u64>;

    async fn scan(&self, cursor: u64, pattern: &'_ str, count: usize) -> Result<(u64, Vec<String>)>;

    async fn hgetall(&self, key: &'_ str) -> Result<FieldMap>;

    async fn hget(&self, key: &'_ str, field: &'_ str) -> Result<Option<Vec<u8>>>;

    async fn hset(&self, key: &'_ str, fields: &'_ FieldMap) -> Result<u64>;

    async fn zadd(&self, key: &'_ str, score: f64, member: &'_ str) -> Result<bool>;

    async fn zscore(&self, key: &'_ str, member: &'_ str) -> Result<Option<f64>>;

    async fn zrange_withscores(&self, key: &'_ str) -> Result<Vec<(String, f64)>>;

    async fn sadd(&self, key: &'_ str, member: &'_ str) -> Result<bool>;

    async fn smembers(&self, key: &'_ str) -> Result<Vec<String>>;

    async fn incrby(&self, key: &'_ str, by: i64) -> Result<i64>;
}

dyn_clone::clone_trait_object!(Engine);
