use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use glob_match::glob_match;
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use crate::{
    codec::{decode_value, encode_value, Value},
    engine::{Engine, FieldMap, KeyType, Ttl},
    error::{Result, StoreError},
    store::Store,
};

pub type MemoryStore = Store;

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Keyspace = HashMap<String, Entry>;

/// In-process engine holding every logical database of one server.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    databases: Arc<RwLock<HashMap<u8, Keyspace>>>,
    db: u8,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys in the bound database.
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.databases
            .read()
            .get(&self.db)
            .map(|keyspace| keyspace.values().filter(|e| !e.is_expired(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read<T>(&self, key: &str, f: impl FnOnce(Option<&Value>) -> Result<T>) -> Result<T> {
        let now = Utc::now();
        let databases = self.databases.read();
        let entry = databases
            .get(&self.db)
            .and_then(|keyspace| keyspace.get(key))
            .filter(|entry| !entry.is_expired(now));

        f(entry.map(|entry| &entry.value))
    }

    fn write<T>(&self, key: &str, f: impl FnOnce(&mut Option<Entry>) -> Result<T>) -> Result<T> {
        let now = Utc::now();
        let mut databases = self.databases.write();
        let keyspace = databases.entry(self.db).or_default();

        let mut entry = keyspace.remove(key).filter(|entry| !entry.is_expired(now));
        let res = f(&mut entry);

        if let Some(entry) = entry {
            if !entry.value.is_empty() {
                keyspace.insert(key.to_owned(), entry);
            }
        }

        res
    }
}

fn wrong_type(key: &str, expected: KeyType) -> StoreError {
    StoreError::WrongType {
        key: key.to_owned(),
        expected: expected.to_string(),
    }
}

impl MemoryStore {
    pub fn memory() -> Self {
        Store::new(Memory::default())
    }
}

#[async_trait]
impl Engine for Memory {
    fn db(&self) -> u8 {
        self.db
    }

    async fn select(&self, db: u8) -> Result<Box<dyn Engine>> {
        Ok(Box::new(Self {
            databases: self.databases.clone(),
            db,
        }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn key_type(&self, key: &'_ str) -> Result<KeyType> {
        self.read(key, |value| Ok(value.map(Value::key_type).unwrap_or(KeyType::None)))
    }

    async fn pttl(&self, key: &'_ str) -> Result<Option<Ttl>> {
        let now = Utc::now();
        let databases = self.databases.read();
        let entry = databases
            .get(&self.db)
            .and_then(|keyspace| keyspace.get(key))
            .filter(|entry| !entry.is_expired(now));

        Ok(entry.map(|entry| match entry.expires_at {
            Some(at) => Ttl::Millis((at - now).num_milliseconds().max(0) as u64),
            None => Ttl::Persistent,
        }))
    }

    async fn dump(&self, key: &'_ str) -> Result<Option<Vec<u8>>> {
        self.read(key, |value| Ok(value.map(encode_value)))
    }

    async fn restore(
        &self,
        key: &'_ str,
        ttl: Ttl,
        payload: &'_ [u8],
        replace: bool,
    ) -> Result<()> {
        let value = decode_value(payload)?;
        let expires_at = match ttl {
            Ttl::Persistent => None,
            Ttl::Millis(ms) => Some(
                i64::try_from(ms.max(1))
                    .ok()
                    .and_then(Duration::try_milliseconds)
                    .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                    .ok_or_else(|| StoreError::CorruptPayload(format!("ttl {ms}ms out of range")))?,
            ),
        };

        self.write(key, |entry| {
            if entry.is_some() && !replace {
                return Err(StoreError::BusyKey(key.to_owned()));
            }

            *entry = Some(Entry { value, expires_at });

            Ok(())
        })
    }

    async fn del(&self, keys: &'_ [String]) -> Result<u64> {
        let now = Utc::now();
        let mut databases = self.databases.write();
        let Some(keyspace) = databases.get_mut(&self.db) else {
            return Ok(0);
        };

        Ok(keys
            .iter()
            .filter_map(|key| keyspace.remove(key))
            .filter(|entry| !entry.is_expired(now))
            .count() as u64)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &'_ str,
        count: usize,
    ) -> Result<(u64, Vec<String>)> {
        let now = Utc::now();
        let databases = self.databases.read();
        let Some(keyspace) = databases.get(&self.db) else {
            return Ok((0, vec![]));
        };

        let mut keys = keyspace
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.as_str())
            .collect::<Vec<_>>();
        keys.sort_unstable();

        let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(keys.len());
        let end = start.saturating_add(count.max(1)).min(keys.len());
        let page = keys[start..end]
            .iter()
            .filter(|key| glob_match(pattern, key))
            .map(|key| key.to_string())
            .collect();

        let next = if end >= keys.len() { 0 } else { end as u64 };

        Ok((next, page))
    }

    async fn hgetall(&self, key: &'_ str) -> Result<FieldMap> {
        self.read(key, |value| match value {
            None => Ok(FieldMap::new()),
            Some(Value::Hash(fields)) => Ok(fields.clone()),
            Some(_) => Err(wrong_type(key, KeyType::Hash)),
        })
    }

    async fn hget(&self, key: &'_ str, field: &'_ str) -> Result<Option<Vec<u8>>> {
        self.read(key, |value| match value {
            None => Ok(None),
            Some(Value::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(_) => Err(wrong_type(key, KeyType::Hash)),
        })
    }

    async fn hset(&self, key: &'_ str, fields: &'_ FieldMap) -> Result<u64> {
        self.write(key, |entry| {
            let entry = entry.get_or_insert_with(|| Entry {
                value: Value::Hash(FieldMap::new()),
                expires_at: None,
            });

            let Value::Hash(hash) = &mut entry.value else {
                return Err(wrong_type(key, KeyType::Hash));
            };

            let mut added = 0;
            for (field, value) in fields {
                if hash.insert(field.to_owned(), value.to_owned()).is_none() {
                    added += 1;
                }
            }

            Ok(added)
        })
    }

    async fn zadd(&self, key: &'_ str, score: f64, member: &'_ str) -> Result<bool> {
        self.write(key, |entry| {
            let entry = entry.get_or_insert_with(|| Entry {
                value: Value::ZSet(BTreeMap::new()),
                expires_at: None,
            });

            let Value::ZSet(zset) = &mut entry.value else {
                return Err(wrong_type(key, KeyType::Zset));
            };

            Ok(zset.insert(member.to_owned(), score).is_none())
        })
    }

    async fn zscore(&self, key: &'_ str, member: &'_ str) -> Result<Option<f64>> {
        self.read(key, |value| match value {
            None => Ok(None),
            Some(Value::ZSet(zset)) => Ok(zset.get(member).copied()),
            Some(_) => Err(wrong_type(key, KeyType::Zset)),
        })
    }

    async fn zrange_withscores(&self, key: &'_ str) -> Result<Vec<(String, f64)>> {
        self.read(key, |value| match value {
            None => Ok(vec![]),
            Some(Value::ZSet(zset)) => {
                let mut members = zset
                    .iter()
                    .map(|(member, score)| (member.to_owned(), *score))
                    .collect::<Vec<_>>();
                members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

                Ok(members)
            }
            Some(_) => Err(wrong_type(key, KeyType::Zset)),
        })
    }

    async fn sadd(&self, key: &'_ str, member: &'_ str) -> Result<bool> {
        self.write(key, |entry| {
            let entry = entry.get_or_insert_with(|| Entry {
                value: Value::Set(BTreeSet::new()),
                expires_at: None,
            });

            let Value::Set(set) = &mut entry.value else {
                return Err(wrong_type(key, KeyType::Set));
            };

            Ok(set.insert(member.to_owned()))
        })
    }

    async fn smembers(&self, key: &'_ str) -> Result<Vec<String>> {
        self.read(key, |value| match value {
            None => Ok(vec![]),
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key, KeyType::Set)),
        })
    }

    async fn incrby(&self, key: &'_ str, by: i64) -> Result<i64> {
        self.write(key, |entry| {
            let entry = entry.get_or_insert_with(|| Entry {
                value: Value::String(b"0".to_vec()),
                expires_at: None,
            });

            let Value::String(raw) = &mut entry.value else {
                return Err(wrong_type(key, KeyType::String));
            };

            let current = std::str::from_utf8(raw)
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .ok_or_else(|| StoreError::NotAnInteger(key.to_owned()))?;
            let next = current
                .checked_add(by)
                .ok_or_else(|| StoreError::NotAnInteger(key.to_owned()))?;
            *raw = next.to_string().into_bytes();

            Ok(next)
        })
    }
}
