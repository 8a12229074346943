use chrono::{DateTime, Utc};
use keyshift_store::{KeyType, Ttl};
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const OBJECT_SUFFIX: &str = "object";

/// Snapshot of one stored object under its V1 key, as produced by a dumper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpRecord {
    pub key: String,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    #[serde(rename = "ttl_ms")]
    pub ttl: Ttl,
    pub db: u8,
    #[serde(rename = "dump", with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub exported_at: DateTime<Utc>,
}

/// V2-shaped record ready to be restored by the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedRecord {
    pub key: String,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    #[serde(rename = "ttl_ms")]
    pub ttl: Ttl,
    pub db: u8,
    #[serde(rename = "dump", with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub objid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extid: Option<String>,
    /// Key of the source record this one was derived from.
    pub v1_identifier: String,
    /// Decoded values of the fields index derivation needs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enriched: bool,
}

impl TransformedRecord {
    pub fn is_object(&self) -> bool {
        self.key
            .rsplit_once(':')
            .is_some_and(|(_, suffix)| suffix == OBJECT_SUFFIX)
    }

    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn attribute_f64(&self, name: &str) -> Option<f64> {
        self.attributes.get(name).and_then(Value::as_f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, FromStr, Serialize, Deserialize)]
pub enum IndexOp {
    #[display("ZADD")]
    #[serde(rename = "ZADD")]
    AddSorted,
    #[display("HSET")]
    #[serde(rename = "HSET")]
    SetHashField,
    #[display("SADD")]
    #[serde(rename = "SADD")]
    AddSetMember,
    #[display("INCRBY")]
    #[serde(rename = "INCRBY")]
    Increment,
}

/// One secondary-index mutation.
///
/// Arguments follow the store command: `ZADD [score, member]`,
/// `HSET [field, value]`, `SADD [member]`, `INCRBY [by]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexCommand {
    pub command: IndexOp,
    pub key: String,
    pub args: Vec<String>,
    /// Logical database of the records the command was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<u8>,
}

impl IndexCommand {
    pub fn zadd(key: impl Into<String>, score: f64, member: impl Into<String>) -> Self {
        Self {
            command: IndexOp::AddSorted,
            key: key.into(),
            args: vec![score.to_string(), member.into()],
            db: None,
        }
    }

    pub fn hset(key: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            command: IndexOp::SetHashField,
            key: key.into(),
            args: vec![field.into(), value.into()],
            db: None,
        }
    }

    pub fn sadd(key: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            command: IndexOp::AddSetMember,
            key: key.into(),
            args: vec![member.into()],
            db: None,
        }
    }

    pub fn incrby(key: impl Into<String>, by: i64) -> Self {
        Self {
            command: IndexOp::Increment,
            key: key.into(),
            args: vec![by.to_string()],
            db: None,
        }
    }

    pub fn on_db(mut self, db: u8) -> Self {
        self.db = Some(db);
        self
    }
}

/// Verbatim V1 field capture embedded into a migrated object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalRecordSnapshot {
    pub object: BTreeMap<String, Value>,
    pub source_key: String,
    pub source_db: u8,
    pub captured_at: DateTime<Utc>,
}

pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let value = String::deserialize(deserializer)?;

        STANDARD
            .decode(value.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_line_shape() {
        let line = r#"{"key":"customer:a@b.com:object","type":"hash","ttl_ms":-1,"db":6,"dump":"AAEC","exported_at":"2025-01-31T10:00:00Z"}"#;
        let record: DumpRecord = serde_json::from_str(line).unwrap();

        assert_eq!(record.key_type, KeyType::Hash);
        assert_eq!(record.ttl, Ttl::Persistent);
        assert_eq!(record.db, 6);
        assert_eq!(record.payload, vec![0, 1, 2]);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["ttl_ms"], -1);
        assert_eq!(value["dump"], "AAEC");
    }

    #[test]
    fn index_command_shape() {
        let cmd = IndexCommand::zadd("customer:instances", 1706745600.0, "0195");
        let value = serde_json::to_value(&cmd).unwrap();

        assert_eq!(
            value,
            serde_json::json!({"command": "ZADD", "key": "customer:instances", "args": ["1706745600", "0195"]})
        );
        assert_eq!(IndexOp::Increment.to_string(), "INCRBY");
        assert_eq!("HSET".parse::<IndexOp>().unwrap(), IndexOp::SetHashField);
    }

    #[test]
    fn object_detection() {
        let mut record = TransformedRecord {
            key: "customer:0195:object".to_owned(),
            key_type: KeyType::Hash,
            ttl: Ttl::Persistent,
            db: 0,
            payload: vec![],
            objid: "0195".to_owned(),
            extid: None,
            v1_identifier: "customer:a@b.com:object".to_owned(),
            attributes: BTreeMap::new(),
            enriched: false,
        };
        assert!(record.is_object());

        record.key = "customer:0195:receipts".to_owned();
        assert!(!record.is_object());
    }
}
