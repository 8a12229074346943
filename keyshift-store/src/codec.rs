//! Store-native object-dump format of the in-memory engine.
//!
//! A payload is laid out as:
//!
//! ```text
//! [type tag: u8][bitcode body][format version: u16 LE][checksum: 8 bytes]
//! ```
//!
//! The checksum is the first 8 bytes of the SHA-256 of everything before it.
//! Like the server-side DUMP format it is only meaningful to the matching
//! restore operation; callers treat it as opaque bytes.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    engine::{FieldMap, KeyType},
    error::{Result, StoreError},
};

pub const DUMP_FORMAT_VERSION: u16 = 1;

const TRAILER_LEN: usize = 2 + 8;

#[derive(Debug, Clone, PartialEq, bitcode::Encode, bitcode::Decode)]
pub enum Value {
    String(Vec<u8>),
    Hash(FieldMap),
    Set(BTreeSet<String>),
    ZSet(BTreeMap<String, f64>),
    List(Vec<Vec<u8>>),
}

impl Value {
    pub fn key_type(&self) -> KeyType {
        match self {
            Value::String(_) => KeyType::String,
            Value::Hash(_) => KeyType::Hash,
            Value::Set(_) => KeyType::Set,
            Value::ZSet(_) => KeyType::Zset,
            Value::List(_) => KeyType::List,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Value::String(_) => 0,
            Value::List(_) => 1,
            Value::Set(_) => 2,
            Value::ZSet(_) => 3,
            Value::Hash(_) => 4,
        }
    }

    /// Aggregates left without members are removed from the keyspace.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::String(_) => false,
            Value::Hash(v) => v.is_empty(),
            Value::Set(v) => v.is_empty(),
            Value::ZSet(v) => v.is_empty(),
            Value::List(v) => v.is_empty(),
        }
    }
}

fn checksum(bytes: &[u8]) -> [u8; 8] {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut payload = vec![value.tag()];
    payload.extend(bitcode::encode(value));
    payload.extend(DUMP_FORMAT_VERSION.to_le_bytes());
    let sum = checksum(&payload);
    payload.extend(sum);

    payload
}

pub fn decode_value(payload: &[u8]) -> Result<Value> {
    if payload.len() < 1 + TRAILER_LEN {
        return Err(StoreError::CorruptPayload(format!(
            "payload too short ({} bytes)",
            payload.len()
        )));
    }

    let (body, sum) = payload.split_at(payload.len() - 8);
    if checksum(body) != sum {
        return Err(StoreError::CorruptPayload("checksum mismatch".to_owned()));
    }

    let (body, version) = body.split_at(body.len() - 2);
    let version = u16::from_le_bytes([version[0], version[1]]);
    if version != DUMP_FORMAT_VERSION {
        return Err(StoreError::CorruptPayload(format!(
            "unsupported format version {version}"
        )));
    }

    let value: Value = bitcode::decode(&body[1..])?;
    if value.tag() != body[0] {
        return Err(StoreError::CorruptPayload(format!(
            "type tag {} does not match encoded {}",
            body[0],
            value.key_type()
        )));
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> Value {
        let mut fields = FieldMap::new();
        fields.insert("email".to_owned(), b"a@b.com".to_vec());
        fields.insert("value".to_owned(), vec![0xff, 0x00, 0xfe, 0x80]);
        Value::Hash(fields)
    }

    #[test]
    fn binary_field_survives() {
        let value = hash();
        let decoded = decode_value(&encode_value(&value)).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn flipped_byte_is_rejected() {
        let mut payload = encode_value(&hash());
        payload[3] ^= 0x01;
        assert!(matches!(
            decode_value(&payload),
            Err(StoreError::CorruptPayload(_))
        ));
    }

    #[test]
    fn short_payload_is_rejected() {
        assert!(matches!(
            decode_value(b"abc"),
            Err(StoreError::CorruptPayload(_))
        ));
    }

    #[test]
    fn version_is_checked() {
        let mut payload = encode_value(&Value::String(b"x".to_vec()));
        let len = payload.len();
        payload[len - 10] = 9;
        let body_len = len - 8;
        let sum = checksum(&payload[..body_len]);
        payload[body_len..].copy_from_slice(&sum);

        let err = decode_value(&payload).unwrap_err();
        assert!(err.to_string().contains("version"));
    }
}
