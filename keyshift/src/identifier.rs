use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Builder;

use crate::{record::TransformedRecord, schema::EntitySpec};

/// Time-orderable identifier for a V1 record.
///
/// The timestamp bits come from `created` and the remaining bits from a hash
/// of the model and V1 identity, so the same input always yields the same id.
pub fn assign_objid(model: &str, v1_id: &str, created: Option<f64>) -> String {
    let millis = created
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(|secs| (secs * 1000.0) as u64)
        .unwrap_or(0);

    let digest = Sha256::digest(format!("{model}:{v1_id}").as_bytes());
    let mut random = [0u8; 10];
    random.copy_from_slice(&digest[..10]);

    Builder::from_unix_timestamp_millis(millis, &random)
        .into_uuid()
        .hyphenated()
        .to_string()
}

/// Public-facing identifier derived from `objid`.
pub fn derive_extid(prefix: &str, objid: &str) -> String {
    let hex = format!("{:x}", Sha256::digest(objid.as_bytes()));

    format!("{prefix}{}", &hex[..24])
}

/// V1 → new identifier maps, one per model.
#[derive(Debug, Clone, Default)]
pub struct IdentifierMaps {
    maps: HashMap<String, HashMap<String, String>>,
}

impl IdentifierMaps {
    pub fn insert(&mut self, model: &str, v1_id: impl Into<String>, objid: impl Into<String>) {
        self.maps
            .entry(model.to_owned())
            .or_default()
            .insert(v1_id.into(), objid.into());
    }

    pub fn resolve(&self, model: &str, v1_id: &str) -> Option<&str> {
        self.maps
            .get(model)
            .and_then(|map| map.get(v1_id))
            .map(String::as_str)
    }

    pub fn has_model(&self, model: &str) -> bool {
        self.maps.contains_key(model)
    }

    pub fn len(&self, model: &str) -> usize {
        self.maps.get(model).map(HashMap::len).unwrap_or(0)
    }

    /// Registers the identifiers a parent model already received, reading
    /// the V1 identity back from each object's `v1_identifier`.
    pub fn extend_from_transformed(&mut self, spec: &EntitySpec, records: &[TransformedRecord]) {
        let map = self.maps.entry(spec.model.to_owned()).or_default();

        for record in records.iter().filter(|r| r.is_object()) {
            if let Some((identity, _)) = spec.v1.parse(&record.v1_identifier) {
                map.insert(identity.to_owned(), record.objid.clone());
            }
        }
    }
}
