//! V1 → V2 record transformation.

mod coerce;
mod group;

pub use coerce::*;
pub use group::*;

use chrono::{DateTime, Utc};
use keyshift_store::{FieldMap, KeyType};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    error::{MigrateError, Result},
    identifier::{assign_objid, derive_extid, IdentifierMaps},
    record::{DumpRecord, TransformedRecord, OBJECT_SUFFIX},
    schema::{EntitySpec, FieldRule, FieldType},
    staging::Staging,
    stats::{RunStats, Stat},
};

/// How a model obtains the new identifier of its own records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentifierPolicy {
    /// Reuse a pre-assigned identifier when present, otherwise derive one.
    #[default]
    Generate,
    /// Fail the group unless an identifier was pre-assigned.
    RequirePreassigned,
}

/// Hash fields of a V2 object and the values index derivation needs.
#[derive(Debug, Default, PartialEq)]
pub struct TransformedFields {
    pub fields: FieldMap,
    pub values: BTreeMap<String, Value>,
    pub unresolved: u64,
}

impl TransformedFields {
    fn put(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        self.fields.insert(field.clone(), value.to_string().into_bytes());
        self.values.insert(field, value);
    }
}

pub struct Transformer<'a> {
    spec: &'a EntitySpec,
    staging: &'a Staging,
    identifiers: &'a IdentifierMaps,
    policy: IdentifierPolicy,
    migrated_at: DateTime<Utc>,
}

impl<'a> Transformer<'a> {
    pub fn new(
        spec: &'a EntitySpec,
        staging: &'a Staging,
        identifiers: &'a IdentifierMaps,
        migrated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            spec,
            staging,
            identifiers,
            policy: IdentifierPolicy::default(),
            migrated_at,
        }
    }

    pub fn policy(mut self, policy: IdentifierPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Transforms every group of a dump. Failed groups are counted and
    /// recorded; they never stop the batch.
    pub async fn transform(
        &self,
        records: Vec<DumpRecord>,
        stats: &mut RunStats,
    ) -> Vec<TransformedRecord> {
        let model = self.spec.model;
        let span = info_span!("transform", model);

        async {
            let grouping = group(&self.spec.v1, records);

            for record in &grouping.non_entity {
                debug!(model, key = record.key, "skipping non-entity key");
            }
            stats.add(Stat::NonEntityKeys, grouping.non_entity.len() as u64);

            let mut out = Vec::new();

            for (identity, records) in &grouping.groups {
                let res = self.transform_group(identity, records).await;
                if !matches!(res, Ok(None)) {
                    stats.incr(Stat::Processed);
                }

                match res {
                    Ok(None) => {
                        debug!(model, identity, "already migrated, skipping");
                        stats.add(Stat::NonEntityKeys, records.len() as u64);
                    }
                    Ok(Some((transformed, unresolved))) => {
                        stats.add(Stat::UnresolvedForeignKeys, unresolved);
                        for record in &transformed {
                            if record.is_object() {
                                stats.incr(Stat::Transformed);
                            } else {
                                stats.incr(Stat::RelatedRenamed);
                            }
                        }
                        out.extend(transformed);
                    }
                    Err(err) => {
                        stats.incr(Stat::GroupsFailed);
                        stats.record_error(model, &self.spec.v1.object_key(identity), &err);
                    }
                }
            }

            out
        }
        .instrument(span)
        .await
    }

    /// Transforms one V1 identity: its object plus renamed substructures.
    ///
    /// `None` when the object already is a migrated V2 object sharing the V1
    /// key shape.
    pub async fn transform_group(
        &self,
        identity: &str,
        records: &[DumpRecord],
    ) -> Result<Option<(Vec<TransformedRecord>, u64)>> {
        let object = records
            .iter()
            .find(|r| self.spec.v1.parse(&r.key).map(|(_, s)| s) == Some(OBJECT_SUFFIX))
            .ok_or_else(|| MigrateError::MissingObject(identity.to_owned()))?;

        let restore_err = |source| MigrateError::Restore {
            key: object.key.clone(),
            source,
        };

        let v1_fields = self.staging.decode_hash(&object.payload).await.map_err(restore_err)?;
        if is_migrated(&v1_fields) {
            return Ok(None);
        }

        let created = created_of(self.spec, &v1_fields);

        let objid = match (self.identifiers.resolve(self.spec.model, identity), self.policy) {
            (Some(objid), _) => objid.to_owned(),
            (None, IdentifierPolicy::Generate) => assign_objid(self.spec.model, identity, created),
            (None, IdentifierPolicy::RequirePreassigned) => {
                return Err(MigrateError::UnresolvedIdentifier {
                    model: self.spec.model.to_owned(),
                    id: identity.to_owned(),
                })
            }
        };
        let extid = derive_extid(self.spec.extid_prefix, &objid);

        let transformed = self.transform_fields(identity, &object.key, &v1_fields, &objid, &extid)?;
        let payload = self
            .staging
            .encode_hash(&transformed.fields)
            .await
            .map_err(restore_err)?;

        let attribute_fields = self.spec.attribute_fields();
        let attributes = transformed
            .values
            .into_iter()
            .filter(|(name, _)| attribute_fields.contains(name.as_str()))
            .collect();

        let mut out = vec![TransformedRecord {
            key: self.spec.v2.object_key(&objid),
            key_type: KeyType::Hash,
            ttl: object.ttl,
            db: object.db,
            payload,
            objid: objid.clone(),
            extid: Some(extid),
            v1_identifier: object.key.clone(),
            attributes,
            enriched: false,
        }];

        // Substructures belong to the V1 model, not to models derived from it.
        if self.spec.is_strict() {
            for record in records.iter().filter(|r| r.key != object.key) {
                let Some((_, suffix)) = self.spec.v1.parse(&record.key) else {
                    continue;
                };

                out.push(TransformedRecord {
                    key: self.spec.v2.key(&objid, self.spec.rename_suffix(suffix)),
                    key_type: record.key_type,
                    ttl: record.ttl,
                    db: record.db,
                    payload: record.payload.clone(),
                    objid: objid.clone(),
                    extid: None,
                    v1_identifier: record.key.clone(),
                    attributes: BTreeMap::new(),
                    enriched: false,
                });
            }
        }

        Ok(Some((out, transformed.unresolved)))
    }

    /// Applies the field table to the fields of one V1 object.
    pub fn transform_fields(
        &self,
        identity: &str,
        v1_key: &str,
        v1_fields: &FieldMap,
        objid: &str,
        extid: &str,
    ) -> Result<TransformedFields> {
        let spec = self.spec;
        let mut out = TransformedFields::default();

        for (field, raw) in v1_fields {
            if spec.is_strict() && field == spec.identifier_field {
                continue;
            }

            let rule = match spec.rule(field) {
                Some(rule) => rule,
                None if spec.is_strict() => {
                    return Err(MigrateError::UndeclaredField {
                        key: v1_key.to_owned(),
                        field: field.to_owned(),
                    })
                }
                None => continue,
            };

            match rule {
                FieldRule::Copy => {
                    out.fields.insert(field.to_owned(), raw.clone());
                }
                FieldRule::Drop => {}
                FieldRule::Typed(ty) => out.put(field.as_str(), coerce(field, ty, raw)?),
                FieldRule::Renamed(to, ty) => out.put(to, coerce(field, ty, raw)?),
                FieldRule::ForeignKey { model, rename } => {
                    let target = rename.unwrap_or(field.as_str());
                    let v1_ref = match coerce(field, FieldType::String, raw)? {
                        Value::String(text) => text.trim().to_owned(),
                        _ => String::new(),
                    };

                    if v1_ref.is_empty() {
                        out.put(target, Value::Null);
                        continue;
                    }

                    match self.identifiers.resolve(model, &v1_ref) {
                        Some(new_ref) => {
                            if new_ref != v1_ref {
                                out.put(format!("v1_{target}"), Value::String(v1_ref.clone()));
                            }
                            out.put(target, Value::String(new_ref.to_owned()));
                        }
                        None => {
                            warn!(
                                model = spec.model,
                                key = v1_key,
                                field = target,
                                references = model,
                                "unresolved foreign key"
                            );
                            out.unresolved += 1;
                            out.put(target, Value::String(v1_ref));
                        }
                    }
                }
            }
        }

        for derived in &spec.derived {
            let resolved = v1_fields
                .get(derived.source)
                .and_then(|raw| std::str::from_utf8(raw).ok())
                .and_then(|v1_ref| self.identifiers.resolve(derived.model, v1_ref.trim()));

            match resolved {
                Some(objid) => out.put(derived.target, Value::String(objid.to_owned())),
                None => out.put(derived.target, Value::Null),
            }
        }

        for (field, value) in &spec.constants {
            out.put(*field, value.clone());
        }

        out.put(spec.identifier_field, Value::String(objid.to_owned()));
        if spec.is_strict() && identity != objid {
            out.put(
                format!("v1_{}", spec.identifier_field),
                Value::String(identity.to_owned()),
            );
        }

        out.put("objid", Value::String(objid.to_owned()));
        out.put("extid", Value::String(extid.to_owned()));
        out.put("v1_identifier", Value::String(v1_key.to_owned()));
        out.put("migration_status", Value::String("completed".to_owned()));
        out.put("migrated_at", migrated_at_value(self.migrated_at));

        Ok(out)
    }
}

/// Whether a decoded object carries the bookkeeping fields of a completed
/// migration. Such objects may share the V1 key shape but are never input.
pub fn is_migrated(fields: &FieldMap) -> bool {
    fields.contains_key("v1_identifier")
        && fields
            .get("migration_status")
            .is_some_and(|status| status.as_slice() == br#""completed""#)
}

/// Creation time of a V1 object, in seconds.
pub fn created_of(spec: &EntitySpec, fields: &FieldMap) -> Option<f64> {
    fields
        .get(spec.created_field)
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .and_then(|text| text.trim().parse::<f64>().ok())
}

fn migrated_at_value(at: DateTime<Utc>) -> Value {
    let secs = at.timestamp_millis() as f64 / 1000.0;

    serde_json::Number::from_f64(secs)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
