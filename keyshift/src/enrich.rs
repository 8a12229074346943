use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info_span, Instrument};

use crate::{
    error::MigrateError,
    record::{DumpRecord, OriginalRecordSnapshot, TransformedRecord},
    schema::EntitySpec,
    staging::Staging,
    stats::{RunStats, Stat},
};

/// Hash field holding the JSON snapshot of the V1 object.
pub const SNAPSHOT_FIELD: &str = "_original_record";

/// Snapshot form of one V1 hash value.
///
/// Non-UTF-8 values become a tagged base64 wrapper when the model is binary
/// safe and lossy text otherwise.
pub fn snapshot_value(raw: &[u8], binary_safe: bool) -> Value {
    match std::str::from_utf8(raw) {
        Ok(text) => Value::String(text.to_owned()),
        Err(_) if binary_safe => json!({
            "__binary__": true,
            "encoding": "base64",
            "data": STANDARD.encode(raw),
        }),
        Err(_) => Value::String(String::from_utf8_lossy(raw).into_owned()),
    }
}

/// Embeds a verbatim snapshot of each V1 object into its V2 object.
pub struct Enricher<'a> {
    spec: &'a EntitySpec,
    staging: &'a Staging,
}

impl<'a> Enricher<'a> {
    pub fn new(spec: &'a EntitySpec, staging: &'a Staging) -> Self {
        Self { spec, staging }
    }

    /// V1 object key → snapshot, built from the dump.
    pub async fn build_lookup(
        &self,
        dump: &[DumpRecord],
        stats: &mut RunStats,
    ) -> HashMap<String, OriginalRecordSnapshot> {
        let mut lookup = HashMap::new();

        for record in dump {
            let is_object = self
                .spec
                .v1
                .parse(&record.key)
                .is_some_and(|(_, suffix)| suffix == crate::record::OBJECT_SUFFIX);

            if !is_object {
                continue;
            }

            // Undecodable objects already failed their transform group.
            let fields = match self.staging.decode_hash(&record.payload).await {
                Ok(fields) => fields,
                Err(source) if source.is_payload_error() => {
                    debug!(model = self.spec.model, key = record.key, "{source}");
                    continue;
                }
                Err(source) => {
                    let err = MigrateError::Restore {
                        key: record.key.clone(),
                        source,
                    };
                    stats.record_error(self.spec.model, &record.key, &err);
                    continue;
                }
            };

            let object = fields
                .iter()
                .map(|(name, raw)| (name.to_owned(), snapshot_value(raw, self.spec.binary_safe)))
                .collect::<BTreeMap<_, _>>();

            lookup.insert(
                record.key.clone(),
                OriginalRecordSnapshot {
                    object,
                    source_key: record.key.clone(),
                    source_db: record.db,
                    captured_at: record.exported_at,
                },
            );
        }

        lookup
    }

    /// Adds [`SNAPSHOT_FIELD`] to every transformed object with a matching
    /// V1 object. Other records pass through untouched.
    pub async fn enrich(
        &self,
        dump: &[DumpRecord],
        records: Vec<TransformedRecord>,
        stats: &mut RunStats,
    ) -> Vec<TransformedRecord> {
        let model = self.spec.model;
        let span = info_span!("enrich", model);

        async {
            let lookup = self.build_lookup(dump, stats).await;
            let mut out = Vec::with_capacity(records.len());

            for record in records {
                if !record.is_object() {
                    out.push(record);
                    continue;
                }

                let Some(snapshot) = lookup.get(&record.v1_identifier) else {
                    debug!(
                        model,
                        key = record.key,
                        "{}",
                        MigrateError::MissingLinkage(record.v1_identifier.clone())
                    );
                    stats.incr(Stat::NotFound);
                    out.push(record);
                    continue;
                };

                match self.embed(&record, snapshot).await {
                    Ok(payload) => {
                        stats.incr(Stat::Enriched);
                        out.push(TransformedRecord {
                            payload,
                            enriched: true,
                            ..record
                        });
                    }
                    Err(err) => {
                        stats.record_error(model, &record.key, &err);
                        out.push(record);
                    }
                }
            }

            out
        }
        .instrument(span)
        .await
    }

    async fn embed(
        &self,
        record: &TransformedRecord,
        snapshot: &OriginalRecordSnapshot,
    ) -> crate::error::Result<Vec<u8>> {
        let restore_err = |source| MigrateError::Restore {
            key: record.key.clone(),
            source,
        };

        let mut fields = self
            .staging
            .decode_hash(&record.payload)
            .await
            .map_err(restore_err)?;

        fields.insert(SNAPSHOT_FIELD.to_owned(), serde_json::to_vec(snapshot)?);

        self.staging.encode_hash(&fields).await.map_err(restore_err)
    }
}
