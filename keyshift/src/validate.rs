use keyshift_store::Store;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, info_span, warn, Instrument};

use crate::{
    error::{MigrateError, Result},
    schema::{EntitySpec, IndexSpec},
};

/// Scores closer than this to `created` count as unchanged.
pub const SCORE_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub unchanged: u64,
    pub modified: u64,
    pub missing: u64,
    pub missing_members: Vec<String>,
}

impl ValidationReport {
    /// Only members without a migrated object fail validation.
    pub fn exit_code(&self) -> i32 {
        i32::from(self.missing > 0)
    }
}

/// Checks a legacy aggregate index against migrated objects.
///
/// Each member of the legacy sorted set is a natural key scored by its last
/// modification; it resolves through `lookup` to a V2 object whose `created`
/// it is compared with.
pub struct Validator<'a> {
    store: Store,
    spec: &'a EntitySpec,
    legacy_index: String,
    lookup: String,
}

impl<'a> Validator<'a> {
    /// Uses `{v1 prefix}:values` and the first lookup index of `spec`.
    pub fn new(store: Store, spec: &'a EntitySpec) -> Result<Self> {
        let lookup = spec
            .indexes
            .iter()
            .find_map(|index| match index {
                IndexSpec::Lookup { key, .. } => Some(key.to_string()),
                _ => None,
            })
            .ok_or_else(|| {
                MigrateError::Config(format!("model `{}` declares no lookup index", spec.model))
            })?;

        Ok(Self {
            store,
            spec,
            legacy_index: format!("{}:values", spec.v1.prefix),
            lookup,
        })
    }

    pub fn legacy_index(mut self, key: impl Into<String>) -> Self {
        self.legacy_index = key.into();
        self
    }

    pub fn lookup(mut self, key: impl Into<String>) -> Self {
        self.lookup = key.into();
        self
    }

    pub async fn validate(&self) -> Result<ValidationReport> {
        let span = info_span!("validate", model = self.spec.model, legacy_index = self.legacy_index);

        async {
            let mut report = ValidationReport::default();

            for (member, score) in self.store.zrange_withscores(&self.legacy_index).await? {
                match self.created_of(&member).await? {
                    Some(created) if (created - score).abs() < SCORE_TOLERANCE => {
                        report.unchanged += 1;
                    }
                    Some(_) => report.modified += 1,
                    None => {
                        warn!(member, "legacy member has no migrated object");
                        report.missing += 1;
                        report.missing_members.push(member);
                    }
                }
            }

            info!(
                unchanged = report.unchanged,
                modified = report.modified,
                missing = report.missing,
                "validation finished"
            );

            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// `created` of the migrated object a natural key resolves to, `None`
    /// when the object is missing. An object without `created` compares as 0.
    async fn created_of(&self, member: &str) -> Result<Option<f64>> {
        let Some(raw) = self.store.hget(&self.lookup, member).await? else {
            return Ok(None);
        };

        let objid = match serde_json::from_slice::<Value>(&raw) {
            Ok(Value::String(objid)) => objid,
            _ => String::from_utf8_lossy(&raw).into_owned(),
        };

        let key = self.spec.v2.object_key(&objid);
        if !self.store.exists(&key).await? {
            return Ok(None);
        }

        let created = self
            .store
            .hget(&key, self.spec.created_field)
            .await?
            .and_then(|raw| serde_json::from_slice::<Value>(&raw).ok())
            .and_then(|value| match value {
                Value::Number(n) => n.as_f64(),
                Value::String(text) => text.parse().ok(),
                _ => None,
            })
            .unwrap_or(0.0);

        Ok(Some(created))
    }
}
