use keyshift_store::Store;
use tracing::{debug, info, warn};

use crate::{
    config::MigrateConfig,
    enrich::Enricher,
    error::{MigrateError, Result},
    identifier::{assign_objid, IdentifierMaps},
    index::build_indexes,
    jsonl::{write_jsonl, ExportLayout},
    loader::read_lines,
    record::{DumpRecord, TransformedRecord},
    schema::{EntityRegistry, EntitySpec},
    staging::Staging,
    stats::{RunStats, Stat},
    transform::{created_of, group, is_migrated, Transformer},
};

/// File-to-file stages of one model: dumps are read from the input layout,
/// every other stage file lives in the output layout.
pub struct Pipeline<'a> {
    registry: &'a EntityRegistry,
    config: &'a MigrateConfig,
    staging: &'a Staging,
    input: ExportLayout,
    output: ExportLayout,
}

impl<'a> Pipeline<'a> {
    pub fn new(registry: &'a EntityRegistry, config: &'a MigrateConfig, staging: &'a Staging) -> Self {
        Self {
            registry,
            config,
            staging,
            input: ExportLayout::new(&config.input_dir),
            output: ExportLayout::new(&config.output_dir),
        }
    }

    pub fn output(&self) -> &ExportLayout {
        &self.output
    }

    async fn read_dump(&self, spec: &EntitySpec, stats: &mut RunStats) -> Vec<DumpRecord> {
        let path = self.input.dump_path(spec.source_model());

        read_lines(spec.model, &path, stats).await
    }

    /// Identifiers of every model `spec` references.
    ///
    /// Models already transformed contribute their output; the others get
    /// identifiers assigned from their dump, which is what their own
    /// transform will produce later.
    pub async fn identifiers_for(
        &self,
        spec: &EntitySpec,
        stats: &mut RunStats,
    ) -> Result<IdentifierMaps> {
        let mut maps = IdentifierMaps::default();

        for model in spec.referenced_models() {
            let parent = self.registry.get(model)?;
            let path = self.output.transformed_path(model);

            if tokio::fs::try_exists(&path).await? {
                let records = read_lines::<TransformedRecord>(model, &path, stats).await;
                maps.extend_from_transformed(parent, &records);
            } else {
                let dump = self.read_dump(parent, stats).await;
                for (key, err) in self.assign_from_dump(parent, dump, &mut maps).await? {
                    warn!(model = spec.model, references = model, key, "{err}");
                }
            }

            debug!(model = spec.model, references = model, identifiers = maps.len(model), "identifiers loaded");
        }

        Ok(maps)
    }

    /// Assigns identifiers to every entity of a V1 dump.
    ///
    /// Objects that fail to decode are returned instead of aborting, so each
    /// caller decides whether they count as record errors. Objects already
    /// in V2 shape are not V1 entities and get nothing.
    async fn assign_from_dump(
        &self,
        spec: &EntitySpec,
        dump: Vec<DumpRecord>,
        maps: &mut IdentifierMaps,
    ) -> Result<Vec<(String, MigrateError)>> {
        let mut failed = Vec::new();

        for (identity, records) in group(&spec.v1, dump).groups {
            let Some(object) = records.iter().find(|r| {
                spec.v1.parse(&r.key).map(|(_, suffix)| suffix) == Some(crate::record::OBJECT_SUFFIX)
            }) else {
                continue;
            };

            let fields = match self.staging.decode_hash(&object.payload).await {
                Ok(fields) => fields,
                Err(source) if source.is_payload_error() => {
                    let key = object.key.clone();
                    failed.push((key.clone(), MigrateError::Restore { key, source }));
                    continue;
                }
                Err(source) => {
                    return Err(MigrateError::Restore {
                        key: object.key.clone(),
                        source,
                    })
                }
            };

            if is_migrated(&fields) {
                continue;
            }

            let objid = assign_objid(spec.model, &identity, created_of(spec, &fields));
            maps.insert(spec.model, identity, objid);
        }

        Ok(failed)
    }

    pub async fn transform_model(&self, spec: &EntitySpec, stats: &mut RunStats) -> Result<usize> {
        let dump = self.read_dump(spec, stats).await;
        let identifiers = self.identifiers_for(spec, stats).await?;

        let records = Transformer::new(spec, self.staging, &identifiers, self.config.migrated_at)
            .transform(dump, stats)
            .await;

        let path = self.output.transformed_path(spec.model);
        write_jsonl(&path, &records).await?;
        info!(model = spec.model, records = records.len(), path = %path.display(), "transformed");

        Ok(records.len())
    }

    /// Rewrites the transformed file in place with snapshots embedded.
    pub async fn enrich_model(&self, spec: &EntitySpec, stats: &mut RunStats) -> Result<usize> {
        let dump = self.read_dump(spec, stats).await;
        let path = self.output.transformed_path(spec.model);
        let records = read_lines::<TransformedRecord>(spec.model, &path, stats).await;

        let records = Enricher::new(spec, self.staging)
            .enrich(&dump, records, stats)
            .await;

        write_jsonl(&path, &records).await?;
        info!(model = spec.model, records = records.len(), "enriched");

        Ok(records.len())
    }

    pub async fn index_model(&self, spec: &EntitySpec, stats: &mut RunStats) -> Result<usize> {
        let path = self.output.transformed_path(spec.model);
        let records = read_lines::<TransformedRecord>(spec.model, &path, stats).await;
        let build = build_indexes(spec, &records);

        stats.add(Stat::IndexCommands, build.commands.len() as u64);
        stats.add(Stat::LookupConflicts, build.conflicts.len() as u64);

        let path = self.output.indexes_path(spec.model);
        write_jsonl(&path, &build.commands).await?;
        info!(model = spec.model, commands = build.commands.len(), "indexes built");

        Ok(build.commands.len())
    }

    /// Number of V1 entities whose V2 object is absent from `store`.
    pub async fn pending(&self, store: &Store, spec: &EntitySpec, stats: &mut RunStats) -> Result<u64> {
        let dump = self.read_dump(spec, stats).await;
        let mut maps = IdentifierMaps::default();
        for (key, err) in self.assign_from_dump(spec, dump.clone(), &mut maps).await? {
            stats.record_error(spec.model, &key, &err);
        }

        let mut pending = 0;
        for (identity, records) in group(&spec.v1, dump).groups {
            let Some(objid) = maps.resolve(spec.model, &identity) else {
                continue;
            };
            let db = records.first().map(|r| r.db).unwrap_or_else(|| store.db());

            if !store.select(db).await?.exists(&spec.v2.object_key(objid)).await? {
                pending += 1;
            }
        }

        Ok(pending)
    }
}
