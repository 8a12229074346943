use keyshift_store::{FieldMap, Store};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    config::MigrateConfig,
    dumper::dump_keys,
    error::{MigrateError, Result},
    jsonl::{read_jsonl, write_jsonl, ExportLayout, Lines},
    record::{IndexCommand, IndexOp, TransformedRecord},
    schema::EntitySpec,
    staging::Staging,
    stats::{RunStats, Stat},
};

/// Hash of counter totals already applied, keyed by `{model}:{counter key}`.
/// Re-runs only increment by the difference to the derived total.
pub const APPLIED_COUNTERS_KEY: &str = "_keyshift:applied_counters";

/// Lazily opened handles, one per logical database.
struct Databases {
    root: Store,
    open: HashMap<u8, Store>,
}

impl Databases {
    fn new(root: Store) -> Self {
        Self {
            root,
            open: HashMap::new(),
        }
    }

    async fn get(&mut self, db: u8) -> keyshift_store::Result<&Store> {
        if !self.open.contains_key(&db) {
            let store = self.root.select(db).await?;
            self.open.insert(db, store);
        }

        Ok(&self.open[&db])
    }
}

/// Applies transformed records and index commands to the target store.
pub struct Loader<'a> {
    store: Store,
    staging: &'a Staging,
    config: &'a MigrateConfig,
    layout: ExportLayout,
}

impl<'a> Loader<'a> {
    pub fn new(
        store: Store,
        staging: &'a Staging,
        config: &'a MigrateConfig,
        layout: ExportLayout,
    ) -> Self {
        Self {
            store,
            staging,
            config,
            layout,
        }
    }

    /// Loads every model of `plan`, parents first. Every model is reapplied
    /// on each run.
    pub async fn load(&self, plan: &[&EntitySpec], stats: &mut RunStats) -> Result<()> {
        for spec in plan {
            self.load_model(spec, stats).await?;
        }

        Ok(())
    }

    /// Records first, then index commands, each phase unless skipped.
    pub async fn load_model(&self, spec: &EntitySpec, stats: &mut RunStats) -> Result<()> {
        let model = spec.model;
        let span = info_span!("load", model, dry_run = self.config.dry_run);

        async {
            if !self.config.skip_records {
                let path = self.layout.transformed_path(model);
                let records = read_lines::<TransformedRecord>(model, &path, stats).await;
                self.restore_records(model, &records, stats).await?;
            }

            if !self.config.skip_indexes {
                let path = self.layout.indexes_path(model);
                let commands = read_lines::<IndexCommand>(model, &path, stats).await;
                self.apply_indexes(model, &commands, stats).await;
            }

            info!(model, "model loaded");

            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Restores records with replace semantics, after backing up the keys
    /// they overwrite. Dry runs verify payloads in staging instead.
    pub async fn restore_records(
        &self,
        model: &str,
        records: &[TransformedRecord],
        stats: &mut RunStats,
    ) -> Result<()> {
        let mut databases = Databases::new(self.store.clone());

        if self.config.backup {
            self.backup(model, records, &mut databases, stats).await?;
        }

        for record in records {
            let res = if self.config.dry_run {
                self.staging.verify(&record.payload).await
            } else {
                match databases.get(record.db).await {
                    Ok(store) => {
                        store
                            .restore(&record.key, record.ttl, &record.payload, true)
                            .await
                    }
                    Err(e) => Err(e),
                }
            };

            match res {
                Ok(()) => stats.incr(Stat::RecordsRestored),
                Err(source) => {
                    let err = MigrateError::Restore {
                        key: record.key.clone(),
                        source,
                    };
                    stats.record_error(model, &record.key, &err);
                }
            }
        }

        Ok(())
    }

    /// Dumps target keys that already exist. The file is only written when
    /// applying.
    async fn backup(
        &self,
        model: &str,
        records: &[TransformedRecord],
        databases: &mut Databases,
        stats: &mut RunStats,
    ) -> Result<()> {
        let mut by_db = BTreeMap::<u8, Vec<String>>::new();
        for record in records {
            by_db.entry(record.db).or_default().push(record.key.clone());
        }

        let mut existing = Vec::new();
        for (db, keys) in by_db {
            let store = databases.get(db).await?;
            existing.extend(dump_keys(store, &keys).await?);
        }

        if existing.is_empty() {
            return Ok(());
        }

        stats.add(Stat::BackedUp, existing.len() as u64);

        if !self.config.dry_run {
            let path = self.layout.backup_path(model, self.config.migrated_at);
            write_jsonl(&path, &existing).await?;
            info!(model, keys = existing.len(), path = %path.display(), "existing keys backed up");
        }

        Ok(())
    }

    /// Applies index commands; each failure is recorded and skipped.
    pub async fn apply_indexes(&self, model: &str, commands: &[IndexCommand], stats: &mut RunStats) {
        let mut databases = Databases::new(self.store.clone());

        for cmd in commands {
            let db = cmd.db.unwrap_or_else(|| self.store.db());
            let res = match databases.get(db).await {
                Ok(store) => self.apply(store, model, cmd).await,
                Err(e) => Err(e.into()),
            };

            match res {
                Ok(true) => stats.incr(Stat::IndexesApplied),
                Ok(false) => stats.incr(Stat::CountersSkipped),
                Err(err) => stats.record_error(model, &cmd.key, &err),
            }
        }
    }

    /// `Ok(false)` when the command was already applied by an earlier run.
    async fn apply(&self, store: &Store, model: &str, cmd: &IndexCommand) -> Result<bool> {
        let dry_run = self.config.dry_run;
        let bad_args = |message: String| MigrateError::General {
            key: cmd.key.clone(),
            message: format!("{} {message}", cmd.command),
        };

        match (cmd.command, cmd.args.as_slice()) {
            (IndexOp::AddSorted, [score, member]) => {
                let score = score
                    .parse::<f64>()
                    .map_err(|_| bad_args(format!("score `{score}` is not a number")))?;

                if !dry_run {
                    store.zadd(&cmd.key, score, member).await?;
                }
            }
            (IndexOp::SetHashField, [field, value]) => {
                if !dry_run {
                    let fields = FieldMap::from([(field.to_owned(), value.as_bytes().to_vec())]);
                    store.hset(&cmd.key, &fields).await?;
                }
            }
            (IndexOp::AddSetMember, [member]) => {
                if !dry_run {
                    store.sadd(&cmd.key, member).await?;
                }
            }
            (IndexOp::Increment, [by]) => {
                let by = by
                    .parse::<i64>()
                    .map_err(|_| bad_args(format!("increment `{by}` is not an integer")))?;
                let marker = format!("{model}:{}", cmd.key);

                let applied = match store.hget(APPLIED_COUNTERS_KEY, &marker).await? {
                    Some(raw) => String::from_utf8_lossy(&raw).parse::<i64>().map_err(|_| {
                        bad_args(format!("applied total of `{marker}` is not an integer"))
                    })?,
                    None => 0,
                };

                let delta = by - applied;
                if delta == 0 {
                    debug!(model, key = cmd.key, total = by, "counter up to date, skipping");
                    return Ok(false);
                }

                if !dry_run {
                    store.incrby(&cmd.key, delta).await?;
                    let total = FieldMap::from([(marker, by.to_string().into_bytes())]);
                    store.hset(APPLIED_COUNTERS_KEY, &total).await?;
                }
            }
            (_, args) => return Err(bad_args(format!("unexpected arguments {args:?}"))),
        }

        Ok(true)
    }
}

/// Reads a stage file, recording malformed lines. A missing file reads as
/// empty.
pub(crate) async fn read_lines<T: serde::de::DeserializeOwned>(
    model: &str,
    path: &Path,
    stats: &mut RunStats,
) -> Vec<T> {
    let Lines { records, errors } = match read_jsonl::<T>(path).await {
        Ok(lines) => lines,
        Err(MigrateError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(model, path = %path.display(), "stage file not found");
            return Vec::new();
        }
        Err(err) => {
            stats.record_error(model, &path.display().to_string(), &err);
            return Vec::new();
        }
    };

    for err in &errors {
        stats.record_error(model, &path.display().to_string(), err);
    }

    records
}
