use parse_display::Display;
use serde::Serialize;
use std::{collections::BTreeMap, fmt::Write};

use crate::error::{ErrorKind, MigrateError};

/// Outcomes tracked by a run. Closed so every counter is known up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    Processed,
    Transformed,
    RelatedRenamed,
    NonEntityKeys,
    GroupsFailed,
    UnresolvedForeignKeys,
    Enriched,
    NotFound,
    IndexCommands,
    LookupConflicts,
    RecordsRestored,
    IndexesApplied,
    CountersSkipped,
    BackedUp,
    Updated,
    SkippedExisting,
    SkippedDeleted,
    SkippedUnlinked,
    Retries,
    ParseErrors,
    StagingKeysCleaned,
}

impl Stat {
    pub const ALL: [Stat; 21] = [
        Stat::Processed,
        Stat::Transformed,
        Stat::RelatedRenamed,
        Stat::NonEntityKeys,
        Stat::GroupsFailed,
        Stat::UnresolvedForeignKeys,
        Stat::Enriched,
        Stat::NotFound,
        Stat::IndexCommands,
        Stat::LookupConflicts,
        Stat::RecordsRestored,
        Stat::IndexesApplied,
        Stat::CountersSkipped,
        Stat::BackedUp,
        Stat::Updated,
        Stat::SkippedExisting,
        Stat::SkippedDeleted,
        Stat::SkippedUnlinked,
        Stat::Retries,
        Stat::ParseErrors,
        Stat::StagingKeysCleaned,
    ];
}

/// A per-record failure, with enough context to find the record again.
#[derive(Debug, Clone, Serialize)]
pub struct RecordError {
    pub model: String,
    pub key: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Counters of one migration run. Counters only ever go up.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub processed: u64,
    pub transformed: u64,
    pub related_renamed: u64,
    pub non_entity_keys: u64,
    pub groups_failed: u64,
    pub unresolved_foreign_keys: u64,
    pub enriched: u64,
    pub not_found: u64,
    pub index_commands: u64,
    pub lookup_conflicts: u64,
    pub records_restored: u64,
    pub indexes_applied: u64,
    pub counters_skipped: u64,
    pub backed_up: u64,
    pub updated: u64,
    pub skipped_existing: u64,
    pub skipped_deleted: u64,
    pub skipped_unlinked: u64,
    pub retries: u64,
    pub parse_errors: u64,
    pub staging_keys_cleaned: u64,
    /// Free-form counters a migration may keep on top of the named ones.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, u64>,
    pub errors: Vec<RecordError>,
}

impl RunStats {
    fn counter_mut(&mut self, stat: Stat) -> &mut u64 {
        match stat {
            Stat::Processed => &mut self.processed,
            Stat::Transformed => &mut self.transformed,
            Stat::RelatedRenamed => &mut self.related_renamed,
            Stat::NonEntityKeys => &mut self.non_entity_keys,
            Stat::GroupsFailed => &mut self.groups_failed,
            Stat::UnresolvedForeignKeys => &mut self.unresolved_foreign_keys,
            Stat::Enriched => &mut self.enriched,
            Stat::NotFound => &mut self.not_found,
            Stat::IndexCommands => &mut self.index_commands,
            Stat::LookupConflicts => &mut self.lookup_conflicts,
            Stat::RecordsRestored => &mut self.records_restored,
            Stat::IndexesApplied => &mut self.indexes_applied,
            Stat::CountersSkipped => &mut self.counters_skipped,
            Stat::BackedUp => &mut self.backed_up,
            Stat::Updated => &mut self.updated,
            Stat::SkippedExisting => &mut self.skipped_existing,
            Stat::SkippedDeleted => &mut self.skipped_deleted,
            Stat::SkippedUnlinked => &mut self.skipped_unlinked,
            Stat::Retries => &mut self.retries,
            Stat::ParseErrors => &mut self.parse_errors,
            Stat::StagingKeysCleaned => &mut self.staging_keys_cleaned,
        }
    }

    pub fn get(&self, stat: Stat) -> u64 {
        match stat {
            Stat::Processed => self.processed,
            Stat::Transformed => self.transformed,
            Stat::RelatedRenamed => self.related_renamed,
            Stat::NonEntityKeys => self.non_entity_keys,
            Stat::GroupsFailed => self.groups_failed,
            Stat::UnresolvedForeignKeys => self.unresolved_foreign_keys,
            Stat::Enriched => self.enriched,
            Stat::NotFound => self.not_found,
            Stat::IndexCommands => self.index_commands,
            Stat::LookupConflicts => self.lookup_conflicts,
            Stat::RecordsRestored => self.records_restored,
            Stat::IndexesApplied => self.indexes_applied,
            Stat::CountersSkipped => self.counters_skipped,
            Stat::BackedUp => self.backed_up,
            Stat::Updated => self.updated,
            Stat::SkippedExisting => self.skipped_existing,
            Stat::SkippedDeleted => self.skipped_deleted,
            Stat::SkippedUnlinked => self.skipped_unlinked,
            Stat::Retries => self.retries,
            Stat::ParseErrors => self.parse_errors,
            Stat::StagingKeysCleaned => self.staging_keys_cleaned,
        }
    }

    pub fn incr(&mut self, stat: Stat) {
        self.add(stat, 1);
    }

    pub fn add(&mut self, stat: Stat, n: u64) {
        *self.counter_mut(stat) += n;
    }

    pub fn bump(&mut self, name: &str) {
        *self.custom.entry(name.to_owned()).or_default() += 1;
    }

    pub fn record_error(&mut self, model: &str, key: &str, err: &MigrateError) {
        tracing::error!(model, key, kind = %err.kind(), "{err}");

        if matches!(err, MigrateError::Parse { .. }) {
            self.incr(Stat::ParseErrors);
        }

        self.errors.push(RecordError {
            model: model.to_owned(),
            key: key.to_owned(),
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Adds every counter and error of `other`.
    pub fn merge(&mut self, other: RunStats) {
        for stat in Stat::ALL {
            self.add(stat, other.get(stat));
        }

        for (name, value) in other.custom {
            *self.custom.entry(name).or_default() += value;
        }

        self.errors.extend(other.errors);
    }

    /// Human-readable end-of-run report listing non-zero counters and the
    /// first `sample` errors.
    pub fn summary(&self, sample: usize) -> String {
        let mut out = String::new();

        for stat in Stat::ALL {
            let value = self.get(stat);
            if value > 0 {
                let _ = writeln!(out, "{stat:>24}: {value}");
            }
        }

        for (name, value) in &self.custom {
            let _ = writeln!(out, "{name:>24}: {value}");
        }

        let _ = writeln!(out, "{:>24}: {}", "errors", self.errors.len());

        for err in self.errors.iter().take(sample) {
            let _ = writeln!(out, "  [{}] {} {}: {}", err.kind, err.model, err.key, err.message);
        }

        if self.errors.len() > sample {
            let _ = writeln!(out, "  ... {} more", self.errors.len() - sample);
        }

        out
    }
}
