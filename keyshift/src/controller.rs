use async_trait::async_trait;
use keyshift_store::Store;
use parse_display::Display;
use serde::Serialize;
use tracing::{error, info, info_span, Instrument};

use crate::{
    config::MigrateConfig,
    error::{MigrateError, Result},
    loader::Loader,
    pipeline::Pipeline,
    schema::EntityRegistry,
    staging::Staging,
    stats::{RunStats, Stat},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[display(style = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Report whether work is pending, never mutate.
    Check,
    /// Compute everything, mutate nothing.
    DryRun,
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Prepared,
    NotNeeded,
    NeedsMigration,
    DryRunPreview,
    Applied,
    Failed,
}

/// A unit of migration work driven by [`Controller`].
#[async_trait]
pub trait Migration: Send {
    fn name(&self) -> &str;

    /// Establishes paths and connections.
    async fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    async fn migration_needed(&mut self, stats: &mut RunStats) -> Result<bool>;

    /// Performs the work, `Ok(false)` meaning it failed without an error.
    async fn migrate(&mut self, dry_run: bool, stats: &mut RunStats) -> Result<bool>;
}

#[derive(Debug, Serialize)]
pub struct Outcome {
    pub migration: String,
    pub mode: RunMode,
    pub state: MigrationState,
    pub stats: RunStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Outcome {
    /// 1 when work is pending under check, the run failed or any record
    /// error was collected.
    pub fn exit_code(&self) -> i32 {
        match (self.mode, self.state) {
            (_, MigrationState::Failed) => 1,
            (RunMode::Check, MigrationState::NeedsMigration) => 1,
            _ if self.stats.has_errors() => 1,
            _ => 0,
        }
    }

    pub fn summary(&self, sample: usize) -> String {
        let mut out = format!("{} [{}] {}\n", self.migration, self.mode, self.state);
        if let Some(err) = &self.error {
            out.push_str(&format!("error: {err}\n"));
        }
        out.push_str(&self.stats.summary(sample));

        out
    }
}

/// Drives a migration through `Prepared → (NotNeeded | NeedsMigration) →
/// (DryRunPreview | Applied | Failed)`.
pub struct Controller<M> {
    migration: M,
}

impl<M: Migration> Controller<M> {
    pub fn new(migration: M) -> Self {
        Self { migration }
    }

    pub fn into_inner(self) -> M {
        self.migration
    }

    pub async fn execute(&mut self, mode: RunMode) -> Outcome {
        let name = self.migration.name().to_owned();
        let span = info_span!("migration", name, %mode);

        async {
            let mut stats = RunStats::default();
            let (state, error) = match self.drive(mode, &mut stats).await {
                Ok(state) => (state, None),
                Err(err) => {
                    error!(migration = name, "{err}");
                    (MigrationState::Failed, Some(err.to_string()))
                }
            };

            info!(migration = name, %state, "migration finished");

            Outcome {
                migration: name.clone(),
                mode,
                state,
                stats,
                error,
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self, mode: RunMode, stats: &mut RunStats) -> Result<MigrationState> {
        self.migration.prepare().await?;
        info!(state = %MigrationState::Prepared);

        if !self.migration.migration_needed(stats).await? {
            return Ok(MigrationState::NotNeeded);
        }

        if mode == RunMode::Check {
            return Ok(MigrationState::NeedsMigration);
        }

        info!(state = %MigrationState::NeedsMigration);

        let dry_run = mode == RunMode::DryRun;
        match self.migration.migrate(dry_run, stats).await? {
            true if dry_run => Ok(MigrationState::DryRunPreview),
            true => Ok(MigrationState::Applied),
            false => Ok(MigrationState::Failed),
        }
    }
}

/// Transform → enrich → index → load, model by model in dependency order.
pub struct PipelineMigration {
    store: Store,
    registry: EntityRegistry,
    config: MigrateConfig,
    models: Vec<String>,
    staging: Option<Staging>,
}

impl PipelineMigration {
    pub fn new(store: Store, registry: EntityRegistry, config: MigrateConfig, models: Vec<String>) -> Self {
        Self {
            store,
            registry,
            config,
            models,
            staging: None,
        }
    }

    fn staging(&self) -> Result<&Staging> {
        self.staging
            .as_ref()
            .ok_or_else(|| MigrateError::Config("migration used before prepare".to_owned()))
    }

    fn selected(&self) -> Vec<&str> {
        self.models.iter().map(String::as_str).collect()
    }

    async fn run(&self, config: &MigrateConfig, stats: &mut RunStats) -> Result<()> {
        let staging = self.staging()?;
        let pipeline = Pipeline::new(&self.registry, config, staging);
        let loader = Loader::new(self.store.clone(), staging, config, pipeline.output().clone());

        for spec in self.registry.plan(&self.selected())? {
            pipeline.transform_model(spec, stats).await?;
            pipeline.enrich_model(spec, stats).await?;
            pipeline.index_model(spec, stats).await?;
            loader.load_model(spec, stats).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Migration for PipelineMigration {
    fn name(&self) -> &str {
        "pipeline"
    }

    async fn prepare(&mut self) -> Result<()> {
        self.config.validate()?;
        self.registry.plan(&self.selected())?;
        self.store.ping().await?;

        let scratch = self.store.select(self.config.temp_db).await?;
        self.staging = Some(Staging::new(scratch, self.config.temp_prefix.clone()));

        Ok(())
    }

    async fn migration_needed(&mut self, stats: &mut RunStats) -> Result<bool> {
        let staging = self.staging()?;
        let pipeline = Pipeline::new(&self.registry, &self.config, staging);

        let res = async {
            let mut needed = false;

            for spec in self.registry.plan(&self.selected())? {
                let pending = pipeline.pending(&self.store, spec, stats).await?;
                info!(model = spec.model, pending, "pending entities");
                needed |= pending > 0;
            }

            Ok::<_, MigrateError>(needed)
        }
        .await;

        let cleaned = staging.cleanup().await?;
        stats.add(Stat::StagingKeysCleaned, cleaned);

        res
    }

    async fn migrate(&mut self, dry_run: bool, stats: &mut RunStats) -> Result<bool> {
        let config = MigrateConfig {
            dry_run,
            ..self.config.clone()
        };

        let res = self.run(&config, stats).await;
        let cleaned = self.staging()?.cleanup().await?;
        stats.add(Stat::StagingKeysCleaned, cleaned);

        res.map(|()| true)
    }
}
