use clap::{Args, Parser, Subcommand};
use keyshift::{
    dump_pattern,
    schema::{EntityRegistry, EntitySpec, Origin},
    store::Store,
    ConfigBuilder, Controller, ExportLayout, Loader, MigrateConfig, Pipeline, PipelineMigration,
    RunMode, RunStats, Staging, Stat, Validator,
};
use std::{path::PathBuf, process::ExitCode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "keyshift")]
#[command(about = "Migrates key-value store records from the V1 to the V2 schema")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Directory holding `{model}/{model}_dump.jsonl` files
    #[arg(long, global = true, default_value = keyshift::DEFAULT_EXPORT_DIR)]
    input_dir: PathBuf,

    /// Directory receiving transformed, index and backup files
    #[arg(long, global = true, default_value = keyshift::DEFAULT_EXPORT_DIR)]
    output_dir: PathBuf,

    #[arg(long, global = true, conflicts_with = "valkey_url")]
    redis_url: Option<String>,

    #[arg(long, global = true)]
    valkey_url: Option<String>,

    /// Model to process, repeatable. Defaults to every model.
    #[arg(long = "model", global = true)]
    models: Vec<String>,

    /// Logical database used for staging keys
    #[arg(long, global = true, default_value_t = keyshift::DEFAULT_TEMP_DB)]
    temp_db: u8,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Dump V1 keys of the selected models
    Export,
    /// Transform dumps into V2 records
    Transform,
    /// Embed V1 snapshots into transformed records
    Enrich,
    /// Derive index commands from transformed records
    Indexes,
    /// Restore transformed records and apply index commands
    Load {
        #[arg(long)]
        dry_run: bool,

        #[arg(long, conflicts_with = "skip_records")]
        skip_indexes: bool,

        #[arg(long)]
        skip_records: bool,

        #[arg(long)]
        no_backup: bool,
    },
    /// Run every stage; dry run unless `--run`
    Migrate {
        /// Exit 1 when migration is needed, change nothing
        #[arg(long, conflicts_with = "run")]
        check: bool,

        #[arg(long)]
        run: bool,

        /// Explicit form of the default mode
        #[arg(long, conflicts_with_all = ["check", "run"])]
        dry_run: bool,

        #[arg(long, conflicts_with = "skip_records")]
        skip_indexes: bool,

        #[arg(long)]
        skip_records: bool,
    },
    /// Compare a legacy sorted-set index against migrated objects
    Validate {
        #[arg(long)]
        legacy_index: Option<String>,

        #[arg(long)]
        lookup: Option<String>,
    },
}

impl GlobalArgs {
    fn url(&self) -> Option<&str> {
        self.redis_url.as_deref().or(self.valkey_url.as_deref())
    }

    fn config(&self) -> ConfigBuilder {
        ConfigBuilder::new()
            .input_dir(&self.input_dir)
            .output_dir(&self.output_dir)
            .temp_db(self.temp_db)
    }

    fn models(&self, registry: &EntityRegistry) -> Vec<String> {
        if self.models.is_empty() {
            registry.models().into_iter().map(str::to_owned).collect()
        } else {
            self.models.clone()
        }
    }
}

#[cfg(feature = "redis")]
async fn connect(url: &str) -> anyhow::Result<Store> {
    Ok(Store::redis(url).await?)
}

#[cfg(not(feature = "redis"))]
async fn connect(url: &str) -> anyhow::Result<Store> {
    anyhow::bail!("built without redis support, cannot connect to `{url}`")
}

/// Target store, required by commands that read or write it.
async fn target(global: &GlobalArgs) -> anyhow::Result<Store> {
    let Some(url) = global.url() else {
        anyhow::bail!("--redis-url or --valkey-url is required");
    };

    let store = connect(url).await?;
    store.ping().await?;

    Ok(store)
}

/// Staging works against the target when one is given, in memory otherwise.
async fn scratch(global: &GlobalArgs, config: &MigrateConfig) -> anyhow::Result<Staging> {
    let store = match global.url() {
        Some(_) => target(global).await?,
        None => Store::memory(),
    };

    Ok(Staging::new(
        store.select(config.temp_db).await?,
        config.temp_prefix.clone(),
    ))
}

fn report(stats: &RunStats, config: &MigrateConfig) -> u8 {
    print!("{}", stats.summary(config.error_sample));

    u8::from(stats.has_errors())
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let registry = EntityRegistry::default_v2();
    let global = &cli.global;
    let models = global.models(&registry);
    let selected = models.iter().map(String::as_str).collect::<Vec<_>>();
    let plan: Vec<&EntitySpec> = registry.plan(&selected)?;
    let mut stats = RunStats::default();

    match &cli.command {
        Command::Export => {
            let config = global.config().build();
            let store = target(global).await?;
            let layout = ExportLayout::new(&config.output_dir);

            for spec in plan.iter().filter(|spec| spec.origin == Origin::Dump) {
                let written = dump_pattern(
                    &store,
                    &spec.v1.glob(),
                    config.scan_count,
                    &layout.dump_path(spec.model),
                )
                .await?;
                println!("{:>24}: {written}", spec.model);
            }

            Ok(0)
        }
        Command::Transform | Command::Enrich | Command::Indexes => {
            let config = global.config().build();
            config.validate()?;
            let staging = scratch(global, &config).await?;
            let pipeline = Pipeline::new(&registry, &config, &staging);

            let res = async {
                for spec in &plan {
                    match &cli.command {
                        Command::Transform => pipeline.transform_model(spec, &mut stats).await?,
                        Command::Enrich => pipeline.enrich_model(spec, &mut stats).await?,
                        _ => pipeline.index_model(spec, &mut stats).await?,
                    };
                }

                Ok::<_, keyshift::MigrateError>(())
            }
            .await;

            stats.add(Stat::StagingKeysCleaned, staging.cleanup().await?);
            res?;

            Ok(report(&stats, &config))
        }
        Command::Load {
            dry_run,
            skip_indexes,
            skip_records,
            no_backup,
        } => {
            let config = global
                .config()
                .dry_run(*dry_run)
                .skip_indexes(*skip_indexes)
                .skip_records(*skip_records)
                .backup(!*no_backup)
                .build();
            config.validate()?;

            let store = target(global).await?;
            let staging = Staging::new(store.select(config.temp_db).await?, config.temp_prefix.clone());
            let loader = Loader::new(store, &staging, &config, ExportLayout::new(&config.input_dir));

            let res = loader.load(&plan, &mut stats).await;
            stats.add(Stat::StagingKeysCleaned, staging.cleanup().await?);
            res?;

            Ok(report(&stats, &config))
        }
        Command::Migrate {
            check,
            run,
            skip_indexes,
            skip_records,
            ..
        } => {
            let mode = match (*check, *run) {
                (true, _) => RunMode::Check,
                (_, true) => RunMode::Run,
                _ => RunMode::DryRun,
            };
            let config = global
                .config()
                .skip_indexes(*skip_indexes)
                .skip_records(*skip_records)
                .build();
            let sample = config.error_sample;

            let store = target(global).await?;
            let migration = PipelineMigration::new(store, registry.clone(), config, models);
            let outcome = Controller::new(migration).execute(mode).await;

            print!("{}", outcome.summary(sample));

            Ok(outcome.exit_code() as u8)
        }
        Command::Validate {
            legacy_index,
            lookup,
        } => {
            let [spec] = plan.as_slice() else {
                anyhow::bail!("validate needs exactly one --model");
            };

            let store = target(global).await?;
            let mut validator = Validator::new(store, spec)?;
            if let Some(key) = legacy_index.clone() {
                validator = validator.legacy_index(key);
            }
            if let Some(key) = lookup.clone() {
                validator = validator.lookup(key);
            }

            let report = validator.validate().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            Ok(report.exit_code() as u8)
        }
    }
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let mut env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("warn,keyshift=info"))?;

    if verbose {
        env_filter = env_filter.add_directive("keyshift=debug".parse()?);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    if let Err(err) = init_tracing(cli.global.verbose) {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
